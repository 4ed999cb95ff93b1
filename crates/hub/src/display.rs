//! Text lines for the front-panel display: address, clock, watering state
//! and moisture. Served through `/api/status` and traced at debug level.

use time::macros::format_description;
use time::PrimitiveDateTime;
use waterer_engine::{moisture_percent, Status};

/// `Mon Oct 19, 6:00:05AM`
fn format_clock(now: PrimitiveDateTime) -> String {
    now.format(format_description!(
        "[weekday repr:short] [month repr:short] [day padding:none], [hour repr:12 padding:none]:[minute]:[second][period]"
    ))
    .unwrap_or_else(|_| now.to_string())
}

pub fn lines(
    address: &str,
    now: PrimitiveDateTime,
    status: &Status,
    moisture_raw: i64,
) -> Vec<String> {
    let mut out = vec![format!("ADDR: {address}"), format_clock(now)];

    if status.is_watering {
        out.push(format!("WATERING: {}s", status.elapsed_seconds.unwrap_or(0)));
    } else {
        out.push("Next watering:".to_string());
        let next = status.next_watering_description();
        out.push(if next.is_empty() { "never".to_string() } else { next });
    }

    out.push(format!("Moisture: {}%", moisture_percent(moisture_raw)));
    out
}
