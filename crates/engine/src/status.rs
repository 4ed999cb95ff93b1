//! Status fields for the display and the HTTP API, and the text formatting
//! both share.

use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::config::{WateringConfig, ADC_MAX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub is_watering: bool,
    /// Whole seconds since the current watering began.
    pub elapsed_seconds: Option<u64>,
    /// `None` when the sensor trigger is disabled.
    pub next_sensor: Option<String>,
    /// `None` when the timer trigger is disabled.
    pub next_timer: Option<PrimitiveDateTime>,
}

impl Status {
    pub fn next_timer_description(&self) -> Option<String> {
        self.next_timer.map(format_next_timer)
    }

    /// Sensor and timer predictions on one line, e.g.
    /// `when moisture < 45%, Mon Oct 19, 6:00AM`.
    pub fn next_watering_description(&self) -> String {
        [self.next_sensor.clone(), self.next_timer_description()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Raw 16-bit reading as a whole percentage of full scale.
pub fn moisture_percent(raw: i64) -> u8 {
    (100 * raw.clamp(0, ADC_MAX) / ADC_MAX) as u8
}

pub fn next_sensor_description(config: &WateringConfig) -> Option<String> {
    config.sensor_enabled.then(|| {
        format!(
            "when moisture < {}%",
            moisture_percent(config.dry_threshold)
        )
    })
}

/// `Mon Oct 19, 6:00AM`
pub fn format_next_timer(ts: PrimitiveDateTime) -> String {
    ts.format(format_description!(
        "[weekday repr:short] [month repr:short] [day padding:none], [hour repr:12 padding:none]:[minute][period]"
    ))
    .unwrap_or_else(|_| ts.to_string())
}
