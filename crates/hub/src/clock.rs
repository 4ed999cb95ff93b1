//! Local wall clock for the control loop and the event log.
//!
//! The UTC offset is looked up on every reading, so a daylight-saving change
//! moves the schedule, the display and the log stamps without a restart.

use chrono::{Local, TimeZone};
use std::sync::Arc;
use std::time::Instant;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{info, warn};
use waterer_engine::Moment;

/// UTC offset in force at a given UTC instant.
type OffsetRule = Arc<dyn Fn(OffsetDateTime) -> UtcOffset + Send + Sync>;

#[derive(Clone)]
pub struct LocalClock {
    offset_at: OffsetRule,
}

impl LocalClock {
    /// A configured offset is applied as-is all year; otherwise the system
    /// time zone is followed.
    pub fn new(offset_min: Option<i64>) -> Self {
        match offset_min {
            Some(min) => match UtcOffset::from_whole_seconds((min * 60) as i32) {
                Ok(offset) => {
                    info!(%offset, "clock using fixed utc offset");
                    Self::fixed(offset)
                }
                Err(e) => {
                    warn!(min, "invalid utc offset, using UTC: {e}");
                    Self::fixed(UtcOffset::UTC)
                }
            },
            None => {
                info!("clock following system time zone");
                Self::with_rule(system_offset)
            }
        }
    }

    pub fn fixed(offset: UtcOffset) -> Self {
        Self::with_rule(move |_| offset)
    }

    pub fn with_rule(rule: impl Fn(OffsetDateTime) -> UtcOffset + Send + Sync + 'static) -> Self {
        Self {
            offset_at: Arc::new(rule),
        }
    }

    pub fn wall_at(&self, utc: OffsetDateTime) -> PrimitiveDateTime {
        let local = utc.to_offset((self.offset_at)(utc));
        PrimitiveDateTime::new(local.date(), local.time())
    }

    pub fn wall(&self) -> PrimitiveDateTime {
        self.wall_at(OffsetDateTime::now_utc())
    }

    pub fn now(&self) -> Moment {
        Moment::new(self.wall(), Instant::now())
    }
}

/// Offset of the system time zone at `utc`. chrono reads `TZ` and the tz
/// database itself, so this is safe from any thread. Falls back to UTC.
fn system_offset(utc: OffsetDateTime) -> UtcOffset {
    chrono::DateTime::from_timestamp(utc.unix_timestamp(), 0)
        .map(|dt| {
            Local
                .offset_from_utc_datetime(&dt.naive_utc())
                .local_minus_utc()
        })
        .and_then(|secs| UtcOffset::from_whole_seconds(secs).ok())
        .unwrap_or(UtcOffset::UTC)
}
