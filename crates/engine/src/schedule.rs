//! Next-occurrence scheduler for the timer trigger.
//!
//! The schedule is a time of day plus a day selector. The next occurrence is
//! found by scanning a few calendar days forward and keeping the first day
//! the selector accepts whose slot is still ahead of `now`.
//!
//! Parity follows the calendar, not an elapsed-day counter, so month ends
//! produce back-to-back days of the same class:
//!
//! ```text
//! Oct 30 (even)  Oct 31 (odd)  Nov 1 (odd)  Nov 2 (even)
//! ```

use time::{Duration, PrimitiveDateTime};
use tracing::debug;

use crate::config::{ConfigError, WateringConfig};

/// Today plus three more days. The longest gap between two days of one
/// parity class is three (the 30th of a 31-day month to the 2nd), so four
/// candidates always contain a match.
const LOOKAHEAD_DAYS: i64 = 4;

/// Next timer-triggered watering strictly after `now`, or `None` when the
/// timer trigger is disabled.
pub fn next_occurrence(
    now: PrimitiveDateTime,
    config: &WateringConfig,
) -> Result<Option<PrimitiveDateTime>, ConfigError> {
    config.validate()?;
    if !config.timer_enabled {
        return Ok(None);
    }

    let at = config.time_of_day.time();
    let next = (0..LOOKAHEAD_DAYS)
        .filter_map(|offset| now.date().checked_add(Duration::days(offset)))
        .filter(|day| config.day_selector.matches(day.day()))
        .map(|day| PrimitiveDateTime::new(day, at))
        .find(|candidate| *candidate > now);

    debug!(
        %now,
        days = %config.day_selector,
        when = %config.time_of_day,
        next = ?next,
        "next timer occurrence"
    );

    Ok(next)
}

// ===========================================================================
// Tests
// ===========================================================================
