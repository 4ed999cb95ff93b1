use std::time::{Duration, Instant};
use time::PrimitiveDateTime;

/// One reading of both clocks, taken once per tick so every decision in
/// that tick sees the same time.
///
/// `wall` is local calendar time and drives the schedule and the sensor
/// cooldown. `mono` drives watering duration and button hold time, which
/// must not jump when the wall clock is adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub wall: PrimitiveDateTime,
    pub mono: Instant,
}

impl Moment {
    pub fn new(wall: PrimitiveDateTime, mono: Instant) -> Self {
        Self { wall, mono }
    }

    /// Both clocks moved forward by the same amount.
    pub fn advance(self, by: Duration) -> Self {
        Self {
            wall: self.wall + by,
            mono: self.mono + by,
        }
    }
}
