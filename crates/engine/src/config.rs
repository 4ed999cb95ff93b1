//! Watering configuration: the snapshot the decision engine reads each tick,
//! plus the semantic checks that guard it.
//!
//! Field names on the wire (`sensor`, `dry`, `cooldown_min`, ...) match the
//! settings file and the HTTP form, so the same struct round-trips through
//! both without an adapter layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::Time;

/// Full scale of a 16-bit moisture reading.
pub const ADC_MAX: i64 = 65535;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("time of day {0:?} is not in H:MMAM / H:MMPM form")]
    TimeOfDay(String),

    #[error("day selector {0:?} must be one of: all, odd, even")]
    DaySelector(String),

    #[error("dry threshold {0} out of range [0, {ADC_MAX}]")]
    DryThreshold(i64),

    #[error("cooldown_min must not be negative, got {0}")]
    Cooldown(i64),

    #[error("duration_sec must be positive, got {0}")]
    Duration(i64),
}

// ---------------------------------------------------------------------------
// Day selector
// ---------------------------------------------------------------------------

/// Which calendar days the timer schedule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaySelector {
    All,
    Odd,
    Even,
}

impl DaySelector {
    /// Parity is taken from the calendar day-of-month, so the 31st and the
    /// 1st both count as odd days.
    pub fn matches(self, day_of_month: u8) -> bool {
        match self {
            Self::All => true,
            Self::Odd => day_of_month % 2 == 1,
            Self::Even => day_of_month % 2 == 0,
        }
    }
}

impl FromStr for DaySelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "odd" => Ok(Self::Odd),
            "even" => Ok(Self::Even),
            _ => Err(ConfigError::DaySelector(s.to_string())),
        }
    }
}

impl fmt::Display for DaySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Odd => write!(f, "odd"),
            Self::Even => write!(f, "even"),
        }
    }
}

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

/// Local wall-clock time with minute resolution, written `6:00AM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(Time);

impl TimeOfDay {
    /// `hour` is 0-23.
    pub fn from_hm(hour: u8, minute: u8) -> Result<Self, ConfigError> {
        Time::from_hms(hour, minute, 0)
            .map(Self)
            .map_err(|_| ConfigError::TimeOfDay(format!("{hour:02}:{minute:02}")))
    }

    pub fn time(self) -> Time {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::TimeOfDay(s.to_string());

        let upper = s.trim().to_ascii_uppercase();
        let (clock, pm) = if let Some(rest) = upper.strip_suffix("PM") {
            (rest, true)
        } else if let Some(rest) = upper.strip_suffix("AM") {
            (rest, false)
        } else {
            return Err(bad());
        };

        let (h, m) = clock.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(bad());
        }
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        if !(1..=12).contains(&hour) || minute > 59 {
            return Err(bad());
        }

        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        Self::from_hm(hour24, minute).map_err(|_| bad())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hour, minute) = (self.0.hour(), self.0.minute());
        let meridiem = if hour < 12 { "AM" } else { "PM" };
        let hour12 = match hour % 12 {
            0 => 12,
            h => h,
        };
        write!(f, "{hour12}:{minute:02}{meridiem}")
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

// ---------------------------------------------------------------------------
// Configuration snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WateringConfig {
    #[serde(rename = "sensor")]
    pub sensor_enabled: bool,
    /// Raw reading at or below which the soil counts as dry.
    #[serde(rename = "dry")]
    pub dry_threshold: i64,
    #[serde(rename = "cooldown_min")]
    pub cooldown_minutes: i64,
    #[serde(rename = "timer")]
    pub timer_enabled: bool,
    #[serde(rename = "when")]
    pub time_of_day: TimeOfDay,
    #[serde(rename = "days")]
    pub day_selector: DaySelector,
    #[serde(rename = "duration_sec")]
    pub duration_seconds: i64,
}

impl WateringConfig {
    /// Every semantic violation in this snapshot, in field order.
    pub fn problems(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if !(0..=ADC_MAX).contains(&self.dry_threshold) {
            errors.push(ConfigError::DryThreshold(self.dry_threshold));
        }
        if self.cooldown_minutes < 0 {
            errors.push(ConfigError::Cooldown(self.cooldown_minutes));
        }
        if self.duration_seconds <= 0 {
            errors.push(ConfigError::Duration(self.duration_seconds));
        }
        errors
    }

    /// First violation, if any.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.problems().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn cooldown(&self) -> time::Duration {
        time::Duration::minutes(self.cooldown_minutes.max(0))
    }

    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.duration_seconds.max(0) as u64)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
