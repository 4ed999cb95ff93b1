//! Watering decision engine for a single-valve irrigation controller.
//!
//! The engine is pure: callers pass in the time, the configuration snapshot,
//! the moisture reading and the button level, and get back the transitions
//! to act on. No clocks are read and no hardware is touched here.

pub mod arbiter;
pub mod clock;
pub mod config;
pub mod machine;
pub mod schedule;
pub mod status;

pub use arbiter::{Arbiter, ButtonEdgeState, TickResult, DEFAULT_LONG_PRESS, DEFAULT_TICK_INTERVAL};
pub use clock::Moment;
pub use config::{ConfigError, DaySelector, TimeOfDay, WateringConfig, ADC_MAX};
pub use machine::{
    Outcome, Reason, Transition, ValveCommand, WateringEvent, WateringMachine, WateringState,
};
pub use schedule::next_occurrence;
pub use status::{format_next_timer, moisture_percent, next_sensor_description, Status};
