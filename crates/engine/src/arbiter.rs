//! Trigger arbiter: one call per control-loop tick decides whether the
//! sensor, the timer or the pushbutton starts or stops watering.
//!
//! Evaluation order is fixed and doubles as priority:
//!
//! 1. sensor (dry soil, outside the cooldown)
//! 2. timer (scheduled slot inside the look-ahead window)
//! 3. button release (long press starts, short press stops)
//! 4. duration expiry
//!
//! Sensor and timer both require the machine to be idle, and the machine is
//! re-checked after each step, so at most one of them can start a watering
//! in a given tick.

use std::time::{Duration, Instant};
use time::PrimitiveDateTime;
use tracing::debug;

use crate::clock::Moment;
use crate::config::{ConfigError, WateringConfig, ADC_MAX};
use crate::machine::{Outcome, Reason, Transition, WateringMachine};
use crate::schedule::next_occurrence;
use crate::status::{next_sensor_description, Status};

/// Control-loop period the look-ahead window is sized for.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(750);

/// How long the button must be held for a press to start watering.
pub const DEFAULT_LONG_PRESS: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Button edges
// ---------------------------------------------------------------------------

/// A single outstanding press of the pushbutton.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonEdgeState {
    pub pressed: bool,
    pub press_started_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonEdge {
    Pressed,
    Released { held: Duration },
}

impl ButtonEdgeState {
    fn update(&mut self, is_down: bool, now: Instant) -> Option<ButtonEdge> {
        match (self.pressed, is_down) {
            (false, true) => {
                self.pressed = true;
                self.press_started_at = Some(now);
                Some(ButtonEdge::Pressed)
            }
            (true, false) => {
                let held = self
                    .press_started_at
                    .take()
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or_default();
                self.pressed = false;
                Some(ButtonEdge::Released { held })
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickResult {
    pub is_watering: bool,
    /// In the order they happened. Usually empty, at most a start and a stop.
    pub transitions: Vec<Transition>,
}

impl TickResult {
    pub fn transitioned(&self) -> bool {
        !self.transitions.is_empty()
    }

    /// Reason of the last transition this tick.
    pub fn reason(&self) -> Option<Reason> {
        self.transitions.last().map(|t| t.reason)
    }
}

// ---------------------------------------------------------------------------
// Arbiter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Arbiter {
    machine: WateringMachine,
    last_sensor_watering: Option<PrimitiveDateTime>,
    button: ButtonEdgeState,
    tick_interval: Duration,
    long_press: Duration,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL, DEFAULT_LONG_PRESS)
    }
}

impl Arbiter {
    pub fn new(tick_interval: Duration, long_press: Duration) -> Self {
        Self {
            machine: WateringMachine::new(),
            last_sensor_watering: None,
            button: ButtonEdgeState::default(),
            tick_interval,
            long_press,
        }
    }

    pub fn is_watering(&self) -> bool {
        self.machine.is_watering()
    }

    pub fn machine(&self) -> &WateringMachine {
        &self.machine
    }

    pub fn button(&self) -> ButtonEdgeState {
        self.button
    }

    pub fn last_sensor_watering(&self) -> Option<PrimitiveDateTime> {
        self.last_sensor_watering
    }

    /// Run one control-loop evaluation. An invalid `config` fails before
    /// anything is touched, so the next tick with a good config picks up
    /// exactly where this one would have.
    pub fn evaluate_tick(
        &mut self,
        now: Moment,
        config: &WateringConfig,
        moisture_reading: i64,
        button_is_down: bool,
    ) -> Result<TickResult, ConfigError> {
        let next_timer = next_occurrence(now.wall, config)?;
        let moisture = moisture_reading.clamp(0, ADC_MAX);
        let mut transitions = Vec::new();

        if config.sensor_enabled && !self.machine.is_watering() && moisture <= config.dry_threshold
        {
            let ready = match self.last_sensor_watering {
                None => true,
                Some(last) => last
                    .checked_add(config.cooldown())
                    .is_some_and(|earliest| now.wall >= earliest),
            };
            if ready {
                transitions.extend(self.machine.start(Reason::Sensor, now).transition());
                self.last_sensor_watering = Some(now.wall);
            } else {
                debug!(moisture, dry = config.dry_threshold, "sensor dry, cooling down");
            }
        }

        if config.timer_enabled && !self.machine.is_watering() {
            if let Some(next) = next_timer {
                let horizon = now.wall + self.tick_interval * 2;
                if now.wall < next && next <= horizon {
                    transitions.extend(self.machine.start(Reason::Timer, now).transition());
                }
            }
        }

        if let Some(ButtonEdge::Released { held }) = self.button.update(button_is_down, now.mono) {
            let outcome = if held >= self.long_press {
                debug!(held_ms = held.as_millis() as u64, "button long press");
                self.machine.start(Reason::Button, now)
            } else {
                debug!(held_ms = held.as_millis() as u64, "button short press");
                self.machine.stop(Reason::Button, now)
            };
            transitions.extend(outcome.transition());
        }

        // Expiry is tagged as a timer stop whatever started the watering.
        if self.machine.is_watering() && self.machine.elapsed(now.mono) > config.duration() {
            transitions.extend(self.machine.stop(Reason::Timer, now).transition());
        }

        Ok(TickResult {
            is_watering: self.machine.is_watering(),
            transitions,
        })
    }

    /// Manual start from outside the tick (HTTP API).
    pub fn request_start(&mut self, reason: Reason, now: Moment) -> Outcome {
        self.machine.start(reason, now)
    }

    /// Manual stop from outside the tick (HTTP API).
    pub fn request_stop(&mut self, reason: Reason, now: Moment) -> Outcome {
        self.machine.stop(reason, now)
    }

    pub fn next_occurrence(
        &self,
        now: Moment,
        config: &WateringConfig,
    ) -> Result<Option<PrimitiveDateTime>, ConfigError> {
        next_occurrence(now.wall, config)
    }

    pub fn status(&self, now: Moment, config: &WateringConfig) -> Result<Status, ConfigError> {
        let next_timer = next_occurrence(now.wall, config)?;
        Ok(Status {
            is_watering: self.machine.is_watering(),
            elapsed_seconds: self
                .machine
                .is_watering()
                .then(|| self.machine.elapsed(now.mono).as_secs()),
            next_sensor: next_sensor_description(config),
            next_timer,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
