//! Watering state machine.
//!
//! ```text
//!          start(reason)                 stop(reason)
//! Idle ────────────────────▶ Watering ────────────────────▶ Idle
//!  │ stop() is a no-op         │ start() is a no-op
//! ```
//!
//! Every real transition yields a [`Transition`] that carries the valve
//! command and doubles as the log event; redundant requests yield
//! [`Outcome::Unchanged`] and emit nothing.

use std::fmt;
use std::time::{Duration, Instant};
use time::PrimitiveDateTime;
use tracing::debug;

use crate::clock::Moment;

// ---------------------------------------------------------------------------
// Transition payloads
// ---------------------------------------------------------------------------

/// What asked for the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Sensor,
    Timer,
    Button,
    /// Manual request through the HTTP API.
    WebUi,
    /// Controller going down.
    Shutdown,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Timer => "timer",
            Self::Button => "button",
            Self::WebUi => "webui",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WateringEvent {
    Start,
    Stop,
}

/// A state change, stamped with the wall-clock time it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event: WateringEvent,
    pub reason: Reason,
    pub at: PrimitiveDateTime,
}

impl Transition {
    pub fn valve(&self) -> ValveCommand {
        match self.event {
            WateringEvent::Start => ValveCommand::Open,
            WateringEvent::Stop => ValveCommand::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Changed(Transition),
    Unchanged,
}

impl Outcome {
    pub fn transition(self) -> Option<Transition> {
        match self {
            Self::Changed(t) => Some(t),
            Self::Unchanged => None,
        }
    }

    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WateringState {
    #[default]
    Idle,
    Watering {
        since: Instant,
    },
}

#[derive(Debug, Default)]
pub struct WateringMachine {
    state: WateringState,
}

impl WateringMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WateringState {
        self.state
    }

    pub fn is_watering(&self) -> bool {
        matches!(self.state, WateringState::Watering { .. })
    }

    pub fn started_at(&self) -> Option<Instant> {
        match self.state {
            WateringState::Watering { since } => Some(since),
            WateringState::Idle => None,
        }
    }

    pub fn start(&mut self, reason: Reason, now: Moment) -> Outcome {
        if self.is_watering() {
            debug!(%reason, "start ignored: already watering");
            return Outcome::Unchanged;
        }
        self.state = WateringState::Watering { since: now.mono };
        debug!(%reason, "watering started");
        Outcome::Changed(Transition {
            event: WateringEvent::Start,
            reason,
            at: now.wall,
        })
    }

    pub fn stop(&mut self, reason: Reason, now: Moment) -> Outcome {
        if !self.is_watering() {
            debug!(%reason, "stop ignored: already idle");
            return Outcome::Unchanged;
        }
        self.state = WateringState::Idle;
        debug!(%reason, "watering stopped");
        Outcome::Changed(Transition {
            event: WateringEvent::Stop,
            reason,
            at: now.wall,
        })
    }

    /// Time since watering started; zero while idle.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.state {
            WateringState::Watering { since } => now.saturating_duration_since(since),
            WateringState::Idle => Duration::ZERO,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
