use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use waterer_engine::{Transition, WateringConfig, WateringEvent};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Everything the HTTP surface may see. The control loop owns the arbiter
/// and publishes a fresh [`Snapshot`] here every tick.
pub struct SystemState {
    pub started_at: Instant,
    /// Local wall-clock time the hub came up.
    pub startup: String,
    pub config: WateringConfig,
    pub snapshot: Snapshot,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub watering: bool,
    pub elapsed_seconds: Option<u64>,
    pub next_sensor: Option<String>,
    pub next_timer: Option<String>,
    pub moisture_raw: i64,
    pub moisture_percent: u8,
    pub display: Vec<String>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Watering,
    Config,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub startup: String,
    pub uptime_secs: u64,
    pub sensor: bool,
    pub timer: bool,
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(config: WateringConfig, startup: String) -> Self {
        Self {
            started_at: Instant::now(),
            startup,
            config,
            snapshot: Snapshot::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Record a watering start or stop.
    pub fn record_transition(&mut self, t: &Transition) {
        let what = match t.event {
            WateringEvent::Start => "started",
            WateringEvent::Stop => "stopped",
        };
        self.push_event(EventKind::Watering, format!("watering {what} ({})", t.reason));
    }

    /// Replace the configuration and note it in the ring.
    pub fn replace_config(&mut self, config: WateringConfig) {
        self.push_event(
            EventKind::Config,
            format!(
                "config updated: sensor={} timer={} at {} ({}) for {}s",
                config.sensor_enabled,
                config.timer_enabled,
                config.time_of_day,
                config.day_selector,
                config.duration_seconds
            ),
        );
        self.config = config;
    }

    pub fn publish(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            startup: self.startup.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            sensor: self.config.sensor_enabled,
            timer: self.config.timer_enabled,
            snapshot: self.snapshot.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
