//! Control loop: owns the arbiter and the hardware, ticks on a fixed
//! interval, and is the only place watering state changes.
//!
//! Each tick:
//!
//! ```text
//! drain manual requests ─▶ read sensor + button ─▶ evaluate_tick
//!        │                                              │
//!        └──────────────▶ transitions ◀─────────────────┘
//!                             │
//!             valve · event log · shared ring · snapshot
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use waterer_engine::{
    next_sensor_description, Arbiter, ConfigError, Moment, Reason, Status, Transition,
    ValveCommand, WateringConfig, ADC_MAX,
};

use crate::button::Button;
use crate::clock::LocalClock;
use crate::db::Db;
use crate::display;
use crate::moisture::MoistureSensor;
use crate::state::{SharedState, Snapshot};
use crate::valve::Valve;

/// Manual start/stop from the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualRequest {
    Start,
    Stop,
}

pub type RequestTx = mpsc::Sender<ManualRequest>;

/// Depth of the manual request queue.
pub const REQUEST_QUEUE: usize = 16;

pub(crate) struct Hardware {
    pub(crate) valve: Valve,
    pub(crate) button: Button,
    pub(crate) moisture: MoistureSensor,
}

pub(crate) struct Controller {
    arbiter: Arbiter,
    hw: Hardware,
    clock: LocalClock,
    db: Db,
    shared: SharedState,
    requests: mpsc::Receiver<ManualRequest>,
    address: String,
    last_moisture: Option<i64>,
    last_config_error: Option<ConfigError>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        arbiter: Arbiter,
        hw: Hardware,
        clock: LocalClock,
        db: Db,
        shared: SharedState,
        requests: mpsc::Receiver<ManualRequest>,
        address: String,
    ) -> Self {
        Self {
            arbiter,
            hw,
            clock,
            db,
            shared,
            requests,
            address,
            last_moisture: None,
            last_config_error: None,
        }
    }

    /// One tick against the real clock and hardware.
    pub(crate) async fn step(&mut self) {
        let now = self.clock.now();

        let moisture = match self.hw.moisture.read() {
            Ok(raw) => {
                self.last_moisture = Some(raw);
                raw
            }
            Err(e) => {
                error!("moisture read failed: {e:#}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("moisture read failed: {e:#}"));
                // Without any reading yet, report saturated soil so the
                // sensor trigger stays quiet.
                self.last_moisture.unwrap_or(ADC_MAX)
            }
        };
        let button = self.hw.button.is_down();

        self.decide(now, moisture, button).await;
    }

    /// Decision half of a tick, with the inputs already sampled.
    pub(crate) async fn decide(&mut self, now: Moment, moisture: i64, button_is_down: bool) {
        let mut transitions = Vec::new();

        while let Ok(req) = self.requests.try_recv() {
            let outcome = match req {
                ManualRequest::Start => self.arbiter.request_start(Reason::WebUi, now),
                ManualRequest::Stop => self.arbiter.request_stop(Reason::WebUi, now),
            };
            debug!(?req, changed = outcome.is_changed(), "manual request");
            transitions.extend(outcome.transition());
        }

        let config = self.shared.read().await.config.clone();

        match self
            .arbiter
            .evaluate_tick(now, &config, moisture, button_is_down)
        {
            Ok(result) => {
                transitions.extend(result.transitions);
                self.last_config_error = None;
            }
            Err(e) => self.config_error(e).await,
        }

        for t in &transitions {
            self.apply(t).await;
        }

        let status = self.status(now, &config);
        let lines = display::lines(&self.address, now.wall, &status, moisture);
        debug!(display = ?lines, "tick");

        self.shared.write().await.publish(Snapshot {
            watering: status.is_watering,
            elapsed_seconds: status.elapsed_seconds,
            next_sensor: status.next_sensor.clone(),
            next_timer: status.next_timer_description(),
            moisture_raw: moisture,
            moisture_percent: waterer_engine::moisture_percent(moisture),
            display: lines,
        });
    }

    async fn apply(&mut self, t: &Transition) {
        let cmd = t.valve();
        self.hw.valve.apply(cmd);
        self.hw.moisture.set_watering(cmd == ValveCommand::Open);

        info!(event = ?t.event, reason = %t.reason, "watering transition");

        if let Err(e) = self.db.record_transition(t).await {
            error!("event log append failed: {e:#}");
            self.shared
                .write()
                .await
                .record_error(format!("event log append failed: {e:#}"));
        }
        self.shared.write().await.record_transition(t);
    }

    /// Logged once per distinct error so a bad config does not flood the ring
    /// every tick.
    async fn config_error(&mut self, e: ConfigError) {
        if self.last_config_error.as_ref() == Some(&e) {
            return;
        }
        warn!("tick skipped: {e}");
        self.shared
            .write()
            .await
            .record_error(format!("tick skipped: {e}"));
        self.last_config_error = Some(e);
    }

    fn status(&self, now: Moment, config: &WateringConfig) -> Status {
        self.arbiter.status(now, config).unwrap_or_else(|_| Status {
            is_watering: self.arbiter.is_watering(),
            elapsed_seconds: self
                .arbiter
                .is_watering()
                .then(|| self.arbiter.machine().elapsed(now.mono).as_secs()),
            next_sensor: next_sensor_description(config),
            next_timer: None,
        })
    }

    /// Stop any watering in progress so the stop lands in the event log,
    /// then force the relay closed.
    pub(crate) async fn shutdown(&mut self) {
        let now = self.clock.now();
        if let Some(t) = self.arbiter.request_stop(Reason::Shutdown, now).transition() {
            self.apply(&t).await;
        }
        let was_open = self.hw.valve.is_open();
        self.hw.valve.apply(ValveCommand::Close);
        info!(was_open, "valve closed for shutdown");
    }

    #[cfg(test)]
    pub(crate) fn hardware(&mut self) -> &mut Hardware {
        &mut self.hw
    }

    #[cfg(test)]
    pub(crate) fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the control loop. Never returns; race it against a shutdown signal.
pub(crate) async fn run(controller: &mut Controller, tick: Duration) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(tick_ms = tick.as_millis() as u64, "control loop started");
    controller
        .shared
        .write()
        .await
        .record_system("control loop started".to_string());

    loop {
        ticker.tick().await;
        controller.step().await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::settings::ControllerSettings;
    use crate::state::tests::sample_config;
    use crate::state::{EventKind, SystemState};
    use std::time::Instant;
    use time::macros::datetime;
    use time::UtcOffset;

    const WET: i64 = 60000;
    const DRY: i64 = 1000;

    struct Fixture {
        ctl: Controller,
        tx: RequestTx,
        shared: SharedState,
        db: Db,
    }

    async fn fixture(config: WateringConfig) -> Fixture {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let shared = SystemState::new(config, "boot".into()).shared();
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let hw = Hardware {
            valve: Valve::new(18, false).unwrap(),
            button: Button::new(23).unwrap(),
            moisture: MoistureSensor::open(&ControllerSettings::default()).unwrap(),
        };
        let ctl = Controller::new(
            Arbiter::default(),
            hw,
            LocalClock::fixed(UtcOffset::UTC),
            db.clone(),
            shared.clone(),
            rx,
            "10.0.0.2".into(),
        );
        Fixture { ctl, tx, shared, db }
    }

    fn at(wall: time::PrimitiveDateTime) -> Moment {
        Moment::new(wall, Instant::now())
    }

    fn sensor_only() -> WateringConfig {
        WateringConfig {
            timer_enabled: false,
            ..sample_config()
        }
    }

    #[tokio::test]
    async fn dry_soil_opens_valve_and_logs() {
        let mut f = fixture(sensor_only()).await;

        f.ctl.decide(at(datetime!(2026-10-19 8:00)), DRY, false).await;

        assert!(f.ctl.hardware().valve.is_open());
        let logs = f.db.list().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, "watering");
        assert_eq!(logs[0].reason.as_deref(), Some("sensor"));

        let st = f.shared.read().await;
        assert!(st.snapshot.watering);
        assert_eq!(st.snapshot.display[2], "WATERING: 0s");
        assert_eq!(st.events.back().unwrap().kind, EventKind::Watering);
    }

    #[tokio::test]
    async fn wet_soil_leaves_valve_closed() {
        let mut f = fixture(sensor_only()).await;

        f.ctl.decide(at(datetime!(2026-10-19 8:00)), WET, false).await;

        assert!(!f.ctl.hardware().valve.is_open());
        assert!(f.db.list().await.unwrap().is_empty());
        let st = f.shared.read().await;
        assert!(!st.snapshot.watering);
        assert_eq!(st.snapshot.next_sensor.as_deref(), Some("when moisture < 44%"));
        assert_eq!(st.snapshot.moisture_percent, 91);
    }

    #[tokio::test]
    async fn manual_requests_are_tagged_webui() {
        let mut f = fixture(sensor_only()).await;
        let now = at(datetime!(2026-10-19 8:00));

        f.tx.send(ManualRequest::Start).await.unwrap();
        f.ctl.decide(now, WET, false).await;
        assert!(f.ctl.hardware().valve.is_open());

        f.tx.send(ManualRequest::Stop).await.unwrap();
        f.ctl.decide(now.advance(Duration::from_secs(5)), WET, false).await;
        assert!(!f.ctl.hardware().valve.is_open());

        let reasons: Vec<_> = f
            .db
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.kind, e.reason.unwrap_or_default()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("watering".to_string(), "webui".to_string()),
                ("stopping".to_string(), "webui".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn queued_start_twice_logs_once() {
        let mut f = fixture(sensor_only()).await;

        f.tx.send(ManualRequest::Start).await.unwrap();
        f.tx.send(ManualRequest::Start).await.unwrap();
        f.ctl.decide(at(datetime!(2026-10-19 8:00)), WET, false).await;

        assert_eq!(f.db.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn watering_expires_after_duration() {
        let mut f = fixture(sensor_only()).await;
        let start = at(datetime!(2026-10-19 8:00));

        f.ctl.decide(start, DRY, false).await;
        f.ctl.decide(start.advance(Duration::from_secs(60)), WET, false).await;
        assert!(f.ctl.hardware().valve.is_open());

        f.ctl.decide(start.advance(Duration::from_secs(61)), WET, false).await;
        assert!(!f.ctl.hardware().valve.is_open());

        let last = f.db.list().await.unwrap().pop().unwrap();
        assert_eq!(last.kind, "stopping");
        assert_eq!(last.reason.as_deref(), Some("timer"));
    }

    #[tokio::test]
    async fn config_change_takes_effect_next_tick() {
        let mut f = fixture(WateringConfig {
            sensor_enabled: false,
            ..sensor_only()
        })
        .await;
        let now = at(datetime!(2026-10-19 8:00));

        f.ctl.decide(now, DRY, false).await;
        assert!(!f.ctl.hardware().valve.is_open());

        f.shared.write().await.replace_config(sensor_only());
        f.ctl.decide(now.advance(Duration::from_secs(1)), DRY, false).await;
        assert!(f.ctl.hardware().valve.is_open());
    }

    #[tokio::test]
    async fn invalid_config_is_reported_once() {
        let mut f = fixture(WateringConfig {
            duration_seconds: 0,
            ..sensor_only()
        })
        .await;
        let now = at(datetime!(2026-10-19 8:00));

        for i in 0..3 {
            f.ctl.decide(now.advance(Duration::from_secs(i)), DRY, false).await;
        }

        assert!(!f.ctl.arbiter().is_watering());
        let st = f.shared.read().await;
        let errors = st
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Error)
            .count();
        assert_eq!(errors, 1);
        assert_eq!(st.snapshot.display[2], "Next watering:");
    }

    #[tokio::test]
    async fn step_reads_simulated_hardware() {
        let mut f = fixture(WateringConfig {
            sensor_enabled: false,
            timer_enabled: false,
            ..sample_config()
        })
        .await;

        f.ctl.step().await;

        let st = f.shared.read().await;
        assert_eq!(st.snapshot.display[0], "ADDR: 10.0.0.2");
        assert!((0..=ADC_MAX).contains(&st.snapshot.moisture_raw));
    }

    #[tokio::test]
    async fn shutdown_closes_valve() {
        let mut f = fixture(sensor_only()).await;
        f.ctl.decide(at(datetime!(2026-10-19 8:00)), DRY, false).await;
        assert!(f.ctl.hardware().valve.is_open());

        f.ctl.shutdown().await;
        assert!(!f.ctl.hardware().valve.is_open());
        assert!(!f.ctl.arbiter().is_watering());

        let logs = f.db.list().await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.kind, "stopping");
        assert_eq!(last.reason.as_deref(), Some("shutdown"));
    }

    #[tokio::test]
    async fn shutdown_while_idle_logs_nothing() {
        let mut f = fixture(sensor_only()).await;
        f.ctl.shutdown().await;
        assert!(!f.ctl.hardware().valve.is_open());
        assert!(f.db.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn button_long_press_starts() {
        let mut f = fixture(sensor_only()).await;
        let t0 = at(datetime!(2026-10-19 8:00));

        f.ctl.decide(t0, WET, true).await;
        f.ctl.decide(t0.advance(Duration::from_secs(4)), WET, false).await;

        assert!(f.ctl.hardware().valve.is_open());
        let logs = f.db.list().await.unwrap();
        assert_eq!(logs[0].reason.as_deref(), Some("button"));
    }
}
