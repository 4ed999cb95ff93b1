use anyhow::{Context, Result};
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use waterer_engine::{DaySelector, TimeOfDay, WateringConfig, ADC_MAX};

use crate::clock::LocalClock;
use crate::control::{ManualRequest, RequestTx};
use crate::db::Db;
use crate::settings::{self, ControllerSettings, Settings};
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
    pub requests: RequestTx,
    pub clock: LocalClock,
    pub settings_path: Arc<PathBuf>,
    pub controller: Arc<ControllerSettings>,
    /// Accept and echo mutating requests without applying them.
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/water", post(post_water))
        .route("/api/logs", get(get_logs).delete(delete_logs))
        .layer(map_response(no_cache))
        .with_state(state)
}

async fn no_cache(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    res
}

fn internal_error(e: anyhow::Error) -> Response {
    error!("request failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{e:#}") })),
    )
        .into_response()
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

// -- Config ------------------------------------------------------------------

async fn get_config(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.config.clone())
}

/// Field names match the settings file keys. Everything arrives as text and
/// is parsed here so every bad field is reported at once.
#[derive(Debug, Deserialize)]
pub struct ConfigForm {
    pub sensor: String,
    pub dry: String,
    pub cooldown_min: String,
    pub timer: String,
    pub when: String,
    pub days: String,
    pub duration_sec: String,
}

fn parse_flag(name: &str, raw: &str, errors: &mut Vec<String>) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => true,
        "false" | "off" | "0" | "no" | "" => false,
        other => {
            errors.push(format!("{name}: expected true/false, got {other:?}"));
            false
        }
    }
}

fn parse_int(name: &str, raw: &str, errors: &mut Vec<String>) -> i64 {
    raw.trim().parse().unwrap_or_else(|_| {
        errors.push(format!("{name}: expected an integer, got {raw:?}"));
        0
    })
}

impl ConfigForm {
    pub fn into_config(self) -> std::result::Result<WateringConfig, Vec<String>> {
        let mut errors = Vec::new();

        let sensor_enabled = parse_flag("sensor", &self.sensor, &mut errors);
        let timer_enabled = parse_flag("timer", &self.timer, &mut errors);
        let dry_threshold = parse_int("dry", &self.dry, &mut errors);
        let cooldown_minutes = parse_int("cooldown_min", &self.cooldown_min, &mut errors);
        let duration_seconds = parse_int("duration_sec", &self.duration_sec, &mut errors);
        let time_of_day = self
            .when
            .trim()
            .parse::<TimeOfDay>()
            .map_err(|e| errors.push(e.to_string()));
        let day_selector = self
            .days
            .trim()
            .parse::<DaySelector>()
            .map_err(|e| errors.push(e.to_string()));

        let (Ok(time_of_day), Ok(day_selector)) = (time_of_day, day_selector) else {
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let config = WateringConfig {
            sensor_enabled,
            dry_threshold,
            cooldown_minutes,
            timer_enabled,
            time_of_day,
            day_selector,
            duration_seconds,
        };
        let problems = config.problems();
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(problems.iter().map(ToString::to_string).collect())
        }
    }
}

async fn post_config(
    State(app): State<AppState>,
    form: std::result::Result<Form<ConfigForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(f) => f,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "errors": [rejection.body_text()] })),
            )
                .into_response();
        }
    };
    debug!(?form, "POST /api/config");

    let config = match form.into_config() {
        Ok(c) => c,
        Err(errors) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response();
        }
    };

    if app.read_only {
        info!("read-only: config change ignored");
        let st = app.shared.read().await;
        return Json(st.config.clone()).into_response();
    }

    // Held across the save so the file and the live config change together.
    let mut st = app.shared.write().await;
    let settings = Settings {
        watering: config.clone(),
        controller: (*app.controller).clone(),
    };
    let path = Arc::clone(&app.settings_path);
    let saved = tokio::task::spawn_blocking(move || settings::save(path.as_path(), &settings))
        .await
        .context("settings save task failed")
        .and_then(|r| r);
    if let Err(e) = saved {
        return internal_error(e);
    }
    st.replace_config(config);
    info!(
        sensor = st.config.sensor_enabled,
        timer = st.config.timer_enabled,
        dry_pct = st.config.dry_threshold * 100 / ADC_MAX,
        "config updated"
    );
    Json(st.config.clone()).into_response()
}

// -- Manual watering ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WaterForm {
    pub action: String,
}

async fn post_water(
    State(app): State<AppState>,
    form: std::result::Result<Form<WaterForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(f) => f,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };
    let request = match form.action.as_str() {
        "water" => ManualRequest::Start,
        "stop" => ManualRequest::Stop,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "action": format!("ERROR! (action={other})") })),
            )
                .into_response();
        }
    };
    debug!(?request, "POST /api/water");

    if app.read_only {
        info!(?request, "read-only: manual request ignored");
    } else if app.requests.send(request).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "control loop is not running" })),
        )
            .into_response();
    }

    Json(json!({ "action": form.action })).into_response()
}

// -- Event log ---------------------------------------------------------------

async fn get_logs(State(app): State<AppState>) -> Response {
    match app.db.list().await {
        Ok(logs) => Json(json!({ "logs": logs })).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn delete_logs(State(app): State<AppState>) -> Response {
    if app.read_only {
        info!("read-only: log reset ignored");
    } else if let Err(e) = app.db.reset(app.clock.wall()).await {
        return internal_error(e);
    } else {
        app.shared
            .write()
            .await
            .record_system("event log reset".to_string());
    }
    get_logs(State(app)).await
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web api listening");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::sample_config;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use time::UtcOffset;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct Fixture {
        app: AppState,
        rx: mpsc::Receiver<ManualRequest>,
    }

    async fn fixture(name: &str, read_only: bool) -> Fixture {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let path = std::env::temp_dir().join(format!(
            "waterer-web-{}-{name}.toml",
            std::process::id()
        ));
        Fixture {
            app: AppState {
                shared: SystemState::new(sample_config(), "2026-10-19 05:00:00".into()).shared(),
                db,
                requests: tx,
                clock: LocalClock::fixed(UtcOffset::UTC),
                settings_path: Arc::new(path),
                controller: Arc::new(ControllerSettings::default()),
                read_only,
            },
            rx,
        }
    }

    async fn send(
        app: &AppState,
        method: &str,
        uri: &str,
        form: Option<&str>,
    ) -> (StatusCode, Response) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match form {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = router(app.clone()).oneshot(req).await.unwrap();
        (res.status(), res)
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    const GOOD_FORM: &str =
        "sensor=True&dry=32000&cooldown_min=45&timer=on&when=7%3A30PM&days=even&duration_sec=90";

    // -- Status + headers -----------------------------------------------------

    #[tokio::test]
    async fn status_reports_flags_and_startup() {
        let f = fixture("status", false).await;
        let (status, res) = send(&f.app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["startup"], "2026-10-19 05:00:00");
        assert_eq!(json["sensor"], true);
        assert_eq!(json["timer"], true);
        assert_eq!(json["watering"], false);
    }

    #[tokio::test]
    async fn responses_carry_no_cache_headers() {
        let f = fixture("headers", false).await;
        let (_, res) = send(&f.app, "GET", "/api/config", None).await;
        let h = res.headers();
        assert_eq!(h[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert_eq!(h[header::PRAGMA], "no-cache");
        assert_eq!(h[header::EXPIRES], "0");
    }

    // -- Config ---------------------------------------------------------------

    #[tokio::test]
    async fn get_config_returns_file_keys() {
        let f = fixture("get-config", false).await;
        let (_, res) = send(&f.app, "GET", "/api/config", None).await;
        let json = body_json(res).await;
        assert_eq!(json["when"], "6:00AM");
        assert_eq!(json["days"], "all");
        assert_eq!(json["dry"], 29000);
    }

    #[tokio::test]
    async fn post_config_replaces_and_persists() {
        let f = fixture("post-config", false).await;
        let (status, res) = send(&f.app, "POST", "/api/config", Some(GOOD_FORM)).await;
        assert_eq!(status, StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["when"], "7:30PM");
        assert_eq!(json["days"], "even");

        let st = f.app.shared.read().await;
        assert_eq!(st.config.day_selector, DaySelector::Even);
        assert_eq!(st.config.duration_seconds, 90);

        let saved = settings::load(f.app.settings_path.as_path()).unwrap();
        std::fs::remove_file(f.app.settings_path.as_path()).ok();
        assert_eq!(saved.watering, st.config);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_posts_leave_file_and_live_config_in_step() {
        let f = fixture("race-config", false).await;
        let other =
            "sensor=false&dry=20000&cooldown_min=10&timer=true&when=6%3A15AM&days=odd&duration_sec=120";
        for _ in 0..10 {
            let (a, b) = tokio::join!(
                send(&f.app, "POST", "/api/config", Some(GOOD_FORM)),
                send(&f.app, "POST", "/api/config", Some(other)),
            );
            assert_eq!(a.0, StatusCode::OK);
            assert_eq!(b.0, StatusCode::OK);

            let saved = settings::load(f.app.settings_path.as_path()).unwrap();
            assert_eq!(saved.watering, f.app.shared.read().await.config);
        }
        std::fs::remove_file(f.app.settings_path.as_path()).ok();
    }

    #[tokio::test]
    async fn post_config_rejects_bad_values_with_every_error() {
        let f = fixture("bad-config", false).await;
        let form = "sensor=maybe&dry=70000&cooldown_min=5&timer=false&when=25%3A00&days=weekly&duration_sec=10";
        let (status, res) = send(&f.app, "POST", "/api/config", Some(form)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors = body_json(res).await["errors"].as_array().unwrap().len();
        assert_eq!(errors, 3);

        let st = f.app.shared.read().await;
        assert_eq!(st.config, sample_config());
    }

    #[tokio::test]
    async fn post_config_range_errors_are_reported() {
        let f = fixture("range-config", false).await;
        let form = "sensor=true&dry=70000&cooldown_min=5&timer=false&when=6%3A00AM&days=odd&duration_sec=0";
        let (status, res) = send(&f.app, "POST", "/api/config", Some(form)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors = body_json(res).await["errors"].as_array().unwrap().len();
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn post_config_missing_field_is_bad_request() {
        let f = fixture("missing-config", false).await;
        let (status, _) = send(&f.app, "POST", "/api/config", Some("sensor=true")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn read_only_config_is_echoed_not_applied() {
        let f = fixture("ro-config", true).await;
        let (status, res) = send(&f.app, "POST", "/api/config", Some(GOOD_FORM)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(res).await["when"], "6:00AM");
        assert!(!f.app.settings_path.exists());
    }

    // -- Water ----------------------------------------------------------------

    #[tokio::test]
    async fn water_and_stop_are_queued() {
        let mut f = fixture("water", false).await;

        let (status, res) = send(&f.app, "POST", "/api/water", Some("action=water")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(res).await["action"], "water");
        assert_eq!(f.rx.try_recv().unwrap(), ManualRequest::Start);

        send(&f.app, "POST", "/api/water", Some("action=stop")).await;
        assert_eq!(f.rx.try_recv().unwrap(), ManualRequest::Stop);
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let mut f = fixture("bad-water", false).await;
        let (status, res) = send(&f.app, "POST", "/api/water", Some("action=flood")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["action"], "ERROR! (action=flood)");
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_action_is_bad_request() {
        let mut f = fixture("no-action", false).await;
        for body in ["", "foo=bar"] {
            let (status, res) = send(&f.app, "POST", "/api/water", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body_json(res).await["error"].is_string());
        }
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_only_water_is_not_queued() {
        let mut f = fixture("ro-water", true).await;
        let (status, _) = send(&f.app, "POST", "/api/water", Some("action=water")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn water_without_control_loop_is_unavailable() {
        let f = fixture("closed-water", false).await;
        drop(f.rx);
        let (status, _) = send(&f.app, "POST", "/api/water", Some("action=water")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    // -- Logs -----------------------------------------------------------------

    #[tokio::test]
    async fn logs_list_and_reset() {
        let f = fixture("logs", false).await;
        f.app
            .db
            .append(crate::db::LogKind::Startup, f.app.clock.wall(), None)
            .await
            .unwrap();
        f.app
            .db
            .append(crate::db::LogKind::Watering, f.app.clock.wall(), Some("sensor"))
            .await
            .unwrap();

        let (_, res) = send(&f.app, "GET", "/api/logs", None).await;
        assert_eq!(body_json(res).await["logs"].as_array().unwrap().len(), 2);

        let (status, res) = send(&f.app, "DELETE", "/api/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        let logs = body_json(res).await["logs"].as_array().unwrap().clone();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["kind"], "reset");
    }

    #[tokio::test]
    async fn read_only_reset_keeps_logs() {
        let f = fixture("ro-logs", true).await;
        f.app
            .db
            .append(crate::db::LogKind::Startup, f.app.clock.wall(), None)
            .await
            .unwrap();

        let (_, res) = send(&f.app, "DELETE", "/api/logs", None).await;
        let logs = body_json(res).await["logs"].as_array().unwrap().clone();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["kind"], "startup");
    }
}
