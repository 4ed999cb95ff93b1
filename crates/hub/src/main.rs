mod button;
mod clock;
mod control;
mod db;
mod display;
mod moisture;
mod settings;
#[cfg(not(feature = "gpio"))]
mod sim;
mod state;
mod valve;
mod web;

use anyhow::{Context, Result};
use std::{env, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use waterer_engine::Arbiter;

use button::Button;
use clock::LocalClock;
use control::{Controller, Hardware, REQUEST_QUEUE};
use db::{Db, LogKind};
use moisture::MoistureSensor;
use state::SystemState;
use valve::Valve;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Settings file ───────────────────────────────────────────────
    let config_path: PathBuf = env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string())
        .into();
    let settings = settings::load(&config_path)?;
    info!(path = %config_path.display(), "settings loaded");

    let clock = LocalClock::new(settings.controller.utc_offset_min);

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:waterer.db?mode=rwc".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let address = env::var("LOCAL_IP_ADDRESS").unwrap_or_else(|_| "unknown".to_string());
    let read_only = env::var("WEB_READ_ONLY")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    let boot = clock.now();
    db.append(LogKind::Startup, boot.wall, None).await?;

    // ── Hardware ────────────────────────────────────────────────────
    let ctl = &settings.controller;
    let hw = Hardware {
        valve: Valve::new(ctl.relay_pin as u8, ctl.relay_active_low)?,
        button: Button::new(ctl.button_pin as u8)?,
        moisture: MoistureSensor::open(ctl)?,
    };

    // ── Shared state (ephemeral, for the web API) ───────────────────
    let startup = db::format_ts(boot.wall);
    let shared = SystemState::new(settings.watering.clone(), startup).shared();
    shared
        .write()
        .await
        .record_system("controller started".to_string());

    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
        requests: tx,
        clock: clock.clone(),
        settings_path: Arc::new(config_path),
        controller: Arc::new(settings.controller.clone()),
        read_only,
    };
    if read_only {
        info!("web api is read-only");
    }
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("{e:#}");
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    let arbiter = Arbiter::new(ctl.tick_interval(), ctl.long_press());
    let mut controller = Controller::new(arbiter, hw, clock, db, shared, rx, address);

    tokio::select! {
        _ = control::run(&mut controller, ctl.tick_interval()) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
        }
    }
    controller.shutdown().await;
    Ok(())
}
