use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use time::macros::format_description;
use time::PrimitiveDateTime;
use waterer_engine::{Transition, WateringEvent};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// What an event-log row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Startup,
    Watering,
    Stopping,
    Reset,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Watering => "watering",
            Self::Stopping => "stopping",
            Self::Reset => "reset",
        }
    }
}

impl From<WateringEvent> for LogKind {
    fn from(event: WateringEvent) -> Self {
        match event {
            WateringEvent::Start => Self::Watering,
            WateringEvent::Stop => Self::Stopping,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LogEntry {
    pub id: i64,
    pub ts: String,
    pub kind: String,
    pub reason: Option<String>,
}

/// Sortable local wall-clock stamp, e.g. `2026-10-19 06:00:00`.
pub fn format_ts(ts: PrimitiveDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| ts.to_string())
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/waterer/waterer.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        // Every connection to ":memory:" is its own database, so the pool
        // must hold exactly one connection and never recycle it.
        let pool = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Event log
    // ----------------------------

    pub async fn append(
        &self,
        kind: LogKind,
        ts: PrimitiveDateTime,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO event_log (ts, kind, reason) VALUES (?, ?, ?)")
            .bind(format_ts(ts))
            .bind(kind.as_str())
            .bind(reason)
            .execute(&self.pool)
            .await
            .with_context(|| format!("append {} failed", kind.as_str()))?;
        Ok(())
    }

    pub async fn record_transition(&self, t: &Transition) -> Result<()> {
        self.append(LogKind::from(t.event), t.at, Some(t.reason.as_str()))
            .await
    }

    /// Oldest first.
    pub async fn list(&self) -> Result<Vec<LogEntry>> {
        sqlx::query_as::<_, LogEntry>("SELECT id, ts, kind, reason FROM event_log ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("list event log failed")
    }

    /// Drop every row and leave a single `reset` entry behind.
    pub async fn reset(&self, ts: PrimitiveDateTime) -> Result<()> {
        let mut tx = self.pool.begin().await.context("reset: begin failed")?;
        sqlx::query("DELETE FROM event_log")
            .execute(&mut *tx)
            .await
            .context("reset: delete failed")?;
        sqlx::query("INSERT INTO event_log (ts, kind, reason) VALUES (?, ?, NULL)")
            .bind(format_ts(ts))
            .bind(LogKind::Reset.as_str())
            .execute(&mut *tx)
            .await
            .context("reset: insert failed")?;
        tx.commit().await.context("reset: commit failed")?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
