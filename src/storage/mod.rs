//! Storage module for helix
//!
//! One SQLite file per data directory holds every learner's scheduler state
//! (progress, helix state, baseline, coverage) plus the append-only response
//! log and session summaries.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::Result;

pub mod learner;
pub mod metrics;

pub use learner::{CycleUpdate, LearnerSnapshot, LearnerStore};
pub use metrics::{ResponseMetric, SessionRecord, SpikeEvent};

pub const DB_FILE: &str = "helix.sqlite";

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE)
}

/// Open a connection with the busy timeout every writer relies on
pub fn open_connection(db_path: &Path, busy_timeout_ms: u64) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    // WAL lets readers proceed while another learner's cycle commits
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Create tables if missing
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per learner and course; revision guards against lost updates
        CREATE TABLE IF NOT EXISTS helix_state (
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            revision INTEGER NOT NULL,
            state_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (learner_id, course_code)
        );

        CREATE TABLE IF NOT EXISTS lego_progress (
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            lego_id TEXT NOT NULL,
            thread_id INTEGER NOT NULL,
            fibonacci_position INTEGER NOT NULL,
            reps_completed INTEGER NOT NULL DEFAULT 0,
            is_retired INTEGER NOT NULL DEFAULT 0,
            introduction_played INTEGER NOT NULL DEFAULT 0,
            introduction_index INTEGER NOT NULL DEFAULT 0,
            introduction_complete INTEGER NOT NULL DEFAULT 0,
            debut_played INTEGER NOT NULL DEFAULT 0,
            last_practiced_cycle INTEGER,
            eternal_urn TEXT NOT NULL DEFAULT '[]',
            urn_generation INTEGER NOT NULL DEFAULT 0,
            shelved INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (learner_id, course_code, lego_id)
        );

        CREATE TABLE IF NOT EXISTS learner_baseline (
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            latency_mean REAL NOT NULL,
            latency_stddev REAL NOT NULL,
            duration_delta_mean REAL NOT NULL,
            duration_delta_stddev REAL NOT NULL,
            had_timing_data INTEGER NOT NULL,
            calibrated INTEGER NOT NULL,
            samples_since_calibration INTEGER NOT NULL,
            calibration_json TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY (learner_id, course_code)
        );

        CREATE TABLE IF NOT EXISTS coverage (
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            ledger_json TEXT NOT NULL,
            PRIMARY KEY (learner_id, course_code)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            items_practiced INTEGER NOT NULL DEFAULT 0,
            spikes_detected INTEGER NOT NULL DEFAULT 0,
            rolling_json TEXT NOT NULL,
            samples_json TEXT NOT NULL DEFAULT '[]'
        );

        -- Append-only evidentiary log
        CREATE TABLE IF NOT EXISTS response_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            cycle INTEGER NOT NULL,
            thread_id INTEGER NOT NULL,
            lego_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            mode TEXT NOT NULL,
            latency_ms INTEGER,
            duration_ms INTEGER,
            latency_normalized REAL,
            threshold REAL,
            triggered_spike INTEGER NOT NULL,
            classification TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS spike_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            learner_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            cycle INTEGER NOT NULL,
            thread_id INTEGER NOT NULL,
            lego_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            latency_normalized REAL NOT NULL,
            threshold REAL NOT NULL,
            response TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_metrics_learner ON response_metrics(learner_id, course_code);
        CREATE INDEX IF NOT EXISTS idx_metrics_session ON response_metrics(session_id);
        CREATE INDEX IF NOT EXISTS idx_spikes_learner ON spike_events(learner_id, course_code);
        CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(learner_id, course_code, ended_at);
        "#,
    )?;
    Ok(())
}

/// Create the data directory, database and default config
pub fn init(data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir.join("courses"))?;

    let path = db_path(data_dir);
    let conn = Connection::open(&path)?;
    init_schema(&conn)?;
    info!("helix initialized at {:?}", data_dir);

    let config_path = crate::config::write_default_config(data_dir)?;
    info!("Configuration at {:?}", config_path);
    Ok(path)
}

/// Aggregate counts for `helix status`
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct StoreSummary {
    pub learners: i64,
    pub sessions: i64,
    pub open_sessions: i64,
    pub responses: i64,
    pub spikes: i64,
}

pub fn summary(conn: &Connection) -> Result<StoreSummary> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(StoreSummary {
        learners: count("SELECT COUNT(DISTINCT learner_id) FROM helix_state")?,
        sessions: count("SELECT COUNT(*) FROM sessions")?,
        open_sessions: count("SELECT COUNT(*) FROM sessions WHERE ended_at IS NULL")?,
        responses: count("SELECT COUNT(*) FROM response_metrics")?,
        spikes: count("SELECT COUNT(*) FROM spike_events")?,
    })
}
