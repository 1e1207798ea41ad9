//! Response log and session summaries
//!
//! Metrics and spike events are only ever inserted. The session row is
//! rewritten with each cycle commit so an interrupted sitting can be resumed.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::content::LegoId;
use crate::error::{Result, SchedulerError};
use crate::helix::CycleMode;
use crate::pacing::{RollingAverage, SpikeResponse, TimingSample};
use crate::selection::CyclePhase;

/// One learner response, as measured and as classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetric {
    pub session_id: String,
    pub cycle: u64,
    pub thread_id: u8,
    pub lego_id: LegoId,
    pub item_id: String,
    pub phase: CyclePhase,
    pub mode: CycleMode,
    pub latency_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub latency_normalized: Option<f64>,
    pub threshold: Option<f64>,
    pub triggered_spike: bool,
    pub classification: Option<SpikeResponse>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub session_id: String,
    pub cycle: u64,
    pub thread_id: u8,
    pub lego_id: LegoId,
    pub item_id: String,
    pub latency_normalized: f64,
    pub threshold: f64,
    pub response: SpikeResponse,
    pub created_at: DateTime<Utc>,
}

/// One sitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub learner_id: String,
    pub course_code: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub items_practiced: u32,
    pub spikes_detected: u32,
    pub rolling: RollingAverage,
    /// Timed samples waiting to be folded into a calibrated baseline
    pub samples: Vec<TimingSample>,
}

impl SessionRecord {
    pub fn start(learner_id: &str, course_code: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            course_code: course_code.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            items_practiced: 0,
            spikes_detected: 0,
            rolling: RollingAverage::default(),
            samples: Vec::new(),
        }
    }
}

pub(crate) fn insert_metric(conn: &Connection, learner_id: &str, course_code: &str, m: &ResponseMetric) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO response_metrics
        (session_id, learner_id, course_code, cycle, thread_id, lego_id, item_id, phase, mode,
         latency_ms, duration_ms, latency_normalized, threshold, triggered_spike, classification, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
        params![
            m.session_id,
            learner_id,
            course_code,
            m.cycle as i64,
            m.thread_id,
            m.lego_id.to_string(),
            m.item_id,
            m.phase.as_str(),
            m.mode.as_str(),
            m.latency_ms.map(|v| v as i64),
            m.duration_ms.map(|v| v as i64),
            m.latency_normalized,
            m.threshold,
            m.triggered_spike,
            m.classification.map(|c| c.as_str()),
            m.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_spike(conn: &Connection, learner_id: &str, course_code: &str, e: &SpikeEvent) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO spike_events
        (session_id, learner_id, course_code, cycle, thread_id, lego_id, item_id,
         latency_normalized, threshold, response, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            e.session_id,
            learner_id,
            course_code,
            e.cycle as i64,
            e.thread_id,
            e.lego_id.to_string(),
            e.item_id,
            e.latency_normalized,
            e.threshold,
            e.response.as_str(),
            e.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Insert or rewrite the session row
pub(crate) fn save_session(conn: &Connection, s: &SessionRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sessions
        (id, learner_id, course_code, started_at, ended_at, items_practiced, spikes_detected, rolling_json, samples_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            ended_at = excluded.ended_at,
            items_practiced = excluded.items_practiced,
            spikes_detected = excluded.spikes_detected,
            rolling_json = excluded.rolling_json,
            samples_json = excluded.samples_json
        "#,
        params![
            s.id,
            s.learner_id,
            s.course_code,
            s.started_at.to_rfc3339(),
            s.ended_at.map(|t| t.to_rfc3339()),
            s.items_practiced,
            s.spikes_detected,
            serde_json::to_string(&s.rolling)?,
            serde_json::to_string(&s.samples)?,
        ],
    )?;
    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidState(format!("bad timestamp {:?}: {}", value, e)))
}

/// Most recent session of this learner on this course that was never closed
pub(crate) fn load_open_session(conn: &Connection, learner_id: &str, course_code: &str) -> Result<Option<SessionRecord>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, started_at, items_practiced, spikes_detected, rolling_json, samples_json
            FROM sessions
            WHERE learner_id = ?1 AND course_code = ?2 AND ended_at IS NULL
            ORDER BY started_at DESC
            LIMIT 1
            "#,
            params![learner_id, course_code],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, started_at, items_practiced, spikes_detected, rolling, samples)) = row else {
        return Ok(None);
    };
    Ok(Some(SessionRecord {
        id,
        learner_id: learner_id.to_string(),
        course_code: course_code.to_string(),
        started_at: parse_time(&started_at)?,
        ended_at: None,
        items_practiced,
        spikes_detected,
        rolling: serde_json::from_str(&rolling)?,
        samples: serde_json::from_str(&samples)?,
    }))
}

/// Spike events for one learner, oldest first
pub fn spike_events(conn: &Connection, learner_id: &str, course_code: &str) -> Result<Vec<SpikeEvent>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT session_id, cycle, thread_id, lego_id, item_id, latency_normalized, threshold, response, created_at
        FROM spike_events
        WHERE learner_id = ?1 AND course_code = ?2
        ORDER BY id
        "#,
    )?;
    let rows = stmt.query_map(params![learner_id, course_code], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, u8>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, f64>(5)?,
            row.get::<_, f64>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (session_id, cycle, thread_id, lego_id, item_id, latency_normalized, threshold, response, created_at) =
            row?;
        let response = match response.as_str() {
            "repeat" => SpikeResponse::Repeat,
            "breakdown" => SpikeResponse::Breakdown,
            other => {
                return Err(SchedulerError::InvalidState(format!("unknown spike response {:?}", other)))
            }
        };
        events.push(SpikeEvent {
            session_id,
            cycle: cycle as u64,
            thread_id,
            lego_id: lego_id.parse().map_err(SchedulerError::InvalidState)?,
            item_id,
            latency_normalized,
            threshold,
            response,
            created_at: parse_time(&created_at)?,
        });
    }
    Ok(events)
}

/// Number of responses logged for a session
pub fn response_count(conn: &Connection, session_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM response_metrics WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?)
}
