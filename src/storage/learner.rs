//! Per-learner scheduler state
//!
//! A learner's state is read as one snapshot and written back as one
//! `IMMEDIATE` transaction per cycle. The `revision` column on
//! `helix_state` makes the write conditional on nobody else having
//! committed since the snapshot was taken.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::metrics::{self, ResponseMetric, SessionRecord, SpikeEvent};
use crate::content::LegoId;
use crate::error::{Result, SchedulerError};
use crate::helix::HelixState;
use crate::pacing::{LearnerBaseline, RunningStats};
use crate::repetition::LegoProgress;
use crate::selection::CoverageLedger;

/// Everything the scheduler needs about one learner on one course
#[derive(Debug, Clone, Default)]
pub struct LearnerSnapshot {
    /// 0 when the learner has never committed a cycle
    pub revision: i64,
    pub helix: Option<HelixState>,
    pub progress: BTreeMap<LegoId, LegoProgress>,
    pub baseline: LearnerBaseline,
    pub coverage: CoverageLedger,
    /// The learner's open session on this course, as last committed
    pub session: Option<SessionRecord>,
}

/// Writes belonging to one cycle
#[derive(Debug, Default)]
pub struct CycleUpdate<'a> {
    pub helix: Option<&'a HelixState>,
    pub progress: Vec<&'a LegoProgress>,
    pub baseline: Option<&'a LearnerBaseline>,
    pub coverage: Option<&'a CoverageLedger>,
    pub metric: Option<&'a ResponseMetric>,
    pub spike: Option<&'a SpikeEvent>,
    pub session: Option<&'a SessionRecord>,
}

/// Scheduler store backed by SQLite
pub struct LearnerStore {
    conn: Connection,
}

impl LearnerStore {
    /// Open the store, creating tables when needed
    pub fn open(db_path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        let conn = super::open_connection(db_path, busy_timeout_ms)?;
        super::init_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Read everything about one learner inside a single read transaction,
    /// so the snapshot matches exactly one committed revision
    pub fn load(&self, learner_id: &str, course_code: &str) -> Result<LearnerSnapshot> {
        let tx = self.conn.unchecked_transaction()?;
        let mut snapshot = LearnerSnapshot::default();

        let helix_row = self
            .conn
            .query_row(
                "SELECT revision, state_json FROM helix_state WHERE learner_id = ?1 AND course_code = ?2",
                params![learner_id, course_code],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        if let Some((revision, json)) = helix_row {
            let state: HelixState = serde_json::from_str(&json)?;
            state.validate()?;
            snapshot.revision = revision;
            snapshot.helix = Some(state);
        }

        snapshot.progress = self.load_progress(learner_id, course_code)?;

        if let Some(baseline) = self.load_baseline(learner_id, course_code)? {
            snapshot.baseline = baseline;
        }

        let coverage = self
            .conn
            .query_row(
                "SELECT ledger_json FROM coverage WHERE learner_id = ?1 AND course_code = ?2",
                params![learner_id, course_code],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if let Some(json) = coverage {
            snapshot.coverage = serde_json::from_str(&json)?;
        }

        snapshot.session = metrics::load_open_session(&tx, learner_id, course_code)?;
        tx.commit()?;

        debug!(
            "Loaded {} on {} at revision {} ({} LEGOs)",
            learner_id,
            course_code,
            snapshot.revision,
            snapshot.progress.len()
        );
        Ok(snapshot)
    }

    fn load_progress(&self, learner_id: &str, course_code: &str) -> Result<BTreeMap<LegoId, LegoProgress>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT lego_id, thread_id, fibonacci_position, reps_completed, is_retired,
                   introduction_played, introduction_index, introduction_complete, debut_played,
                   last_practiced_cycle, eternal_urn, urn_generation, shelved
            FROM lego_progress
            WHERE learner_id = ?1 AND course_code = ?2
            "#,
        )?;

        let rows = stmt.query_map(params![learner_id, course_code], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u8>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, u32>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, u32>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, u32>(11)?,
                row.get::<_, bool>(12)?,
            ))
        })?;

        let mut progress = BTreeMap::new();
        for row in rows {
            let (
                lego_id,
                thread_id,
                position,
                reps_completed,
                is_retired,
                introduction_played,
                introduction_index,
                introduction_complete,
                debut_played,
                last_practiced_cycle,
                urn,
                urn_generation,
                shelved,
            ) = row?;
            let lego_id: LegoId = lego_id.parse().map_err(SchedulerError::InvalidState)?;
            if position < 0 {
                return Err(SchedulerError::InvalidState(format!(
                    "{} has negative Fibonacci position {}",
                    lego_id, position
                )));
            }
            progress.insert(
                lego_id,
                LegoProgress {
                    lego_id,
                    thread_id,
                    fibonacci_position: position as usize,
                    reps_completed,
                    is_retired,
                    introduction_played,
                    introduction_index,
                    introduction_complete,
                    debut_played,
                    last_practiced_cycle: last_practiced_cycle.map(|c| c as u64),
                    eternal_urn: serde_json::from_str(&urn)?,
                    urn_generation,
                    shelved,
                },
            );
        }
        Ok(progress)
    }

    fn load_baseline(&self, learner_id: &str, course_code: &str) -> Result<Option<LearnerBaseline>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT latency_mean, latency_stddev, duration_delta_mean, duration_delta_stddev,
                       had_timing_data, calibrated, samples_since_calibration, calibration_json, updated_at
                FROM learner_baseline
                WHERE learner_id = ?1 AND course_code = ?2
                "#,
                params![learner_id, course_code],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            latency_mean,
            latency_stddev,
            duration_delta_mean,
            duration_delta_stddev,
            had_timing_data,
            calibrated,
            samples_since_calibration,
            calibration_json,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let (calibration_latency, calibration_duration): (RunningStats, RunningStats) =
            serde_json::from_str(&calibration_json)?;
        let updated_at = match updated_at {
            Some(text) => Some(
                chrono::DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| SchedulerError::InvalidState(format!("bad baseline timestamp: {}", e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Some(LearnerBaseline {
            latency_mean,
            latency_stddev,
            duration_delta_mean,
            duration_delta_stddev,
            had_timing_data,
            calibrated,
            samples_since_calibration,
            calibration_latency,
            calibration_duration,
            updated_at,
        }))
    }

    pub fn load_open_session(&self, learner_id: &str, course_code: &str) -> Result<Option<SessionRecord>> {
        metrics::load_open_session(&self.conn, learner_id, course_code)
    }

    /// Write a session row outside of any cycle (open or close)
    pub fn save_session(&self, session: &SessionRecord) -> Result<()> {
        metrics::save_session(&self.conn, session)
    }

    /// Commit one cycle's writes if the learner is still at `expected_revision`.
    ///
    /// Returns the new revision. A stale snapshot yields
    /// [`SchedulerError::WriteConflict`] and writes nothing.
    pub fn commit_cycle(
        &mut self,
        learner_id: &str,
        course_code: &str,
        expected_revision: i64,
        update: &CycleUpdate<'_>,
    ) -> Result<i64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: i64 = tx
            .query_row(
                "SELECT revision FROM helix_state WHERE learner_id = ?1 AND course_code = ?2",
                params![learner_id, course_code],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        if current != expected_revision {
            return Err(SchedulerError::WriteConflict {
                learner_id: learner_id.to_string(),
                course_code: course_code.to_string(),
                expected: expected_revision,
            });
        }

        let now = Utc::now().to_rfc3339();
        let revision = current + 1;

        match update.helix {
            Some(state) => {
                state.validate()?;
                tx.execute(
                    r#"
                    INSERT INTO helix_state (learner_id, course_code, revision, state_json, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(learner_id, course_code) DO UPDATE SET
                        revision = excluded.revision,
                        state_json = excluded.state_json,
                        updated_at = excluded.updated_at
                    "#,
                    params![learner_id, course_code, revision, serde_json::to_string(state)?, now],
                )?;
            }
            None => {
                let bumped = tx.execute(
                    "UPDATE helix_state SET revision = ?3, updated_at = ?4 WHERE learner_id = ?1 AND course_code = ?2",
                    params![learner_id, course_code, revision, now],
                )?;
                if bumped == 0 {
                    return Err(SchedulerError::InvalidState(format!(
                        "no helix state for {} on {}",
                        learner_id, course_code
                    )));
                }
            }
        }

        for p in &update.progress {
            tx.execute(
                r#"
                INSERT INTO lego_progress
                (learner_id, course_code, lego_id, thread_id, fibonacci_position, reps_completed, is_retired,
                 introduction_played, introduction_index, introduction_complete, debut_played,
                 last_practiced_cycle, eternal_urn, urn_generation, shelved, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                ON CONFLICT(learner_id, course_code, lego_id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    fibonacci_position = excluded.fibonacci_position,
                    reps_completed = excluded.reps_completed,
                    is_retired = excluded.is_retired,
                    introduction_played = excluded.introduction_played,
                    introduction_index = excluded.introduction_index,
                    introduction_complete = excluded.introduction_complete,
                    debut_played = excluded.debut_played,
                    last_practiced_cycle = excluded.last_practiced_cycle,
                    eternal_urn = excluded.eternal_urn,
                    urn_generation = excluded.urn_generation,
                    shelved = excluded.shelved,
                    updated_at = excluded.updated_at
                "#,
                params![
                    learner_id,
                    course_code,
                    p.lego_id.to_string(),
                    p.thread_id,
                    p.fibonacci_position as i64,
                    p.reps_completed,
                    p.is_retired,
                    p.introduction_played,
                    p.introduction_index,
                    p.introduction_complete,
                    p.debut_played,
                    p.last_practiced_cycle.map(|c| c as i64),
                    serde_json::to_string(&p.eternal_urn)?,
                    p.urn_generation,
                    p.shelved,
                    now,
                ],
            )?;
        }

        if let Some(b) = update.baseline {
            tx.execute(
                r#"
                INSERT INTO learner_baseline
                (learner_id, course_code, latency_mean, latency_stddev, duration_delta_mean, duration_delta_stddev,
                 had_timing_data, calibrated, samples_since_calibration, calibration_json, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(learner_id, course_code) DO UPDATE SET
                    latency_mean = excluded.latency_mean,
                    latency_stddev = excluded.latency_stddev,
                    duration_delta_mean = excluded.duration_delta_mean,
                    duration_delta_stddev = excluded.duration_delta_stddev,
                    had_timing_data = excluded.had_timing_data,
                    calibrated = excluded.calibrated,
                    samples_since_calibration = excluded.samples_since_calibration,
                    calibration_json = excluded.calibration_json,
                    updated_at = excluded.updated_at
                "#,
                params![
                    learner_id,
                    course_code,
                    b.latency_mean,
                    b.latency_stddev,
                    b.duration_delta_mean,
                    b.duration_delta_stddev,
                    b.had_timing_data,
                    b.calibrated,
                    b.samples_since_calibration,
                    serde_json::to_string(&(b.calibration_latency, b.calibration_duration))?,
                    b.updated_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        }

        if let Some(ledger) = update.coverage {
            tx.execute(
                r#"
                INSERT INTO coverage (learner_id, course_code, ledger_json) VALUES (?1, ?2, ?3)
                ON CONFLICT(learner_id, course_code) DO UPDATE SET ledger_json = excluded.ledger_json
                "#,
                params![learner_id, course_code, serde_json::to_string(ledger)?],
            )?;
        }

        if let Some(metric) = update.metric {
            metrics::insert_metric(&tx, learner_id, course_code, metric)?;
        }
        if let Some(spike) = update.spike {
            metrics::insert_spike(&tx, learner_id, course_code, spike)?;
        }
        if let Some(session) = update.session {
            metrics::save_session(&tx, session)?;
        }

        tx.commit()?;
        debug!(
            "Committed cycle for {} on {} at revision {}",
            learner_id, course_code, revision
        );
        Ok(revision)
    }
}
