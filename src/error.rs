//! Error types for the scheduler
//!
//! Content-integrity problems that can be worked around (a bad phrase, a
//! missing audio file) are logged and skipped by the selector and never reach
//! this enum. What does reach it is either fatal for the call (content desync,
//! corrupt state) or retryable (write conflicts).

use thiserror::Error;

use crate::content::LegoId;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A thread queue points at a seed that is not in the course graph
    #[error("content desync: thread {thread_id} references seed {seed_number} missing from course {course_code}")]
    ContentDesync {
        course_code: String,
        thread_id: u8,
        seed_number: u32,
    },

    #[error("unknown LEGO {0}")]
    UnknownLego(LegoId),

    #[error("no eligible phrase for {lego} in phase {phase}")]
    NoEligiblePhrase { lego: LegoId, phase: &'static str },

    #[error("course not found: {0}")]
    CourseNotFound(String),

    #[error("invalid course graph: {0}")]
    InvalidGraph(String),

    #[error("invalid scheduler state: {0}")]
    InvalidState(String),

    /// Another writer committed a cycle for this learner first
    #[error("write conflict for learner {learner_id} on {course_code}: expected revision {expected}")]
    WriteConflict {
        learner_id: String,
        course_code: String,
        expected: i64,
    },

    #[error("no cycle is awaiting a response")]
    NoPendingCycle,

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Whether retrying with a fresh read of learner state can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::WriteConflict { .. } => true,
            SchedulerError::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
