//! Session orchestration
//!
//! `next_cycle` and `record_response` are the whole surface the
//! presentation layer talks to. Everything below them is a pure function of
//! the learner's persisted state.

mod orchestrator;
mod payload;

pub use orchestrator::{production_mode, status_in, LearnerStatus, SessionOrchestrator};
pub use payload::{AdaptationResult, CycleOutcome, CyclePayload, NextAction};
