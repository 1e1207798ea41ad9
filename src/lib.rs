//! helix - session scheduler for LEGO-based spoken-language drills
//!
//! Decides cycle by cycle which vocabulary unit a learner drills next, in
//! which form and at what pace. Three progression threads interleave new
//! material with Fibonacci-spaced review, phrases never use vocabulary the
//! learner has not met yet, and response latency is measured against a
//! personal baseline to replay or break down what the learner struggles with.

pub mod config;
pub mod content;
pub mod error;
pub mod helix;
pub mod pacing;
pub mod repetition;
pub mod selection;
pub mod session;
pub mod storage;

pub use error::{Result, SchedulerError};
pub use session::{AdaptationResult, CycleOutcome, CyclePayload, SessionOrchestrator};
