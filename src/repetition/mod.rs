//! Spaced repetition with Fibonacci intervals
//!
//! A LEGO is introduced, drilled at Fibonacci-spaced intervals that grow on
//! success and shrink on difficulty, and finally retired into long-term
//! (eternal) review.

mod fibonacci;
mod tracker;

pub use fibonacci::{fibonacci, MAX_FIBONACCI_CAP};
pub use tracker::{LegoProgress, LegoStage, ProgressChange, RepetitionOutcome};
