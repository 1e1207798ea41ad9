//! Multi-learner simulation
//!
//! Runs several synthetic learners against one data directory at the same
//! time. Each learner gets its own blocking task and its own store
//! connection; the only thing they share is the SQLite file.

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use helix::session::status_in;
use helix::{CycleOutcome, SessionOrchestrator};

/// How a synthetic learner answers
#[derive(Debug, Clone, Copy)]
pub struct LearnerProfile {
    /// Typical latency in ms per character of target text
    pub base_ms_per_char: u64,
    /// Uniform jitter added on top
    pub jitter_ms_per_char: u64,
    /// Chance of a much slower answer
    pub slow_probability: f64,
    /// Chance the response carries no timing
    pub untimed_probability: f64,
}

impl Default for LearnerProfile {
    fn default() -> Self {
        Self {
            base_ms_per_char: 450,
            jitter_ms_per_char: 150,
            slow_probability: 0.05,
            untimed_probability: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerReport {
    pub learner_id: String,
    pub cycles: u32,
    pub spikes: u32,
    pub replays: u32,
    pub course_complete: bool,
    pub legos_seen: usize,
    pub legos_retired: usize,
    pub baseline_mean: Option<f64>,
}

/// One synthetic learner working through `cycles` cycles, then closing the session
fn run_learner(
    data_dir: &Path,
    course_code: &str,
    learner_id: &str,
    cycles: u32,
    seed: u64,
    profile: LearnerProfile,
) -> Result<LearnerReport> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut orchestrator = SessionOrchestrator::open_in(data_dir, learner_id, course_code)?;
    let mut report = LearnerReport {
        learner_id: learner_id.to_string(),
        cycles: 0,
        spikes: 0,
        replays: 0,
        course_complete: false,
        legos_seen: 0,
        legos_retired: 0,
        baseline_mean: None,
    };

    for _ in 0..cycles {
        let payload = match orchestrator.next_cycle()? {
            CycleOutcome::Cycle(payload) => payload,
            CycleOutcome::CourseComplete => {
                report.course_complete = true;
                break;
            }
        };

        let chars = payload.target_text.chars().filter(|c| !c.is_whitespace()).count() as u64;
        let latency = if rng.gen_bool(profile.untimed_probability) {
            None
        } else {
            let mut per_char = profile.base_ms_per_char + rng.gen_range(0..=profile.jitter_ms_per_char);
            if rng.gen_bool(profile.slow_probability) {
                per_char *= 3;
            }
            Some(per_char * chars.max(1))
        };
        let duration = latency.map(|_| 300 + rng.gen_range(0..400) + chars * 60);

        let result = orchestrator.record_response(latency, duration)?;
        report.cycles += 1;
        if result.spike {
            report.spikes += 1;
        }
        if payload.interjection.is_some() {
            report.replays += 1;
        }
        debug!(
            "{} cycle {}: {} {} -> position {}",
            learner_id,
            payload.cycle,
            payload.lego_id,
            payload.phase.as_str(),
            result.fibonacci_position
        );
    }

    orchestrator.end_session()?;

    let status = status_in(data_dir, learner_id, course_code)?;
    report.legos_seen = status.legos_seen;
    report.legos_retired = status.legos_retired;
    report.baseline_mean = status.baseline_mean;
    Ok(report)
}

/// Run `learners` synthetic learners concurrently
pub async fn run_simulation(
    data_dir: PathBuf,
    course_code: String,
    learners: u32,
    cycles: u32,
    seed: u64,
) -> Result<Vec<LearnerReport>> {
    info!(
        "Simulating {} learners x {} cycles on {}",
        learners, cycles, course_code
    );

    let mut handles = Vec::with_capacity(learners as usize);
    for n in 1..=learners {
        let data_dir = data_dir.clone();
        let course_code = course_code.clone();
        let learner_id = format!("sim-{:03}", n);
        let learner_seed = seed.wrapping_add(n as u64);
        handles.push(tokio::task::spawn_blocking(move || {
            run_learner(
                &data_dir,
                &course_code,
                &learner_id,
                cycles,
                learner_seed,
                LearnerProfile::default(),
            )
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await??);
    }
    Ok(reports)
}

pub fn print_reports(reports: &[LearnerReport]) {
    println!("Simulation Results");
    println!("==================");
    println!();
    println!(
        "{:<10} {:>7} {:>7} {:>8} {:>6} {:>8} {:>10}",
        "learner", "cycles", "spikes", "replays", "legos", "retired", "baseline"
    );
    for r in reports {
        let baseline = r
            .baseline_mean
            .map(|m| format!("{:.0}", m))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:>7} {:>7} {:>8} {:>6} {:>8} {:>10}{}",
            r.learner_id,
            r.cycles,
            r.spikes,
            r.replays,
            r.legos_seen,
            r.legos_retired,
            baseline,
            if r.course_complete { "  (complete)" } else { "" }
        );
    }
}
