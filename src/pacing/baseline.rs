//! Learner baseline calibration
//!
//! The first `calibration_items` timed responses establish mean and standard
//! deviation of normalized latency and of duration delta. After that the
//! baseline drifts with an exponentially weighted update so long-term
//! improvement lowers the bar for what counts as slow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LatencyConfig;

/// Stddev floor as a fraction of the mean, keeps identical samples from
/// producing a zero-width spike band
const MIN_STDDEV_FRACTION: f64 = 0.05;

/// Welford accumulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u32,
    pub mean: f64,
    pub m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population standard deviation
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0).sqrt()
        }
    }
}

/// One timed response, already normalized
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    /// Milliseconds per character of target text
    pub latency_normalized: f64,
    /// Response duration minus model audio duration
    pub duration_delta_ms: Option<f64>,
}

impl TimingSample {
    /// `None` when no latency was measured (no microphone / VAD signal)
    pub fn from_response(
        latency_ms: Option<u64>,
        duration_ms: Option<u64>,
        target_text: &str,
        model_duration_ms: Option<u64>,
    ) -> Option<Self> {
        let latency_ms = latency_ms?;
        let chars = target_text.chars().filter(|c| !c.is_whitespace()).count().max(1);
        let duration_delta_ms = match (duration_ms, model_duration_ms) {
            (Some(actual), Some(model)) => Some(actual as f64 - model as f64),
            _ => None,
        };
        Some(Self {
            latency_normalized: latency_ms as f64 / chars as f64,
            duration_delta_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerBaseline {
    pub latency_mean: f64,
    pub latency_stddev: f64,
    pub duration_delta_mean: f64,
    pub duration_delta_stddev: f64,
    /// Real timing samples were ever received
    pub had_timing_data: bool,
    /// Calibration window completed
    pub calibrated: bool,
    /// Timed samples folded in since calibration completed
    pub samples_since_calibration: u32,
    pub calibration_latency: RunningStats,
    pub calibration_duration: RunningStats,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for LearnerBaseline {
    fn default() -> Self {
        Self {
            latency_mean: 0.0,
            latency_stddev: 0.0,
            duration_delta_mean: 0.0,
            duration_delta_stddev: 0.0,
            had_timing_data: false,
            calibrated: false,
            samples_since_calibration: 0,
            calibration_latency: RunningStats::default(),
            calibration_duration: RunningStats::default(),
            updated_at: None,
        }
    }
}

/// Baseline the classifier should compare against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveBaseline {
    pub mean: f64,
    pub stddev: f64,
    /// False while running on the configured default
    pub detection_enabled: bool,
}

impl LearnerBaseline {
    pub fn effective(&self, config: &LatencyConfig) -> EffectiveBaseline {
        if self.calibrated && self.had_timing_data {
            EffectiveBaseline {
                mean: self.latency_mean,
                stddev: self.latency_stddev.max(self.latency_mean * MIN_STDDEV_FRACTION),
                detection_enabled: true,
            }
        } else {
            EffectiveBaseline {
                mean: config.default_baseline_mean,
                stddev: config.default_baseline_stddev,
                detection_enabled: false,
            }
        }
    }

    /// Items still needed before the window closes
    pub fn calibration_remaining(&self, config: &LatencyConfig) -> u32 {
        if self.calibrated {
            0
        } else {
            config
                .calibration_items
                .saturating_sub(self.calibration_latency.count)
        }
    }
}

/// What absorbing samples did to the baseline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationChange {
    pub samples_used: u32,
    pub calibration_completed: bool,
    pub rolled: bool,
}

pub struct BaselineCalibrator<'a> {
    config: &'a LatencyConfig,
}

impl<'a> BaselineCalibrator<'a> {
    pub fn new(config: &'a LatencyConfig) -> Self {
        Self { config }
    }

    /// Feed samples into the calibration window, closing it when full.
    /// Samples arriving after the window closes are ignored here; they belong
    /// to [`BaselineCalibrator::roll`].
    pub fn calibrate(&self, baseline: &mut LearnerBaseline, samples: &[TimingSample]) -> CalibrationChange {
        let mut change = CalibrationChange::default();
        for sample in samples {
            if baseline.calibrated {
                break;
            }
            baseline.had_timing_data = true;
            baseline.calibration_latency.push(sample.latency_normalized);
            if let Some(delta) = sample.duration_delta_ms {
                baseline.calibration_duration.push(delta);
            }
            change.samples_used += 1;

            if baseline.calibration_latency.count >= self.config.calibration_items {
                baseline.latency_mean = baseline.calibration_latency.mean;
                baseline.latency_stddev = baseline.calibration_latency.stddev();
                baseline.duration_delta_mean = baseline.calibration_duration.mean;
                baseline.duration_delta_stddev = baseline.calibration_duration.stddev();
                baseline.calibrated = true;
                change.calibration_completed = true;
                info!(
                    "Baseline calibrated: {:.0} ± {:.0} ms/char over {} items",
                    baseline.latency_mean,
                    baseline.latency_stddev,
                    baseline.calibration_latency.count
                );
            }
        }
        if change.samples_used > 0 {
            baseline.updated_at = Some(Utc::now());
        }
        change
    }

    /// Exponentially weighted drift of a calibrated baseline
    pub fn roll(&self, baseline: &mut LearnerBaseline, samples: &[TimingSample]) -> CalibrationChange {
        let mut change = CalibrationChange::default();
        if !baseline.calibrated || samples.is_empty() {
            return change;
        }
        let alpha = self.config.baseline_ewma_alpha;

        for sample in samples {
            let (mean, var) = ewma(
                baseline.latency_mean,
                baseline.latency_stddev.powi(2),
                sample.latency_normalized,
                alpha,
            );
            baseline.latency_mean = mean;
            baseline.latency_stddev = var.sqrt();

            if let Some(delta) = sample.duration_delta_ms {
                let (mean, var) = ewma(
                    baseline.duration_delta_mean,
                    baseline.duration_delta_stddev.powi(2),
                    delta,
                    alpha,
                );
                baseline.duration_delta_mean = mean;
                baseline.duration_delta_stddev = var.sqrt();
            }
            baseline.samples_since_calibration += 1;
            change.samples_used += 1;
        }
        change.rolled = true;
        baseline.updated_at = Some(Utc::now());
        debug!(
            "Baseline rolled over {} samples: {:.0} ± {:.0} ms/char",
            change.samples_used, baseline.latency_mean, baseline.latency_stddev
        );
        change
    }
}

fn ewma(mean: f64, variance: f64, x: f64, alpha: f64) -> (f64, f64) {
    let diff = x - mean;
    let new_mean = mean + alpha * diff;
    let new_variance = (1.0 - alpha) * (variance + alpha * diff * diff);
    (new_mean, new_variance)
}
