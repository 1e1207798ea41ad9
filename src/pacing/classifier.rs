//! Spike detection against the learner baseline
//!
//! A response is a spike when its normalized latency exceeds
//! `mean + k * stddev`. Spikes far beyond that (`breakdown_sensitivity`)
//! ask for the phrase to be broken into smaller units; the rest are
//! replayed as-is.

use serde::{Deserialize, Serialize};

use super::baseline::EffectiveBaseline;
use crate::config::LatencyConfig;

/// What to do with the phrase after a spike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeResponse {
    Repeat,
    Breakdown,
}

impl SpikeResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpikeResponse::Repeat => "repeat",
            SpikeResponse::Breakdown => "breakdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub latency_normalized: f64,
    pub threshold: f64,
    pub triggered_spike: bool,
    pub response: Option<SpikeResponse>,
}

/// Feedback surfaced from the session rolling average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaceFeedback {
    SpeedingUp,
    SlowingDown,
}

pub struct LatencyClassifier<'a> {
    config: &'a LatencyConfig,
}

impl<'a> LatencyClassifier<'a> {
    pub fn new(config: &'a LatencyConfig) -> Self {
        Self { config }
    }

    pub fn spike_threshold(&self, baseline: &EffectiveBaseline) -> f64 {
        baseline.mean + self.config.spike_sensitivity * baseline.stddev
    }

    pub fn classify(&self, baseline: &EffectiveBaseline, latency_normalized: f64) -> Classification {
        let threshold = self.spike_threshold(baseline);
        let triggered_spike = baseline.detection_enabled && latency_normalized > threshold;

        let response = if triggered_spike {
            let breakdown_at = baseline.mean + self.config.breakdown_sensitivity * baseline.stddev;
            if latency_normalized > breakdown_at {
                Some(SpikeResponse::Breakdown)
            } else {
                Some(SpikeResponse::Repeat)
            }
        } else {
            None
        };

        Classification {
            latency_normalized,
            threshold,
            triggered_spike,
            response,
        }
    }
}

/// Session-scoped moving average of normalized latency.
///
/// Lives only as long as the session and never touches the calibrated
/// baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingAverage {
    pub value: Option<f64>,
    pub samples: u32,
    below_streak: u32,
    above_streak: u32,
}

impl RollingAverage {
    pub fn update(&mut self, x: f64, alpha: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => prev + alpha * (x - prev),
        };
        self.value = Some(next);
        self.samples += 1;
        next
    }

    /// Compare the rolling average with the baseline after an update
    pub fn feedback(&mut self, baseline: &EffectiveBaseline, config: &LatencyConfig) -> Option<PaceFeedback> {
        let value = self.value?;
        if !baseline.detection_enabled {
            return None;
        }

        if value < baseline.mean * (1.0 - config.speedup_margin) {
            self.below_streak += 1;
            self.above_streak = 0;
        } else if value > baseline.mean * (1.0 + config.speedup_margin) {
            self.above_streak += 1;
            self.below_streak = 0;
        } else {
            self.below_streak = 0;
            self.above_streak = 0;
        }

        if self.below_streak >= config.speedup_min_items {
            Some(PaceFeedback::SpeedingUp)
        } else if self.above_streak >= config.speedup_min_items {
            Some(PaceFeedback::SlowingDown)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated(mean: f64, stddev: f64) -> EffectiveBaseline {
        EffectiveBaseline {
            mean,
            stddev,
            detection_enabled: true,
        }
    }

    #[test]
    fn test_spike_determinism() {
        let config = LatencyConfig::default();
        let classifier = LatencyClassifier::new(&config);
        let baseline = calibrated(800.0, 150.0);
        assert_eq!(classifier.spike_threshold(&baseline), 1100.0);

        let slow = classifier.classify(&baseline, 1300.0);
        assert!(slow.triggered_spike);
        assert_eq!(slow.response, Some(SpikeResponse::Repeat));

        let fine = classifier.classify(&baseline, 900.0);
        assert!(!fine.triggered_spike);
        assert_eq!(fine.response, None);
    }

    #[test]
    fn test_large_spike_breaks_down() {
        let config = LatencyConfig::default();
        let classifier = LatencyClassifier::new(&config);
        let result = classifier.classify(&calibrated(800.0, 150.0), 2000.0);
        assert_eq!(result.response, Some(SpikeResponse::Breakdown));
    }

    #[test]
    fn test_no_spikes_without_calibration() {
        let config = LatencyConfig::default();
        let classifier = LatencyClassifier::new(&config);
        let baseline = EffectiveBaseline {
            mean: 800.0,
            stddev: 200.0,
            detection_enabled: false,
        };
        assert!(!classifier.classify(&baseline, 10_000.0).triggered_spike);
    }

    #[test]
    fn test_rolling_average_reports_speedup() {
        let config = LatencyConfig::default();
        let baseline = calibrated(800.0, 150.0);
        let mut rolling = RollingAverage::default();

        let mut last = None;
        for _ in 0..config.speedup_min_items {
            rolling.update(500.0, config.rolling_alpha);
            last = rolling.feedback(&baseline, &config);
        }
        assert_eq!(last, Some(PaceFeedback::SpeedingUp));
        assert_eq!(rolling.value, Some(500.0));
    }

    #[test]
    fn test_rolling_average_smooths() {
        let mut rolling = RollingAverage::default();
        assert_eq!(rolling.update(1000.0, 0.5), 1000.0);
        assert_eq!(rolling.update(500.0, 0.5), 750.0);
        assert_eq!(rolling.samples, 2);
    }
}
