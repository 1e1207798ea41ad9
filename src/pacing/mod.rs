//! Latency-based pacing
//!
//! Calibrates a per-learner baseline, classifies each response against it,
//! and derives the pause the learner gets before the target voice plays.

mod baseline;
mod classifier;

pub use baseline::{
    BaselineCalibrator, CalibrationChange, EffectiveBaseline, LearnerBaseline, RunningStats,
    TimingSample,
};
pub use classifier::{Classification, LatencyClassifier, PaceFeedback, RollingAverage, SpikeResponse};

use crate::config::PacingConfig;

/// Pause before the first target voice, in milliseconds.
///
/// Starts from the model audio length scaled by the multiplier and playback
/// speed; when the learner's rolling latency says they need longer for this
/// much text, that wins. Always clamped to the configured bounds.
pub fn pause_duration_ms(
    config: &PacingConfig,
    model_duration_ms: Option<u64>,
    target_text: &str,
    rolling_latency_per_char: Option<f64>,
) -> u64 {
    let audio_based = model_duration_ms
        .map(|ms| ms as f64 * config.pause_multiplier / config.playback_speed)
        .unwrap_or(config.min_pause_ms as f64);

    let chars = target_text.chars().filter(|c| !c.is_whitespace()).count() as f64;
    let learner_based = rolling_latency_per_char.map(|per_char| per_char * chars).unwrap_or(0.0);

    let pause = audio_based.max(learner_based).round() as u64;
    pause.clamp(config.min_pause_ms, config.max_pause_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_scales_with_audio_and_speed() {
        let mut config = PacingConfig::default();
        assert_eq!(pause_duration_ms(&config, Some(2000), "hola", None), 3000);
        config.playback_speed = 2.0;
        assert_eq!(pause_duration_ms(&config, Some(2000), "hola", None), 1500);
    }

    #[test]
    fn test_pause_clamped() {
        let config = PacingConfig::default();
        assert_eq!(pause_duration_ms(&config, Some(100), "a", None), config.min_pause_ms);
        assert_eq!(pause_duration_ms(&config, Some(60_000), "a", None), config.max_pause_ms);
    }

    #[test]
    fn test_slow_learner_gets_longer_pause() {
        let config = PacingConfig::default();
        // 10 chars at 400 ms/char beats 2000 * 1.5
        let pause = pause_duration_ms(&config, Some(2000), "abcde fghij", Some(400.0));
        assert_eq!(pause, 4000);
    }
}
