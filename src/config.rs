//! Scheduler configuration
//!
//! Two layers: `<data_dir>/config.toml` holds the global defaults and
//! `<data_dir>/courses/<course>.toml` may override any subset of them for
//! one course. The layers are merged key by key and resolved once when a
//! session opens.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Fully resolved configuration for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub pacing: PacingConfig,
    pub repetition: RepetitionConfig,
    pub latency: LatencyConfig,
    pub helix: HelixConfig,
    pub session_structure: SessionStructure,
    pub storage: StorageConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pacing: PacingConfig::default(),
            repetition: RepetitionConfig::default(),
            latency: LatencyConfig::default(),
            helix: HelixConfig::default(),
            session_structure: SessionStructure::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Target audio playback rate (1.0 = recorded speed)
    pub playback_speed: f64,
    pub min_pause_ms: u64,
    pub max_pause_ms: u64,
    /// Pause length as a multiple of the model target audio
    pub pause_multiplier: f64,
    /// Share of a thread's cycles that may go to due reviews while it still has new material
    pub spaced_rep_fraction: f64,
    /// Share of a LEGO's build-up phrases played during its debut
    pub debut_phrases_fraction: f64,
    /// Thread cycles between eternal reviews of retired LEGOs
    pub eternal_interval: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            playback_speed: 1.0,
            min_pause_ms: 1500,
            max_pause_ms: 8000,
            pause_multiplier: 1.5,
            spaced_rep_fraction: 0.5,
            debut_phrases_fraction: 1.0,
            eternal_interval: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepetitionConfig {
    /// Highest Fibonacci position a LEGO can reach
    pub fibonacci_cap: usize,
    /// Reps that must be exceeded (at the cap) before retirement
    pub retirement_reps: u32,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            fibonacci_cap: 7,
            retirement_reps: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// k in `mean + k * stddev`
    pub spike_sensitivity: f64,
    /// Spikes above `mean + breakdown_sensitivity * stddev` break the phrase down
    pub breakdown_sensitivity: f64,
    /// Timed items needed before the baseline is trusted
    pub calibration_items: u32,
    /// Weight of each new sample once the baseline is calibrated
    pub baseline_ewma_alpha: f64,
    /// Weight of the newest sample in the session rolling average
    pub rolling_alpha: f64,
    /// Fraction below baseline mean that counts as speeding up
    pub speedup_margin: f64,
    pub speedup_min_items: u32,
    /// Reported while no calibration exists (ms per character)
    pub default_baseline_mean: f64,
    pub default_baseline_stddev: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            spike_sensitivity: 2.0,
            breakdown_sensitivity: 3.5,
            calibration_items: 10,
            baseline_ewma_alpha: 0.05,
            rolling_alpha: 0.3,
            speedup_margin: 0.15,
            speedup_min_items: 5,
            default_baseline_mean: 800.0,
            default_baseline_stddev: 200.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterleavePolicy {
    RoundRobin,
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelixConfig {
    pub policy: InterleavePolicy,
    /// Relative weight of threads 1..=3 under the weighted policy
    pub weights: [f64; 3],
}

impl Default for HelixConfig {
    fn default() -> Self {
        Self {
            policy: InterleavePolicy::RoundRobin,
            weights: [1.0, 1.0, 1.0],
        }
    }
}

/// Production share of cycles from a seed-count milestone onwards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureMilestone {
    pub from_seeds: u32,
    pub production_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStructure {
    /// Sorted by `from_seeds`
    pub milestones: Vec<StructureMilestone>,
}

impl Default for SessionStructure {
    fn default() -> Self {
        Self {
            milestones: vec![
                StructureMilestone { from_seeds: 0, production_percent: 100 },
                StructureMilestone { from_seeds: 30, production_percent: 85 },
                StructureMilestone { from_seeds: 120, production_percent: 70 },
            ],
        }
    }
}

impl SessionStructure {
    /// Production percentage once `seeds_started` seeds have been opened
    pub fn production_percent(&self, seeds_started: u32) -> u8 {
        self.milestones
            .iter()
            .take_while(|m| m.from_seeds <= seeds_started)
            .last()
            .map(|m| m.production_percent)
            .unwrap_or(100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Attempts at committing one cycle before giving up
    pub max_write_retries: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_write_retries: 3,
            busy_timeout_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        let p = &self.pacing;
        if p.playback_speed <= 0.0 {
            return Err(SchedulerError::Config("pacing.playback_speed must be positive".into()));
        }
        if p.min_pause_ms > p.max_pause_ms {
            return Err(SchedulerError::Config(
                "pacing.min_pause_ms must not exceed pacing.max_pause_ms".into(),
            ));
        }
        for (name, value) in [
            ("pacing.spaced_rep_fraction", p.spaced_rep_fraction),
            ("pacing.debut_phrases_fraction", p.debut_phrases_fraction),
            ("latency.baseline_ewma_alpha", self.latency.baseline_ewma_alpha),
            ("latency.rolling_alpha", self.latency.rolling_alpha),
            ("latency.speedup_margin", self.latency.speedup_margin),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SchedulerError::Config(format!("{} must be within 0..=1", name)));
            }
        }
        if p.eternal_interval == 0 {
            return Err(SchedulerError::Config("pacing.eternal_interval must be at least 1".into()));
        }

        let r = &self.repetition;
        if r.fibonacci_cap == 0 || r.fibonacci_cap > crate::repetition::MAX_FIBONACCI_CAP {
            return Err(SchedulerError::Config(format!(
                "repetition.fibonacci_cap must be within 1..={}",
                crate::repetition::MAX_FIBONACCI_CAP
            )));
        }

        let l = &self.latency;
        if l.spike_sensitivity <= 0.0 || l.breakdown_sensitivity < l.spike_sensitivity {
            return Err(SchedulerError::Config(
                "latency.breakdown_sensitivity must be >= latency.spike_sensitivity > 0".into(),
            ));
        }
        if l.calibration_items < 2 {
            return Err(SchedulerError::Config("latency.calibration_items must be at least 2".into()));
        }

        let w = &self.helix.weights;
        if w.iter().any(|x| *x < 0.0) || w.iter().sum::<f64>() <= 0.0 {
            return Err(SchedulerError::Config(
                "helix.weights must be non-negative with a positive sum".into(),
            ));
        }

        let milestones = &self.session_structure.milestones;
        if milestones.windows(2).any(|pair| pair[0].from_seeds > pair[1].from_seeds) {
            return Err(SchedulerError::Config(
                "session_structure.milestones must be sorted by from_seeds".into(),
            ));
        }
        if milestones.iter().any(|m| m.production_percent > 100) {
            return Err(SchedulerError::Config("production_percent must be <= 100".into()));
        }

        Ok(())
    }
}

/// Resolve the configuration for a course: course overlay on global file on defaults
pub fn resolve(data_dir: &Path, course_code: &str) -> Result<SchedulerConfig> {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    let global_path = data_dir.join("config.toml");
    if let Some(global) = read_layer(&global_path)? {
        merge_values(&mut merged, global);
    }

    let course_path = data_dir.join("courses").join(format!("{}.toml", course_code));
    if let Some(course) = read_layer(&course_path)? {
        debug!("Applying course overrides from {:?}", course_path);
        merge_values(&mut merged, course);
    }

    let config: SchedulerConfig = merged
        .try_into()
        .map_err(|e: toml::de::Error| SchedulerError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

fn read_layer(path: &Path) -> Result<Option<toml::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)
        .map_err(|e| SchedulerError::Config(format!("{:?}: {}", path, e)))?;
    Ok(Some(value))
}

/// Tables merge recursively; any other overlay value replaces the base
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Write the default global config if none exists
pub fn write_default_config(data_dir: &Path) -> Result<PathBuf> {
    let path = data_dir.join("config.toml");
    if !path.exists() {
        let body = toml::to_string_pretty(&SchedulerConfig::default())
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        let content = format!(
            "# helix scheduler configuration\n# Per-course overrides go in courses/<course_code>.toml\n\n{}",
            body
        );
        std::fs::write(&path, content)?;
    }
    Ok(path)
}

/// `./.helix` when present, otherwise `~/.helix`
pub fn default_data_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".helix");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir()
        .ok_or_else(|| SchedulerError::Config("could not find home directory".into()))?;
    Ok(home.join(".helix"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_course_overlay_wins_over_global() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("courses")).unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            "[latency]\nspike_sensitivity = 2.5\n[pacing]\nmin_pause_ms = 1000\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("courses/spa.toml"),
            "[latency]\nspike_sensitivity = 3.0\n",
        )
        .unwrap();

        let config = resolve(temp.path(), "spa").unwrap();
        assert_eq!(config.latency.spike_sensitivity, 3.0);
        assert_eq!(config.pacing.min_pause_ms, 1000);
        // untouched keys keep their defaults
        assert_eq!(config.latency.breakdown_sensitivity, 3.5);

        let other = resolve(temp.path(), "ita").unwrap();
        assert_eq!(other.latency.spike_sensitivity, 2.5);
    }

    #[test]
    fn test_written_default_config_resolves_to_defaults() {
        let temp = TempDir::new().unwrap();
        write_default_config(temp.path()).unwrap();
        let config = resolve(temp.path(), "any").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut config = SchedulerConfig::default();
        config.helix.weights = [0.0, 0.0, 0.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_percent_by_milestone() {
        let structure = SessionStructure::default();
        assert_eq!(structure.production_percent(0), 100);
        assert_eq!(structure.production_percent(29), 100);
        assert_eq!(structure.production_percent(30), 85);
        assert_eq!(structure.production_percent(500), 70);
    }
}
