//! Per-LEGO exposure state machine
//!
//! `Introducing -> Active(position) -> Retired`. The wait before the next
//! exposure is always derived from the position, so the two can never
//! disagree no matter how the row was written.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fibonacci::fibonacci;
use crate::config::RepetitionConfig;
use crate::content::LegoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "position", rename_all = "snake_case")]
pub enum LegoStage {
    Introducing,
    Active(usize),
    Retired,
    /// Nothing of the LEGO is playable; out of rotation for good
    Shelved,
}

/// How a drilled response should move the LEGO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionOutcome {
    Success,
    /// Latency spike or failed attempt
    Struggle,
    /// Exposure without a usable judgement (listening cycle, no timing)
    Neutral,
}

/// Result of applying one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressChange {
    pub previous_position: usize,
    pub position: usize,
    pub skip_number: u32,
    pub retired_now: bool,
}

/// Learner progress on one LEGO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegoProgress {
    pub lego_id: LegoId,
    pub thread_id: u8,
    pub fibonacci_position: usize,
    pub reps_completed: u32,
    pub is_retired: bool,
    pub introduction_played: bool,
    pub introduction_index: u32,
    pub introduction_complete: bool,
    /// Build-up phrases already shown during the debut
    pub debut_played: u32,
    /// Global cycle at which the LEGO was last presented
    pub last_practiced_cycle: Option<u64>,
    /// Eternal phrase ids not yet drawn in the current generation
    pub eternal_urn: Vec<String>,
    pub urn_generation: u32,
    /// Set when no phrase, component or bare form of the LEGO can be played
    pub shelved: bool,
}

impl LegoProgress {
    /// State on first exposure
    pub fn new(lego_id: LegoId, thread_id: u8) -> Self {
        Self {
            lego_id,
            thread_id,
            fibonacci_position: 0,
            reps_completed: 0,
            is_retired: false,
            introduction_played: false,
            introduction_index: 0,
            introduction_complete: false,
            debut_played: 0,
            last_practiced_cycle: None,
            eternal_urn: Vec::new(),
            urn_generation: 0,
            shelved: false,
        }
    }

    pub fn stage(&self) -> LegoStage {
        if self.is_retired {
            LegoStage::Retired
        } else if self.shelved {
            LegoStage::Shelved
        } else if !self.introduction_complete {
            LegoStage::Introducing
        } else {
            LegoStage::Active(self.fibonacci_position)
        }
    }

    pub fn skip_number(&self) -> u32 {
        fibonacci(self.fibonacci_position)
    }

    /// In active rotation: introduced and not retired
    pub fn is_active(&self) -> bool {
        matches!(self.stage(), LegoStage::Active(_))
    }

    /// Cycles still to wait before the LEGO is due at `cycle`
    pub fn cycles_until_due(&self, cycle: u64) -> u64 {
        match self.last_practiced_cycle {
            None => 0,
            Some(last) => {
                let intervening = cycle.saturating_sub(last).saturating_sub(1);
                (self.skip_number() as u64).saturating_sub(intervening)
            }
        }
    }

    pub fn is_due(&self, cycle: u64) -> bool {
        self.is_active() && self.cycles_until_due(cycle) == 0
    }

    /// Record that the LEGO was presented at `cycle`
    pub fn touch(&mut self, cycle: u64) {
        self.last_practiced_cycle = Some(cycle);
    }

    /// Play one introduction sub-step; returns true when the LEGO became active
    pub fn play_introduction_step(&mut self, total_steps: u32) -> bool {
        if self.introduction_complete {
            return false;
        }
        self.introduction_played = true;
        self.introduction_index += 1;
        if self.introduction_index >= total_steps.max(1) {
            self.introduction_complete = true;
            self.fibonacci_position = 0;
            debug!("{} introduced, entering active rotation", self.lego_id);
            return true;
        }
        false
    }

    pub fn apply(&mut self, outcome: RepetitionOutcome, config: &RepetitionConfig) -> ProgressChange {
        let previous_position = self.fibonacci_position;
        let mut retired_now = false;

        if self.is_active() {
            match outcome {
                RepetitionOutcome::Success => {
                    self.reps_completed += 1;
                    self.fibonacci_position = (self.fibonacci_position + 1).min(config.fibonacci_cap);
                    if self.fibonacci_position == config.fibonacci_cap
                        && self.reps_completed > config.retirement_reps
                    {
                        self.is_retired = true;
                        retired_now = true;
                        debug!(
                            "{} retired after {} reps",
                            self.lego_id, self.reps_completed
                        );
                    }
                }
                RepetitionOutcome::Struggle => {
                    self.fibonacci_position = self.fibonacci_position.saturating_sub(1);
                }
                RepetitionOutcome::Neutral => {}
            }
        }

        ProgressChange {
            previous_position,
            position: self.fibonacci_position,
            skip_number: self.skip_number(),
            retired_now,
        }
    }

    /// Bring a stored row back inside the configured bounds
    pub fn normalize(&mut self, config: &RepetitionConfig) {
        if self.fibonacci_position > config.fibonacci_cap {
            self.fibonacci_position = config.fibonacci_cap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(position: usize, reps: u32) -> LegoProgress {
        let mut p = LegoProgress::new(LegoId::new(1, 1), 1);
        p.introduction_played = true;
        p.introduction_index = 1;
        p.introduction_complete = true;
        p.fibonacci_position = position;
        p.reps_completed = reps;
        p
    }

    #[test]
    fn test_successes_climb_fibonacci() {
        let config = RepetitionConfig::default();
        let mut p = active(0, 0);
        assert_eq!(p.skip_number(), 0);

        let mut positions = Vec::new();
        let mut skips = Vec::new();
        for _ in 0..3 {
            let change = p.apply(RepetitionOutcome::Success, &config);
            positions.push(change.position);
            skips.push(change.skip_number);
        }
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(skips, vec![1, 1, 2]);
        assert_eq!(p.reps_completed, 3);
    }

    #[test]
    fn test_struggle_regresses_but_not_below_zero() {
        let config = RepetitionConfig::default();
        let mut p = active(2, 4);
        assert_eq!(p.apply(RepetitionOutcome::Struggle, &config).position, 1);
        assert_eq!(p.apply(RepetitionOutcome::Struggle, &config).position, 0);
        assert_eq!(p.apply(RepetitionOutcome::Struggle, &config).position, 0);
        assert_eq!(p.reps_completed, 4);
    }

    #[test]
    fn test_position_capped() {
        let config = RepetitionConfig::default();
        let mut p = active(7, 0);
        let change = p.apply(RepetitionOutcome::Success, &config);
        assert_eq!(change.position, 7);
        assert_eq!(change.skip_number, 13);
        assert!(!change.retired_now);
    }

    #[test]
    fn test_retirement_at_cap_after_threshold() {
        let config = RepetitionConfig::default();
        let mut p = active(7, 10);
        let change = p.apply(RepetitionOutcome::Success, &config);
        assert!(change.retired_now);
        assert!(p.is_retired);
        assert_eq!(p.stage(), LegoStage::Retired);
        assert!(!p.is_active());
        assert!(!p.is_due(1_000));
    }

    #[test]
    fn test_introduction_steps_then_active() {
        let mut p = LegoProgress::new(LegoId::new(2, 2), 2);
        assert_eq!(p.stage(), LegoStage::Introducing);
        assert!(!p.play_introduction_step(2));
        assert!(p.introduction_played);
        assert!(p.play_introduction_step(2));
        assert_eq!(p.stage(), LegoStage::Active(0));
    }

    #[test]
    fn test_outcomes_ignored_while_introducing() {
        let config = RepetitionConfig::default();
        let mut p = LegoProgress::new(LegoId::new(1, 1), 1);
        let change = p.apply(RepetitionOutcome::Success, &config);
        assert_eq!(change.position, 0);
        assert_eq!(p.reps_completed, 0);
    }

    #[test]
    fn test_due_counts_intervening_cycles() {
        let mut p = active(3, 3); // skip 2
        p.touch(10);
        assert!(!p.is_due(11));
        assert!(!p.is_due(12));
        assert!(p.is_due(13));
        assert_eq!(p.cycles_until_due(11), 2);
    }

    #[test]
    fn test_shelved_lego_is_never_due() {
        let config = RepetitionConfig::default();
        let mut p = active(2, 2);
        p.shelved = true;
        assert_eq!(p.stage(), LegoStage::Shelved);
        assert!(!p.is_active());
        assert!(!p.is_due(100));
        assert_eq!(p.apply(RepetitionOutcome::Success, &config).position, 2);
    }
}
