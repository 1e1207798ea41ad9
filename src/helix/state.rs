//! Persisted interleaving state for one learner on one course

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::content::{ContentGraph, LegoId};
use crate::error::{Result, SchedulerError};
use crate::selection::{CyclePhase, SelectedItem};

pub const THREAD_COUNT: u8 = 3;

/// One progression thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSlot {
    pub thread_id: u8,
    /// Seeds this thread introduces, in order
    pub seed_queue: Vec<u32>,
    /// Position of the frontier seed in `seed_queue`
    pub cursor: usize,
    /// Position of the frontier LEGO inside its seed
    pub current_lego_index: usize,
    pub cycles_served: u64,
    pub reviews_served: u64,
    pub cycles_since_eternal: u32,
}

impl ThreadSlot {
    pub fn new(thread_id: u8) -> Self {
        Self {
            thread_id,
            seed_queue: Vec::new(),
            cursor: 0,
            current_lego_index: 0,
            cycles_served: 0,
            reviews_served: 0,
            cycles_since_eternal: 0,
        }
    }

    /// Seed the frontier is on, `None` once the queue is used up
    pub fn current_seed_id(&self) -> Option<u32> {
        self.seed_queue.get(self.cursor).copied()
    }

    /// Share of this thread's cycles that went to spaced review
    pub fn review_share(&self) -> f64 {
        if self.cycles_served == 0 {
            0.0
        } else {
            self.reviews_served as f64 / self.cycles_served as f64
        }
    }

    /// Count a served cycle against the thread
    pub fn record(&mut self, phase: CyclePhase) {
        self.cycles_served += 1;
        self.cycles_since_eternal = self.cycles_since_eternal.saturating_add(1);
        match phase {
            CyclePhase::Review => self.reviews_served += 1,
            CyclePhase::Eternal => self.cycles_since_eternal = 0,
            CyclePhase::Component | CyclePhase::Debut => {}
        }
    }

    pub(crate) fn advance_lego(&mut self) {
        self.current_lego_index += 1;
    }

    pub(crate) fn advance_seed(&mut self) {
        self.cursor += 1;
        self.current_lego_index = 0;
    }
}

/// Whether the learner speaks or only listens this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    Production,
    Listening,
}

impl CycleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleMode::Production => "production",
            CycleMode::Listening => "listening",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterjectionKind {
    /// Same phrase again
    Replay,
    /// One of the LEGO's component units
    Breakdown,
}

/// Cycle pushed in front of the normal rotation after a spike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interjection {
    pub kind: InterjectionKind,
    pub thread_id: u8,
    pub lego_id: LegoId,
    pub phase: CyclePhase,
    pub item: SelectedItem,
}

/// Cycle presented and waiting for the learner's response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCycle {
    pub cycle: u64,
    pub thread_id: u8,
    pub lego_id: LegoId,
    pub phase: CyclePhase,
    pub mode: CycleMode,
    pub item: SelectedItem,
    pub interjection: Option<InterjectionKind>,
    pub pause_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelixState {
    pub thread_1: ThreadSlot,
    pub thread_2: ThreadSlot,
    pub thread_3: ThreadSlot,
    /// Thread that served the last cycle (3 on a fresh state)
    pub active_thread: u8,
    /// Cycles presented so far; the next cycle is `cycle + 1`
    pub cycle: u64,
    /// Smooth weighted round-robin credit per thread
    pub credits: [f64; 3],
    pub pending: Option<PendingCycle>,
    pub interjections: VecDeque<Interjection>,
}

impl HelixState {
    /// Deal the course's seeds over the threads: seed n goes to thread ((n - 1) mod 3) + 1
    pub fn new_for_graph(graph: &ContentGraph) -> Self {
        let mut state = Self {
            thread_1: ThreadSlot::new(1),
            thread_2: ThreadSlot::new(2),
            thread_3: ThreadSlot::new(3),
            active_thread: THREAD_COUNT,
            cycle: 0,
            credits: [0.0; 3],
            pending: None,
            interjections: VecDeque::new(),
        };
        for seed in graph.seed_numbers() {
            let thread_id = (seed.saturating_sub(1) % THREAD_COUNT as u32) as u8 + 1;
            if let Some(slot) = state.thread_mut(thread_id) {
                slot.seed_queue.push(seed);
            }
        }
        state
    }

    pub fn thread(&self, thread_id: u8) -> Option<&ThreadSlot> {
        match thread_id {
            1 => Some(&self.thread_1),
            2 => Some(&self.thread_2),
            3 => Some(&self.thread_3),
            _ => None,
        }
    }

    /// Count a served cycle against its thread
    pub fn record_served(&mut self, thread_id: u8, phase: CyclePhase) {
        if let Some(slot) = self.thread_mut(thread_id) {
            slot.record(phase);
        }
    }

    pub fn thread_mut(&mut self, thread_id: u8) -> Option<&mut ThreadSlot> {
        match thread_id {
            1 => Some(&mut self.thread_1),
            2 => Some(&mut self.thread_2),
            3 => Some(&mut self.thread_3),
            _ => None,
        }
    }

    pub fn threads(&self) -> [&ThreadSlot; 3] {
        [&self.thread_1, &self.thread_2, &self.thread_3]
    }

    /// Structural checks run on every load and save
    pub fn validate(&self) -> Result<()> {
        if !(1..=THREAD_COUNT).contains(&self.active_thread) {
            return Err(SchedulerError::InvalidState(format!(
                "active_thread {} out of range",
                self.active_thread
            )));
        }
        for (expected, slot) in (1..=THREAD_COUNT).zip(self.threads()) {
            if slot.thread_id != expected {
                return Err(SchedulerError::InvalidState(format!(
                    "thread slot {} carries thread_id {}",
                    expected, slot.thread_id
                )));
            }
            if slot.cursor > slot.seed_queue.len() {
                return Err(SchedulerError::InvalidState(format!(
                    "thread {} cursor {} beyond queue of {}",
                    expected,
                    slot.cursor,
                    slot.seed_queue.len()
                )));
            }
            if slot.reviews_served > slot.cycles_served {
                return Err(SchedulerError::InvalidState(format!(
                    "thread {} served more reviews than cycles",
                    expected
                )));
            }
        }
        if self.credits.iter().any(|c| !c.is_finite()) {
            return Err(SchedulerError::InvalidState("non-finite thread credit".into()));
        }
        if let Some(pending) = &self.pending {
            if pending.cycle != self.cycle {
                return Err(SchedulerError::InvalidState(format!(
                    "pending cycle {} does not match cycle counter {}",
                    pending.cycle, self.cycle
                )));
            }
            if !(1..=THREAD_COUNT).contains(&pending.thread_id) {
                return Err(SchedulerError::InvalidState(format!(
                    "pending cycle on unknown thread {}",
                    pending.thread_id
                )));
            }
        }
        Ok(())
    }

    /// Seeds any thread has moved onto so far
    pub fn seeds_started(&self) -> u32 {
        self.threads()
            .iter()
            .map(|slot| {
                let opened = slot.cursor + usize::from(slot.current_seed_id().is_some());
                opened.min(slot.seed_queue.len()) as u32
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::sample_course;

    #[test]
    fn test_seeds_dealt_round_robin() {
        let state = HelixState::new_for_graph(&sample_course());
        assert_eq!(state.thread_1.seed_queue, vec![1, 4]);
        assert_eq!(state.thread_2.seed_queue, vec![2, 5]);
        assert_eq!(state.thread_3.seed_queue, vec![3, 6]);
        assert_eq!(state.active_thread, 3);
        assert!(state.validate().is_ok());
        assert_eq!(state.seeds_started(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_cursor() {
        let mut state = HelixState::new_for_graph(&sample_course());
        state.thread_2.cursor = 5;
        assert!(matches!(state.validate(), Err(SchedulerError::InvalidState(_))));
    }

    #[test]
    fn test_validate_rejects_swapped_slots() {
        let mut state = HelixState::new_for_graph(&sample_course());
        std::mem::swap(&mut state.thread_1, &mut state.thread_3);
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_state_json_roundtrip_is_stable() {
        let state = HelixState::new_for_graph(&sample_course());
        let json = serde_json::to_string(&state).unwrap();
        let back: HelixState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_record_tracks_review_share_and_eternal_gap() {
        let mut slot = ThreadSlot::new(1);
        slot.record(CyclePhase::Debut);
        slot.record(CyclePhase::Review);
        assert_eq!(slot.review_share(), 0.5);
        assert_eq!(slot.cycles_since_eternal, 2);
        slot.record(CyclePhase::Eternal);
        assert_eq!(slot.cycles_since_eternal, 0);
    }
}
