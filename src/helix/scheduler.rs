//! Thread selection and in-thread LEGO choice

use std::collections::BTreeMap;
use tracing::debug;

use super::state::{HelixState, ThreadSlot, THREAD_COUNT};
use crate::config::{InterleavePolicy, SchedulerConfig};
use crate::content::{ContentGraph, LegoId};
use crate::error::{Result, SchedulerError};
use crate::repetition::LegoProgress;
use crate::selection::{CyclePhase, PhraseSelector};

/// The scheduler's decision for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledLego {
    pub thread_id: u8,
    pub seed_number: u32,
    pub lego_index: u32,
    pub lego_id: LegoId,
    /// Why this LEGO: introduction, debut, spaced review or eternal review
    pub phase: CyclePhase,
}

impl ScheduledLego {
    fn new(thread_id: u8, lego_id: LegoId, phase: CyclePhase) -> Self {
        Self {
            thread_id,
            seed_number: lego_id.seed,
            lego_index: lego_id.index,
            lego_id,
            phase,
        }
    }
}

pub struct ThreadScheduler<'a> {
    graph: &'a ContentGraph,
    config: &'a SchedulerConfig,
}

impl<'a> ThreadScheduler<'a> {
    pub fn new(graph: &'a ContentGraph, config: &'a SchedulerConfig) -> Self {
        Self { graph, config }
    }

    /// Pick the thread and LEGO for the next cycle.
    ///
    /// Returns `Ok(None)` when every thread is exhausted. Updates the
    /// rotation only; the thread's counters move when the cycle is actually
    /// served ([`HelixState::record_served`]).
    pub fn next(
        &self,
        state: &mut HelixState,
        progress: &BTreeMap<LegoId, LegoProgress>,
    ) -> Result<Option<ScheduledLego>> {
        let cycle = state.cycle + 1;
        let chosen = match self.config.helix.policy {
            InterleavePolicy::RoundRobin => self.round_robin(state, progress, cycle)?,
            InterleavePolicy::Weighted => self.weighted(state, progress, cycle)?,
        };

        if let Some(choice) = chosen {
            state.active_thread = choice.thread_id;
            debug!(
                "Cycle {}: thread {} -> {} ({})",
                cycle,
                choice.thread_id,
                choice.lego_id,
                choice.phase.as_str()
            );
        }
        Ok(chosen)
    }

    fn round_robin(
        &self,
        state: &mut HelixState,
        progress: &BTreeMap<LegoId, LegoProgress>,
        cycle: u64,
    ) -> Result<Option<ScheduledLego>> {
        let mut thread_id = state.active_thread;
        for _ in 0..THREAD_COUNT {
            thread_id = (thread_id % THREAD_COUNT) + 1;
            if let Some(choice) = self.choose_in_thread(state, thread_id, progress, cycle)? {
                return Ok(Some(choice));
            }
            debug!("Thread {} exhausted, skipping", thread_id);
        }
        Ok(None)
    }

    /// Smooth weighted round robin over the threads that still have work
    fn weighted(
        &self,
        state: &mut HelixState,
        progress: &BTreeMap<LegoId, LegoProgress>,
        cycle: u64,
    ) -> Result<Option<ScheduledLego>> {
        let mut candidates = Vec::new();
        for thread_id in 1..=THREAD_COUNT {
            if let Some(choice) = self.choose_in_thread(state, thread_id, progress, cycle)? {
                candidates.push(choice);
            }
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let weights = self.config.helix.weights;
        let mut total = 0.0;
        for choice in &candidates {
            let i = (choice.thread_id - 1) as usize;
            state.credits[i] += weights[i];
            total += weights[i];
        }

        let mut best = candidates[0];
        for choice in &candidates[1..] {
            let credit = state.credits[(choice.thread_id - 1) as usize];
            if credit > state.credits[(best.thread_id - 1) as usize] {
                best = *choice;
            }
        }
        state.credits[(best.thread_id - 1) as usize] -= total;
        Ok(Some(best))
    }

    /// What `thread_id` would serve at `cycle`, `None` if it is exhausted.
    ///
    /// Moves the thread's frontier past LEGOs whose debut has finished.
    pub fn choose_in_thread(
        &self,
        state: &mut HelixState,
        thread_id: u8,
        progress: &BTreeMap<LegoId, LegoProgress>,
        cycle: u64,
    ) -> Result<Option<ScheduledLego>> {
        let slot = state.thread_mut(thread_id).ok_or_else(|| {
            SchedulerError::InvalidState(format!("no thread {}", thread_id))
        })?;
        let frontier = self.settle_frontier(slot, progress)?;
        let pacing = &self.config.pacing;

        let mine = move || {
            progress
                .values()
                .filter(move |p| p.thread_id == thread_id && Some(p.lego_id) != frontier.map(|f| f.0))
                .filter(|p| !p.shelved)
        };

        // exhausted: frontier finished and every playable LEGO retired
        if frontier.is_none() && !mine().any(|p| !p.is_retired) {
            return Ok(None);
        }

        // 1. due review, rationed while new material remains
        let review_allowed = frontier.is_none() || slot.review_share() < pacing.spaced_rep_fraction;
        if review_allowed {
            let most_overdue = mine()
                .filter(|p| p.is_due(cycle))
                .max_by(|a, b| overdue(a, cycle).cmp(&overdue(b, cycle)).then(b.lego_id.cmp(&a.lego_id)));
            if let Some(p) = most_overdue {
                return Ok(Some(ScheduledLego::new(thread_id, p.lego_id, CyclePhase::Review)));
            }
        }

        // 2. eternal review on its cadence
        if slot.cycles_since_eternal >= pacing.eternal_interval {
            let stalest = mine()
                .filter(|p| p.is_retired)
                .min_by_key(|p| (p.last_practiced_cycle, p.lego_id));
            if let Some(p) = stalest {
                return Ok(Some(ScheduledLego::new(thread_id, p.lego_id, CyclePhase::Eternal)));
            }
        }

        // 3. frontier
        if let Some((lego_id, phase)) = frontier {
            return Ok(Some(ScheduledLego::new(thread_id, lego_id, phase)));
        }

        // 4. nothing new left: the active LEGO closest to due, served early
        let soonest = mine()
            .filter(|p| p.is_active())
            .min_by_key(|p| (p.cycles_until_due(cycle), p.lego_id));
        Ok(soonest.map(|p| ScheduledLego::new(thread_id, p.lego_id, CyclePhase::Review)))
    }

    /// Advance the cursor to the first LEGO that still needs its
    /// introduction or debut and report what it needs
    fn settle_frontier(
        &self,
        slot: &mut ThreadSlot,
        progress: &BTreeMap<LegoId, LegoProgress>,
    ) -> Result<Option<(LegoId, CyclePhase)>> {
        let selector = PhraseSelector::new(self.graph);
        while let Some(seed_number) = slot.current_seed_id() {
            let seed = self.graph.seed(seed_number).ok_or_else(|| SchedulerError::ContentDesync {
                course_code: self.graph.course_code().to_string(),
                thread_id: slot.thread_id,
                seed_number,
            })?;

            let Some(&lego_id) = seed.lego_ids.get(slot.current_lego_index) else {
                slot.advance_seed();
                continue;
            };

            match progress.get(&lego_id) {
                None => return Ok(Some((lego_id, CyclePhase::Component))),
                Some(p) if p.shelved => slot.advance_lego(),
                Some(p) if !p.introduction_complete => {
                    return Ok(Some((lego_id, CyclePhase::Component)))
                }
                Some(p)
                    if !p.is_retired
                        && p.debut_played
                            < selector.debut_length(lego_id, self.config.pacing.debut_phrases_fraction) =>
                {
                    return Ok(Some((lego_id, CyclePhase::Debut)))
                }
                Some(_) => slot.advance_lego(),
            }
        }
        Ok(None)
    }
}

/// Cycles past due; never-practiced LEGOs count as the most overdue
fn overdue(progress: &LegoProgress, cycle: u64) -> i64 {
    match progress.last_practiced_cycle {
        None => i64::MAX,
        Some(last) => {
            let intervening = cycle.saturating_sub(last).saturating_sub(1) as i64;
            intervening - progress.skip_number() as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::sample_course;

    /// Drive the scheduler the way the session does, without responses
    fn serve(
        scheduler: &ThreadScheduler,
        state: &mut HelixState,
        progress: &mut BTreeMap<LegoId, LegoProgress>,
        graph: &ContentGraph,
    ) -> ScheduledLego {
        let choice = scheduler.next(state, progress).unwrap().unwrap();
        state.cycle += 1;
        let p = progress
            .entry(choice.lego_id)
            .or_insert_with(|| LegoProgress::new(choice.lego_id, choice.thread_id));
        match choice.phase {
            CyclePhase::Component => {
                let steps = PhraseSelector::new(graph).introduction_steps(choice.lego_id).unwrap();
                p.play_introduction_step(steps);
            }
            CyclePhase::Debut => p.debut_played += 1,
            CyclePhase::Review | CyclePhase::Eternal => {}
        }
        p.touch(state.cycle);
        state.record_served(choice.thread_id, choice.phase);
        choice
    }

    #[test]
    fn test_first_cycle_introduces_first_lego() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        let choice = scheduler.next(&mut state, &BTreeMap::new()).unwrap().unwrap();
        assert_eq!(choice.thread_id, 1);
        assert_eq!(choice.lego_id, LegoId::new(1, 1));
        assert_eq!(choice.seed_number, 1);
        assert_eq!(choice.lego_index, 1);
        assert_eq!(choice.phase, CyclePhase::Component);
        assert_eq!(state.active_thread, 1);
    }

    #[test]
    fn test_round_robin_balance() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        let mut progress = BTreeMap::new();

        let mut visits = [0u32; 3];
        let mut order = Vec::new();
        for _ in 0..30 {
            let choice = serve(&scheduler, &mut state, &mut progress, &graph);
            visits[(choice.thread_id - 1) as usize] += 1;
            order.push(choice.thread_id);
        }
        assert_eq!(visits, [10, 10, 10]);
        assert_eq!(&order[..6], &[1, 2, 3, 1, 2, 3]);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_weighted_policy_follows_weights() {
        let graph = sample_course();
        let mut config = SchedulerConfig::default();
        config.helix.policy = InterleavePolicy::Weighted;
        config.helix.weights = [2.0, 1.0, 1.0];
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        let mut progress = BTreeMap::new();

        let mut visits = [0u32; 3];
        for _ in 0..40 {
            let choice = serve(&scheduler, &mut state, &mut progress, &graph);
            visits[(choice.thread_id - 1) as usize] += 1;
        }
        assert_eq!(visits, [20, 10, 10]);
    }

    #[test]
    fn test_intro_then_debut_then_next_lego() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        let mut progress = BTreeMap::new();

        let thread_1: Vec<(LegoId, CyclePhase)> = (0..15)
            .map(|_| serve(&scheduler, &mut state, &mut progress, &graph))
            .filter(|c| c.thread_id == 1)
            .map(|c| (c.lego_id, c.phase))
            .collect();
        let s1 = LegoId::new(1, 1);
        assert_eq!(
            thread_1,
            vec![
                (s1, CyclePhase::Component),
                (s1, CyclePhase::Debut),
                (s1, CyclePhase::Debut),
                (s1, CyclePhase::Debut),
                // position 0 skips nothing, so the finished LEGO is due at once
                (s1, CyclePhase::Review),
            ]
        );
        assert_eq!(state.thread_1.cursor, 1);
        assert_eq!(state.thread_1.reviews_served, 1);
    }

    #[test]
    fn test_due_review_rationed_by_share() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        state.cycle = 20;

        // S0001L01 done with its debut and due; frontier on seed 4
        let s1 = LegoId::new(1, 1);
        let mut p = LegoProgress::new(s1, 1);
        p.introduction_played = true;
        p.introduction_index = 1;
        p.introduction_complete = true;
        p.debut_played = 3;
        p.touch(10);
        let mut progress = BTreeMap::new();
        progress.insert(s1, p);

        let first = scheduler.choose_in_thread(&mut state, 1, &progress, 21).unwrap().unwrap();
        assert_eq!(first.phase, CyclePhase::Review);
        assert_eq!(first.lego_id, s1);

        // thread already spent half its cycles on review: frontier wins
        state.thread_1.cycles_served = 4;
        state.thread_1.reviews_served = 2;
        let second = scheduler.choose_in_thread(&mut state, 1, &progress, 21).unwrap().unwrap();
        assert_eq!(second.phase, CyclePhase::Component);
        assert_eq!(second.lego_id, LegoId::new(4, 1));
    }

    #[test]
    fn test_eternal_cadence_picks_stalest_retired() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        state.thread_1.cycles_since_eternal = config.pacing.eternal_interval;

        let mut progress = BTreeMap::new();
        for (id, last) in [(LegoId::new(1, 1), 50), (LegoId::new(4, 1), 30)] {
            let mut p = LegoProgress::new(id, 1);
            p.introduction_complete = true;
            p.is_retired = true;
            p.touch(last);
            progress.insert(id, p);
        }

        let choice = scheduler.choose_in_thread(&mut state, 1, &progress, 60).unwrap().unwrap();
        assert_eq!(choice.phase, CyclePhase::Eternal);
        assert_eq!(choice.lego_id, LegoId::new(4, 1));
    }

    #[test]
    fn test_all_retired_threads_complete_course() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);

        let mut progress = BTreeMap::new();
        for seed in graph.seed_numbers() {
            let thread_id = ((seed - 1) % 3) as u8 + 1;
            for &lego in &graph.seed(seed).unwrap().lego_ids {
                let mut p = LegoProgress::new(lego, thread_id);
                p.introduction_complete = true;
                p.debut_played = 10;
                p.is_retired = true;
                progress.insert(lego, p);
            }
        }
        assert_eq!(scheduler.next(&mut state, &progress).unwrap(), None);
        assert!(state.threads().iter().all(|t| t.current_seed_id().is_none()));
    }

    #[test]
    fn test_missing_seed_is_content_desync() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);
        state.thread_1.seed_queue = vec![99];

        let err = scheduler.next(&mut state, &BTreeMap::new()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::ContentDesync { thread_id: 1, seed_number: 99, .. }
        ));
    }

    #[test]
    fn test_choice_is_not_counted_until_served() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);

        let choice = scheduler.next(&mut state, &BTreeMap::new()).unwrap().unwrap();
        assert_eq!(state.thread_1.cycles_served, 0);

        state.record_served(choice.thread_id, choice.phase);
        assert_eq!(state.thread_1.cycles_served, 1);
    }

    #[test]
    fn test_shelved_lego_leaves_frontier_and_rotation() {
        let graph = sample_course();
        let config = SchedulerConfig::default();
        let scheduler = ThreadScheduler::new(&graph, &config);
        let mut state = HelixState::new_for_graph(&graph);

        let s1 = LegoId::new(1, 1);
        let mut shelved = LegoProgress::new(s1, 1);
        shelved.shelved = true;
        let mut progress = BTreeMap::new();
        progress.insert(s1, shelved);

        let choice = scheduler.choose_in_thread(&mut state, 1, &progress, 1).unwrap().unwrap();
        assert_eq!(choice.lego_id, LegoId::new(4, 1));
        assert_eq!(choice.phase, CyclePhase::Component);

        // the rest of the thread retired: the shelved LEGO does not keep it alive
        for lego in [LegoId::new(4, 1), LegoId::new(4, 2)] {
            let mut p = LegoProgress::new(lego, 1);
            p.introduction_complete = true;
            p.debut_played = 10;
            p.is_retired = true;
            progress.insert(lego, p);
        }
        assert_eq!(scheduler.choose_in_thread(&mut state, 1, &progress, 40).unwrap(), None);
    }
}
