//! The session facade
//!
//! Every call loads the learner's snapshot (session row included), works
//! out the cycle on owned copies and commits the result in one transaction.
//! A write conflict throws the work away and starts again from a fresh
//! snapshot, so nothing in memory is touched until a commit has gone through.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::payload::{AdaptationResult, CycleOutcome, CyclePayload, NextAction};
use crate::config::{self, LatencyConfig, SchedulerConfig};
use crate::content::{ContentGraph, CourseSource, FileCourseSource, LegoId};
use crate::error::{Result, SchedulerError};
use crate::helix::{
    CycleMode, HelixState, Interjection, InterjectionKind, PendingCycle, ThreadScheduler, THREAD_COUNT,
};
use crate::pacing::{
    pause_duration_ms, BaselineCalibrator, LatencyClassifier, SpikeResponse, TimingSample,
};
use crate::repetition::{LegoProgress, RepetitionOutcome};
use crate::selection::{CyclePhase, PhraseSelector, SelectedItem};
use crate::storage::{
    self, CycleUpdate, LearnerSnapshot, LearnerStore, ResponseMetric, SessionRecord, SpikeEvent,
};

/// Learner overview for `helix status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerStatus {
    pub learner_id: String,
    pub course_code: String,
    pub revision: i64,
    pub cycles: u64,
    pub seeds_started: u32,
    pub legos_seen: usize,
    pub legos_active: usize,
    pub legos_retired: usize,
    /// Out of rotation because nothing of them is playable
    pub legos_shelved: usize,
    pub baseline_calibrated: bool,
    pub calibration_remaining: u32,
    pub baseline_mean: Option<f64>,
    /// Open session, if any
    pub session_id: Option<String>,
    pub items_practiced: u32,
    pub spikes_detected: u32,
    pub awaiting_response: bool,
}

pub struct SessionOrchestrator {
    store: LearnerStore,
    graph: ContentGraph,
    config: SchedulerConfig,
    learner_id: String,
    session: SessionRecord,
}

impl SessionOrchestrator {
    /// Resume the learner's open session on this course, or start one
    pub fn open(store: LearnerStore, graph: ContentGraph, config: SchedulerConfig, learner_id: &str) -> Result<Self> {
        let course_code = graph.course_code().to_string();
        let session = match store.load_open_session(learner_id, &course_code)? {
            Some(session) => {
                info!("Resuming session {} for {} on {}", session.id, learner_id, course_code);
                session
            }
            None => {
                let session = SessionRecord::start(learner_id, &course_code);
                store.save_session(&session)?;
                info!("Started session {} for {} on {}", session.id, learner_id, course_code);
                session
            }
        };

        Ok(Self {
            store,
            graph,
            config,
            learner_id: learner_id.to_string(),
            session,
        })
    }

    /// Open against a data directory: resolves the config, loads
    /// `courses/<course>.json` and opens `helix.sqlite`
    pub fn open_in(data_dir: &Path, learner_id: &str, course_code: &str) -> Result<Self> {
        let config = config::resolve(data_dir, course_code)?;
        let graph = FileCourseSource::new(&data_dir.join("courses")).get_course_graph(course_code)?;
        let store = LearnerStore::open(&storage::db_path(data_dir), config.storage.busy_timeout_ms)?;
        Self::open(store, graph, config, learner_id)
    }

    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn course_code(&self) -> &str {
        self.graph.course_code()
    }

    /// The session as last committed by any handle; a fresh one when
    /// another handle has closed it
    fn live_session(&self, snapshot: &mut LearnerSnapshot) -> SessionRecord {
        match snapshot.session.take() {
            Some(session) => {
                if session.id != self.session.id {
                    info!("Joining session {} opened elsewhere for {}", session.id, self.learner_id);
                }
                session
            }
            None => {
                let session = SessionRecord::start(&self.learner_id, self.course_code());
                info!(
                    "Session {} was closed elsewhere, starting {} for {}",
                    self.session.id, session.id, self.learner_id
                );
                session
            }
        }
    }

    /// Run `attempt` until it commits or fails for a reason a fresh read cannot fix
    fn with_retries<T>(&mut self, what: &str, mut attempt: impl FnMut(&mut Self) -> Result<T>) -> Result<T> {
        let max = self.config.storage.max_write_retries.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt(self) {
                Err(e) if e.is_retryable() && tries < max => {
                    warn!("{} for {} hit {} (attempt {}/{}), retrying", what, self.learner_id, e, tries, max);
                }
                other => return other,
            }
        }
    }

    /// Decide, persist and return the next cycle.
    ///
    /// A cycle already awaiting its response is served again unchanged.
    pub fn next_cycle(&mut self) -> Result<CycleOutcome> {
        self.with_retries("next_cycle", |this| this.try_next_cycle())
    }

    fn try_next_cycle(&mut self) -> Result<CycleOutcome> {
        let mut snapshot = self.store.load(&self.learner_id, self.course_code())?;
        let mut state = match snapshot.helix.take() {
            Some(state) => state,
            None => HelixState::new_for_graph(&self.graph),
        };

        if let Some(pending) = &state.pending {
            debug!("Cycle {} still awaiting a response, serving it again", pending.cycle);
            return Ok(CycleOutcome::Cycle(CyclePayload::from(pending)));
        }

        let cycle = state.cycle + 1;
        let rolling = match &snapshot.session {
            Some(session) => session.rolling.value,
            None => self.session.rolling.value,
        };
        let selector = PhraseSelector::new(&self.graph);
        let mut changed: Vec<LegoId> = Vec::new();

        let pending = match state.interjections.pop_front() {
            Some(interjection) => {
                let progress = snapshot
                    .progress
                    .get_mut(&interjection.lego_id)
                    .ok_or(SchedulerError::UnknownLego(interjection.lego_id))?;
                progress.touch(cycle);
                changed.push(interjection.lego_id);
                self.pending_cycle(
                    cycle,
                    interjection.thread_id,
                    interjection.phase,
                    CycleMode::Production,
                    interjection.item,
                    Some(interjection.kind),
                    rolling,
                )
            }
            None => {
                let scheduler = ThreadScheduler::new(&self.graph, &self.config);
                let fraction = self.config.pacing.debut_phrases_fraction;
                // every skip retires a phase of one LEGO, so this always settles
                let max_attempts = 3 * self.graph.lego_count() + usize::from(THREAD_COUNT);
                let mut chosen = None;
                let mut exhausted = false;

                for _ in 0..max_attempts {
                    let Some(choice) = scheduler.next(&mut state, &snapshot.progress)? else {
                        exhausted = true;
                        break;
                    };
                    let progress = snapshot
                        .progress
                        .entry(choice.lego_id)
                        .or_insert_with(|| LegoProgress::new(choice.lego_id, choice.thread_id));
                    changed.push(choice.lego_id);
                    progress.touch(cycle);

                    match selector.select(choice.phase, progress, &self.learner_id, &snapshot.coverage) {
                        Ok(item) => {
                            match choice.phase {
                                CyclePhase::Component => {
                                    let steps = selector.introduction_steps(choice.lego_id)?;
                                    progress.play_introduction_step(steps);
                                }
                                CyclePhase::Debut => progress.debut_played += 1,
                                CyclePhase::Review | CyclePhase::Eternal => {}
                            }
                            state.record_served(choice.thread_id, choice.phase);
                            chosen = Some((choice, item));
                            break;
                        }
                        Err(SchedulerError::NoEligiblePhrase { lego, phase }) => {
                            let fate = set_aside(progress, choice.phase, &selector, fraction);
                            error!(
                                "Content integrity: no playable {} item for {}, {}; moving to the next thread",
                                phase, lego, fate
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }

                match chosen {
                    Some((choice, item)) => {
                        let mode = self.cycle_mode(&state, choice.phase, cycle);
                        self.pending_cycle(cycle, choice.thread_id, choice.phase, mode, item, None, rolling)
                    }
                    None => {
                        if !exhausted {
                            return Err(SchedulerError::InvalidState(format!(
                                "content skips for {} did not settle within {} attempts",
                                self.learner_id, max_attempts
                            )));
                        }
                        let update = CycleUpdate {
                            helix: Some(&state),
                            progress: changed.iter().filter_map(|id| snapshot.progress.get(id)).collect(),
                            ..CycleUpdate::default()
                        };
                        self.store
                            .commit_cycle(&self.learner_id, self.graph.course_code(), snapshot.revision, &update)?;
                        info!("{} has completed {}", self.learner_id, self.course_code());
                        return Ok(CycleOutcome::CourseComplete);
                    }
                }
            }
        };

        snapshot
            .coverage
            .record(pending.lego_id, &pending.item.connected_lego_ids, pending.item.lego_position, cycle);

        let payload = CyclePayload::from(&pending);
        state.cycle = cycle;
        state.pending = Some(pending);

        let update = CycleUpdate {
            helix: Some(&state),
            progress: changed.iter().filter_map(|id| snapshot.progress.get(id)).collect(),
            coverage: Some(&snapshot.coverage),
            ..CycleUpdate::default()
        };
        self.store
            .commit_cycle(&self.learner_id, self.graph.course_code(), snapshot.revision, &update)?;

        debug!(
            "Serving cycle {} to {}: {} {} ({})",
            cycle,
            self.learner_id,
            payload.lego_id,
            payload.phase.as_str(),
            payload.mode.as_str()
        );
        Ok(CycleOutcome::Cycle(payload))
    }

    #[allow(clippy::too_many_arguments)]
    fn pending_cycle(
        &self,
        cycle: u64,
        thread_id: u8,
        phase: CyclePhase,
        mode: CycleMode,
        item: SelectedItem,
        interjection: Option<InterjectionKind>,
        rolling_latency: Option<f64>,
    ) -> PendingCycle {
        let pause_ms = pause_duration_ms(
            &self.config.pacing,
            item.audio.target_duration_ms,
            &item.target,
            rolling_latency,
        );
        PendingCycle {
            cycle,
            thread_id,
            lego_id: item.lego_id,
            phase,
            mode,
            item,
            interjection,
            pause_ms,
        }
    }

    /// Review and eternal cycles are spread between production and listening
    /// at the learner's milestone percentage; everything else is production
    fn cycle_mode(&self, state: &HelixState, phase: CyclePhase, cycle: u64) -> CycleMode {
        match phase {
            CyclePhase::Component | CyclePhase::Debut => CycleMode::Production,
            CyclePhase::Review | CyclePhase::Eternal => {
                let percent = self
                    .config
                    .session_structure
                    .production_percent(state.seeds_started());
                production_mode(percent, cycle)
            }
        }
    }

    /// Classify the response to the pending cycle and adapt.
    ///
    /// `latency_ms` is `None` when no timing was captured; such responses
    /// count as exposure only and never reach the baseline.
    pub fn record_response(&mut self, latency_ms: Option<u64>, duration_ms: Option<u64>) -> Result<AdaptationResult> {
        self.with_retries("record_response", |this| this.try_record_response(latency_ms, duration_ms))
    }

    fn try_record_response(&mut self, latency_ms: Option<u64>, duration_ms: Option<u64>) -> Result<AdaptationResult> {
        let mut snapshot = self.store.load(&self.learner_id, self.course_code())?;
        let mut state = snapshot.helix.take().ok_or(SchedulerError::NoPendingCycle)?;
        let pending = state.pending.take().ok_or(SchedulerError::NoPendingCycle)?;
        let mut session = self.live_session(&mut snapshot);
        let latency_config = &self.config.latency;

        let sample = match pending.mode {
            CycleMode::Production => TimingSample::from_response(
                latency_ms,
                duration_ms,
                &pending.item.target,
                pending.item.audio.target_duration_ms,
            ),
            CycleMode::Listening => None,
        };

        let effective = snapshot.baseline.effective(latency_config);
        let classification = sample.map(|s| LatencyClassifier::new(latency_config).classify(&effective, s.latency_normalized));

        let mut baseline_changed = false;
        let mut feedback = None;
        if let Some(sample) = sample {
            if snapshot.baseline.calibrated {
                session.samples.push(sample);
            } else {
                BaselineCalibrator::new(latency_config).calibrate(&mut snapshot.baseline, &[sample]);
                baseline_changed = true;
            }
            session.rolling.update(sample.latency_normalized, latency_config.rolling_alpha);
            feedback = session.rolling.feedback(&effective, latency_config);
        }

        let spike = classification.map(|c| c.triggered_spike).unwrap_or(false);
        let response = classification.and_then(|c| c.response);

        let progress = snapshot
            .progress
            .get_mut(&pending.lego_id)
            .ok_or(SchedulerError::UnknownLego(pending.lego_id))?;

        // introductions and interjections are exposure only
        let drilled = pending.interjection.is_none() && pending.phase != CyclePhase::Component;
        let outcome = match classification {
            Some(_) if !drilled => RepetitionOutcome::Neutral,
            Some(c) if c.triggered_spike => RepetitionOutcome::Struggle,
            Some(_) => RepetitionOutcome::Success,
            None => RepetitionOutcome::Neutral,
        };
        let change = progress.apply(outcome, &self.config.repetition);
        if change.retired_now {
            info!("{} retired {}", self.learner_id, pending.lego_id);
        }

        // one level of remediation: interjections never queue more
        if pending.interjection.is_none() && state.interjections.is_empty() {
            if let Some(response) = response {
                queue_remediation(&mut state, &PhraseSelector::new(&self.graph), &pending, response);
            }
        }
        let next = match state.interjections.front().map(|i| i.kind) {
            Some(InterjectionKind::Replay) => NextAction::Replay,
            Some(InterjectionKind::Breakdown) => NextAction::Breakdown,
            None => NextAction::Normal,
        };

        session.items_practiced += 1;
        if spike {
            session.spikes_detected += 1;
        }

        let now = Utc::now();
        let metric = ResponseMetric {
            session_id: session.id.clone(),
            cycle: pending.cycle,
            thread_id: pending.thread_id,
            lego_id: pending.lego_id,
            item_id: pending.item.item_id.clone(),
            phase: pending.phase,
            mode: pending.mode,
            latency_ms,
            duration_ms,
            latency_normalized: sample.map(|s| s.latency_normalized),
            threshold: classification.map(|c| c.threshold),
            triggered_spike: spike,
            classification: response,
            created_at: now,
        };
        let spike_event = match (classification, response) {
            (Some(c), Some(response)) => Some(SpikeEvent {
                session_id: session.id.clone(),
                cycle: pending.cycle,
                thread_id: pending.thread_id,
                lego_id: pending.lego_id,
                item_id: pending.item.item_id.clone(),
                latency_normalized: c.latency_normalized,
                threshold: c.threshold,
                response,
                created_at: now,
            }),
            _ => None,
        };
        if let Some(event) = &spike_event {
            warn!(
                "Latency spike on {} ({:.0} > {:.0} ms/char), {}",
                event.item_id,
                event.latency_normalized,
                event.threshold,
                event.response.as_str()
            );
        }

        let result = AdaptationResult {
            spike,
            classification: response,
            next,
            lego_id: pending.lego_id,
            fibonacci_position: change.position,
            skip_number: change.skip_number,
            retired: progress.is_retired,
            rolling_average: session.rolling.value,
            feedback,
            calibration_remaining: snapshot.baseline.calibration_remaining(latency_config),
        };

        let progress = &*progress;
        let update = CycleUpdate {
            helix: Some(&state),
            progress: vec![progress],
            baseline: baseline_changed.then_some(&snapshot.baseline),
            metric: Some(&metric),
            spike: spike_event.as_ref(),
            session: Some(&session),
            ..CycleUpdate::default()
        };
        self.store
            .commit_cycle(&self.learner_id, self.graph.course_code(), snapshot.revision, &update)?;

        self.session = session;
        Ok(result)
    }

    /// Fold the session's samples into the baseline and close the session
    pub fn end_session(mut self) -> Result<SessionRecord> {
        self.with_retries("end_session", |this| this.try_end_session())?;
        info!(
            "Closed session {}: {} items, {} spikes",
            self.session.id, self.session.items_practiced, self.session.spikes_detected
        );
        Ok(self.session)
    }

    fn try_end_session(&mut self) -> Result<()> {
        let mut snapshot = self.store.load(&self.learner_id, self.course_code())?;
        let Some(mut session) = snapshot.session.take() else {
            debug!("Session {} was already closed", self.session.id);
            self.session.ended_at.get_or_insert_with(Utc::now);
            return Ok(());
        };
        session.ended_at = Some(Utc::now());

        if snapshot.helix.is_none() {
            // nothing was ever committed for this learner
            self.store.save_session(&session)?;
            self.session = session;
            return Ok(());
        }

        let change = BaselineCalibrator::new(&self.config.latency).roll(&mut snapshot.baseline, &session.samples);
        session.samples.clear();

        let update = CycleUpdate {
            baseline: change.rolled.then_some(&snapshot.baseline),
            session: Some(&session),
            ..CycleUpdate::default()
        };
        self.store
            .commit_cycle(&self.learner_id, self.graph.course_code(), snapshot.revision, &update)?;
        self.session = session;
        Ok(())
    }

    pub fn status(&self) -> Result<LearnerStatus> {
        let snapshot = self.store.load(&self.learner_id, self.course_code())?;
        Ok(LearnerStatus::from_snapshot(
            &self.learner_id,
            self.course_code(),
            &snapshot,
            &self.config.latency,
        ))
    }
}

impl LearnerStatus {
    pub fn from_snapshot(
        learner_id: &str,
        course_code: &str,
        snapshot: &LearnerSnapshot,
        latency: &LatencyConfig,
    ) -> Self {
        let state = snapshot.helix.as_ref();
        let session = snapshot.session.as_ref();
        let baseline = &snapshot.baseline;
        Self {
            learner_id: learner_id.to_string(),
            course_code: course_code.to_string(),
            revision: snapshot.revision,
            cycles: state.map(|s| s.cycle).unwrap_or(0),
            seeds_started: state.map(|s| s.seeds_started()).unwrap_or(0),
            legos_seen: snapshot.progress.len(),
            legos_active: snapshot.progress.values().filter(|p| p.is_active()).count(),
            legos_retired: snapshot.progress.values().filter(|p| p.is_retired).count(),
            legos_shelved: snapshot.progress.values().filter(|p| p.shelved).count(),
            baseline_calibrated: baseline.calibrated,
            calibration_remaining: baseline.calibration_remaining(latency),
            baseline_mean: baseline.calibrated.then_some(baseline.latency_mean),
            session_id: session.map(|s| s.id.clone()),
            items_practiced: session.map(|s| s.items_practiced).unwrap_or(0),
            spikes_detected: session.map(|s| s.spikes_detected).unwrap_or(0),
            awaiting_response: state.map(|s| s.pending.is_some()).unwrap_or(false),
        }
    }
}

/// Status of a learner without opening a session
pub fn status_in(data_dir: &Path, learner_id: &str, course_code: &str) -> Result<LearnerStatus> {
    let config = config::resolve(data_dir, course_code)?;
    let store = LearnerStore::open(&storage::db_path(data_dir), config.storage.busy_timeout_ms)?;
    let snapshot = store.load(learner_id, course_code)?;
    Ok(LearnerStatus::from_snapshot(learner_id, course_code, &snapshot, &config.latency))
}

/// Queue what follows a spike: the same phrase again, or the LEGO's
/// components followed by the phrase
fn queue_remediation(state: &mut HelixState, selector: &PhraseSelector<'_>, pending: &PendingCycle, response: SpikeResponse) {
    let replay = Interjection {
        kind: InterjectionKind::Replay,
        thread_id: pending.thread_id,
        lego_id: pending.lego_id,
        phase: pending.phase,
        item: pending.item.clone(),
    };

    if response == SpikeResponse::Breakdown {
        match selector.component_items(pending.lego_id) {
            Ok(components) => {
                for item in components {
                    state.interjections.push_back(Interjection {
                        kind: InterjectionKind::Breakdown,
                        thread_id: pending.thread_id,
                        lego_id: pending.lego_id,
                        phase: CyclePhase::Component,
                        item,
                    });
                }
            }
            Err(e) => warn!("Cannot break down {}: {}; replaying instead", pending.lego_id, e),
        }
    }
    state.interjections.push_back(replay);
}

/// Take a LEGO out of the phase it could not be played in, or out of
/// rotation altogether when nothing of it is playable
fn set_aside(
    progress: &mut LegoProgress,
    phase: CyclePhase,
    selector: &PhraseSelector<'_>,
    debut_fraction: f64,
) -> &'static str {
    if !selector.drillable(progress.lego_id) {
        progress.shelved = true;
        return "shelving the LEGO";
    }
    match phase {
        CyclePhase::Component => {
            progress.introduction_complete = true;
            "skipping its introduction"
        }
        CyclePhase::Debut => {
            let length = selector.debut_length(progress.lego_id, debut_fraction);
            progress.debut_played = progress.debut_played.max(length);
            "skipping the rest of its debut"
        }
        CyclePhase::Review | CyclePhase::Eternal => {
            progress.shelved = true;
            "shelving the LEGO"
        }
    }
}

/// Even spread of `percent` production cycles over the cycle counter
pub fn production_mode(percent: u8, cycle: u64) -> CycleMode {
    let p = u64::from(percent.min(100));
    let cycle = cycle.max(1);
    if cycle * p / 100 > (cycle - 1) * p / 100 {
        CycleMode::Production
    } else {
        CycleMode::Listening
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::sample_course;

    fn orchestrator(config: SchedulerConfig) -> SessionOrchestrator {
        let store = LearnerStore::open_in_memory().unwrap();
        SessionOrchestrator::open(store, sample_course(), config, "learner-1").unwrap()
    }

    fn calibrated_config() -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.latency.calibration_items = 2;
        config
    }

    fn next_payload(o: &mut SessionOrchestrator) -> CyclePayload {
        match o.next_cycle().unwrap() {
            CycleOutcome::Cycle(payload) => payload,
            CycleOutcome::CourseComplete => panic!("course completed early"),
        }
    }

    /// Latency giving `ms_per_char` for the payload's target text
    fn latency_for(payload: &CyclePayload, ms_per_char: u64) -> u64 {
        let chars = payload.target_text.chars().filter(|c| !c.is_whitespace()).count() as u64;
        ms_per_char * chars
    }

    #[test]
    fn test_first_cycle_is_introduction_of_first_lego() {
        let mut o = orchestrator(SchedulerConfig::default());
        let payload = next_payload(&mut o);
        assert_eq!(payload.cycle, 1);
        assert_eq!(payload.thread_id, 1);
        assert_eq!(payload.lego_id, LegoId::new(1, 1));
        assert_eq!(payload.phase, CyclePhase::Component);
        assert_eq!(payload.mode, CycleMode::Production);
        assert!(payload.known_audio.is_some());
        assert!(payload.pause_ms >= o.config().pacing.min_pause_ms);
    }

    #[test]
    fn test_unanswered_cycle_is_served_again() {
        let mut o = orchestrator(SchedulerConfig::default());
        let first = next_payload(&mut o);
        let again = next_payload(&mut o);
        assert_eq!(first, again);
    }

    #[test]
    fn test_response_without_pending_cycle() {
        let mut o = orchestrator(SchedulerConfig::default());
        assert!(matches!(o.record_response(Some(500), None), Err(SchedulerError::NoPendingCycle)));
    }

    #[test]
    fn test_threads_rotate_across_cycles() {
        let mut o = orchestrator(SchedulerConfig::default());
        let mut threads = Vec::new();
        for _ in 0..6 {
            let payload = next_payload(&mut o);
            threads.push(payload.thread_id);
            o.record_response(Some(latency_for(&payload, 500)), None).unwrap();
        }
        assert_eq!(threads, vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(o.session().items_practiced, 6);
    }

    #[test]
    fn test_missing_timing_never_calibrates() {
        let mut o = orchestrator(calibrated_config());
        for _ in 0..4 {
            next_payload(&mut o);
            let result = o.record_response(None, None).unwrap();
            assert!(!result.spike);
            assert_eq!(result.calibration_remaining, 2);
        }
        let status = o.status().unwrap();
        assert!(!status.baseline_calibrated);
        assert_eq!(status.baseline_mean, None);
    }

    #[test]
    fn test_spike_after_calibration_queues_replay() {
        let mut o = orchestrator(calibrated_config());

        // thread 1 intro, thread 2 intro: calibrate at ~500 ms/char
        for ms in [500, 520] {
            let payload = next_payload(&mut o);
            let result = o.record_response(Some(latency_for(&payload, ms)), None).unwrap();
            assert!(!result.spike);
        }
        assert!(o.status().unwrap().baseline_calibrated);

        // thread 3 intro answered very slowly
        let payload = next_payload(&mut o);
        assert_eq!(payload.phase, CyclePhase::Component);
        let result = o.record_response(Some(latency_for(&payload, 540)), None).unwrap();
        assert!(!result.spike);

        // thread 1 debut, slow enough to spike but not break down:
        // baseline 510 with stddev floored at 25.5, so 561 < x <= 599.25
        let debut = next_payload(&mut o);
        assert_eq!(debut.phase, CyclePhase::Debut);
        let result = o.record_response(Some(latency_for(&debut, 580)), None).unwrap();
        assert!(result.spike);
        assert_eq!(result.classification, Some(SpikeResponse::Repeat));
        assert_eq!(result.next, NextAction::Replay);
        assert_eq!(result.fibonacci_position, 0);

        let replay = next_payload(&mut o);
        assert_eq!(replay.item_id, debut.item_id);
        assert_eq!(replay.interjection, Some(InterjectionKind::Replay));
        o.record_response(Some(latency_for(&replay, 510)), None).unwrap();

        // rotation continues with thread 2
        let after = next_payload(&mut o);
        assert_eq!(after.thread_id, 2);
        assert_eq!(after.interjection, None);
        assert_eq!(o.session().spikes_detected, 1);
    }

    #[test]
    fn test_breakdown_queues_components_then_phrase() {
        let mut o = orchestrator(calibrated_config());
        for ms in [500, 520, 510] {
            let payload = next_payload(&mut o);
            o.record_response(Some(latency_for(&payload, ms)), None).unwrap();
        }

        let debut = next_payload(&mut o);
        let result = o.record_response(Some(latency_for(&debut, 5000)), None).unwrap();
        assert_eq!(result.classification, Some(SpikeResponse::Breakdown));
        assert_eq!(result.next, NextAction::Breakdown);

        // atomic LEGO breaks down into itself, then the phrase is replayed
        let part = next_payload(&mut o);
        assert_eq!(part.interjection, Some(InterjectionKind::Breakdown));
        assert_eq!(part.phase, CyclePhase::Component);
        assert_eq!(part.item_id, "S0001L01");
        let result = o.record_response(Some(latency_for(&part, 5000)), None).unwrap();
        assert_eq!(result.next, NextAction::Replay);

        let replay = next_payload(&mut o);
        assert_eq!(replay.item_id, debut.item_id);
    }

    #[test]
    fn test_end_session_rolls_baseline_and_closes() {
        let mut o = orchestrator(calibrated_config());
        for ms in [500, 520, 300, 300, 300] {
            let payload = next_payload(&mut o);
            o.record_response(Some(latency_for(&payload, ms)), None).unwrap();
        }
        assert_eq!(o.session().samples.len(), 3);
        let before = o.status().unwrap().baseline_mean.unwrap();

        let session_id = o.session().id.clone();
        let closed = o.end_session().unwrap();
        assert_eq!(closed.id, session_id);
        assert!(closed.ended_at.is_some());
        assert!(closed.samples.is_empty());
        assert_eq!(closed.items_practiced, 5);
        assert!(before > 300.0);
    }

    #[test]
    fn test_production_mode_spread() {
        let production = (1..=100).filter(|c| production_mode(70, *c) == CycleMode::Production).count();
        assert_eq!(production, 70);
        assert!((1..=50).all(|c| production_mode(100, c) == CycleMode::Production));
        assert!((1..=50).all(|c| production_mode(0, c) == CycleMode::Listening));
    }
}
