//! Phrase selection
//!
//! Picks the concrete phrase for a LEGO in a given phase:
//! - component: the LEGO's sub-units in fixed order (introduction)
//! - debut: build-up phrases, shortest first, deterministic
//! - eternal: without-replacement urn biased toward stale pairings, falling
//!   back to the LEGO's full form when the pool is empty
//!
//! Every candidate is re-checked against the basket constraint and for
//! complete audio. Offenders are skipped and logged for the content
//! pipeline; the learner never sees them.

pub mod coverage;
pub mod urn;

pub use coverage::CoverageLedger;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::content::{AudioRefs, ContentGraph, Lego, LegoId, LegoPosition, Phrase, PhraseRole};
use crate::error::{Result, SchedulerError};
use crate::repetition::LegoProgress;

/// Form a LEGO is drilled in on a given cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// Introduction sub-step
    Component,
    /// Build-up phrases right after introduction
    Debut,
    /// Spaced-repetition drill of an active LEGO
    Review,
    /// Low-frequency review of a retired LEGO
    Eternal,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Component => "component",
            CyclePhase::Debut => "debut",
            CyclePhase::Review => "review",
            CyclePhase::Eternal => "eternal",
        }
    }
}

/// One playable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    /// Phrase id, or a synthetic id for components and bare LEGOs
    pub item_id: String,
    pub lego_id: LegoId,
    pub known: String,
    pub target: String,
    pub audio: AudioRefs,
    pub connected_lego_ids: Vec<LegoId>,
    pub lego_position: Option<LegoPosition>,
}

impl SelectedItem {
    fn from_phrase(phrase: &Phrase) -> Self {
        Self {
            item_id: phrase.id.clone(),
            lego_id: phrase.lego_id,
            known: phrase.known.clone(),
            target: phrase.target.clone(),
            audio: phrase.audio.clone(),
            connected_lego_ids: phrase.connected_lego_ids.clone(),
            lego_position: phrase.lego_position,
        }
    }

    fn from_lego(lego: &Lego) -> Self {
        Self {
            item_id: lego.id.to_string(),
            lego_id: lego.id,
            known: lego.known.clone(),
            target: lego.target.clone(),
            audio: lego.audio.clone(),
            connected_lego_ids: vec![lego.id],
            lego_position: None,
        }
    }
}

pub struct PhraseSelector<'a> {
    graph: &'a ContentGraph,
}

impl<'a> PhraseSelector<'a> {
    pub fn new(graph: &'a ContentGraph) -> Self {
        Self { graph }
    }

    fn lego(&self, id: LegoId) -> Result<&'a Lego> {
        self.graph.lego(id).ok_or(SchedulerError::UnknownLego(id))
    }

    /// Phrases of a role that pass the integrity checks, declaration order
    fn presentable(&self, lego: LegoId, role: PhraseRole) -> Vec<&'a Phrase> {
        self.graph
            .phrases_for(lego, role)
            .into_iter()
            .filter(|phrase| {
                if let Some(later) = phrase.basket_violation() {
                    error!(
                        "Content integrity: phrase {} for {} uses {} which is introduced later; skipping",
                        phrase.id, lego, later
                    );
                    return false;
                }
                if !phrase.audio.is_complete() {
                    error!(
                        "Content integrity: phrase {} for {} is missing audio references; skipping",
                        phrase.id, lego
                    );
                    return false;
                }
                true
            })
            .collect()
    }

    /// Introduction sequence for a LEGO
    pub fn component_items(&self, lego_id: LegoId) -> Result<Vec<SelectedItem>> {
        let lego = self.lego(lego_id)?;

        let phrases = self.presentable(lego_id, PhraseRole::Component);
        if !phrases.is_empty() {
            return Ok(phrases.into_iter().map(SelectedItem::from_phrase).collect());
        }

        let components: Vec<SelectedItem> = lego
            .components
            .iter()
            .enumerate()
            .filter(|(i, component)| {
                if component.audio.is_complete() {
                    true
                } else {
                    error!(
                        "Content integrity: component {} of {} is missing audio references; skipping",
                        i + 1,
                        lego_id
                    );
                    false
                }
            })
            .map(|(i, component)| SelectedItem {
                item_id: format!("{}#c{}", lego_id, i + 1),
                lego_id,
                known: component.known.clone(),
                target: component.target.clone(),
                audio: component.audio.clone(),
                connected_lego_ids: vec![lego_id],
                lego_position: None,
            })
            .collect();
        if !components.is_empty() {
            return Ok(components);
        }

        if lego.audio.is_complete() {
            return Ok(vec![SelectedItem::from_lego(lego)]);
        }

        error!("Content integrity: {} has no playable introduction", lego_id);
        Err(SchedulerError::NoEligiblePhrase {
            lego: lego_id,
            phase: CyclePhase::Component.as_str(),
        })
    }

    /// Number of introduction sub-steps (at least one)
    pub fn introduction_steps(&self, lego_id: LegoId) -> Result<u32> {
        Ok(self.component_items(lego_id)?.len().max(1) as u32)
    }

    pub fn component(&self, lego_id: LegoId, step: u32) -> Result<SelectedItem> {
        let mut items = self.component_items(lego_id)?;
        let index = (step as usize).min(items.len() - 1);
        Ok(items.swap_remove(index))
    }

    /// Build-up phrases shortest first
    pub fn debut_phrases(&self, lego_id: LegoId) -> Vec<&'a Phrase> {
        let mut phrases = self.presentable(lego_id, PhraseRole::Practice);
        phrases.sort_by(|a, b| a.length_key().cmp(&b.length_key()));
        phrases
    }

    /// How many build-up phrases the debut plays
    pub fn debut_length(&self, lego_id: LegoId, fraction: f64) -> u32 {
        let available = self.debut_phrases(lego_id).len();
        if available == 0 || fraction <= 0.0 {
            return 0;
        }
        ((available as f64 * fraction).ceil() as usize).clamp(1, available) as u32
    }

    pub fn debut(&self, lego_id: LegoId, index: u32) -> Result<SelectedItem> {
        self.debut_phrases(lego_id)
            .get(index as usize)
            .map(|p| SelectedItem::from_phrase(p))
            .ok_or(SchedulerError::NoEligiblePhrase {
                lego: lego_id,
                phase: CyclePhase::Debut.as_str(),
            })
    }

    /// Draw from the LEGO's eternal urn, refilling it when empty
    pub fn eternal(
        &self,
        progress: &mut LegoProgress,
        learner_id: &str,
        coverage: &CoverageLedger,
    ) -> Result<SelectedItem> {
        let lego_id = progress.lego_id;
        let eligible: Vec<&Phrase> = self.presentable(lego_id, PhraseRole::EternalEligible);
        if eligible.is_empty() {
            return Err(SchedulerError::NoEligiblePhrase {
                lego: lego_id,
                phase: CyclePhase::Eternal.as_str(),
            });
        }
        let eligible_ids: Vec<String> = eligible.iter().map(|p| p.id.clone()).collect();

        urn::prune(&mut progress.eternal_urn, &eligible_ids);
        if progress.eternal_urn.is_empty() {
            progress.eternal_urn =
                urn::refill(&eligible_ids, learner_id, lego_id, progress.urn_generation);
            progress.urn_generation += 1;
        }

        // Stalest pairing wins; min_by_key keeps the first (urn order) on ties
        let (index, _) = progress
            .eternal_urn
            .iter()
            .enumerate()
            .filter_map(|(i, id)| self.graph.phrase(id).map(|p| (i, p)))
            .min_by_key(|(_, p)| coverage.score(lego_id, &p.connected_lego_ids, p.lego_position))
            .ok_or(SchedulerError::NoEligiblePhrase {
                lego: lego_id,
                phase: CyclePhase::Eternal.as_str(),
            })?;

        let id = progress.eternal_urn.remove(index);
        let phrase = self.graph.phrase(&id).ok_or(SchedulerError::NoEligiblePhrase {
            lego: lego_id,
            phase: CyclePhase::Eternal.as_str(),
        })?;
        Ok(SelectedItem::from_phrase(phrase))
    }

    /// Spaced-repetition drill: eternal pool, else the full-form build-up, else the LEGO
    pub fn review(
        &self,
        progress: &mut LegoProgress,
        learner_id: &str,
        coverage: &CoverageLedger,
    ) -> Result<SelectedItem> {
        match self.eternal(progress, learner_id, coverage) {
            Ok(item) => return Ok(item),
            Err(SchedulerError::NoEligiblePhrase { .. }) => {}
            Err(e) => return Err(e),
        }

        if let Some(longest) = self.debut_phrases(progress.lego_id).last() {
            return Ok(SelectedItem::from_phrase(longest));
        }

        let lego = self.lego(progress.lego_id)?;
        if lego.audio.is_complete() {
            return Ok(SelectedItem::from_lego(lego));
        }

        Err(SchedulerError::NoEligiblePhrase {
            lego: progress.lego_id,
            phase: CyclePhase::Review.as_str(),
        })
    }

    /// Whether anything of the LEGO can be drilled once it is introduced
    pub fn drillable(&self, lego_id: LegoId) -> bool {
        !self.presentable(lego_id, PhraseRole::EternalEligible).is_empty()
            || !self.debut_phrases(lego_id).is_empty()
            || self.graph.lego(lego_id).is_some_and(|lego| lego.audio.is_complete())
    }

    pub fn select(
        &self,
        phase: CyclePhase,
        progress: &mut LegoProgress,
        learner_id: &str,
        coverage: &CoverageLedger,
    ) -> Result<SelectedItem> {
        match phase {
            CyclePhase::Component => self.component(progress.lego_id, progress.introduction_index),
            CyclePhase::Debut => self.debut(progress.lego_id, progress.debut_played),
            CyclePhase::Review | CyclePhase::Eternal => self.review(progress, learner_id, coverage),
        }
    }
}
