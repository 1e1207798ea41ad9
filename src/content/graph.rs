//! Read-only course graph
//!
//! Loaded from the JSON document the content pipeline publishes. The
//! pipeline already validated audio completeness and basket ordering; here we
//! only check what would make the indexes inconsistent.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use super::model::{
    AudioRefs, Lego, LegoComponent, LegoId, LegoKind, LegoPosition, Phrase, PhraseRole, Seed,
};
use crate::error::{Result, SchedulerError};

#[derive(Debug, Deserialize)]
struct CourseDocument {
    course_code: String,
    seeds: Vec<SeedDocument>,
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    seed_number: u32,
    known: String,
    target: String,
    #[serde(default)]
    legos: Vec<LegoDocument>,
}

#[derive(Debug, Deserialize)]
struct LegoDocument {
    lego_index: u32,
    kind: LegoKind,
    known: String,
    target: String,
    #[serde(default)]
    audio: AudioRefs,
    #[serde(default)]
    components: Vec<LegoComponent>,
    #[serde(default)]
    phrases: Vec<PhraseDocument>,
}

#[derive(Debug, Deserialize)]
struct PhraseDocument {
    id: String,
    role: PhraseRole,
    known: String,
    target: String,
    #[serde(default)]
    word_count: u32,
    #[serde(default)]
    syllable_count: u32,
    #[serde(default)]
    connected_lego_ids: Vec<LegoId>,
    #[serde(default)]
    lego_position: Option<LegoPosition>,
    #[serde(default)]
    audio: AudioRefs,
}

/// Static Seed → LEGO → Phrase graph for one course
#[derive(Debug, Clone)]
pub struct ContentGraph {
    course_code: String,
    seeds: BTreeMap<u32, Seed>,
    legos: BTreeMap<LegoId, Lego>,
    phrases: HashMap<String, Phrase>,
    /// Phrase ids per LEGO in declaration order
    phrases_by_lego: HashMap<LegoId, Vec<String>>,
}

impl ContentGraph {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: CourseDocument = serde_json::from_str(json)?;
        Self::build(doc)
    }

    fn build(doc: CourseDocument) -> Result<Self> {
        let mut seeds = BTreeMap::new();
        let mut legos = BTreeMap::new();
        let mut phrases = HashMap::new();
        let mut phrases_by_lego: HashMap<LegoId, Vec<String>> = HashMap::new();

        for seed_doc in doc.seeds {
            if seeds.contains_key(&seed_doc.seed_number) {
                return Err(SchedulerError::InvalidGraph(format!(
                    "duplicate seed number {}",
                    seed_doc.seed_number
                )));
            }

            let mut lego_ids = Vec::with_capacity(seed_doc.legos.len());
            for lego_doc in seed_doc.legos {
                let id = LegoId::new(seed_doc.seed_number, lego_doc.lego_index);
                if legos.contains_key(&id) {
                    return Err(SchedulerError::InvalidGraph(format!("duplicate LEGO {}", id)));
                }

                for phrase_doc in lego_doc.phrases {
                    if phrases.contains_key(&phrase_doc.id) {
                        return Err(SchedulerError::InvalidGraph(format!(
                            "duplicate phrase id {}",
                            phrase_doc.id
                        )));
                    }
                    phrases_by_lego
                        .entry(id)
                        .or_default()
                        .push(phrase_doc.id.clone());
                    phrases.insert(
                        phrase_doc.id.clone(),
                        Phrase {
                            id: phrase_doc.id,
                            lego_id: id,
                            role: phrase_doc.role,
                            known: phrase_doc.known,
                            target: phrase_doc.target,
                            word_count: phrase_doc.word_count,
                            syllable_count: phrase_doc.syllable_count,
                            connected_lego_ids: phrase_doc.connected_lego_ids,
                            lego_position: phrase_doc.lego_position,
                            audio: phrase_doc.audio,
                        },
                    );
                }

                lego_ids.push(id);
                legos.insert(
                    id,
                    Lego {
                        id,
                        kind: lego_doc.kind,
                        known: lego_doc.known,
                        target: lego_doc.target,
                        audio: lego_doc.audio,
                        components: lego_doc.components,
                    },
                );
            }
            lego_ids.sort();

            seeds.insert(
                seed_doc.seed_number,
                Seed {
                    seed_number: seed_doc.seed_number,
                    known: seed_doc.known,
                    target: seed_doc.target,
                    lego_ids,
                },
            );
        }

        // Connected ids must resolve; ordering problems are left to the selector
        let known: HashSet<LegoId> = legos.keys().copied().collect();
        let mut out_of_order = 0usize;
        for phrase in phrases.values() {
            if let Some(missing) = phrase
                .connected_lego_ids
                .iter()
                .find(|id| !known.contains(*id))
            {
                return Err(SchedulerError::InvalidGraph(format!(
                    "phrase {} references unknown LEGO {}",
                    phrase.id, missing
                )));
            }
            if phrase.basket_violation().is_some() {
                out_of_order += 1;
            }
        }
        if out_of_order > 0 {
            warn!(
                "Course {} has {} phrases violating the basket constraint; they will never be selected",
                doc.course_code, out_of_order
            );
        }

        debug!(
            "Loaded course {}: {} seeds, {} LEGOs, {} phrases",
            doc.course_code,
            seeds.len(),
            legos.len(),
            phrases.len()
        );

        Ok(Self {
            course_code: doc.course_code,
            seeds,
            legos,
            phrases,
            phrases_by_lego,
        })
    }

    pub fn course_code(&self) -> &str {
        &self.course_code
    }

    pub fn seed(&self, seed_number: u32) -> Option<&Seed> {
        self.seeds.get(&seed_number)
    }

    /// Seed numbers in sequence order
    pub fn seed_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.seeds.keys().copied()
    }

    pub fn seed_count(&self) -> usize {
        self.seeds.len()
    }

    pub fn lego(&self, id: LegoId) -> Option<&Lego> {
        self.legos.get(&id)
    }

    pub fn lego_count(&self) -> usize {
        self.legos.len()
    }

    pub fn phrase(&self, id: &str) -> Option<&Phrase> {
        self.phrases.get(id)
    }

    /// Phrases of one role attached to a LEGO, in declaration order
    pub fn phrases_for(&self, lego: LegoId, role: PhraseRole) -> Vec<&Phrase> {
        self.phrases_by_lego
            .get(&lego)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.phrases.get(id))
                    .filter(|p| p.role == role)
                    .collect()
            })
            .unwrap_or_default()
    }
}
