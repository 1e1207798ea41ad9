//! Course content types: seeds, LEGOs, phrases
//!
//! Everything here is immutable once the graph is loaded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a LEGO, `(seed_number, lego_index)`.
///
/// The derived ordering compares seed first, then index, which is the
/// global introduction order the basket constraint is defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LegoId {
    pub seed: u32,
    pub index: u32,
}

impl LegoId {
    pub fn new(seed: u32, index: u32) -> Self {
        Self { seed, index }
    }
}

impl fmt::Display for LegoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:04}L{:02}", self.seed, self.index)
    }
}

impl FromStr for LegoId {
    type Err = String;

    /// Parses `S0001L01` (case-insensitive, any number of digits)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let rest = upper
            .strip_prefix('S')
            .ok_or_else(|| format!("LEGO id must start with 'S': {}", s))?;
        let (seed, index) = rest
            .split_once('L')
            .ok_or_else(|| format!("LEGO id must contain 'L': {}", s))?;
        let seed = seed
            .parse::<u32>()
            .map_err(|_| format!("bad seed number in LEGO id: {}", s))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| format!("bad LEGO index in LEGO id: {}", s))?;
        Ok(Self { seed, index })
    }
}

impl TryFrom<String> for LegoId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LegoId> for String {
    fn from(id: LegoId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegoKind {
    /// Single word
    Atomic,
    /// Multi-word, introduced through its components
    Molecular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseRole {
    Component,
    Practice,
    EternalEligible,
}

impl PhraseRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhraseRole::Component => "component",
            PhraseRole::Practice => "practice",
            PhraseRole::EternalEligible => "eternal_eligible",
        }
    }
}

/// Where the owning LEGO sits inside a phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegoPosition {
    Start,
    Middle,
    End,
}

impl LegoPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegoPosition::Start => "start",
            LegoPosition::Middle => "middle",
            LegoPosition::End => "end",
        }
    }
}

/// Audio references for one playable unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRefs {
    #[serde(default)]
    pub known: Option<String>,
    #[serde(default)]
    pub target_voice_1: Option<String>,
    #[serde(default)]
    pub target_voice_2: Option<String>,
    /// Length of the model target audio
    #[serde(default)]
    pub target_duration_ms: Option<u64>,
}

impl AudioRefs {
    /// A cycle needs the known prompt and both target voices
    pub fn is_complete(&self) -> bool {
        self.known.is_some() && self.target_voice_1.is_some() && self.target_voice_2.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    pub seed_number: u32,
    pub known: String,
    pub target: String,
    /// LEGOs of this seed in index order
    pub lego_ids: Vec<LegoId>,
}

/// Sub-unit of a molecular LEGO, shown during its introduction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegoComponent {
    pub known: String,
    pub target: String,
    #[serde(default)]
    pub audio: AudioRefs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lego {
    pub id: LegoId,
    pub kind: LegoKind,
    pub known: String,
    pub target: String,
    pub audio: AudioRefs,
    pub components: Vec<LegoComponent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phrase {
    pub id: String,
    /// Owning LEGO
    pub lego_id: LegoId,
    pub role: PhraseRole,
    pub known: String,
    pub target: String,
    pub word_count: u32,
    pub syllable_count: u32,
    /// Other LEGOs whose vocabulary this phrase uses
    pub connected_lego_ids: Vec<LegoId>,
    pub lego_position: Option<LegoPosition>,
    pub audio: AudioRefs,
}

impl Phrase {
    /// First connected LEGO introduced after the owner, if any
    pub fn basket_violation(&self) -> Option<LegoId> {
        basket_violation(self.lego_id, &self.connected_lego_ids)
    }

    /// Build-up ordering key: shortest first, deterministic
    pub fn length_key(&self) -> (u32, u32, &str) {
        let syllables = if self.syllable_count > 0 {
            self.syllable_count
        } else {
            self.word_count
        };
        (syllables, self.word_count, self.id.as_str())
    }
}

/// A phrase may only use vocabulary introduced at or before its own LEGO
pub fn basket_violation(owner: LegoId, connected: &[LegoId]) -> Option<LegoId> {
    connected.iter().copied().filter(|id| *id > owner).max()
}
