//! What the presentation layer receives

use serde::{Deserialize, Serialize};

use crate::content::LegoId;
use crate::helix::{CycleMode, InterjectionKind, PendingCycle};
use crate::pacing::{PaceFeedback, SpikeResponse};
use crate::selection::CyclePhase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Cycle(CyclePayload),
    /// Every thread is exhausted
    CourseComplete,
}

impl CycleOutcome {
    pub fn payload(&self) -> Option<&CyclePayload> {
        match self {
            CycleOutcome::Cycle(payload) => Some(payload),
            CycleOutcome::CourseComplete => None,
        }
    }
}

/// One cycle: prompt, pause, target voice twice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclePayload {
    pub cycle: u64,
    pub thread_id: u8,
    pub lego_id: LegoId,
    pub phase: CyclePhase,
    pub mode: CycleMode,
    pub item_id: String,
    /// Absent in listening mode
    pub known_audio: Option<String>,
    pub target_voice_1: Option<String>,
    pub target_voice_2: Option<String>,
    pub known_text: String,
    pub target_text: String,
    pub pause_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interjection: Option<InterjectionKind>,
}

impl From<&PendingCycle> for CyclePayload {
    fn from(pending: &PendingCycle) -> Self {
        let audio = &pending.item.audio;
        Self {
            cycle: pending.cycle,
            thread_id: pending.thread_id,
            lego_id: pending.lego_id,
            phase: pending.phase,
            mode: pending.mode,
            item_id: pending.item.item_id.clone(),
            known_audio: match pending.mode {
                CycleMode::Production => audio.known.clone(),
                CycleMode::Listening => None,
            },
            target_voice_1: audio.target_voice_1.clone(),
            target_voice_2: audio.target_voice_2.clone(),
            known_text: pending.item.known.clone(),
            target_text: pending.item.target.clone(),
            pause_ms: pending.pause_ms,
            interjection: pending.interjection,
        }
    }
}

/// What the next cycle will be, as decided by this response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Normal,
    Replay,
    Breakdown,
}

/// Result of recording one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationResult {
    pub spike: bool,
    pub classification: Option<SpikeResponse>,
    pub next: NextAction,
    pub lego_id: LegoId,
    pub fibonacci_position: usize,
    pub skip_number: u32,
    pub retired: bool,
    pub rolling_average: Option<f64>,
    pub feedback: Option<PaceFeedback>,
    /// Timed items still needed before spike detection switches on
    pub calibration_remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::AudioRefs;
    use crate::selection::SelectedItem;

    fn pending(mode: CycleMode) -> PendingCycle {
        PendingCycle {
            cycle: 4,
            thread_id: 1,
            lego_id: LegoId::new(1, 1),
            phase: CyclePhase::Review,
            mode,
            item: SelectedItem {
                item_id: "S0001L01-e1".into(),
                lego_id: LegoId::new(1, 1),
                known: "I want".into(),
                target: "quiero".into(),
                audio: AudioRefs {
                    known: Some("k.mp3".into()),
                    target_voice_1: Some("t1.mp3".into()),
                    target_voice_2: Some("t2.mp3".into()),
                    target_duration_ms: Some(700),
                },
                connected_lego_ids: vec![LegoId::new(1, 1)],
                lego_position: None,
            },
            interjection: None,
            pause_ms: 1500,
        }
    }

    #[test]
    fn test_listening_payload_has_no_prompt() {
        let payload = CyclePayload::from(&pending(CycleMode::Listening));
        assert_eq!(payload.known_audio, None);
        assert_eq!(payload.target_voice_1.as_deref(), Some("t1.mp3"));

        let payload = CyclePayload::from(&pending(CycleMode::Production));
        assert_eq!(payload.known_audio.as_deref(), Some("k.mp3"));
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(CycleOutcome::CourseComplete).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "course_complete"}));

        let json = serde_json::to_value(CycleOutcome::Cycle(CyclePayload::from(&pending(
            CycleMode::Production,
        ))))
        .unwrap();
        assert_eq!(json["outcome"], "cycle");
        assert_eq!(json["lego_id"], "S0001L01");
        assert_eq!(json["phase"], "review");
        assert!(json.get("interjection").is_none());
    }
}
