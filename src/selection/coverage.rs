//! Per-learner record of which vocabulary pairings and positions were used
//! recently, so eternal review spreads across them over time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::content::{LegoId, LegoPosition};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageLedger {
    /// Global cycle at which each LEGO last appeared as a connected word
    pub lego_last_used: BTreeMap<LegoId, u64>,
    /// Global cycle at which each in-phrase position was last drilled
    pub position_last_used: BTreeMap<LegoPosition, u64>,
}

/// Recency of a candidate phrase; smaller is staler and preferred.
/// `None` (never used) sorts before any cycle.
pub type CoverageScore = (Option<u64>, Option<u64>);

impl CoverageLedger {
    pub fn record(&mut self, owner: LegoId, connected: &[LegoId], position: Option<LegoPosition>, cycle: u64) {
        for id in connected.iter().filter(|id| **id != owner) {
            self.lego_last_used.insert(*id, cycle);
        }
        if let Some(position) = position {
            self.position_last_used.insert(position, cycle);
        }
    }

    /// Most recent use of any pairing in the phrase, then of its position
    pub fn score(&self, owner: LegoId, connected: &[LegoId], position: Option<LegoPosition>) -> CoverageScore {
        let pairing = connected
            .iter()
            .filter(|id| **id != owner)
            .filter_map(|id| self.lego_last_used.get(id).copied())
            .max();
        let position = position.and_then(|p| self.position_last_used.get(&p).copied());
        (pairing, position)
    }

    pub fn is_empty(&self) -> bool {
        self.lego_last_used.is_empty() && self.position_last_used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_pairings_score_lowest() {
        let owner = LegoId::new(5, 1);
        let a = LegoId::new(2, 1);
        let b = LegoId::new(3, 1);
        let mut ledger = CoverageLedger::default();
        ledger.record(owner, &[owner, a], Some(LegoPosition::Start), 10);

        let used = ledger.score(owner, &[owner, a], Some(LegoPosition::End));
        let fresh = ledger.score(owner, &[owner, b], Some(LegoPosition::Start));
        assert_eq!(used, (Some(10), None));
        assert_eq!(fresh, (None, Some(10)));
        assert!(fresh < used);
    }

    #[test]
    fn test_owner_is_not_a_pairing() {
        let owner = LegoId::new(1, 1);
        let mut ledger = CoverageLedger::default();
        ledger.record(owner, &[owner], None, 3);
        assert!(ledger.is_empty());
    }
}
