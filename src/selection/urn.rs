//! Without-replacement draw pool for eternal review phrases
//!
//! The urn is refilled with the full eligible set once it runs dry. The
//! refill order comes from a ChaCha8 shuffle seeded by
//! `(learner_id, lego_id, generation)`, so a learner's draw sequence is
//! reproducible while different learners see different orders.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::content::LegoId;

/// ChaCha8 seed for one urn generation: SHA-256 of the key, fixed across
/// builds so persisted urns refill in the same order after an upgrade
pub fn urn_seed(learner_id: &str, lego_id: LegoId, generation: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(learner_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(lego_id.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(generation.to_le_bytes());
    hasher.finalize().into()
}

/// Shuffled copy of the eligible ids for one generation
pub fn refill(eligible: &[String], learner_id: &str, lego_id: LegoId, generation: u32) -> Vec<String> {
    let mut ids = eligible.to_vec();
    ids.sort();
    ids.dedup();
    let mut rng = ChaCha8Rng::from_seed(urn_seed(learner_id, lego_id, generation));
    ids.shuffle(&mut rng);
    debug!(
        "Refilled eternal urn for {} (generation {}) with {} phrases",
        lego_id,
        generation,
        ids.len()
    );
    ids
}

/// Drop ids that are no longer eligible (content republished, integrity skip)
pub fn prune(urn: &mut Vec<String>, eligible: &[String]) {
    urn.retain(|id| eligible.contains(id));
}
