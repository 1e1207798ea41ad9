//! Triple-helix interleaving
//!
//! Seeds are dealt over three threads that take turns serving cycles, so
//! new material, spaced review and eternal review of different sentences
//! are braided together instead of run in blocks.

mod scheduler;
mod state;

pub use scheduler::{ScheduledLego, ThreadScheduler};
pub use state::{
    CycleMode, HelixState, Interjection, InterjectionKind, PendingCycle, ThreadSlot, THREAD_COUNT,
};
