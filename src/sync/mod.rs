//! Catch-up cycles: bring a source's local cache up to its remote latest index.
//!
//! A cycle probes the remote latest index, works out the missing range
//! `(latest_index, remote]`, fetches it in sequential batches through the
//! [`Transport`](crate::transport::Transport), persists what is new, and then
//! moves the source's high-water mark to the largest stored index.
//!
//! Failures past the initial source lookup are never raised. They are
//! recorded in the [`CycleReport`] and the next cycle converges: templated
//! sources re-check the store for every missing index, and the high-water
//! mark is reconciled against what is actually stored.

mod engine;
mod lock;
mod report;
mod strategy;

pub use engine::{SyncError, Synchronizer};
pub use lock::SourceLocks;
pub use report::{
    BatchOutcome, CyclePhase, CycleReport, CycleStatus, HighWaterMark, PersistOutcome,
    ProbeFailure, ProbeOutcome,
};
