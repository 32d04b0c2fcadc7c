//! Caravel Controller - level-triggered reconciliation
//!
//! Object changes (or expired retry timers) enqueue keys on a work queue; a
//! fixed pool of workers dequeues them and invokes the matching reconcile
//! function. The queue deduplicates and serializes per key, so reconciling
//! one object never races with itself; distinct objects interleave freely.
//!
//! Long waits are expressed as requeue-after delays, never in-process
//! sleeps: 5s for tight polling, 600s for timeout rechecks.

pub mod error;
pub mod queue;
pub mod release;
pub mod repo;
pub mod stores;

pub use error::{ControllerError, Result};
pub use queue::{WorkQueue, run_workers};
pub use release::{REQUEUE_RECHECK, REQUEUE_SHORT, ReleaseReconciler};
pub use repo::RepoReconciler;
pub use stores::{
    KubeCatalog, KubeReleaseStore, KubeRepoStore, MemoryReleaseStore, MemoryRepoStore,
    ReleaseStore, RepoStore, StoreCounters,
};
