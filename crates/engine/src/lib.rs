//! Sync engine: orchestrator, debounced cache invalidation, and the remote
//! job-control seam. State semantics live in `storesync-core`; push-channel
//! plumbing lives in `channel`.

pub mod engine;
pub mod invalidation;
pub mod remote;

pub use engine::SyncEngine;
pub use invalidation::{CacheError, CacheInvalidator, InvalidationScheduler, Priority, ViewKey};
pub use remote::{JobControl, RemoteCommand, RemoteError};
