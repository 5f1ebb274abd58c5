//! Shared vocabulary and the pure sync state machine.
//!
//! Nothing in this crate performs I/O or spawns tasks. The engine crate
//! drives [`reduce`] from its event loop; the channel crate reuses the
//! job/progress types for wire payloads.

pub mod config;
pub mod job;
pub mod machine;
pub mod state;

pub use config::EngineConfig;
pub use job::{JobId, JobRecord, RemoteStatus, StoreId, SyncOptions, SyncResult};
pub use machine::{SyncEvent, can_cancel, can_pause, can_resume, can_start, reduce, valid_transitions};
pub use state::{ConnectionState, EngineState, MachineState, ProgressData};
