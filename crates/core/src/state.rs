//! Engine snapshot types.
//!
//! [`EngineState`] is the authoritative client-side view of "is an import
//! running, and in which phase". It is only ever produced by the reducer in
//! [`crate::machine`]; nothing mutates it in place.

use crate::job::{JobId, JobRecord, StoreId, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-side sync machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
  #[default]
  Idle,
  Starting,
  Discovering,
  Syncing,
  Paused,
  Completed,
  Failed,
}

impl MachineState {
  /// States in which inbound progress and job-update pushes are applied.
  ///
  /// Events arriving after a terminal state has been entered are dropped so
  /// a stale in-flight push cannot resurrect a closed job.
  pub fn is_active(self) -> bool {
    matches!(self, MachineState::Starting | MachineState::Discovering | MachineState::Syncing)
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, MachineState::Completed | MachineState::Failed)
  }
}

impl std::fmt::Display for MachineState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      MachineState::Idle => "idle",
      MachineState::Starting => "starting",
      MachineState::Discovering => "discovering",
      MachineState::Syncing => "syncing",
      MachineState::Paused => "paused",
      MachineState::Completed => "completed",
      MachineState::Failed => "failed",
    };
    write!(f, "{name}")
  }
}

/// Health of the push channel as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
  Connected,
  Reconnecting,
  #[default]
  Disconnected,
}

/// Canonical progress shape shown to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressData {
  pub phase: String,
  pub current: u32,
  pub total: u32,
  pub message: String,
  pub percent: u8,
  pub timestamp: Option<DateTime<Utc>>,
}

/// Full engine snapshot.
///
/// Invariants (enforced by the reducer):
/// - `active_job_id`/`active_job` are populated only while the machine is
///   in Starting/Discovering/Syncing/Paused.
/// - `progress.percent` is monotonically non-decreasing within one job
///   lifetime, except across a Reset.
/// - `last_result` is the only field carried across a Reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineState {
  pub machine_state: MachineState,
  pub active_store_id: Option<StoreId>,
  pub active_job_id: Option<JobId>,
  pub active_job: Option<JobRecord>,
  pub progress: ProgressData,
  pub last_result: Option<SyncResult>,
  pub error: Option<String>,
  pub connection_state: ConnectionState,
  pub started_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl EngineState {
  /// The snapshot an engine holds before any import has run
  pub fn initial() -> Self {
    Self::default()
  }

  pub fn is_idle(&self) -> bool {
    self.machine_state == MachineState::Idle
  }

  pub fn is_syncing(&self) -> bool {
    self.machine_state.is_active()
  }

  pub fn is_paused(&self) -> bool {
    self.machine_state == MachineState::Paused
  }

  pub fn is_completed(&self) -> bool {
    self.machine_state == MachineState::Completed
  }

  pub fn is_failed(&self) -> bool {
    self.machine_state == MachineState::Failed
  }
}
