//! Remote job control.
//!
//! The engine never mutates job rows itself; it asks the backend to start,
//! pause, resume, or cancel an import and then trusts the push channel (or a
//! re-fetch) for the resulting state. Implementations are injected as
//! `Arc<dyn JobControl>`.

use async_trait::async_trait;
use storesync_core::{JobId, JobRecord, StoreId, SyncOptions};
use thiserror::Error;

/// Status value the engine is allowed to write to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
  Paused,
  Running,
  Cancelled,
}

impl std::fmt::Display for RemoteCommand {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RemoteCommand::Paused => write!(f, "paused"),
      RemoteCommand::Running => write!(f, "running"),
      RemoteCommand::Cancelled => write!(f, "cancelled"),
    }
  }
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
  #[error("Backend call failed: {0}")]
  Transport(String),
  #[error("Backend rejected the request: {0}")]
  Rejected(String),
  #[error("Job not found: {0}")]
  JobNotFound(JobId),
}

/// Backend operations the orchestrator drives a sync with
#[async_trait]
pub trait JobControl: Send + Sync {
  /// Kick off an import; returns the id of the accepted job
  async fn begin_import(&self, store_id: &StoreId, options: &SyncOptions) -> Result<JobId, RemoteError>;

  /// Write a new status to an existing job
  async fn set_job_status(&self, job_id: &JobId, command: RemoteCommand) -> Result<(), RemoteError>;

  /// Resume a paused import from where it stopped
  async fn resume_import(&self, store_id: &StoreId, job_id: &JobId) -> Result<(), RemoteError>;

  /// Authoritative job state, for reconciling after a failed control call
  async fn fetch_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, RemoteError>;
}
