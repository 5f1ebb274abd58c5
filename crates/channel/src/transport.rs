//! Transport abstraction for the push channel.
//!
//! Reconnects and backoff are the transport's problem; this layer only
//! defines how channels are identified, opened, and closed. Implementations
//! are injected as `Arc<dyn PushTransport>`.

use crate::message::PushMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storesync_core::{ConnectionState, JobId, StoreId};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// The kinds of per-store channels the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
  ProgressBroadcast,
  JobRecordChanges,
  JobLogs,
}

/// Composite identity of one underlying channel.
///
/// Two subscribes with an equal key must share a single transport channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
  pub store_id: StoreId,
  pub kind: ChannelKind,
  /// Only log feeds are scoped to a specific job
  pub job_id: Option<JobId>,
}

impl ChannelKey {
  pub fn progress(store_id: StoreId) -> Self {
    Self {
      store_id,
      kind: ChannelKind::ProgressBroadcast,
      job_id: None,
    }
  }

  pub fn jobs(store_id: StoreId) -> Self {
    Self {
      store_id,
      kind: ChannelKind::JobRecordChanges,
      job_id: None,
    }
  }

  pub fn logs(store_id: StoreId, job_id: JobId) -> Self {
    Self {
      store_id,
      kind: ChannelKind::JobLogs,
      job_id: Some(job_id),
    }
  }
}

impl std::fmt::Display for ChannelKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let kind = match self.kind {
      ChannelKind::ProgressBroadcast => "progress",
      ChannelKind::JobRecordChanges => "jobs",
      ChannelKind::JobLogs => "logs",
    };
    match self.job_id {
      Some(ref job) => write!(f, "{}/{}/{}", self.store_id, kind, job),
      None => write!(f, "{}/{}", self.store_id, kind),
    }
  }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
  #[error("Transport not initialized")]
  NotInitialized,
  #[error("Subscribe failed: {0}")]
  Subscribe(String),
}

/// Server-to-client notification transport.
///
/// One call to `open` per key; the returned receiver is the only delivery
/// path for that channel until `close` is called with the same key.
#[async_trait]
pub trait PushTransport: Send + Sync {
  /// Open a channel and return its message stream
  async fn open(&self, key: &ChannelKey) -> Result<mpsc::Receiver<PushMessage>, TransportError>;

  /// Close a previously opened channel; closing an unknown key is a no-op
  async fn close(&self, key: &ChannelKey);

  /// Observe connection health changes
  fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_keys_with_equal_parts_are_equal() {
    let a = ChannelKey::progress(StoreId::from("store-1"));
    let b = ChannelKey::progress(StoreId::from("store-1"));
    assert_eq!(a, b);

    let c = ChannelKey::jobs(StoreId::from("store-1"));
    assert_ne!(a, c);

    let d = ChannelKey::logs(StoreId::from("store-1"), JobId::from("job-1"));
    let e = ChannelKey::logs(StoreId::from("store-1"), JobId::from("job-2"));
    assert_ne!(d, e);
  }

  #[test]
  fn test_key_display() {
    let key = ChannelKey::logs(StoreId::from("store-1"), JobId::from("job-9"));
    assert_eq!(key.to_string(), "store-1/logs/job-9");
  }
}
