//! Job and store identifiers, remote job records, and import options.
//!
//! The remote import worker is opaque to this crate: everything we know
//! about it arrives as a [`JobRecord`] pushed over the change feed or
//! fetched through the job-control API.

use crate::state::MachineState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an external store/tenant (newtype for type safety)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(String);

impl StoreId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for StoreId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for StoreId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl Default for StoreId {
  fn default() -> Self {
    Self(String::new())
  }
}

/// Opaque handle assigned by the remote worker once it accepts an import
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for JobId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for JobId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl Default for JobId {
  fn default() -> Self {
    Self(String::new())
  }
}

/// Status values reported by the remote worker.
///
/// The set is closed on our side; anything the worker invents later lands
/// in `Unknown` instead of failing deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
  #[default]
  Pending,
  Running,
  Fetching,
  Saving,
  Paused,
  Completed,
  Failed,
  Error,
  Cancelled,
  #[serde(other)]
  Unknown,
}

impl RemoteStatus {
  /// Deterministic remote-status to machine-state mapping.
  ///
  /// Unrecognized statuses map to `Idle`; the reducer treats that as a
  /// non-transition and drops the event rather than guessing.
  pub fn machine_state(self) -> MachineState {
    match self {
      RemoteStatus::Pending => MachineState::Starting,
      RemoteStatus::Running | RemoteStatus::Fetching | RemoteStatus::Saving => MachineState::Syncing,
      RemoteStatus::Paused => MachineState::Paused,
      RemoteStatus::Completed => MachineState::Completed,
      RemoteStatus::Failed | RemoteStatus::Error | RemoteStatus::Cancelled => MachineState::Failed,
      RemoteStatus::Unknown => MachineState::Idle,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      RemoteStatus::Completed | RemoteStatus::Failed | RemoteStatus::Error | RemoteStatus::Cancelled
    )
  }
}

/// Last-known full record of a remote import job.
///
/// Counter fields default to zero so a partial payload from the change
/// feed still deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobRecord {
  pub id: JobId,
  pub store_id: StoreId,
  #[serde(default)]
  pub status: RemoteStatus,
  #[serde(default)]
  pub current_phase: Option<String>,
  #[serde(default)]
  pub error_message: Option<String>,
  #[serde(default)]
  pub synced_products: u32,
  #[serde(default)]
  pub total_products: u32,
  #[serde(default)]
  pub synced_categories: u32,
  #[serde(default)]
  pub total_categories: u32,
  #[serde(default)]
  pub synced_variations: u32,
  #[serde(default)]
  pub total_variations: u32,
  #[serde(default)]
  pub synced_posts: u32,
  #[serde(default)]
  pub total_posts: u32,
  #[serde(default)]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub paused_at: Option<DateTime<Utc>>,
}

impl JobRecord {
  /// Overall progress percent, recomputed from the per-entity counters.
  ///
  /// Zero totals (job accepted but discovery not done yet) yield 0.
  /// Counters are summed in u64: the record comes off the wire, so the
  /// four u32 totals together may not fit a u32.
  pub fn percent(&self) -> u8 {
    let synced = u64::from(self.synced_products)
      + u64::from(self.synced_categories)
      + u64::from(self.synced_variations)
      + u64::from(self.synced_posts);
    let total = u64::from(self.total_products)
      + u64::from(self.total_categories)
      + u64::from(self.total_variations)
      + u64::from(self.total_posts);
    if total == 0 {
      return 0;
    }
    let pct = (synced as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
  }
}

/// Options forwarded to the remote worker when starting an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
  /// Storefront platform identifier (e.g. "woocommerce")
  pub platform: String,
  /// Free-form sync type understood by the platform worker
  pub sync_type: String,
  pub include_categories: bool,
  pub include_variations: bool,
  pub include_posts: bool,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      platform: "woocommerce".to_string(),
      sync_type: "full".to_string(),
      include_categories: true,
      include_variations: true,
      include_posts: false,
    }
  }
}

/// Summary of the most recently completed import.
///
/// Survives an engine reset so the dashboard can keep showing
/// "last sync: ..." after the control surface re-arms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncResult {
  pub products_imported: u32,
  pub categories_imported: u32,
  pub variations_imported: u32,
  pub posts_imported: u32,
  pub errors: Vec<String>,
  /// Wall-clock duration of the remote job in seconds, if both timestamps
  /// were reported
  pub duration_secs: Option<i64>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl SyncResult {
  /// Build a result summary from a terminal job record
  pub fn from_record(record: &JobRecord) -> Self {
    let duration_secs = match (record.started_at, record.completed_at) {
      (Some(start), Some(end)) => Some((end - start).num_seconds()),
      _ => None,
    };

    Self {
      products_imported: record.synced_products,
      categories_imported: record.synced_categories,
      variations_imported: record.synced_variations,
      posts_imported: record.synced_posts,
      errors: record.error_message.iter().cloned().collect(),
      duration_secs,
      completed_at: record.completed_at,
    }
  }
}
