//! Wire shapes delivered over the push channel.
//!
//! Payloads come from an external worker and are normalized defensively:
//! a missing percent is recomputed, a missing message is defaulted. A
//! malformed field never rejects the whole message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storesync_core::{JobRecord, ProgressData};

/// Broadcast progress tick as sent by the worker.
///
/// All fields are optional on the wire; [`ProgressPayload::normalize`]
/// produces the canonical [`ProgressData`] the rest of the system uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressPayload {
  #[serde(default)]
  pub phase: Option<String>,
  #[serde(default)]
  pub current: u32,
  #[serde(default)]
  pub total: u32,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub percent: Option<u8>,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressPayload {
  /// Normalize into the canonical progress shape.
  ///
  /// Percent is recomputed from the counters whenever the sender omitted
  /// it or sent something out of range.
  pub fn normalize(self) -> ProgressData {
    let percent = match self.percent {
      Some(p) if p <= 100 => p,
      _ => computed_percent(self.current, self.total),
    };

    ProgressData {
      phase: self.phase.unwrap_or_else(|| "sync".to_string()),
      current: self.current,
      total: self.total,
      message: self.message.unwrap_or_default(),
      percent,
      timestamp: self.timestamp,
    }
  }
}

fn computed_percent(current: u32, total: u32) -> u8 {
  if total == 0 {
    return 0;
  }
  let pct = (f64::from(current) / f64::from(total) * 100.0).round();
  pct.clamp(0.0, 100.0) as u8
}

/// Change-feed event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventType {
  Insert,
  Update,
}

/// Change-feed event carrying the full job record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobChangeEvent {
  pub event_type: ChangeEventType,
  pub record: JobRecord,
}

/// Single line from a per-job log feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogLine {
  #[serde(default = "default_level")]
  pub level: String,
  pub message: String,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

fn default_level() -> String {
  "info".to_string()
}

/// Any message the transport can deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
  Progress(ProgressPayload),
  JobChange(JobChangeEvent),
  Log(JobLogLine),
}
