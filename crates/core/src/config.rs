//! Engine configuration with optional TOML overrides.
//!
//! Every field has a default; a missing or malformed file never prevents
//! the engine from starting.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Tunables for the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Debounce window for batched cache invalidation (default 500ms)
  pub debounce_ms: u64,
  /// Maximum invalidations executed per debounce pass (default 10)
  pub batch_cap: usize,
  /// Grace period before auto-reset after a successful import (default 3s)
  pub reset_grace_success_ms: u64,
  /// Grace period before auto-reset after a failed import (default 5s)
  pub reset_grace_failure_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 500,
      batch_cap: 10,
      reset_grace_success_ms: 3_000,
      reset_grace_failure_ms: 5_000,
    }
  }
}

impl EngineConfig {
  /// Parse a TOML document, filling missing fields from defaults
  pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(raw)
  }

  /// Load config from a file, falling back to defaults when the file is
  /// missing or unparsable
  pub fn load(path: &Path) -> Self {
    match std::fs::read_to_string(path) {
      Ok(raw) => match Self::from_toml_str(&raw) {
        Ok(config) => config,
        Err(e) => {
          warn!("Invalid engine config {:?}: {} (using defaults)", path, e);
          Self::default()
        }
      },
      Err(_) => Self::default(),
    }
  }
}
