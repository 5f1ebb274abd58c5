//! Debounced cache invalidation.
//!
//! Sync activity produces bursts of events that would each force a dashboard
//! view refresh. The scheduler coalesces them: marking a view dirty (re)arms
//! a debounce window, duplicate keys merge keeping the highest priority, and
//! each flush refreshes at most a bounded batch ordered by priority then age.
//! Terminal sync events bypass the window entirely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use storesync_core::{EngineConfig, StoreId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A dashboard view whose cached data can go stale during a sync.
///
/// The set is closed: every refreshable view is named here, so a typo can
/// never silently invalidate nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewKey {
  CatalogByStore(StoreId),
  CategoriesByStore(StoreId),
  AggregateStatsByStore(StoreId),
  JobListByStore(StoreId),
  JobListGlobal,
  StoreList,
}

impl std::fmt::Display for ViewKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ViewKey::CatalogByStore(store) => write!(f, "catalog/{store}"),
      ViewKey::CategoriesByStore(store) => write!(f, "categories/{store}"),
      ViewKey::AggregateStatsByStore(store) => write!(f, "stats/{store}"),
      ViewKey::JobListByStore(store) => write!(f, "jobs/{store}"),
      ViewKey::JobListGlobal => write!(f, "jobs/all"),
      ViewKey::StoreList => write!(f, "stores"),
    }
  }
}

/// Refresh urgency; duplicate keys keep the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  #[error("Refresh failed for {key}: {reason}")]
  Refresh { key: String, reason: String },
}

/// Executes the actual view refresh; injected as `Arc<dyn CacheInvalidator>`
#[async_trait::async_trait]
pub trait CacheInvalidator: Send + Sync {
  async fn invalidate(&self, key: &ViewKey) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct Pending {
  priority: Priority,
  added_at: Instant,
}

struct SchedulerInner {
  invalidator: Arc<dyn CacheInvalidator>,
  window: Duration,
  batch_cap: usize,
  pending: Mutex<HashMap<ViewKey, Pending>>,
  timer: Mutex<Option<JoinHandle<()>>>,
}

/// Debounced, priority-aware invalidation scheduler.
///
/// `schedule` is cheap and synchronous; the flush runs on its own task once
/// the window elapses without further scheduling resets. Failed refreshes
/// are logged and dropped, never retried: the next sync event will mark the
/// view dirty again anyway.
pub struct InvalidationScheduler {
  inner: Arc<SchedulerInner>,
}

impl InvalidationScheduler {
  pub fn new(invalidator: Arc<dyn CacheInvalidator>, config: &EngineConfig) -> Self {
    Self::with_window(
      invalidator,
      Duration::from_millis(config.debounce_ms),
      config.batch_cap,
    )
  }

  pub fn with_window(invalidator: Arc<dyn CacheInvalidator>, window: Duration, batch_cap: usize) -> Self {
    Self {
      inner: Arc::new(SchedulerInner {
        invalidator,
        window,
        batch_cap: batch_cap.max(1),
        pending: Mutex::new(HashMap::new()),
        timer: Mutex::new(None),
      }),
    }
  }

  /// Mark a view dirty and (re)arm the debounce window
  pub fn schedule(&self, key: ViewKey, priority: Priority) {
    self.inner.enqueue(key, priority);
    self.arm_timer();
  }

  /// Mark several views dirty at the same priority in one window reset
  pub fn schedule_multiple(&self, keys: Vec<ViewKey>, priority: Priority) {
    for key in keys {
      self.inner.enqueue(key, priority);
    }
    self.arm_timer();
  }

  /// Refresh the given views immediately, bypassing the window.
  ///
  /// Matching pending entries are consumed so the eventual flush does not
  /// refresh them a second time.
  pub async fn invalidate_now(&self, keys: Vec<ViewKey>) {
    {
      let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
      for key in &keys {
        pending.remove(key);
      }
    }
    self.inner.execute_batch(&keys).await;
  }

  /// Drop everything pending and disarm the timer
  pub fn cancel(&self) {
    let mut timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = timer.take() {
      handle.abort();
    }
    drop(timer);
    self
      .inner
      .pending
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clear();
  }

  /// Views currently waiting for a flush
  pub fn pending_count(&self) -> usize {
    self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  /// Progress tick for a store: the job-status view, lowest urgency
  pub fn on_sync_progress(&self, store_id: &StoreId) {
    self.schedule(ViewKey::JobListByStore(store_id.clone()), Priority::Low);
  }

  /// Sync failed: refresh job status and stats immediately so the dashboard
  /// reflects the failure without waiting out a debounce window
  pub async fn on_sync_error(&self, store_id: &StoreId) {
    self
      .invalidate_now(vec![
        ViewKey::JobListByStore(store_id.clone()),
        ViewKey::JobListGlobal,
        ViewKey::AggregateStatsByStore(store_id.clone()),
      ])
      .await;
  }

  /// Sync completed: every view an import touches, immediately
  pub async fn on_sync_complete(&self, store_id: &StoreId) {
    self
      .invalidate_now(vec![
        ViewKey::CatalogByStore(store_id.clone()),
        ViewKey::CategoriesByStore(store_id.clone()),
        ViewKey::AggregateStatsByStore(store_id.clone()),
        ViewKey::JobListByStore(store_id.clone()),
        ViewKey::JobListGlobal,
      ])
      .await;
  }

  /// Unconditional refresh of everything related to a store
  pub async fn full_refresh(&self, store_id: &StoreId) {
    self
      .invalidate_now(vec![
        ViewKey::CatalogByStore(store_id.clone()),
        ViewKey::CategoriesByStore(store_id.clone()),
        ViewKey::AggregateStatsByStore(store_id.clone()),
        ViewKey::JobListByStore(store_id.clone()),
        ViewKey::JobListGlobal,
        ViewKey::StoreList,
      ])
      .await;
  }

  // The timer task only waits out the window; the flush runs on its own
  // task so a re-arm (which aborts the timer) can never cancel a batch
  // that has already dequeued entries from `pending`.
  fn arm_timer(&self) {
    let inner = Arc::clone(&self.inner);
    let window = inner.window;
    let mut timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = timer.take() {
      handle.abort();
    }
    *timer = Some(tokio::spawn(async move {
      tokio::time::sleep(window).await;
      tokio::spawn(inner.flush());
    }));
  }
}

impl SchedulerInner {
  fn enqueue(&self, key: ViewKey, priority: Priority) {
    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    pending
      .entry(key)
      .and_modify(|existing| existing.priority = existing.priority.max(priority))
      .or_insert(Pending {
        priority,
        added_at: Instant::now(),
      });
  }

  /// Drain pending in capped batches, highest priority first, FIFO within a
  /// priority. Overflow runs in an immediate follow-up pass so a steady
  /// stream of low-priority keys cannot starve.
  async fn flush(self: Arc<Self>) {
    loop {
      let batch: Vec<ViewKey> = {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() {
          return;
        }
        let mut entries: Vec<(ViewKey, Pending)> = pending.iter().map(|(k, p)| (k.clone(), p.clone())).collect();
        entries.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.1.added_at.cmp(&b.1.added_at)));
        entries.truncate(self.batch_cap);
        for (key, _) in &entries {
          pending.remove(key);
        }
        entries.into_iter().map(|(key, _)| key).collect()
      };

      debug!("Flushing {} invalidation(s)", batch.len());
      self.execute_batch(&batch).await;
    }
  }

  async fn execute_batch(&self, keys: &[ViewKey]) {
    let refreshes = keys.iter().map(|key| async move {
      if let Err(e) = self.invalidator.invalidate(key).await {
        warn!("Cache invalidation failed for {}: {}", key, e);
      }
    });
    futures::future::join_all(refreshes).await;
  }
}
