//! Subscription manager for push channels.
//!
//! Owns the mapping from [`ChannelKey`] to one live transport channel plus
//! its fan-out task. Re-subscribing with an equal key reuses the channel;
//! the last unsubscribe closes it. A manager built without a transport
//! degrades to inert subscriptions instead of failing: the dashboard loses
//! live updates, nothing crashes.

use crate::message::{JobLogLine, PushMessage};
use crate::transport::{ChannelKey, PushTransport};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use storesync_core::{ConnectionState, JobId, JobRecord, ProgressData, RemoteStatus, StoreId};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type ProgressCallback = Arc<dyn Fn(ProgressData) + Send + Sync>;
pub type JobUpdateCallback = Arc<dyn Fn(JobRecord) + Send + Sync>;
pub type JobCompleteCallback = Arc<dyn Fn(JobRecord) + Send + Sync>;
pub type JobFailCallback = Arc<dyn Fn(JobRecord, String) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(JobLogLine) + Send + Sync>;

/// One registered consumer of a channel
#[derive(Clone)]
enum Consumer {
  Progress(ProgressCallback),
  Jobs {
    on_update: JobUpdateCallback,
    on_complete: Option<JobCompleteCallback>,
    on_fail: Option<JobFailCallback>,
  },
  Logs(LogCallback),
}

struct ChannelEntry {
  consumers: HashMap<u64, Consumer>,
  task: JoinHandle<()>,
}

struct Shared {
  transport: Option<Arc<dyn PushTransport>>,
  channels: Mutex<HashMap<ChannelKey, ChannelEntry>>,
  next_subscriber: AtomicU64,
}

/// Aggregate configuration for "watch this store's sync" in one call
#[derive(Default)]
pub struct StoreWatch {
  pub store_id: StoreId,
  pub on_progress: Option<ProgressCallback>,
  pub on_job_update: Option<JobUpdateCallback>,
  pub on_complete: Option<JobCompleteCallback>,
  pub on_fail: Option<JobFailCallback>,
  /// Optional per-job log feed
  pub logs: Option<(JobId, LogCallback)>,
}

/// Handle for one logical subscription (possibly spanning several channels).
///
/// Teardown is explicit: call [`Subscription::unsubscribe`]. Dropping the
/// handle without unsubscribing leaves the channel open for the remaining
/// consumers and is reclaimed by [`SubscriptionManager::shutdown`].
pub struct Subscription {
  parts: Vec<SubscriptionPart>,
}

struct SubscriptionPart {
  shared: Arc<Shared>,
  key: ChannelKey,
  id: u64,
}

impl Subscription {
  fn inert() -> Self {
    Self { parts: Vec::new() }
  }

  fn single(shared: Arc<Shared>, key: ChannelKey, id: u64) -> Self {
    Self {
      parts: vec![SubscriptionPart { shared, key, id }],
    }
  }

  fn merge(subs: Vec<Subscription>) -> Self {
    Self {
      parts: subs.into_iter().flat_map(|s| s.parts).collect(),
    }
  }

  /// True when this handle is not backed by any live channel
  pub fn is_inert(&self) -> bool {
    self.parts.is_empty()
  }

  /// Remove this consumer from every constituent channel; the last
  /// consumer on a channel closes it
  pub async fn unsubscribe(self) {
    for part in self.parts {
      part.remove().await;
    }
  }
}

impl SubscriptionPart {
  async fn remove(self) {
    let mut channels = self.shared.channels.lock().await;
    let Some(entry) = channels.get_mut(&self.key) else {
      return;
    };
    entry.consumers.remove(&self.id);
    if !entry.consumers.is_empty() {
      return;
    }

    // Last consumer gone: tear the channel down
    if let Some(entry) = channels.remove(&self.key) {
      entry.task.abort();
      if let Some(ref transport) = self.shared.transport {
        transport.close(&self.key).await;
      }
      debug!("Closed push channel {}", self.key);
    }
  }
}

/// Owns push-channel lifecycles, deduplicated by composite key
pub struct SubscriptionManager {
  shared: Arc<Shared>,
}

impl SubscriptionManager {
  pub fn new(transport: Arc<dyn PushTransport>) -> Self {
    Self::build(Some(transport))
  }

  /// A manager with no transport: every subscribe is an inert no-op
  pub fn disconnected() -> Self {
    Self::build(None)
  }

  fn build(transport: Option<Arc<dyn PushTransport>>) -> Self {
    Self {
      shared: Arc::new(Shared {
        transport,
        channels: Mutex::new(HashMap::new()),
        next_subscriber: AtomicU64::new(0),
      }),
    }
  }

  /// Subscribe to the store's progress broadcast
  pub async fn subscribe_to_progress(&self, store_id: StoreId, on_progress: ProgressCallback) -> Subscription {
    self
      .subscribe(ChannelKey::progress(store_id), Consumer::Progress(on_progress))
      .await
  }

  /// Subscribe to the store's job-record change feed.
  ///
  /// `on_complete`/`on_fail` fire exactly once per status transition into
  /// the respective terminal value, regardless of how many updates repeat
  /// that status.
  pub async fn subscribe_to_jobs(
    &self,
    store_id: StoreId,
    on_update: JobUpdateCallback,
    on_complete: Option<JobCompleteCallback>,
    on_fail: Option<JobFailCallback>,
  ) -> Subscription {
    self
      .subscribe(
        ChannelKey::jobs(store_id),
        Consumer::Jobs {
          on_update,
          on_complete,
          on_fail,
        },
      )
      .await
  }

  /// Subscribe to a per-job log feed
  pub async fn subscribe_to_logs(&self, store_id: StoreId, job_id: JobId, on_log: LogCallback) -> Subscription {
    self
      .subscribe(ChannelKey::logs(store_id, job_id), Consumer::Logs(on_log))
      .await
  }

  /// One aggregate subscription covering everything a store watcher needs;
  /// the returned handle tears all constituent channels down in one call
  pub async fn subscribe_to_store(&self, config: StoreWatch) -> Subscription {
    let mut subs = Vec::new();

    if let Some(on_progress) = config.on_progress {
      subs.push(self.subscribe_to_progress(config.store_id.clone(), on_progress).await);
    }
    if let Some(on_update) = config.on_job_update {
      subs.push(
        self
          .subscribe_to_jobs(config.store_id.clone(), on_update, config.on_complete, config.on_fail)
          .await,
      );
    }
    if let Some((job_id, on_log)) = config.logs {
      subs.push(self.subscribe_to_logs(config.store_id.clone(), job_id, on_log).await);
    }

    Subscription::merge(subs)
  }

  /// Observe transport connection health, if a transport is attached
  pub fn connection_changes(&self) -> Option<watch::Receiver<ConnectionState>> {
    self.shared.transport.as_ref().map(|t| t.connection_state())
  }

  /// Number of live underlying channels
  pub async fn active_channels(&self) -> usize {
    self.shared.channels.lock().await.len()
  }

  /// Close every channel; used when the owning store context is torn down
  pub async fn shutdown(&self) {
    let mut channels = self.shared.channels.lock().await;
    for (key, entry) in channels.drain() {
      entry.task.abort();
      if let Some(ref transport) = self.shared.transport {
        transport.close(&key).await;
      }
      debug!("Closed push channel {}", key);
    }
  }

  async fn subscribe(&self, key: ChannelKey, consumer: Consumer) -> Subscription {
    let Some(transport) = self.shared.transport.clone() else {
      debug!("No push transport; subscription to {} is inert", key);
      return Subscription::inert();
    };

    // Holding the channel map across the open call serializes concurrent
    // subscribes, so one key can never race into two transport channels.
    let mut channels = self.shared.channels.lock().await;
    let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);

    if let Some(entry) = channels.get_mut(&key) {
      entry.consumers.insert(id, consumer);
      return Subscription::single(Arc::clone(&self.shared), key, id);
    }

    let rx = match transport.open(&key).await {
      Ok(rx) => rx,
      Err(e) => {
        // Degrade to no-live-updates rather than surfacing a hard failure
        warn!("Failed to open push channel {}: {}", key, e);
        return Subscription::inert();
      }
    };

    let task = tokio::spawn(fan_out(key.clone(), rx, Arc::clone(&self.shared)));
    let mut consumers = HashMap::new();
    consumers.insert(id, consumer);
    channels.insert(key.clone(), ChannelEntry { consumers, task });
    debug!("Opened push channel {}", key);

    Subscription::single(Arc::clone(&self.shared), key, id)
  }
}

/// Per-channel delivery loop: normalize each inbound message and forward it
/// to the consumers registered at that moment.
async fn fan_out(key: ChannelKey, mut rx: tokio::sync::mpsc::Receiver<PushMessage>, shared: Arc<Shared>) {
  // Last observed status per job, for exactly-once terminal callbacks
  let mut last_status: HashMap<JobId, RemoteStatus> = HashMap::new();

  while let Some(message) = rx.recv().await {
    // Snapshot consumers, then dispatch outside the lock: a callback is
    // free to subscribe or unsubscribe without deadlocking.
    let consumers: Vec<Consumer> = {
      let channels = shared.channels.lock().await;
      match channels.get(&key) {
        Some(entry) => entry.consumers.values().cloned().collect(),
        None => break,
      }
    };

    match message {
      PushMessage::Progress(payload) => {
        let data = payload.normalize();
        for consumer in &consumers {
          if let Consumer::Progress(cb) = consumer {
            cb(data.clone());
          }
        }
      }
      PushMessage::JobChange(event) => {
        let record = event.record;
        let previous = last_status.insert(record.id.clone(), record.status);
        let is_new_status = previous != Some(record.status);

        for consumer in &consumers {
          if let Consumer::Jobs {
            on_update,
            on_complete,
            on_fail,
          } = consumer
          {
            on_update(record.clone());
            if is_new_status && record.status == RemoteStatus::Completed
              && let Some(cb) = on_complete
            {
              cb(record.clone());
            }
            if is_new_status && record.status.is_terminal() && record.status != RemoteStatus::Completed
              && let Some(cb) = on_fail
            {
              let message = record.error_message.clone().unwrap_or_else(|| "Sync failed".to_string());
              cb(record.clone(), message);
            }
          }
        }
      }
      PushMessage::Log(line) => {
        for consumer in &consumers {
          if let Consumer::Logs(cb) = consumer {
            cb(line.clone());
          }
        }
      }
    }
  }

  debug!("Push channel {} stream ended", key);
}
