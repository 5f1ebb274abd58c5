//! Scripted end-to-end sync against an in-process backend.
//!
//! The demo backend implements both seams the engine is built against
//! (push transport and job control), so the full pipeline runs without a
//! real dashboard backend: progress ticks, job-record changes, optimistic
//! pause/resume, cancellation, and the post-terminal auto-reset.

use anyhow::{Context, Result};
use async_trait::async_trait;
use channel::{
  ChangeEventType, ChannelKey, JobChangeEvent, ProgressPayload, PushMessage, PushTransport, SubscriptionManager,
  TransportError,
};
use chrono::{DateTime, Utc};
use engine::{CacheError, CacheInvalidator, JobControl, RemoteCommand, RemoteError, SyncEngine, ViewKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use storesync_core::{
  ConnectionState, EngineConfig, JobId, JobRecord, MachineState, RemoteStatus, StoreId, SyncOptions,
};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;

/// Backend double: accepts the import, then plays progress ticks and job
/// records into its own push channels until the job terminates
struct DemoBackend {
  products: u32,
  tick: Duration,
  fail: bool,
  paused: AtomicBool,
  cancelled: AtomicBool,
  synced: AtomicU32,
  started_at: StdMutex<Option<DateTime<Utc>>>,
  active_store: StdMutex<Option<StoreId>>,
  senders: Mutex<HashMap<ChannelKey, mpsc::Sender<PushMessage>>>,
  connection: watch::Sender<ConnectionState>,
  /// Self-reference so `begin_import` can hand the driver task an owner
  this: Weak<DemoBackend>,
}

impl DemoBackend {
  fn new(products: u32, tick_ms: u64, fail: bool) -> Arc<Self> {
    let (connection, _) = watch::channel(ConnectionState::Connected);
    Arc::new_cyclic(|this| Self {
      products: products.max(1),
      tick: Duration::from_millis(tick_ms),
      fail,
      paused: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
      synced: AtomicU32::new(0),
      started_at: StdMutex::new(None),
      active_store: StdMutex::new(None),
      senders: Mutex::new(HashMap::new()),
      connection,
      this: this.clone(),
    })
  }

  fn record(&self, job_id: &JobId, store_id: &StoreId, status: RemoteStatus) -> JobRecord {
    let started_at = *self.started_at.lock().unwrap_or_else(|e| e.into_inner());
    JobRecord {
      id: job_id.clone(),
      store_id: store_id.clone(),
      status,
      current_phase: Some("products".to_string()),
      error_message: (status == RemoteStatus::Failed).then(|| "Demo backend gave up".to_string()),
      synced_products: self.synced.load(Ordering::SeqCst),
      total_products: self.products,
      started_at,
      completed_at: (status == RemoteStatus::Completed).then(Utc::now),
      ..JobRecord::default()
    }
  }

  async fn send(&self, key: &ChannelKey, message: PushMessage) {
    let senders = self.senders.lock().await;
    if let Some(tx) = senders.get(key) {
      let _ = tx.send(message).await;
    }
  }

  async fn drive(self: Arc<Self>, store_id: StoreId, job_id: JobId) {
    let progress_key = ChannelKey::progress(store_id.clone());
    let jobs_key = ChannelKey::jobs(store_id.clone());

    for synced in 1..=self.products {
      tokio::time::sleep(self.tick).await;
      while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
        tokio::time::sleep(self.tick).await;
      }
      if self.cancelled.load(Ordering::SeqCst) {
        let record = self.record(&job_id, &store_id, RemoteStatus::Cancelled);
        self.send(&jobs_key, job_change(record)).await;
        return;
      }

      self.synced.store(synced, Ordering::SeqCst);
      let tick = ProgressPayload {
        phase: Some("products".to_string()),
        message: Some(format!("Importing product {synced}/{}", self.products)),
        current: synced,
        total: self.products,
        ..ProgressPayload::default()
      };
      self.send(&progress_key, PushMessage::Progress(tick)).await;
      let record = self.record(&job_id, &store_id, RemoteStatus::Running);
      self.send(&jobs_key, job_change(record)).await;

      if self.fail && synced == self.products / 2 {
        let record = self.record(&job_id, &store_id, RemoteStatus::Failed);
        self.send(&jobs_key, job_change(record)).await;
        return;
      }
    }

    let record = self.record(&job_id, &store_id, RemoteStatus::Completed);
    self.send(&jobs_key, job_change(record)).await;
  }
}

fn job_change(record: JobRecord) -> PushMessage {
  PushMessage::JobChange(JobChangeEvent {
    event_type: ChangeEventType::Update,
    record,
  })
}

#[async_trait]
impl PushTransport for DemoBackend {
  async fn open(&self, key: &ChannelKey) -> Result<mpsc::Receiver<PushMessage>, TransportError> {
    let (tx, rx) = mpsc::channel(32);
    self.senders.lock().await.insert(key.clone(), tx);
    Ok(rx)
  }

  async fn close(&self, key: &ChannelKey) {
    self.senders.lock().await.remove(key);
  }

  fn connection_state(&self) -> watch::Receiver<ConnectionState> {
    self.connection.subscribe()
  }
}

#[async_trait]
impl JobControl for DemoBackend {
  async fn begin_import(&self, store_id: &StoreId, _options: &SyncOptions) -> Result<JobId, RemoteError> {
    *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    *self.active_store.lock().unwrap_or_else(|e| e.into_inner()) = Some(store_id.clone());
    let job_id = JobId::from("demo-job-1");

    let Some(backend) = self.this.upgrade() else {
      return Err(RemoteError::Transport("backend gone".to_string()));
    };
    tokio::spawn(backend.drive(store_id.clone(), job_id.clone()));
    Ok(job_id)
  }

  async fn set_job_status(&self, _job_id: &JobId, command: RemoteCommand) -> Result<(), RemoteError> {
    match command {
      RemoteCommand::Paused => self.paused.store(true, Ordering::SeqCst),
      RemoteCommand::Running => self.paused.store(false, Ordering::SeqCst),
      RemoteCommand::Cancelled => self.cancelled.store(true, Ordering::SeqCst),
    }
    Ok(())
  }

  async fn resume_import(&self, _store_id: &StoreId, _job_id: &JobId) -> Result<(), RemoteError> {
    self.paused.store(false, Ordering::SeqCst);
    Ok(())
  }

  async fn fetch_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, RemoteError> {
    let status = if self.cancelled.load(Ordering::SeqCst) {
      RemoteStatus::Cancelled
    } else if self.paused.load(Ordering::SeqCst) {
      RemoteStatus::Paused
    } else {
      RemoteStatus::Running
    };
    let store_id = self
      .active_store
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
      .unwrap_or_default();
    Ok(Some(self.record(job_id, &store_id, status)))
  }
}

/// Logs each refreshed view instead of touching a real cache
struct LogInvalidator;

#[async_trait]
impl CacheInvalidator for LogInvalidator {
  async fn invalidate(&self, key: &ViewKey) -> Result<(), CacheError> {
    info!("Refreshing view {}", key);
    Ok(())
  }
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_demo(
  config: EngineConfig,
  store: &str,
  products: u32,
  tick_ms: u64,
  pause: bool,
  cancel: bool,
  fail: bool,
) -> Result<()> {
  let backend = DemoBackend::new(products, tick_ms, fail);
  let subscriptions = Arc::new(SubscriptionManager::new(backend.clone() as Arc<dyn PushTransport>));
  let engine = SyncEngine::new(
    backend.clone() as Arc<dyn JobControl>,
    subscriptions,
    Arc::new(LogInvalidator),
    config,
  );

  // Print every published snapshot
  let mut printer_rx = engine.subscribe();
  let printer = tokio::spawn(async move {
    loop {
      {
        let state = printer_rx.borrow_and_update();
        let label = state.machine_state.to_string();
        println!(
          "[{label:>11}] {:>3}%  {}",
          state.progress.percent,
          state.error.as_deref().unwrap_or(state.progress.message.as_str()),
        );
      }
      if printer_rx.changed().await.is_err() {
        break;
      }
    }
  });

  let store_id = StoreId::from(store);
  engine.start(store_id, SyncOptions::default()).await;

  let mut rx = engine.subscribe();
  if pause || cancel {
    rx.wait_for(|s| s.progress.percent >= 40)
      .await
      .context("engine stopped before reaching 40%")?;
    if pause {
      engine.pause().await;
      info!("Paused; resuming in 1s");
      tokio::time::sleep(Duration::from_secs(1)).await;
      engine.resume().await;
    }
    if cancel {
      engine.cancel().await;
    }
  }

  rx.wait_for(|s| s.machine_state.is_terminal())
    .await
    .context("engine stopped before the sync finished")?;
  // The grace-period reset fires on its own
  rx.wait_for(|s| s.machine_state == MachineState::Idle)
    .await
    .context("engine stopped before auto-reset")?;

  let snapshot = engine.snapshot();
  engine.shutdown().await;
  printer.abort();

  match snapshot.last_result {
    Some(result) => println!(
      "Imported {} products ({} errors)",
      result.products_imported,
      result.errors.len()
    ),
    None => println!("Sync did not complete"),
  }
  Ok(())
}
