//! Sync orchestrator.
//!
//! One event loop owns the engine state: user actions, push-channel
//! messages, and timers all funnel into it as [`SyncEvent`]s, the pure
//! reducer decides what applies, and side effects (cache invalidation,
//! auto-reset timers, channel teardown) run off the resulting transition.
//! Snapshots are published through a `watch` channel so any number of
//! readers can observe state without touching the loop.

use crate::invalidation::{CacheInvalidator, InvalidationScheduler};
use crate::remote::{JobControl, RemoteCommand};
use channel::{StoreWatch, Subscription, SubscriptionManager};
use chrono::Utc;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use storesync_core::{
  EngineConfig, EngineState, JobId, MachineState, ProgressData, StoreId, SyncEvent, SyncOptions, SyncResult,
  can_cancel, can_pause, can_resume, can_start, reduce,
};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A unit of work for the event loop. Control methods attach an ack to
/// learn whether their optimistic event actually applied; push callbacks
/// and timers fire and forget.
enum Command {
  Event(SyncEvent, Option<oneshot::Sender<bool>>),
  /// Reset scheduled after a terminal state; carries the epoch it was armed
  /// in so a restart invalidates it even if it is already queued
  AutoReset { epoch: u64 },
}

struct EngineInner {
  remote: Arc<dyn JobControl>,
  subscriptions: Arc<SubscriptionManager>,
  scheduler: InvalidationScheduler,
  config: EngineConfig,
  commands: mpsc::UnboundedSender<Command>,
  state: watch::Receiver<EngineState>,
  active_sub: Mutex<Option<Subscription>>,
  /// Serializes user-facing control calls
  control: Mutex<()>,
  reset_epoch: AtomicU64,
  reset_task: StdMutex<Option<JoinHandle<()>>>,
}

/// The engine facade handed to the dashboard layer.
///
/// All methods take `&self`; clones of the snapshot receiver from
/// [`SyncEngine::subscribe`] remain valid until [`SyncEngine::shutdown`].
pub struct SyncEngine {
  inner: Arc<EngineInner>,
  tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
  pub fn new(
    remote: Arc<dyn JobControl>,
    subscriptions: Arc<SubscriptionManager>,
    invalidator: Arc<dyn CacheInvalidator>,
    config: EngineConfig,
  ) -> Self {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(EngineState::initial());

    let inner = Arc::new(EngineInner {
      remote,
      subscriptions: Arc::clone(&subscriptions),
      scheduler: InvalidationScheduler::new(invalidator, &config),
      config,
      commands: command_tx.clone(),
      state: state_rx,
      active_sub: Mutex::new(None),
      control: Mutex::new(()),
      reset_epoch: AtomicU64::new(0),
      reset_task: StdMutex::new(None),
    });

    let mut tasks = vec![tokio::spawn(run_loop(Arc::clone(&inner), command_rx, state_tx))];

    // Forward transport health into the loop, starting with the current value
    if let Some(mut connection) = subscriptions.connection_changes() {
      let commands = command_tx;
      tasks.push(tokio::spawn(async move {
        loop {
          let state = *connection.borrow_and_update();
          if commands
            .send(Command::Event(SyncEvent::ConnectionChanged(state), None))
            .is_err()
          {
            break;
          }
          if connection.changed().await.is_err() {
            break;
          }
        }
      }));
    }

    Self {
      inner,
      tasks: StdMutex::new(tasks),
    }
  }

  /// Current state snapshot
  pub fn snapshot(&self) -> EngineState {
    self.inner.state.borrow().clone()
  }

  /// Watch every published snapshot
  pub fn subscribe(&self) -> watch::Receiver<EngineState> {
    self.inner.state.clone()
  }

  pub fn machine_state(&self) -> MachineState {
    self.inner.state.borrow().machine_state
  }

  pub fn progress(&self) -> ProgressData {
    self.inner.state.borrow().progress.clone()
  }

  pub fn is_idle(&self) -> bool {
    self.machine_state() == MachineState::Idle
  }

  pub fn is_syncing(&self) -> bool {
    self.machine_state().is_active()
  }

  pub fn is_paused(&self) -> bool {
    self.machine_state() == MachineState::Paused
  }

  pub fn is_completed(&self) -> bool {
    self.machine_state() == MachineState::Completed
  }

  pub fn is_failed(&self) -> bool {
    self.machine_state() == MachineState::Failed
  }

  pub fn can_start(&self) -> bool {
    can_start(self.machine_state())
  }

  pub fn can_pause(&self) -> bool {
    can_pause(self.machine_state())
  }

  pub fn can_resume(&self) -> bool {
    can_resume(self.machine_state())
  }

  pub fn can_cancel(&self) -> bool {
    can_cancel(self.machine_state())
  }

  /// Start an import for a store. Ignored (with a warning) when a sync is
  /// already active; remote failures surface as a `Failed` state, not a
  /// return value.
  pub async fn start(&self, store_id: StoreId, options: SyncOptions) {
    let _guard = self.inner.control.lock().await;

    // Invalidate any grace-period reset before the new run begins
    self.inner.cancel_reset();

    let event = SyncEvent::Start {
      store_id: store_id.clone(),
      options: options.clone(),
    };
    if !self.request(event).await {
      warn!("Start ignored for store {}: a sync is already active", store_id);
      return;
    }

    // Channels first so no early push event is missed
    let subscription = self
      .inner
      .subscriptions
      .subscribe_to_store(self.store_watch(store_id.clone()))
      .await;
    {
      let mut active = self.inner.active_sub.lock().await;
      if let Some(previous) = active.replace(subscription) {
        previous.unsubscribe().await;
      }
    }

    info!("Starting sync for store {}", store_id);
    match self.inner.remote.begin_import(&store_id, &options).await {
      Ok(job_id) => {
        debug!("Store {} job accepted: {}", store_id, job_id);
        self.dispatch(SyncEvent::JobAccepted(job_id));
      }
      Err(e) => {
        warn!("Failed to start sync for store {}: {}", store_id, e);
        self.dispatch(SyncEvent::Error(e.to_string()));
      }
    }
  }

  /// Pause the running import. Optimistic: the state flips to `Paused`
  /// immediately and rolls back to the backend's view if the call fails.
  pub async fn pause(&self) {
    let _guard = self.inner.control.lock().await;

    let Some(job_id) = self.snapshot().active_job_id else {
      debug!("Pause ignored: no active job");
      return;
    };
    if !self.request(SyncEvent::Pause).await {
      debug!("Pause ignored in state {}", self.machine_state());
      return;
    }

    info!("Pausing job {}", job_id);
    if let Err(e) = self.inner.remote.set_job_status(&job_id, RemoteCommand::Paused).await {
      warn!("Pause call failed for job {}: {}", job_id, e);
      self.reconcile(&job_id).await;
    }
  }

  /// Resume the paused import, rolling back on call failure like `pause`
  pub async fn resume(&self) {
    let _guard = self.inner.control.lock().await;

    let snapshot = self.snapshot();
    let (Some(store_id), Some(job_id)) = (snapshot.active_store_id, snapshot.active_job_id) else {
      debug!("Resume ignored: no paused job");
      return;
    };
    if !self.request(SyncEvent::Resume).await {
      debug!("Resume ignored in state {}", self.machine_state());
      return;
    }

    info!("Resuming job {}", job_id);
    if let Err(e) = self.inner.remote.resume_import(&store_id, &job_id).await {
      warn!("Resume call failed for job {}: {}", job_id, e);
      self.reconcile(&job_id).await;
    }
  }

  /// Cancel the active import. Locally this is terminal either way; a
  /// failed backend call is logged, and the job record feed will correct
  /// us if the worker kept going.
  pub async fn cancel(&self) {
    let _guard = self.inner.control.lock().await;

    let job_id = self.snapshot().active_job_id;
    if !self.request(SyncEvent::Cancel).await {
      debug!("Cancel ignored in state {}", self.machine_state());
      return;
    }

    let Some(job_id) = job_id else {
      info!("Cancelled before the job was accepted");
      return;
    };
    info!("Cancelling job {}", job_id);
    if let Err(e) = self.inner.remote.set_job_status(&job_id, RemoteCommand::Cancelled).await {
      warn!("Cancel call failed for job {}: {}", job_id, e);
    }
  }

  /// Return to idle now instead of waiting out the post-terminal grace
  pub async fn reset(&self) {
    let _guard = self.inner.control.lock().await;
    self.inner.cancel_reset();
    if !self.request(SyncEvent::Reset).await {
      debug!("Reset ignored in state {}", self.machine_state());
    }
  }

  /// Tear down channels, timers, and the event loop. The engine is inert
  /// afterwards; snapshots remain readable.
  pub async fn shutdown(&self) {
    let _guard = self.inner.control.lock().await;
    self.inner.cancel_reset();
    self.inner.scheduler.cancel();
    if let Some(subscription) = self.inner.active_sub.lock().await.take() {
      subscription.unsubscribe().await;
    }
    self.inner.subscriptions.shutdown().await;

    let tasks: Vec<JoinHandle<()>> = {
      let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
      tasks.drain(..).collect()
    };
    for task in tasks {
      task.abort();
    }
    info!("Sync engine shut down");
  }

  /// Send an event and wait for the loop's verdict; false means the
  /// reducer dropped it
  async fn request(&self, event: SyncEvent) -> bool {
    let (ack_tx, ack_rx) = oneshot::channel();
    if self.inner.commands.send(Command::Event(event, Some(ack_tx))).is_err() {
      return false;
    }
    ack_rx.await.unwrap_or(false)
  }

  fn dispatch(&self, event: SyncEvent) {
    if self.inner.commands.send(Command::Event(event, None)).is_err() {
      debug!("Engine loop stopped; event dropped");
    }
  }

  /// Re-fetch the authoritative record after a failed pause/resume and
  /// apply it over the optimistic local state
  async fn reconcile(&self, job_id: &JobId) {
    match self.inner.remote.fetch_job(job_id).await {
      Ok(Some(record)) => self.dispatch(SyncEvent::Rollback(record)),
      Ok(None) => self.dispatch(SyncEvent::Error("Job no longer exists on the backend".to_string())),
      Err(e) => self.dispatch(SyncEvent::Error(e.to_string())),
    }
  }

  fn store_watch(&self, store_id: StoreId) -> StoreWatch {
    let commands = self.inner.commands.clone();
    let forward = move |event: SyncEvent| {
      let _ = commands.send(Command::Event(event, None));
    };

    StoreWatch {
      store_id,
      on_progress: Some({
        let forward = forward.clone();
        Arc::new(move |data| forward(SyncEvent::Progress(data)))
      }),
      on_job_update: Some({
        let forward = forward.clone();
        Arc::new(move |record| forward(SyncEvent::JobUpdate(record)))
      }),
      on_complete: Some({
        let forward = forward.clone();
        Arc::new(move |record| forward(SyncEvent::Complete(SyncResult::from_record(&record))))
      }),
      on_fail: Some(Arc::new(move |_record, message| forward(SyncEvent::Error(message)))),
      logs: None,
    }
  }
}

impl EngineInner {
  /// Side effects for a transition the reducer accepted
  async fn after_transition(&self, prev: &EngineState, next: &EngineState, event: &SyncEvent) {
    let store_id = next.active_store_id.clone().or_else(|| prev.active_store_id.clone());

    // Activity ticks mark the job-status view dirty, debounced
    if matches!(event, SyncEvent::Progress(_) | SyncEvent::JobUpdate(_))
      && next.machine_state.is_active()
      && let Some(ref store_id) = store_id
    {
      self.scheduler.on_sync_progress(store_id);
    }

    if next.machine_state == MachineState::Completed && prev.machine_state != MachineState::Completed {
      info!(
        "Sync completed: {} products imported",
        next.last_result.as_ref().map(|r| r.products_imported).unwrap_or(0)
      );
      if let Some(ref store_id) = store_id {
        self.scheduler.on_sync_complete(store_id).await;
      }
      self.arm_reset(self.config.reset_grace_success_ms);
    }

    if next.machine_state == MachineState::Failed && prev.machine_state != MachineState::Failed {
      warn!("Sync failed: {}", next.error.as_deref().unwrap_or("unknown error"));
      if let Some(ref store_id) = store_id {
        self.scheduler.on_sync_error(store_id).await;
      }
      self.arm_reset(self.config.reset_grace_failure_ms);
    }

    // Back to idle: the store context is gone, drop its channels and any
    // invalidations still in flight
    if next.machine_state == MachineState::Idle && prev.machine_state != MachineState::Idle {
      if let Some(subscription) = self.active_sub.lock().await.take() {
        subscription.unsubscribe().await;
      }
      self.scheduler.cancel();
    }
  }

  fn arm_reset(&self, grace_ms: u64) {
    let epoch = self.reset_epoch.load(Ordering::SeqCst);
    let commands = self.commands.clone();
    let mut reset_task = self.reset_task.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(task) = reset_task.take() {
      task.abort();
    }
    *reset_task = Some(tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(grace_ms)).await;
      let _ = commands.send(Command::AutoReset { epoch });
    }));
  }

  /// Abort the pending auto-reset and invalidate any already-queued one
  fn cancel_reset(&self) {
    self.reset_epoch.fetch_add(1, Ordering::SeqCst);
    let mut reset_task = self.reset_task.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(task) = reset_task.take() {
      task.abort();
    }
  }
}

async fn run_loop(
  inner: Arc<EngineInner>,
  mut commands: mpsc::UnboundedReceiver<Command>,
  state_tx: watch::Sender<EngineState>,
) {
  while let Some(command) = commands.recv().await {
    let (event, ack) = match command {
      Command::Event(event, ack) => (event, ack),
      Command::AutoReset { epoch } => {
        if epoch != inner.reset_epoch.load(Ordering::SeqCst) {
          continue;
        }
        debug!("Auto-reset after terminal grace period");
        (SyncEvent::Reset, None)
      }
    };

    let prev = state_tx.borrow().clone();
    let next = reduce(&prev, event.clone(), Utc::now());
    let applied = next != prev;

    if applied {
      let _ = state_tx.send(next.clone());
      inner.after_transition(&prev, &next, &event).await;
    } else {
      debug!("Dropped {:?} in state {}", event, prev.machine_state);
    }

    if let Some(ack) = ack {
      let _ = ack.send(applied);
    }
  }
}
