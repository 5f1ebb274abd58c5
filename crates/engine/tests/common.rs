//! Common test doubles for engine integration tests

use async_trait::async_trait;
use channel::{ChannelKey, PushMessage, PushTransport, TransportError};
use engine::{CacheError, CacheInvalidator, JobControl, RemoteCommand, RemoteError, ViewKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use storesync_core::{ConnectionState, JobId, JobRecord, StoreId, SyncOptions};
use tokio::sync::{Mutex, mpsc, watch};

/// In-memory push transport; tests inject messages with [`MockTransport::push`]
pub struct MockTransport {
  opens: AtomicUsize,
  closes: AtomicUsize,
  senders: Mutex<HashMap<ChannelKey, mpsc::Sender<PushMessage>>>,
  connection: watch::Sender<ConnectionState>,
}

impl MockTransport {
  pub fn new() -> Arc<Self> {
    let (connection, _) = watch::channel(ConnectionState::Connected);
    Arc::new(Self {
      opens: AtomicUsize::new(0),
      closes: AtomicUsize::new(0),
      senders: Mutex::new(HashMap::new()),
      connection,
    })
  }

  #[allow(dead_code)]
  pub fn open_count(&self) -> usize {
    self.opens.load(Ordering::SeqCst)
  }

  #[allow(dead_code)]
  pub fn close_count(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }

  pub async fn push(&self, key: &ChannelKey, message: PushMessage) -> bool {
    let senders = self.senders.lock().await;
    match senders.get(key) {
      Some(tx) => tx.send(message).await.is_ok(),
      None => false,
    }
  }

  #[allow(dead_code)]
  pub fn set_connection(&self, state: ConnectionState) {
    let _ = self.connection.send(state);
  }
}

#[async_trait]
impl PushTransport for MockTransport {
  async fn open(&self, key: &ChannelKey) -> Result<mpsc::Receiver<PushMessage>, TransportError> {
    self.opens.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = mpsc::channel(32);
    self.senders.lock().await.insert(key.clone(), tx);
    Ok(rx)
  }

  async fn close(&self, key: &ChannelKey) {
    self.closes.fetch_add(1, Ordering::SeqCst);
    self.senders.lock().await.remove(key);
  }

  fn connection_state(&self) -> watch::Receiver<ConnectionState> {
    self.connection.subscribe()
  }
}

/// Scriptable backend: flip the `fail_*` switches to make calls error,
/// seed `fetch_result` for the post-failure re-fetch
pub struct FakeRemote {
  pub fail_begin: AtomicBool,
  pub fail_set_status: AtomicBool,
  pub fail_resume: AtomicBool,
  begin_calls: AtomicUsize,
  fetch_result: Mutex<Option<JobRecord>>,
  commands: Mutex<Vec<(JobId, RemoteCommand)>>,
  resumes: Mutex<Vec<(StoreId, JobId)>>,
}

impl FakeRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      fail_begin: AtomicBool::new(false),
      fail_set_status: AtomicBool::new(false),
      fail_resume: AtomicBool::new(false),
      begin_calls: AtomicUsize::new(0),
      fetch_result: Mutex::new(None),
      commands: Mutex::new(Vec::new()),
      resumes: Mutex::new(Vec::new()),
    })
  }

  #[allow(dead_code)]
  pub fn begin_calls(&self) -> usize {
    self.begin_calls.load(Ordering::SeqCst)
  }

  #[allow(dead_code)]
  pub async fn set_fetch_result(&self, record: Option<JobRecord>) {
    *self.fetch_result.lock().await = record;
  }

  #[allow(dead_code)]
  pub async fn commands(&self) -> Vec<(JobId, RemoteCommand)> {
    self.commands.lock().await.clone()
  }

  #[allow(dead_code)]
  pub async fn resumes(&self) -> Vec<(StoreId, JobId)> {
    self.resumes.lock().await.clone()
  }
}

#[async_trait]
impl JobControl for FakeRemote {
  async fn begin_import(&self, _store_id: &StoreId, _options: &SyncOptions) -> Result<JobId, RemoteError> {
    self.begin_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_begin.load(Ordering::SeqCst) {
      return Err(RemoteError::Transport("backend offline".to_string()));
    }
    Ok(JobId::from("job-1"))
  }

  async fn set_job_status(&self, job_id: &JobId, command: RemoteCommand) -> Result<(), RemoteError> {
    self.commands.lock().await.push((job_id.clone(), command));
    if self.fail_set_status.load(Ordering::SeqCst) {
      return Err(RemoteError::Transport("backend offline".to_string()));
    }
    Ok(())
  }

  async fn resume_import(&self, store_id: &StoreId, job_id: &JobId) -> Result<(), RemoteError> {
    self.resumes.lock().await.push((store_id.clone(), job_id.clone()));
    if self.fail_resume.load(Ordering::SeqCst) {
      return Err(RemoteError::Transport("backend offline".to_string()));
    }
    Ok(())
  }

  async fn fetch_job(&self, _job_id: &JobId) -> Result<Option<JobRecord>, RemoteError> {
    Ok(self.fetch_result.lock().await.clone())
  }
}

/// Records every refreshed view in call order
pub struct RecordingInvalidator {
  calls: std::sync::Mutex<Vec<ViewKey>>,
}

impl RecordingInvalidator {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      calls: std::sync::Mutex::new(Vec::new()),
    })
  }

  #[allow(dead_code)]
  pub fn calls(&self) -> Vec<ViewKey> {
    self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
  async fn invalidate(&self, key: &ViewKey) -> Result<(), CacheError> {
    self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(key.clone());
    Ok(())
  }
}
