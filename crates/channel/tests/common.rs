//! Common test utilities for channel integration tests

use async_trait::async_trait;
use channel::{ChannelKey, PushMessage, PushTransport, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use storesync_core::ConnectionState;
use tokio::sync::{Mutex, mpsc, watch};

/// In-memory transport that records open/close calls and lets tests push
/// messages into any open channel
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

  pub fn open_count(&self) -> usize {
    self.opens.load(Ordering::SeqCst)
  }

  pub fn close_count(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }

  /// Push a message into the channel for `key`; false when nothing is open
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
