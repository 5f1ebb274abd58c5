//! Integration tests for the subscription manager: key dedup, leak-free
//! teardown, terminal callback delivery, and degraded mode.

mod common;

use channel::{ChangeEventType, ChannelKey, JobChangeEvent, ProgressPayload, PushMessage, StoreWatch, SubscriptionManager};
use common::MockTransport;
use std::sync::Arc;
use std::time::Duration;
use storesync_core::{JobId, JobRecord, ProgressData, RemoteStatus, StoreId};
use tokio::sync::mpsc;

fn running_record(synced: u32, total: u32) -> JobRecord {
  JobRecord {
    id: JobId::from("job-1"),
    store_id: StoreId::from("store-1"),
    status: RemoteStatus::Running,
    synced_products: synced,
    total_products: total,
    ..JobRecord::default()
  }
}

fn job_change(record: JobRecord) -> PushMessage {
  PushMessage::JobChange(JobChangeEvent {
    event_type: ChangeEventType::Update,
    record,
  })
}

async fn recv_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
  tokio::time::timeout(Duration::from_secs(1), rx.recv())
    .await
    .expect("timed out waiting for callback")
    .expect("callback channel closed")
}

#[tokio::test]
async fn test_same_key_shares_one_channel() {
  let transport = MockTransport::new();
  let manager = SubscriptionManager::new(transport.clone());
  let store = StoreId::from("store-1");

  let sub_a = manager
    .subscribe_to_progress(store.clone(), Arc::new(|_| {}))
    .await;
  let sub_b = manager
    .subscribe_to_progress(store.clone(), Arc::new(|_| {}))
    .await;

  // Two handles, one transport channel
  assert_eq!(transport.open_count(), 1);
  assert_eq!(manager.active_channels().await, 1);

  sub_a.unsubscribe().await;
  // Channel stays open for the remaining consumer
  assert_eq!(manager.active_channels().await, 1);
  assert_eq!(transport.close_count(), 0);

  sub_b.unsubscribe().await;
  assert_eq!(manager.active_channels().await, 0);
  assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn test_progress_is_normalized_before_delivery() {
  let transport = MockTransport::new();
  let manager = SubscriptionManager::new(transport.clone());
  let store = StoreId::from("store-1");

  let (tx, mut rx) = mpsc::unbounded_channel::<ProgressData>();
  let sub = manager
    .subscribe_to_progress(store.clone(), {
      let tx = tx.clone();
      Arc::new(move |data| {
        let _ = tx.send(data);
      })
    })
    .await;

  // Sender omitted percent and message
  let payload = ProgressPayload {
    phase: Some("products".to_string()),
    current: 5,
    total: 10,
    ..ProgressPayload::default()
  };
  assert!(
    transport
      .push(&ChannelKey::progress(store.clone()), PushMessage::Progress(payload))
      .await
  );

  let data = recv_timeout(&mut rx).await;
  assert_eq!(data.percent, 50);
  assert_eq!(data.phase, "products");
  assert_eq!(data.message, "");

  sub.unsubscribe().await;
}

#[tokio::test]
async fn test_terminal_callbacks_fire_once_per_transition() {
  let transport = MockTransport::new();
  let manager = SubscriptionManager::new(transport.clone());
  let store = StoreId::from("store-1");
  let key = ChannelKey::jobs(store.clone());

  let (update_tx, mut update_rx) = mpsc::unbounded_channel::<JobRecord>();
  let (done_tx, mut done_rx) = mpsc::unbounded_channel::<JobRecord>();

  let sub = manager
    .subscribe_to_jobs(
      store.clone(),
      {
        let tx = update_tx.clone();
        Arc::new(move |r| {
          let _ = tx.send(r);
        })
      },
      Some({
        let tx = done_tx.clone();
        Arc::new(move |r| {
          let _ = tx.send(r);
        })
      }),
      None,
    )
    .await;

  transport.push(&key, job_change(running_record(5, 10))).await;
  let first = recv_timeout(&mut update_rx).await;
  assert_eq!(first.status, RemoteStatus::Running);

  let done = JobRecord {
    status: RemoteStatus::Completed,
    ..running_record(10, 10)
  };
  transport.push(&key, job_change(done.clone())).await;
  // Duplicate terminal update must not re-fire on_complete
  transport.push(&key, job_change(done)).await;

  recv_timeout(&mut update_rx).await;
  recv_timeout(&mut update_rx).await;

  let completed = recv_timeout(&mut done_rx).await;
  assert_eq!(completed.status, RemoteStatus::Completed);
  assert!(done_rx.try_recv().is_err(), "on_complete fired more than once");

  sub.unsubscribe().await;
}

#[tokio::test]
async fn test_failure_callback_carries_error_message() {
  let transport = MockTransport::new();
  let manager = SubscriptionManager::new(transport.clone());
  let store = StoreId::from("store-1");
  let key = ChannelKey::jobs(store.clone());

  let (fail_tx, mut fail_rx) = mpsc::unbounded_channel::<(JobRecord, String)>();

  let sub = manager
    .subscribe_to_jobs(
      store.clone(),
      Arc::new(|_| {}),
      None,
      Some({
        let tx = fail_tx.clone();
        Arc::new(move |r, msg| {
          let _ = tx.send((r, msg));
        })
      }),
    )
    .await;

  let failed = JobRecord {
    status: RemoteStatus::Failed,
    error_message: Some("store unreachable".to_string()),
    ..running_record(2, 10)
  };
  transport.push(&key, job_change(failed)).await;

  let (record, message) = recv_timeout(&mut fail_rx).await;
  assert_eq!(record.status, RemoteStatus::Failed);
  assert_eq!(message, "store unreachable");

  sub.unsubscribe().await;
}

#[tokio::test]
async fn test_store_watch_tears_down_all_channels_in_one_call() {
  let transport = MockTransport::new();
  let manager = SubscriptionManager::new(transport.clone());
  let store = StoreId::from("store-1");

  let sub = manager
    .subscribe_to_store(StoreWatch {
      store_id: store.clone(),
      on_progress: Some(Arc::new(|_| {})),
      on_job_update: Some(Arc::new(|_| {})),
      on_complete: None,
      on_fail: None,
      logs: Some((JobId::from("job-1"), Arc::new(|_| {}))),
    })
    .await;

  // progress + jobs + logs
  assert_eq!(transport.open_count(), 3);
  assert_eq!(manager.active_channels().await, 3);

  sub.unsubscribe().await;
  assert_eq!(manager.active_channels().await, 0);
  assert_eq!(transport.close_count(), 3);
}

#[tokio::test]
async fn test_disconnected_manager_degrades_to_inert() {
  let manager = SubscriptionManager::disconnected();

  let sub = manager
    .subscribe_to_progress(StoreId::from("store-1"), Arc::new(|_| {}))
    .await;
  assert!(sub.is_inert());
  assert_eq!(manager.active_channels().await, 0);

  // Unsubscribing an inert handle is harmless
  sub.unsubscribe().await;
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
  let transport = MockTransport::new();
  let manager = SubscriptionManager::new(transport.clone());

  let _a = manager
    .subscribe_to_progress(StoreId::from("store-1"), Arc::new(|_| {}))
    .await;
  let _b = manager
    .subscribe_to_jobs(StoreId::from("store-1"), Arc::new(|_| {}), None, None)
    .await;
  assert_eq!(manager.active_channels().await, 2);

  manager.shutdown().await;
  assert_eq!(manager.active_channels().await, 0);
  assert_eq!(transport.close_count(), 2);
}
