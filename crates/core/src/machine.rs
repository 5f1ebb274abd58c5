//! Pure state-transition function for the sync engine.
//!
//! `reduce` never performs I/O and never panics. Illegal transitions return
//! the prior state untouched: inbound push events race with user actions
//! under normal operation, so an out-of-order event is expected traffic,
//! not programmer error.
//!
//! The transition table in [`valid_transitions`] is the single source of
//! truth; the `can_*` predicates used by the orchestrator's guards are
//! direct queries against it.

use crate::job::{JobId, JobRecord, StoreId, SyncOptions, SyncResult};
use crate::state::{ConnectionState, EngineState, MachineState, ProgressData};
use chrono::{DateTime, Utc};

/// Discrete events applied to the engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// User requested an import for a store
  Start { store_id: StoreId, options: SyncOptions },
  /// Broadcast progress tick from the worker
  Progress(ProgressData),
  /// The remote worker accepted the job and assigned an id
  JobAccepted(JobId),
  /// Change-feed update of the remote job record
  JobUpdate(JobRecord),
  /// Authoritative record re-applied after a failed pause/resume call.
  /// Unlike `JobUpdate` this is also accepted while paused.
  Rollback(JobRecord),
  /// User requested pause (optimistic)
  Pause,
  /// User requested resume (optimistic)
  Resume,
  /// User requested cancel (optimistic, reflected as Failed locally)
  Cancel,
  /// The watched job reached terminal success
  Complete(SyncResult),
  /// A remote call or the job itself failed
  Error(String),
  /// Push-channel health change (no machine transition)
  ConnectionChanged(ConnectionState),
  /// Return to idle; only `last_result` survives
  Reset,
}

/// States reachable from `state` in one transition
pub fn valid_transitions(state: MachineState) -> &'static [MachineState] {
  use MachineState::*;
  match state {
    Idle => &[Starting],
    Starting => &[Discovering, Syncing, Failed, Idle],
    Discovering => &[Syncing, Paused, Failed, Idle],
    Syncing => &[Paused, Completed, Failed, Idle],
    Paused => &[Syncing, Failed, Idle],
    Completed => &[Idle, Starting],
    Failed => &[Idle, Starting],
  }
}

fn allows(from: MachineState, to: MachineState) -> bool {
  valid_transitions(from).contains(&to)
}

pub fn can_start(state: MachineState) -> bool {
  allows(state, MachineState::Starting)
}

pub fn can_pause(state: MachineState) -> bool {
  allows(state, MachineState::Paused)
}

pub fn can_resume(state: MachineState) -> bool {
  state == MachineState::Paused && allows(state, MachineState::Syncing)
}

pub fn can_cancel(state: MachineState) -> bool {
  allows(state, MachineState::Failed)
}

/// Apply one event to the snapshot, producing the next snapshot.
///
/// `now` is threaded in by the caller so the function stays deterministic
/// under test.
pub fn reduce(state: &EngineState, event: SyncEvent, now: DateTime<Utc>) -> EngineState {
  match event {
    SyncEvent::Start { store_id, options: _ } => {
      if !can_start(state.machine_state) {
        return state.clone();
      }
      EngineState {
        machine_state: MachineState::Starting,
        active_store_id: Some(store_id),
        last_result: state.last_result.clone(),
        connection_state: state.connection_state,
        started_at: Some(now),
        updated_at: Some(now),
        ..EngineState::initial()
      }
    }

    SyncEvent::Progress(progress) => {
      if !state.machine_state.is_active() {
        return state.clone();
      }
      let mut next = state.clone();
      let candidate = phase_state(&progress.phase);
      if candidate != next.machine_state && allows(next.machine_state, candidate) {
        next.machine_state = candidate;
      }
      next.progress = merge_progress(&state.progress, progress);
      next.updated_at = Some(now);
      next
    }

    SyncEvent::JobAccepted(job_id) => {
      if !state.machine_state.is_active() {
        return state.clone();
      }
      let mut next = state.clone();
      next.active_job_id = Some(job_id);
      next.updated_at = Some(now);
      next
    }

    SyncEvent::JobUpdate(record) => {
      if !state.machine_state.is_active() {
        return state.clone();
      }
      apply_remote_record(state, record, now)
    }

    SyncEvent::Rollback(record) => {
      if !state.machine_state.is_active() && state.machine_state != MachineState::Paused {
        return state.clone();
      }
      apply_remote_record(state, record, now)
    }

    SyncEvent::Pause => {
      if !can_pause(state.machine_state) {
        return state.clone();
      }
      let mut next = state.clone();
      next.machine_state = MachineState::Paused;
      next.updated_at = Some(now);
      next
    }

    SyncEvent::Resume => {
      if !can_resume(state.machine_state) {
        return state.clone();
      }
      let mut next = state.clone();
      next.machine_state = MachineState::Syncing;
      next.updated_at = Some(now);
      next
    }

    SyncEvent::Cancel => {
      if !can_cancel(state.machine_state) {
        return state.clone();
      }
      let mut next = close_job(state);
      next.machine_state = MachineState::Failed;
      next.error = Some("Sync cancelled by user".to_string());
      next.updated_at = Some(now);
      next
    }

    SyncEvent::Complete(result) => {
      if !allows(state.machine_state, MachineState::Completed) {
        return state.clone();
      }
      let mut next = close_job(state);
      next.machine_state = MachineState::Completed;
      // Pin to exactly 100: the last computed value may sit at 99 from
      // rounding even when every entity imported.
      next.progress.percent = 100;
      next.last_result = Some(result);
      next.error = None;
      next.updated_at = Some(now);
      next
    }

    SyncEvent::Error(message) => {
      if !allows(state.machine_state, MachineState::Failed) {
        return state.clone();
      }
      let mut next = close_job(state);
      next.machine_state = MachineState::Failed;
      next.error = Some(message);
      next.updated_at = Some(now);
      next
    }

    SyncEvent::ConnectionChanged(connection) => {
      if state.connection_state == connection {
        return state.clone();
      }
      let mut next = state.clone();
      next.connection_state = connection;
      next.updated_at = Some(now);
      next
    }

    SyncEvent::Reset => {
      if !allows(state.machine_state, MachineState::Idle) {
        return state.clone();
      }
      EngineState {
        last_result: state.last_result.clone(),
        ..EngineState::initial()
      }
    }
  }
}

/// Map a remote record onto the snapshot.
///
/// The record's status decides the target state; if the table does not
/// permit that move from the current state the whole event is dropped.
fn apply_remote_record(state: &EngineState, record: JobRecord, now: DateTime<Utc>) -> EngineState {
  let candidate = record.status.machine_state();

  // Unknown statuses map to Idle defensively; treat as noise.
  if candidate == MachineState::Idle {
    return state.clone();
  }

  if candidate != state.machine_state && !allows(state.machine_state, candidate) {
    return state.clone();
  }

  match candidate {
    MachineState::Completed => {
      let mut next = close_job(state);
      next.machine_state = MachineState::Completed;
      next.progress.percent = 100;
      next.last_result = Some(SyncResult::from_record(&record));
      next.error = None;
      next.updated_at = Some(now);
      next
    }
    MachineState::Failed => {
      let mut next = close_job(state);
      next.machine_state = MachineState::Failed;
      next.error = Some(record.error_message.clone().unwrap_or_else(|| "Sync failed".to_string()));
      next.updated_at = Some(now);
      next
    }
    _ => {
      let mut next = state.clone();
      next.machine_state = candidate;
      next.progress.percent = next.progress.percent.max(record.percent());
      if let Some(ref phase) = record.current_phase {
        next.progress.phase = phase.clone();
      }
      next.active_job_id = Some(record.id.clone());
      next.active_job = Some(record);
      next.updated_at = Some(now);
      next
    }
  }
}

/// Clear the per-job fields; used on every terminal transition so the
/// `active_job* only while running-or-paused` invariant holds.
fn close_job(state: &EngineState) -> EngineState {
  let mut next = state.clone();
  next.active_job_id = None;
  next.active_job = None;
  next
}

/// Map a broadcast phase label to a machine state
fn phase_state(phase: &str) -> MachineState {
  if phase.starts_with("discover") {
    MachineState::Discovering
  } else {
    MachineState::Syncing
  }
}

/// Fold a new progress tick into the previous one, keeping percent
/// monotone within the job lifetime
fn merge_progress(previous: &ProgressData, incoming: ProgressData) -> ProgressData {
  ProgressData {
    percent: previous.percent.max(incoming.percent),
    ..incoming
  }
}
