//! Durable FIFO queue for mutations deferred while offline.
//!
//! The queue is a work list, not a cache: entries are persisted as an
//! ordered JSON array so they survive process restarts, and an entry is
//! removed from durable storage only after its replay settles. At most
//! one entry is in flight at a time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::Method;
use crate::resource::ResourceKind;
use crate::storage::OfflineStorage;

/// Storage key for the persisted queue.
pub const OFFLINE_QUEUE_KEY: &str = "formioOfflineQueue";

/// A mutating request recorded while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
  #[serde(rename = "type")]
  pub kind: ResourceKind,
  pub url: String,
  pub method: Method,
  pub data: Value,
}

struct QueueState {
  entries: VecDeque<QueueEntry>,
  in_flight: bool,
}

/// FIFO queue with an at-most-one-in-flight replay guard.
pub struct OfflineQueue {
  storage: Arc<dyn OfflineStorage>,
  state: Mutex<QueueState>,
}

impl OfflineQueue {
  /// Load the queue from persistent storage. A missing or unreadable
  /// persisted queue starts empty.
  pub fn load(storage: Arc<dyn OfflineStorage>) -> Self {
    let entries = match storage.get(OFFLINE_QUEUE_KEY) {
      Ok(Some(raw)) => match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
        Ok(entries) => entries.into(),
        Err(err) => {
          tracing::warn!(%err, "discarding unreadable offline queue");
          VecDeque::new()
        }
      },
      Ok(None) => VecDeque::new(),
      Err(err) => {
        tracing::warn!(%err, "failed to read offline queue");
        VecDeque::new()
      }
    };

    OfflineQueue {
      storage,
      state: Mutex::new(QueueState {
        entries,
        in_flight: false,
      }),
    }
  }

  /// Append an entry and persist the queue immediately.
  pub fn push(&self, entry: QueueEntry) {
    let mut state = self.state.lock().unwrap();
    state.entries.push_back(entry);
    self.persist_locked(&state);
  }

  /// Start a replay cycle: pop the head entry and mark it in flight.
  /// Returns `None` when the queue is empty or a replay is already in
  /// progress. The popped entry stays persisted until [`Self::persist`]
  /// runs after its replay settles.
  pub fn begin_replay(&self) -> Option<QueueEntry> {
    let mut state = self.state.lock().unwrap();
    if state.in_flight {
      return None;
    }
    let entry = state.entries.pop_front()?;
    state.in_flight = true;
    Some(entry)
  }

  /// Mark the in-flight replay as settled.
  pub fn finish_replay(&self) {
    self.state.lock().unwrap().in_flight = false;
  }

  /// Persist the pending entries (the in-flight entry, if any, is no
  /// longer part of the queue). Fire-and-forget.
  pub fn persist(&self) {
    let state = self.state.lock().unwrap();
    self.persist_locked(&state);
  }

  fn persist_locked(&self, state: &QueueState) {
    let entries: Vec<&QueueEntry> = state.entries.iter().collect();
    match serde_json::to_string(&entries) {
      Ok(raw) => {
        if let Err(err) = self.storage.set(OFFLINE_QUEUE_KEY, &raw) {
          tracing::warn!(%err, "failed to persist offline queue");
        }
      }
      Err(err) => {
        tracing::warn!(%err, "failed to serialize offline queue");
      }
    }
  }

  pub fn len(&self) -> usize {
    self.state.lock().unwrap().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state.lock().unwrap().entries.is_empty()
  }

  /// Snapshot of the pending entries, front first.
  pub fn entries(&self) -> Vec<QueueEntry> {
    self.state.lock().unwrap().entries.iter().cloned().collect()
  }
}
