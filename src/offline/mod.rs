//! Offline support: connectivity policy, readiness gate, per-project
//! snapshots, the durable replay queue and its event surface.

mod events;
mod queue;
mod ready;
mod snapshot;

pub use events::{EventBus, OfflineEvent};
pub use queue::{OfflineQueue, QueueEntry, OFFLINE_QUEUE_KEY};
pub use ready::{ReadyFuture, ReadyGate};
pub use snapshot::{Form, OfflineCache, ProjectSnapshot, OFFLINE_CACHE_PREFIX};

use std::sync::atomic::{AtomicBool, Ordering};

/// Connectivity policy: offline is the forced flag OR the absence of a
/// network signal. The host reports the network signal; the forced flag
/// lets callers simulate or insist on offline behavior.
pub struct Connectivity {
  forced_offline: AtomicBool,
  network_online: AtomicBool,
  auto_dequeue: AtomicBool,
}

impl Connectivity {
  pub fn new(auto_dequeue: bool) -> Self {
    Connectivity {
      forced_offline: AtomicBool::new(false),
      network_online: AtomicBool::new(true),
      auto_dequeue: AtomicBool::new(auto_dequeue),
    }
  }

  pub fn is_offline(&self) -> bool {
    self.forced_offline.load(Ordering::SeqCst) || !self.network_online.load(Ordering::SeqCst)
  }

  /// Toggle the forced-offline flag. Returns whether the effective
  /// state flipped from offline to online.
  pub fn set_forced_offline(&self, offline: bool) -> bool {
    let was_offline = self.is_offline();
    self.forced_offline.store(offline, Ordering::SeqCst);
    was_offline && !self.is_offline()
  }

  pub fn set_network_online(&self, online: bool) {
    self.network_online.store(online, Ordering::SeqCst);
  }

  pub fn auto_dequeue(&self) -> bool {
    self.auto_dequeue.load(Ordering::SeqCst)
  }

  pub fn set_auto_dequeue(&self, auto: bool) {
    self.auto_dequeue.store(auto, Ordering::SeqCst);
  }
}
