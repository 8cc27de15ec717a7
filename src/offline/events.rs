//! Offline lifecycle notifications.

use serde_json::Value;
use tokio::sync::broadcast;

use super::queue::QueueEntry;

/// Events emitted by the offline queue and replay engine.
#[derive(Debug, Clone)]
pub enum OfflineEvent {
  /// A mutation was deferred into the offline queue.
  Queue(QueueEntry),
  /// A deferred entry is being replayed.
  Dequeue(QueueEntry),
  /// A replay succeeded; carries the server response.
  FormSubmission(Value),
  /// A replay failed; carries the dropped entry.
  FormError(QueueEntry),
}

/// Multi-subscriber notification channel for offline events.
pub struct EventBus {
  sender: broadcast::Sender<OfflineEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (sender, _) = broadcast::channel(64);
    EventBus { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<OfflineEvent> {
    self.sender.subscribe()
  }

  /// Emit an event. Delivery is best-effort; with no subscribers the
  /// event is dropped.
  pub fn emit(&self, event: OfflineEvent) {
    let _ = self.sender.send(event);
  }
}

impl Default for EventBus {
  fn default() -> Self {
    EventBus::new()
  }
}
