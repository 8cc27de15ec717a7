//! Readiness gate: an ordered async barrier for snapshot hydration.
//!
//! Every request through the pipeline waits on the gate before taking
//! any branch, so no request races ahead of offline-cache hydration.
//! Registered steps run strictly in registration order; a later
//! registration chains after everything registered before it.

use std::future::Future;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

/// Handle to the completion of every step registered so far.
pub type ReadyFuture = Shared<BoxFuture<'static, ()>>;

pub struct ReadyGate {
  chain: Mutex<ReadyFuture>,
}

impl ReadyGate {
  pub fn new() -> Self {
    ReadyGate {
      chain: Mutex::new(futures::future::ready(()).boxed().shared()),
    }
  }

  /// Append a step to the chain. The step starts only after every
  /// previously registered step has completed. Steps are infallible;
  /// fallible work swallows its own errors so a broken step can never
  /// block the gate.
  pub fn enqueue<F>(&self, step: F) -> ReadyFuture
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut chain = self.chain.lock().unwrap();
    let previous = chain.clone();
    let next = async move {
      previous.await;
      step.await;
    }
    .boxed()
    .shared();
    *chain = next.clone();
    next
  }

  /// Wait until every step registered so far has completed.
  pub async fn wait(&self) {
    let current = self.chain.lock().unwrap().clone();
    current.await;
  }
}

impl Default for ReadyGate {
  fn default() -> Self {
    ReadyGate::new()
  }
}
