//! Request-level response cache.
//!
//! Successful GET responses are memoized per URL for the life of the
//! process; a repeated GET before invalidation returns the same settled
//! (or still in-flight) future instead of re-dispatching. Any mutating
//! operation clears the cache wholesale.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A dispatch shared between every caller requesting the same URL.
pub type SharedResponse = Shared<BoxFuture<'static, Result<Value>>>;

/// GET-only memoization keyed by a hash of the exact request URL.
#[derive(Default)]
pub struct RequestCache {
  entries: Mutex<HashMap<String, SharedResponse>>,
}

impl RequestCache {
  pub fn new() -> Self {
    RequestCache::default()
  }

  /// Stable, fixed-length cache key for a request URL.
  fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Return the cached dispatch for `url`, or install the one produced
  /// by `make` and return it. The winner of a race installs; losers get
  /// the winner's future.
  pub fn get_or_insert(
    &self,
    url: &str,
    make: impl FnOnce() -> SharedResponse,
  ) -> SharedResponse {
    let key = Self::cache_key(url);
    let mut entries = self.entries.lock().unwrap();
    entries.entry(key).or_insert_with(make).clone()
  }

  /// Drop a single entry. Failed dispatches use this to make the next
  /// GET retry instead of replaying the failure.
  pub fn remove(&self, url: &str) {
    self.entries.lock().unwrap().remove(&Self::cache_key(url));
  }

  /// Wholesale invalidation, used by every save and delete.
  pub fn clear(&self) {
    self.entries.lock().unwrap().clear();
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.entries.lock().unwrap().len()
  }
}
