//! Session token and user storage.
//!
//! The token rides every request as an `x-jwt-token` header, gets
//! refreshed from response headers, and is invalidated by a 440
//! (session expired) response.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::storage::OfflineStorage;

const TOKEN_KEY: &str = "formioToken";
const USER_KEY: &str = "formioUser";

/// Token and current-user state backed by persistent storage. The token
/// is additionally cached in memory to avoid a storage read per request.
pub struct AuthState {
  storage: Arc<dyn OfflineStorage>,
  token: Mutex<Option<String>>,
}

impl AuthState {
  pub fn new(storage: Arc<dyn OfflineStorage>) -> Self {
    AuthState {
      storage,
      token: Mutex::new(None),
    }
  }

  pub fn token(&self) -> Option<String> {
    let mut token = self.token.lock().unwrap();
    if token.is_none() {
      *token = self.storage.get(TOKEN_KEY).ok().flatten();
    }
    token.clone().filter(|t| !t.is_empty())
  }

  /// Persist a refreshed token. Unchanged tokens are a no-op.
  pub fn set_token(&self, value: &str) {
    let mut token = self.token.lock().unwrap();
    if token.as_deref() == Some(value) {
      return;
    }
    *token = Some(value.to_string());
    if let Err(err) = self.storage.set(TOKEN_KEY, value) {
      tracing::warn!(%err, "failed to persist session token");
    }
  }

  /// Drop the token and the stored user, in memory and in storage.
  pub fn clear_session(&self) {
    *self.token.lock().unwrap() = None;
    for key in [TOKEN_KEY, USER_KEY] {
      if let Err(err) = self.storage.remove(key) {
        tracing::warn!(key, %err, "failed to clear session state");
      }
    }
  }

  pub fn user(&self) -> Option<Value> {
    let raw = self.storage.get(USER_KEY).ok().flatten()?;
    serde_json::from_str(&raw).ok()
  }

  pub fn set_user(&self, user: &Value) {
    if let Err(err) = self.storage.set(USER_KEY, &user.to_string()) {
      tracing::warn!(%err, "failed to persist current user");
    }
  }

  /// The current user's id, used as the owner of offline submissions.
  pub fn user_id(&self) -> Value {
    self
      .user()
      .and_then(|user| user.get("_id").cloned())
      .unwrap_or(Value::Null)
  }
}
