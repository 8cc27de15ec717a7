//! Client context: one instance owns every piece of shared pipeline
//! state (caches, queue, readiness gate, connectivity, session) and the
//! raw request path underneath the resource handles.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::auth::AuthState;
use crate::cache::RequestCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::{HttpTransport, Method, Transport};
use crate::locator::ResourceLocator;
use crate::offline::{
  Connectivity, EventBus, OfflineCache, OfflineEvent, OfflineQueue, ProjectSnapshot, QueueEntry,
  ReadyFuture, ReadyGate,
};
use crate::resource::Formio;
use crate::storage::{OfflineStorage, SqliteStorage};

/// Shared client context. Create one per base configuration and derive
/// [`Formio`] handles from it; every handle shares this context's
/// response cache, offline snapshots and replay queue.
pub struct FormioClient {
  config: Config,
  transport: Arc<dyn Transport>,
  request_cache: RequestCache,
  offline_cache: OfflineCache,
  queue: OfflineQueue,
  ready: ReadyGate,
  events: EventBus,
  connectivity: Connectivity,
  auth: AuthState,
}

impl FormioClient {
  /// Create a client with the default transport and storage backends.
  pub fn new(config: Config) -> Result<Arc<Self>> {
    let transport = HttpTransport::new().map_err(|e| Error::Network(e.to_string()))?;
    let storage = SqliteStorage::open()?;
    Ok(Self::with_parts(config, Arc::new(transport), Arc::new(storage)))
  }

  /// Create a client with explicit transport and storage collaborators.
  pub fn with_parts(
    config: Config,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn OfflineStorage>,
  ) -> Arc<Self> {
    let connectivity = Connectivity::new(config.auto_dequeue);
    Arc::new(FormioClient {
      config,
      transport,
      request_cache: RequestCache::new(),
      offline_cache: OfflineCache::new(storage.clone()),
      queue: OfflineQueue::load(storage.clone()),
      ready: ReadyGate::new(),
      events: EventBus::new(),
      connectivity,
      auth: AuthState::new(storage),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.config.base_url
  }

  /// Derive a resource handle from a path or URL.
  pub fn formio(self: &Arc<Self>, path: &str) -> Result<Formio> {
    Formio::with_path(Arc::clone(self), path)
  }

  /// Derive a handle with no path, pointed at the project collection.
  pub fn formio_root(self: &Arc<Self>) -> Formio {
    Formio::new(Arc::clone(self))
  }

  // ==========================================================================
  // Raw request path
  // ==========================================================================

  /// Dispatch a request through the transport. GETs are memoized per
  /// URL: a repeated GET before cache invalidation shares the original
  /// dispatch, in flight or settled.
  pub async fn request(
    self: &Arc<Self>,
    url: &str,
    method: Method,
    data: Option<Value>,
  ) -> Result<Value> {
    if url.is_empty() {
      return Err(Error::MissingUrl);
    }
    if method != Method::Get {
      return self.dispatch(url.to_string(), method, data).await;
    }

    let this = Arc::clone(self);
    let owned_url = url.to_string();
    let shared = self.request_cache.get_or_insert(url, move || {
      async move {
        let result = this.dispatch(owned_url.clone(), Method::Get, None).await;
        if result.is_err() {
          // Keep failures out of the cache so the next GET retries.
          this.request_cache.remove(&owned_url);
        }
        result
      }
      .boxed()
      .shared()
    });
    shared.await
  }

  async fn dispatch(&self, url: String, method: Method, data: Option<Value>) -> Result<Value> {
    let mut headers = vec![
      ("Accept".to_string(), "application/json".to_string()),
      (
        "Content-Type".to_string(),
        "application/json; charset=UTF-8".to_string(),
      ),
    ];
    if let Some(token) = self.auth.token() {
      headers.push(("x-jwt-token".to_string(), token));
    }
    let body = match data {
      Some(value) => Some(serde_json::to_string(&value).map_err(Error::serialization)?),
      None => None,
    };

    let response = self
      .transport
      .send(&url, method, &headers, body)
      .await
      .map_err(|err| Error::Network(format!("Could not connect to API server ({err})")))?;

    if response.is_success() {
      if let Some(token) = response.header("x-jwt-token") {
        if !token.is_empty() {
          self.auth.set_token(token);
        }
      }
      // 204 is no content. Don't try to parse a body.
      if response.status == 204 {
        return Ok(json!({}));
      }
      return serde_json::from_str(&response.body).map_err(Error::serialization);
    }

    if response.status == 440 {
      self.auth.clear_session();
    }
    let is_json = response
      .header("content-type")
      .map(|ct| ct.contains("application/json"))
      .unwrap_or(false);
    let body = if is_json {
      serde_json::from_str(&response.body)
        .unwrap_or_else(|_| Value::String(response.body.clone()))
    } else {
      Value::String(response.body.clone())
    };
    Err(Error::Api {
      status: response.status,
      body,
    })
  }

  /// Clear the response cache.
  pub fn clear_cache(&self) {
    self.request_cache.clear();
  }

  // ==========================================================================
  // Offline cache registration
  // ==========================================================================

  /// Register a project for offline caching. Hydration of its snapshot
  /// is appended to the readiness chain: the persisted copy is used
  /// when present, else the supplied seed document (its forms'
  /// timestamps forced to the epoch so any later-synced copy wins
  /// dedup), else an empty snapshot that starts collecting responses.
  /// Hydration failures are logged and swallowed so they never block
  /// the readiness gate.
  ///
  /// Returns a future resolving when this (and every earlier)
  /// registration has completed.
  pub fn cache_offline_project(
    self: &Arc<Self>,
    url: &str,
    seed: Option<Value>,
  ) -> Result<ReadyFuture> {
    let locator = ResourceLocator::parse(url, &self.config.base_url)?;
    let project_id = locator.project_id;
    let this = Arc::clone(self);
    Ok(self.ready.enqueue(async move {
      if let Err(err) = this.hydrate_project(&project_id, seed) {
        tracing::error!(%project_id, %err, "error trying to cache offline storage");
      }
    }))
  }

  fn hydrate_project(&self, project_id: &str, seed: Option<Value>) -> Result<()> {
    let snapshot = match self.offline_cache.load_persisted(project_id)? {
      Some(snapshot) => snapshot,
      None => match seed {
        Some(document) => ProjectSnapshot::seeded(document)?,
        None => ProjectSnapshot::default(),
      },
    };
    self.offline_cache.hydrate(project_id, snapshot)
  }

  /// Clear every offline snapshot. Previously registered projects stop
  /// caching future requests.
  pub fn clear_offline_cache(&self) {
    if let Err(err) = self.offline_cache.clear_all() {
      tracing::warn!(%err, "failed to clear offline cache");
    }
  }

  // ==========================================================================
  // Connectivity and replay
  // ==========================================================================

  pub fn is_offline(&self) -> bool {
    self.connectivity.is_offline()
  }

  /// Force offline mode on or off. Coming back online starts draining
  /// the queue when auto-dequeue is enabled.
  pub fn set_offline(self: &Arc<Self>, offline: bool) {
    let flipped_online = self.connectivity.set_forced_offline(offline);
    if flipped_online && self.connectivity.auto_dequeue() {
      self.spawn_dequeue();
    }
  }

  /// Report the host's network signal. An online notification starts
  /// draining the queue when auto-dequeue is enabled, independent of
  /// the forced flag.
  pub fn set_network_online(self: &Arc<Self>, online: bool) {
    self.connectivity.set_network_online(online);
    if online && self.connectivity.auto_dequeue() {
      self.spawn_dequeue();
    }
  }

  pub fn set_auto_dequeue(&self, auto: bool) {
    self.connectivity.set_auto_dequeue(auto);
  }

  fn spawn_dequeue(self: &Arc<Self>) {
    let this = Arc::clone(self);
    tokio::spawn(async move {
      this.dequeue_offline_requests().await;
    });
  }

  /// Replay requests queued while offline, one at a time in FIFO order.
  /// A failed replay drops its entry, emits [`OfflineEvent::FormError`]
  /// and halts so the host application decides what happens to the rest
  /// of the queue. A no-op when a replay cycle is already running.
  pub async fn dequeue_offline_requests(self: &Arc<Self>) {
    loop {
      let Some(entry) = self.queue.begin_replay() else {
        return;
      };
      tracing::debug!(url = %entry.url, "replaying queued request");
      self.events.emit(OfflineEvent::Dequeue(entry.clone()));

      match self
        .request(&entry.url, entry.method, Some(entry.data.clone()))
        .await
      {
        Ok(response) => {
          self.events.emit(OfflineEvent::FormSubmission(response));
          self.queue.persist();
          self.queue.finish_replay();
        }
        Err(err) => {
          tracing::debug!(%err, "replay failed, halting queue");
          self.queue.persist();
          self.queue.finish_replay();
          self.events.emit(OfflineEvent::FormError(entry));
          return;
        }
      }
    }
  }

  /// Pending queue entries, front first.
  pub fn queued_requests(&self) -> Vec<QueueEntry> {
    self.queue.entries()
  }

  /// Subscribe to offline lifecycle events.
  pub fn subscribe(&self) -> broadcast::Receiver<OfflineEvent> {
    self.events.subscribe()
  }

  // ==========================================================================
  // Session
  // ==========================================================================

  pub fn token(&self) -> Option<String> {
    self.auth.token()
  }

  pub fn set_token(&self, token: &str) {
    self.auth.set_token(token);
  }

  /// The stored user, or a fetch of `/current` when a token is present
  /// but no user is stored yet.
  pub async fn current_user(self: &Arc<Self>) -> Result<Option<Value>> {
    if let Some(user) = self.auth.user() {
      return Ok(Some(user));
    }
    if self.auth.token().is_none() {
      return Ok(None);
    }
    let url = format!("{}/current", self.config.base_url);
    let response = self.request(&url, Method::Get, None).await?;
    self.auth.set_user(&response);
    Ok(Some(response))
  }

  /// End the session. The stored token, user and response cache are
  /// cleared whether or not the server call succeeds.
  pub async fn logout(self: &Arc<Self>) -> Result<()> {
    let url = format!("{}/logout", self.config.base_url);
    let result = self.request(&url, Method::Get, None).await;
    self.auth.clear_session();
    self.request_cache.clear();
    result.map(|_| ())
  }

  /// List every project on the server.
  pub async fn load_projects(self: &Arc<Self>) -> Result<Value> {
    let url = format!("{}/project", self.config.base_url);
    self.request(&url, Method::Get, None).await
  }

  // ==========================================================================
  // Crate-internal accessors for the request executor
  // ==========================================================================

  pub(crate) fn ready(&self) -> &ReadyGate {
    &self.ready
  }

  pub(crate) fn offline_cache(&self) -> &OfflineCache {
    &self.offline_cache
  }

  pub(crate) fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub(crate) fn events(&self) -> &EventBus {
    &self.events
  }

  pub(crate) fn auth(&self) -> &AuthState {
    &self.auth
  }
}
