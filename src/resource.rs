//! Resource handles and the offline-aware request executor.
//!
//! A [`Formio`] handle pairs the shared client context with the
//! immutable locator resolved from one resource path. Its CRUD
//! operations all funnel through [`Formio::make_request`], which waits
//! on the readiness gate, short-circuits offline-serviceable
//! operations, and folds successful responses back into the project's
//! offline snapshot.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::FormioClient;
use crate::error::{Error, Result};
use crate::http::Method;
use crate::locator::ResourceLocator;
use crate::offline::{Form, OfflineEvent, QueueEntry};

/// The resource hierarchy the API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
  Project,
  Form,
  Submission,
  Action,
}

impl ResourceKind {
  pub fn name(&self) -> &'static str {
    match self {
      ResourceKind::Project => "project",
      ResourceKind::Form => "form",
      ResourceKind::Submission => "submission",
      ResourceKind::Action => "action",
    }
  }
}

impl std::fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// What a request addresses: a single resource or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTarget {
  One(ResourceKind),
  Many(ResourceKind),
}

/// A handle on one resource path.
#[derive(Clone)]
pub struct Formio {
  client: Arc<FormioClient>,
  locator: ResourceLocator,
}

impl Formio {
  /// Handle with no path, pointed at the project collection so new
  /// projects can be created.
  pub fn new(client: Arc<FormioClient>) -> Self {
    let locator = ResourceLocator::root(client.base_url());
    Formio { client, locator }
  }

  pub fn with_path(client: Arc<FormioClient>, path: &str) -> Result<Self> {
    if path.is_empty() {
      return Ok(Self::new(client));
    }
    let locator = ResourceLocator::parse(path, client.base_url())?;
    Ok(Formio { client, locator })
  }

  pub fn locator(&self) -> &ResourceLocator {
    &self.locator
  }

  // ==========================================================================
  // Request executor
  // ==========================================================================

  /// Execute one resource operation through the offline-aware pipeline.
  ///
  /// Order of business: wait for snapshot hydration; while offline,
  /// serve cacheable form reads from the snapshot and defer submission
  /// creates into the queue; everything else dispatches through the
  /// transport, and successful responses update the project's snapshot
  /// when one is registered.
  pub async fn make_request(
    &self,
    target: RequestTarget,
    url: String,
    method: Method,
    data: Option<Value>,
  ) -> Result<Value> {
    self.client.ready().wait().await;

    if self.client.is_offline() {
      let project_id = &self.locator.project_id;
      match (target, method) {
        (RequestTarget::One(ResourceKind::Form), Method::Get) => {
          let found = self
            .client
            .offline_cache()
            .find_form(project_id, &self.locator.form_id);
          return match found {
            Some(form) => serde_json::to_value(form).map_err(Error::serialization),
            None => Ok(Value::Null),
          };
        }
        (RequestTarget::Many(ResourceKind::Form), Method::Get) => {
          return match self.client.offline_cache().forms(project_id) {
            Some(forms) => serde_json::to_value(forms).map_err(Error::serialization),
            None => Ok(Value::Null),
          };
        }
        (RequestTarget::One(ResourceKind::Submission), Method::Post) => {
          return Ok(self.queue_submission(url, data.unwrap_or(Value::Null)));
        }
        _ => {}
      }
    }

    let result = self.client.request(&url, method, data).await?;
    self.update_snapshot(target, method, &result);
    Ok(result)
  }

  /// Defer an offline submission create: persist it in the queue, emit
  /// the queue notification, and answer with a synthetic submission.
  /// The response carries no `_id` since no server id exists yet.
  fn queue_submission(&self, url: String, data: Value) -> Value {
    let entry = QueueEntry {
      kind: ResourceKind::Submission,
      url,
      method: Method::Post,
      data: data.clone(),
    };
    self.client.queue().push(entry.clone());
    self.client.events().emit(OfflineEvent::Queue(entry));

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    json!({
      "owner": self.client.auth().user_id(),
      "offline": true,
      "form": self.locator.form_id,
      "data": data,
      "created": now,
      "modified": now,
      "externalIds": [],
      "roles": [],
    })
  }

  /// Fold a successful response into the project snapshot, if one is
  /// registered for this locator's project.
  fn update_snapshot(&self, target: RequestTarget, method: Method, result: &Value) {
    let project_id = &self.locator.project_id;
    let cache = self.client.offline_cache();
    if !cache.contains(project_id) {
      return;
    }

    match (target, method) {
      (RequestTarget::One(ResourceKind::Form), Method::Delete) => {
        let name = result.get("name").and_then(Value::as_str).map(str::to_string);
        let form_id = self.locator.form_id.clone();
        cache.update(project_id, move |snapshot| match name {
          Some(name) => {
            snapshot.forms.remove(&name);
          }
          None => {
            snapshot.forms.retain(|_, form| !form.matches(&form_id));
          }
        });
      }
      (RequestTarget::One(ResourceKind::Form), _) => {
        if let Ok(form) = serde_json::from_value::<Form>(result.clone()) {
          if !form.name.is_empty() {
            cache.update(project_id, move |snapshot| {
              snapshot.forms.insert(form.name.clone(), form);
            });
          }
        }
      }
      (RequestTarget::Many(ResourceKind::Form), Method::Get) => {
        // Merge, don't replace: an index may omit forms the current
        // user can't see.
        let Some(list) = result.as_array() else {
          return;
        };
        let forms: Vec<Form> = list
          .iter()
          .filter_map(|value| serde_json::from_value(value.clone()).ok())
          .filter(|form: &Form| !form.name.is_empty())
          .collect();
        cache.update(project_id, move |snapshot| {
          for form in forms {
            snapshot.forms.insert(form.name.clone(), form);
          }
        });
      }
      _ => {}
    }
  }

  // ==========================================================================
  // Typed CRUD operations
  // ==========================================================================

  async fn load(&self, kind: ResourceKind) -> Result<Value> {
    if self.locator.id(kind).is_empty() {
      return Err(Error::MissingId(kind));
    }
    let url = format!("{}{}", self.locator.item_url(kind), self.locator.query);
    self
      .make_request(RequestTarget::One(kind), url, Method::Get, None)
      .await
  }

  /// Create or update by id presence: PUT to the item URL when the
  /// locator carries an id, POST to the collection otherwise.
  async fn save(&self, kind: ResourceKind, data: Value) -> Result<Value> {
    let has_id = !self.locator.id(kind).is_empty();
    let method = if has_id { Method::Put } else { Method::Post };
    let base = if has_id {
      self.locator.item_url(kind)
    } else {
      self.locator.collection_url(kind)
    };
    let url = format!("{base}{}", self.locator.query);
    self.client.clear_cache();
    self
      .make_request(RequestTarget::One(kind), url, method, Some(data))
      .await
  }

  async fn delete(&self, kind: ResourceKind) -> Result<Value> {
    if self.locator.id(kind).is_empty() {
      return Err(Error::MissingId(kind));
    }
    self.client.clear_cache();
    self
      .make_request(
        RequestTarget::One(kind),
        self.locator.item_url(kind).to_string(),
        Method::Delete,
        None,
      )
      .await
  }

  async fn index(&self, kind: ResourceKind, params: Option<&[(&str, &str)]>) -> Result<Value> {
    let url = format!(
      "{}{}",
      self.locator.collection_url(kind),
      serialize_params(params)
    );
    self
      .make_request(RequestTarget::Many(kind), url, Method::Get, None)
      .await
  }

  pub async fn load_project(&self) -> Result<Value> {
    self.load(ResourceKind::Project).await
  }

  pub async fn save_project(&self, data: Value) -> Result<Value> {
    self.save(ResourceKind::Project, data).await
  }

  pub async fn delete_project(&self) -> Result<Value> {
    self.delete(ResourceKind::Project).await
  }

  pub async fn load_form(&self) -> Result<Value> {
    self.load(ResourceKind::Form).await
  }

  pub async fn save_form(&self, data: Value) -> Result<Value> {
    self.save(ResourceKind::Form, data).await
  }

  pub async fn delete_form(&self) -> Result<Value> {
    self.delete(ResourceKind::Form).await
  }

  pub async fn load_forms(&self, params: Option<&[(&str, &str)]>) -> Result<Value> {
    self.index(ResourceKind::Form, params).await
  }

  pub async fn load_submission(&self) -> Result<Value> {
    self.load(ResourceKind::Submission).await
  }

  pub async fn save_submission(&self, data: Value) -> Result<Value> {
    self.save(ResourceKind::Submission, data).await
  }

  pub async fn delete_submission(&self) -> Result<Value> {
    self.delete(ResourceKind::Submission).await
  }

  pub async fn load_submissions(&self, params: Option<&[(&str, &str)]>) -> Result<Value> {
    self.index(ResourceKind::Submission, params).await
  }

  pub async fn load_action(&self) -> Result<Value> {
    self.load(ResourceKind::Action).await
  }

  pub async fn save_action(&self, data: Value) -> Result<Value> {
    self.save(ResourceKind::Action, data).await
  }

  pub async fn delete_action(&self) -> Result<Value> {
    self.delete(ResourceKind::Action).await
  }

  pub async fn load_actions(&self, params: Option<&[(&str, &str)]>) -> Result<Value> {
    self.index(ResourceKind::Action, params).await
  }

  /// The action kinds the form's server supports.
  pub async fn available_actions(&self) -> Result<Value> {
    let url = format!("{}/actions", self.locator.form_url);
    self.client.request(&url, Method::Get, None).await
  }

  /// Settings schema for one action kind.
  pub async fn action_info(&self, name: &str) -> Result<Value> {
    let url = format!("{}/actions/{name}", self.locator.form_url);
    self.client.request(&url, Method::Get, None).await
  }
}

fn serialize_params(params: Option<&[(&str, &str)]>) -> String {
  match params {
    Some(params) if !params.is_empty() => {
      let mut serializer = url::form_urlencoded::Serializer::new(String::new());
      for (key, value) in params {
        serializer.append_pair(key, value);
      }
      format!("?{}", serializer.finish())
    }
    _ => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use crate::config::Config;
  use crate::http::testing::MockTransport;
  use crate::storage::{MemoryStorage, OfflineStorage};

  use super::*;

  const BASE: &str = "https://api.example.com";

  fn test_client() -> (Arc<FormioClient>, Arc<MockTransport>, Arc<MemoryStorage>) {
    let transport = Arc::new(MockTransport::new());
    let storage = Arc::new(MemoryStorage::new());
    let client = FormioClient::with_parts(Config::new(BASE), transport.clone(), storage.clone());
    (client, transport, storage)
  }

  async fn register_project(client: &Arc<FormioClient>) {
    client
      .cache_offline_project("https://myproject.example.com", None)
      .unwrap()
      .await;
  }

  fn seed_form(value: Value) -> Form {
    serde_json::from_value(value).unwrap()
  }

  #[tokio::test]
  async fn test_offline_submission_returns_synthetic_response() {
    let (client, transport, _) = test_client();
    client.set_offline(true);
    let mut events = client.subscribe();

    let formio = client
      .formio("https://myproject.example.com/f1/submission")
      .unwrap();
    let response = formio.save_submission(json!({"a": 1})).await.unwrap();

    assert_eq!(response["offline"], json!(true));
    assert_eq!(response["form"], json!("f1"));
    assert_eq!(response["data"], json!({"a": 1}));
    assert_eq!(response["owner"], Value::Null);
    assert_eq!(response["externalIds"], json!([]));
    assert_eq!(response["roles"], json!([]));
    assert!(response.get("_id").is_none());
    assert!(response.get("id").is_none());

    let queued = client.queued_requests();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, ResourceKind::Submission);
    assert_eq!(queued[0].method, Method::Post);
    assert_eq!(
      queued[0].url,
      "https://myproject.example.com/f1/submission"
    );

    assert!(matches!(events.try_recv().unwrap(), OfflineEvent::Queue(_)));
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_form_get_resolves_from_snapshot() {
    let (client, transport, _) = test_client();
    register_project(&client).await;
    client.offline_cache().update("myproject", |snapshot| {
      snapshot.forms.insert(
        "intake".to_string(),
        seed_form(json!({"_id": "X", "name": "intake", "path": "f1"})),
      );
    });
    client.set_offline(true);

    // By path: the aliased locator's form id is the form path.
    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    let form = formio.load_form().await.unwrap();
    assert_eq!(form["_id"], json!("X"));

    // By server id.
    let formio = client.formio("https://myproject.example.com/X").unwrap();
    let form = formio.load_form().await.unwrap();
    assert_eq!(form["name"], json!("intake"));

    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_form_get_miss_is_null_without_transport() {
    let (client, transport, _) = test_client();
    register_project(&client).await;
    client.set_offline(true);

    let formio = client
      .formio("https://myproject.example.com/unknown")
      .unwrap();
    assert_eq!(formio.load_form().await.unwrap(), Value::Null);
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_forms_index_returns_mapping() {
    let (client, transport, _) = test_client();
    register_project(&client).await;
    client.offline_cache().update("myproject", |snapshot| {
      snapshot.forms.insert(
        "intake".to_string(),
        seed_form(json!({"_id": "X", "name": "intake", "path": "f1"})),
      );
    });
    client.set_offline(true);

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    let forms = formio.load_forms(None).await.unwrap();

    assert!(forms.is_object());
    assert_eq!(forms["intake"]["_id"], json!("X"));
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_reads_without_registration_are_null() {
    let (client, transport, _) = test_client();
    client.set_offline(true);

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    assert_eq!(formio.load_form().await.unwrap(), Value::Null);
    assert_eq!(formio.load_forms(None).await.unwrap(), Value::Null);
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_load_without_id_rejects_before_transport() {
    let (client, transport, _) = test_client();

    let formio = client.formio("/form/f1").unwrap();
    let err = formio.load_submission().await.unwrap_err();
    assert!(matches!(err, Error::MissingId(ResourceKind::Submission)));

    let err = formio.delete_submission().await.unwrap_err();
    assert!(matches!(err, Error::MissingId(ResourceKind::Submission)));

    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_form_get_updates_registered_snapshot() {
    let (client, transport, _) = test_client();
    register_project(&client).await;
    transport.push_json(
      200,
      json!({"_id": "X", "name": "intake", "path": "f1",
             "modified": "2024-06-01T00:00:00.000Z"}),
    );

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    formio.load_form().await.unwrap();

    let snapshot = client.offline_cache().snapshot("myproject").unwrap();
    assert_eq!(snapshot.forms["intake"].id, "X");
  }

  #[tokio::test]
  async fn test_renamed_form_is_deduped_after_refresh() {
    let (client, transport, _) = test_client();
    register_project(&client).await;
    client.offline_cache().update("myproject", |snapshot| {
      snapshot.forms.insert(
        "old".to_string(),
        seed_form(json!({"_id": "X", "name": "old", "path": "f1",
                         "modified": "2024-01-01T00:00:00.000Z"})),
      );
    });
    transport.push_json(
      200,
      json!({"_id": "X", "name": "new", "path": "f1",
             "modified": "2024-06-01T00:00:00.000Z"}),
    );

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    formio.load_form().await.unwrap();

    let snapshot = client.offline_cache().snapshot("myproject").unwrap();
    assert_eq!(snapshot.forms.len(), 1);
    assert!(snapshot.forms.contains_key("new"));
  }

  #[tokio::test]
  async fn test_forms_index_merges_into_snapshot() {
    let (client, transport, storage) = test_client();
    register_project(&client).await;
    client.offline_cache().update("myproject", |snapshot| {
      snapshot.forms.insert(
        "private".to_string(),
        seed_form(json!({"_id": "P", "name": "private", "path": "private"})),
      );
    });
    transport.push_json(
      200,
      json!([{"_id": "X", "name": "intake", "path": "f1"},
             {"_id": "Y", "name": "survey", "path": "f2"}]),
    );

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    formio.load_forms(None).await.unwrap();

    let snapshot = client.offline_cache().snapshot("myproject").unwrap();
    // The form missing from the index response is kept.
    assert_eq!(snapshot.forms.len(), 3);
    assert!(snapshot.forms.contains_key("private"));

    // And the merge was persisted.
    let raw = storage.get("formioCache-myproject").unwrap().unwrap();
    assert!(raw.contains("survey"));
  }

  #[tokio::test]
  async fn test_form_delete_removes_from_snapshot() {
    let (client, transport, _) = test_client();
    register_project(&client).await;
    client.offline_cache().update("myproject", |snapshot| {
      snapshot.forms.insert(
        "intake".to_string(),
        seed_form(json!({"_id": "X", "name": "intake", "path": "f1"})),
      );
    });
    // Delete responses carry no body worth parsing.
    transport.push_json(200, json!({}));

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    formio.delete_form().await.unwrap();

    let snapshot = client.offline_cache().snapshot("myproject").unwrap();
    assert!(snapshot.forms.is_empty());
  }

  #[tokio::test]
  async fn test_save_invalidates_response_cache() {
    let (client, transport, _) = test_client();
    transport.push_json(200, json!({"name": "before"}));
    transport.push_json(200, json!({}));
    transport.push_json(200, json!({"name": "after"}));

    let formio = client.formio("/form/f1").unwrap();
    formio.load_form().await.unwrap();
    formio.load_form().await.unwrap();
    assert_eq!(transport.call_count(), 1);

    formio.save_form(json!({"name": "after"})).await.unwrap();

    let reloaded = formio.load_form().await.unwrap();
    assert_eq!(reloaded["name"], json!("after"));
    assert_eq!(transport.call_count(), 3);
  }

  #[tokio::test]
  async fn test_save_uses_put_with_id_and_post_without() {
    let (client, transport, _) = test_client();

    let with_id = client.formio("/form/f1").unwrap();
    with_id.save_form(json!({})).await.unwrap();

    let without_id = client.formio("/form").unwrap();
    without_id.save_form(json!({})).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].method, Method::Put);
    assert_eq!(calls[0].url, format!("{BASE}/form/f1"));
    assert_eq!(calls[1].method, Method::Post);
    assert_eq!(calls[1].url, format!("{BASE}/form"));
  }

  #[tokio::test]
  async fn test_locator_query_rides_loads_but_not_deletes() {
    let (client, transport, _) = test_client();

    let formio = client.formio("/form/f1?live=1").unwrap();
    formio.load_form().await.unwrap();
    formio.delete_form().await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].url, format!("{BASE}/form/f1?live=1"));
    assert_eq!(calls[1].url, format!("{BASE}/form/f1"));
  }

  #[tokio::test]
  async fn test_index_serializes_params() {
    let (client, transport, _) = test_client();

    let formio = client.formio("/form/f1").unwrap();
    formio
      .load_submissions(Some(&[("limit", "10"), ("sort", "-created")]))
      .await
      .unwrap();

    assert_eq!(
      transport.calls()[0].url,
      format!("{BASE}/form/f1/submission?limit=10&sort=-created")
    );
  }

  #[tokio::test]
  async fn test_requests_wait_for_hydration() {
    let (client, transport, storage) = test_client();
    storage
      .set(
        "formioCache-myproject",
        &json!({"forms": {"intake": {"_id": "X", "name": "intake", "path": "f1"}}})
          .to_string(),
      )
      .unwrap();
    client.set_offline(true);

    // Registration is not awaited; the executor's readiness wait must
    // order the load after hydration completes.
    client
      .cache_offline_project("https://myproject.example.com", None)
      .unwrap();

    let formio = client.formio("https://myproject.example.com/f1").unwrap();
    let form = formio.load_form().await.unwrap();
    assert_eq!(form["_id"], json!("X"));
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_queued_submission_replays_with_original_payload() {
    let (client, transport, _) = test_client();
    client.set_offline(true);

    let formio = client
      .formio("https://myproject.example.com/f1/submission")
      .unwrap();
    formio.save_submission(json!({"a": 1})).await.unwrap();
    formio.save_submission(json!({"a": 2})).await.unwrap();

    client.set_offline(false);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].body, Some(json!({"a": 1}).to_string()));
    assert_eq!(calls[1].body, Some(json!({"a": 2}).to_string()));
    assert!(client.queued_requests().is_empty());
  }

  #[tokio::test]
  async fn test_available_actions_hits_form_actions_url() {
    let (client, transport, _) = test_client();

    let formio = client.formio("/form/f1").unwrap();
    formio.available_actions().await.unwrap();
    formio.action_info("webhook").await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].url, format!("{BASE}/form/f1/actions"));
    assert_eq!(calls[1].url, format!("{BASE}/form/f1/actions/webhook"));
  }
}
