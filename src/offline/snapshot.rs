//! Per-project offline snapshots.
//!
//! A snapshot holds every form definition seen for a project, keyed by
//! form name, both in memory and persisted as a full JSON document. It
//! is created by registering a project for offline caching, updated by
//! successful form responses, and deduplicated after every mutation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::storage::OfflineStorage;

/// Prefix for per-project snapshot keys in persistent storage.
pub const OFFLINE_CACHE_PREFIX: &str = "formioCache-";

/// A form definition. Known fields are typed; the rest of the schema is
/// preserved round-trip in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
  #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub path: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub created: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub modified: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Form {
  pub fn modified_at(&self) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&self.modified)
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
  }

  /// Two entries refer to the same logical form when they share a
  /// non-empty id or a non-empty path. A renamed form shows up twice
  /// under old and new names but keeps its id and path.
  pub fn is_same_logical(&self, other: &Form) -> bool {
    (!self.id.is_empty() && self.id == other.id)
      || (!self.path.is_empty() && self.path == other.path)
  }

  /// Whether this form is addressed by the given locator id, which is a
  /// server id for canonical paths and a form path for aliased ones.
  pub fn matches(&self, key: &str) -> bool {
    !key.is_empty() && (self.id == key || self.path == key)
  }
}

/// The offline-cached copy of a project's forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSnapshot {
  #[serde(default)]
  pub forms: BTreeMap<String, Form>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Earliest representable timestamp, used for seeded forms so any later
/// synced copy wins the dedup comparison.
fn epoch_timestamp() -> String {
  DateTime::<Utc>::UNIX_EPOCH.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ProjectSnapshot {
  /// Build a snapshot from a caller-supplied seed document. Every
  /// seeded form's `created`/`modified` is forced to the epoch.
  pub fn seeded(document: Value) -> Result<Self> {
    let mut snapshot: ProjectSnapshot =
      serde_json::from_value(document).map_err(Error::serialization)?;
    for form in snapshot.forms.values_mut() {
      form.created = epoch_timestamp();
      form.modified = epoch_timestamp();
    }
    Ok(snapshot)
  }

  /// Remove duplicate entries referring to the same logical form,
  /// keeping the one with the later `modified` timestamp. With equal
  /// timestamps the entry under the lexicographically smaller name is
  /// removed; entries with unparsable timestamps are never removed.
  /// Deterministic and idempotent.
  pub fn dedup(&mut self) {
    let names: Vec<String> = self.forms.keys().cloned().collect();
    for name in &names {
      let Some(form) = self.forms.get(name).cloned() else {
        continue;
      };
      for other_name in &names {
        if other_name == name {
          continue;
        }
        let Some(other) = self.forms.get(other_name) else {
          continue;
        };
        if form.is_same_logical(other) && loses_to(other, other_name, &form, name) {
          self.forms.remove(other_name);
        }
      }
    }
  }
}

fn loses_to(other: &Form, other_name: &str, keeper: &Form, keeper_name: &str) -> bool {
  match (other.modified_at(), keeper.modified_at()) {
    (Some(o), Some(k)) => o < k || (o == k && other_name < keeper_name),
    _ => false,
  }
}

/// In-memory and persisted snapshots for every project registered for
/// offline caching. Owned by the client context; all mutation happens
/// inside request-executor continuations.
pub struct OfflineCache {
  storage: Arc<dyn OfflineStorage>,
  projects: Mutex<HashMap<String, ProjectSnapshot>>,
}

impl OfflineCache {
  pub fn new(storage: Arc<dyn OfflineStorage>) -> Self {
    OfflineCache {
      storage,
      projects: Mutex::new(HashMap::new()),
    }
  }

  fn storage_key(project_id: &str) -> String {
    format!("{OFFLINE_CACHE_PREFIX}{project_id}")
  }

  /// Read the persisted snapshot for a project, if any.
  pub fn load_persisted(&self, project_id: &str) -> Result<Option<ProjectSnapshot>> {
    match self.storage.get(&Self::storage_key(project_id))? {
      Some(raw) => Ok(Some(
        serde_json::from_str(&raw).map_err(Error::serialization)?,
      )),
      None => Ok(None),
    }
  }

  /// Install a snapshot for a project, persisting it immediately. From
  /// this point on the project's form responses are collected.
  pub fn hydrate(&self, project_id: &str, snapshot: ProjectSnapshot) -> Result<()> {
    let raw = serde_json::to_string(&snapshot).map_err(Error::serialization)?;
    self.storage.set(&Self::storage_key(project_id), &raw)?;
    self
      .projects
      .lock()
      .unwrap()
      .insert(project_id.to_string(), snapshot);
    Ok(())
  }

  pub fn contains(&self, project_id: &str) -> bool {
    self.projects.lock().unwrap().contains_key(project_id)
  }

  pub fn snapshot(&self, project_id: &str) -> Option<ProjectSnapshot> {
    self.projects.lock().unwrap().get(project_id).cloned()
  }

  /// Look up a form by locator id (id-or-path equality).
  pub fn find_form(&self, project_id: &str, form_id: &str) -> Option<Form> {
    let projects = self.projects.lock().unwrap();
    let snapshot = projects.get(project_id)?;
    snapshot
      .forms
      .values()
      .find(|form| form.matches(form_id))
      .cloned()
  }

  /// The full name-to-form mapping for a project, or `None` when the
  /// project is not registered.
  pub fn forms(&self, project_id: &str) -> Option<BTreeMap<String, Form>> {
    self
      .projects
      .lock()
      .unwrap()
      .get(project_id)
      .map(|snapshot| snapshot.forms.clone())
  }

  /// Mutate a registered project's snapshot, then dedup and persist.
  /// No-op for unregistered projects. Persistence is fire-and-forget.
  pub fn update(&self, project_id: &str, mutate: impl FnOnce(&mut ProjectSnapshot)) {
    let mut projects = self.projects.lock().unwrap();
    let Some(snapshot) = projects.get_mut(project_id) else {
      return;
    };
    mutate(snapshot);
    snapshot.dedup();
    match serde_json::to_string(snapshot) {
      Ok(raw) => {
        if let Err(err) = self.storage.set(&Self::storage_key(project_id), &raw) {
          tracing::warn!(project_id, %err, "failed to persist offline snapshot");
        }
      }
      Err(err) => {
        tracing::warn!(project_id, %err, "failed to serialize offline snapshot");
      }
    }
  }

  /// Clear every snapshot, in memory and in persistent storage. Also
  /// stops previously registered projects from caching future requests.
  pub fn clear_all(&self) -> Result<()> {
    self.projects.lock().unwrap().clear();
    for key in self.storage.keys()? {
      if key.starts_with(OFFLINE_CACHE_PREFIX) {
        self.storage.remove(&key)?;
      }
    }
    Ok(())
  }
}
