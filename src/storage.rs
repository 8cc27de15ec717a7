//! Persistent key-value storage trait and implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::{Error, Result};

/// Trait for the durable key-value store backing the offline cache, the
/// replay queue and the session state. Browser local storage shaped:
/// string keys, string values, enumerable keys.
pub trait OfflineStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  fn set(&self, key: &str, value: &str) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;

  /// Enumerate every stored key.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Non-persistent storage for tests and ephemeral clients. Contents die
/// with the process.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    MemoryStorage::default()
  }
}

impl OfflineStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.entries.lock().unwrap().get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self
      .entries
      .lock()
      .unwrap()
      .insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.entries.lock().unwrap().remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.entries.lock().unwrap().keys().cloned().collect())
  }
}

/// SQLite-backed storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the key-value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl SqliteStorage {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("Failed to create storage directory: {e}")))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Storage(format!("Failed to open storage at {}: {e}", path.display()))
    })?;

    let storage = SqliteStorage {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("formio").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| Error::storage(e))?;
    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| Error::Storage(format!("Failed to run storage migrations: {e}")))?;
    Ok(())
  }
}

impl OfflineStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn.lock().map_err(|e| Error::storage(e))?;
    let mut stmt = conn
      .prepare("SELECT value FROM offline_store WHERE key = ?")
      .map_err(|e| Error::storage(e))?;

    let value: Option<String> = stmt.query_row(params![key], |row| row.get(0)).ok();
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| Error::storage(e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO offline_store (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| Error::storage(e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| Error::storage(e))?;
    conn
      .execute("DELETE FROM offline_store WHERE key = ?", params![key])
      .map_err(|e| Error::storage(e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(|e| Error::storage(e))?;
    let mut stmt = conn
      .prepare("SELECT key FROM offline_store")
      .map_err(|e| Error::storage(e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| Error::storage(e))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(keys)
  }
}
