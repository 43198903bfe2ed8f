//! Key/value storage trait and its SQLite and in-memory implementations.
//!
//! The config record, cache entries and the sync queue all persist as JSON
//! strings under string keys, so one small trait covers every backend.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Failed to create storage directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Could not determine data directory")]
  NoDataDir,

  #[error("Lock poisoned: {0}")]
  LockPoisoned(String),
}

/// Trait for persistent string-keyed storage backends.
pub trait KeyValueStore: Send + Sync {
  /// Get the value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

  /// Create or overwrite the value under `key`.
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

  /// Remove `key`. Returns whether anything was removed.
  fn remove(&self, key: &str) -> Result<bool, StorageError>;

  /// All keys starting with `prefix`, in ascending order.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
    self
      .entries
      .lock()
      .map_err(|e| StorageError::LockPoisoned(e.to_string()))
  }
}

impl KeyValueStore for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool, StorageError> {
    Ok(self.lock()?.remove(key).is_some())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    Ok(
      self
        .lock()?
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }
}

/// SQLite-based storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at the default location.
  pub fn open() -> Result<Self, StorageError> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// A throwaway store backed by an in-memory SQLite database.
  pub fn in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StorageError::NoDataDir)?;

    Ok(data_dir.join("hybridgate").join("store.db"))
  }

  fn run_migrations(&self) -> Result<(), StorageError> {
    self.conn()?.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::LockPoisoned(e.to_string()))
  }
}

/// Schema for the key/value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KeyValueStore for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
       VALUES (?1, ?2, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool, StorageError> {
    let conn = self.conn()?;
    let removed = conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
    Ok(removed > 0)
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT key FROM kv_store
       WHERE substr(key, 1, length(?1)) = ?1
       ORDER BY key",
    )?;

    let keys = stmt
      .query_map(params![prefix], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get("missing").unwrap(), None);

    store.set("cache:users", "[1]").unwrap();
    store.set("cache:models", "[2]").unwrap();
    store.set("sync_queue", "[]").unwrap();
    assert_eq!(store.get("cache:users").unwrap().as_deref(), Some("[1]"));

    store.set("cache:users", "[3]").unwrap();
    assert_eq!(store.get("cache:users").unwrap().as_deref(), Some("[3]"));

    assert_eq!(
      store.keys_with_prefix("cache:").unwrap(),
      vec!["cache:models".to_string(), "cache:users".to_string()]
    );

    assert!(store.remove("cache:models").unwrap());
    assert!(!store.remove("cache:models").unwrap());
    assert_eq!(store.keys_with_prefix("cache:").unwrap(), vec!["cache:users"]);
  }

  #[test]
  fn test_memory_storage_roundtrip() {
    exercise(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage_roundtrip() {
    exercise(&SqliteStorage::in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_prefix_is_not_a_pattern() {
    let store = SqliteStorage::in_memory().unwrap();
    store.set("cache:a_b", "1").unwrap();
    store.set("cache:axb", "2").unwrap();
    assert_eq!(store.keys_with_prefix("cache:a_").unwrap(), vec!["cache:a_b"]);
  }
}
