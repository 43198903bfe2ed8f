//! Connection settings for the data layer.
//!
//! The record is persisted as one JSON object under [`CONFIG_STORAGE_KEY`].
//! Loading fills any missing field from the defaults below and writes the
//! merged record back, so a read always yields a complete record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{KeyValueStore, StorageError};

/// Storage key holding the persisted config record.
pub const CONFIG_STORAGE_KEY: &str = "app_config";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// Five minutes.
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
pub const DEFAULT_SESSION_COOKIE: &str = "admin_console_session=1";

/// Where reads and writes go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
  /// Local cache only
  Local,
  /// Remote API only
  #[serde(rename = "api", alias = "remote")]
  Remote,
  /// Cache with remote refresh, stale fallback and write queueing
  #[default]
  Hybrid,
}

#[derive(Debug, Error)]
#[error("Unknown storage mode '{0}' (expected local, api or hybrid)")]
pub struct ParseModeError(String);

impl FromStr for StorageMode {
  type Err = ParseModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "local" => Ok(StorageMode::Local),
      "api" | "remote" => Ok(StorageMode::Remote),
      "hybrid" => Ok(StorageMode::Hybrid),
      other => Err(ParseModeError(other.to_string())),
    }
  }
}

impl fmt::Display for StorageMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      StorageMode::Local => "local",
      StorageMode::Remote => "api",
      StorageMode::Hybrid => "hybrid",
    })
  }
}

/// The complete connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRecord {
  #[serde(rename = "API_BASE_URL")]
  pub api_base_url: String,
  /// Per-request timeout in milliseconds
  #[serde(rename = "API_TIMEOUT")]
  pub api_timeout: u64,
  #[serde(rename = "RETRY_ATTEMPTS")]
  pub retry_attempts: u32,
  #[serde(rename = "STORAGE_MODE")]
  pub storage_mode: StorageMode,
  /// How long a cache entry counts as fresh, in milliseconds
  #[serde(rename = "CACHE_TTL")]
  pub cache_ttl: u64,
  /// Base backoff between attempts in milliseconds; attempt k waits k times this
  #[serde(rename = "RETRY_DELAY")]
  pub retry_delay: u64,
  #[serde(rename = "SESSION_COOKIE")]
  pub session_cookie: String,

  #[serde(rename = "API_TOKEN", skip_serializing_if = "Option::is_none")]
  pub api_token: Option<String>,
  #[serde(rename = "API_KEY", skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
  #[serde(rename = "API_USERNAME", skip_serializing_if = "Option::is_none")]
  pub api_username: Option<String>,
  #[serde(rename = "API_PASSWORD", skip_serializing_if = "Option::is_none")]
  pub api_password: Option<String>,
  /// Transport-level (HTTP auth) credentials, reused for the API as a last resort
  #[serde(rename = "HTTP_AUTH_USER", skip_serializing_if = "Option::is_none")]
  pub http_auth_user: Option<String>,
  #[serde(rename = "HTTP_AUTH_PASSWORD", skip_serializing_if = "Option::is_none")]
  pub http_auth_password: Option<String>,
}

impl Default for ConfigRecord {
  fn default() -> Self {
    Self {
      api_base_url: DEFAULT_API_BASE_URL.to_string(),
      api_timeout: DEFAULT_API_TIMEOUT_MS,
      retry_attempts: DEFAULT_RETRY_ATTEMPTS,
      storage_mode: StorageMode::default(),
      cache_ttl: DEFAULT_CACHE_TTL_MS,
      retry_delay: DEFAULT_RETRY_DELAY_MS,
      session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
      api_token: None,
      api_key: None,
      api_username: None,
      api_password: None,
      http_auth_user: None,
      http_auth_password: None,
    }
  }
}

impl ConfigRecord {
  fn normalized(mut self) -> Self {
    self.retry_attempts = self.retry_attempts.max(1);
    self
  }

  /// Cache TTL as a duration.
  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(self.cache_ttl).unwrap_or(i64::MAX))
  }

  /// Copy with every credential replaced by a placeholder, for display.
  pub fn redacted(&self) -> Self {
    let hide = |v: &Option<String>| v.as_ref().map(|_| "********".to_string());
    Self {
      api_token: hide(&self.api_token),
      api_key: hide(&self.api_key),
      api_password: hide(&self.api_password),
      http_auth_password: hide(&self.http_auth_password),
      ..self.clone()
    }
  }
}

/// Partial update for [`ConfigStore::save`]. `None` leaves a field alone; an
/// empty string clears a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPatch {
  pub api_base_url: Option<String>,
  pub api_timeout: Option<u64>,
  pub retry_attempts: Option<u32>,
  pub storage_mode: Option<StorageMode>,
  pub cache_ttl: Option<u64>,
  pub retry_delay: Option<u64>,
  pub session_cookie: Option<String>,
  pub api_token: Option<String>,
  pub api_key: Option<String>,
  pub api_username: Option<String>,
  pub api_password: Option<String>,
  pub http_auth_user: Option<String>,
  pub http_auth_password: Option<String>,
}

impl ConfigPatch {
  pub fn mode(mode: StorageMode) -> Self {
    Self {
      storage_mode: Some(mode),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  fn apply(&self, record: &mut ConfigRecord) {
    fn set<T: Clone>(target: &mut T, value: &Option<T>) {
      if let Some(v) = value {
        *target = v.clone();
      }
    }
    fn set_credential(target: &mut Option<String>, value: &Option<String>) {
      if let Some(v) = value {
        *target = (!v.is_empty()).then(|| v.clone());
      }
    }

    set(&mut record.api_base_url, &self.api_base_url);
    set(&mut record.api_timeout, &self.api_timeout);
    set(&mut record.retry_attempts, &self.retry_attempts);
    set(&mut record.storage_mode, &self.storage_mode);
    set(&mut record.cache_ttl, &self.cache_ttl);
    set(&mut record.retry_delay, &self.retry_delay);
    set(&mut record.session_cookie, &self.session_cookie);
    set_credential(&mut record.api_token, &self.api_token);
    set_credential(&mut record.api_key, &self.api_key);
    set_credential(&mut record.api_username, &self.api_username);
    set_credential(&mut record.api_password, &self.api_password);
    set_credential(&mut record.http_auth_user, &self.http_auth_user);
    set_credential(&mut record.http_auth_password, &self.http_auth_password);
  }
}

type Listener = Arc<dyn Fn(&ConfigRecord) + Send + Sync>;

#[derive(Default)]
struct Listeners {
  next_id: u64,
  entries: Vec<(u64, Listener)>,
}

/// Holds the current [`ConfigRecord`], persists changes and notifies
/// subscribers.
pub struct ConfigStore {
  storage: Arc<dyn KeyValueStore>,
  current: RwLock<Arc<ConfigRecord>>,
  listeners: Arc<Mutex<Listeners>>,
}

impl ConfigStore {
  /// Load the record from `storage`, filling gaps from defaults.
  ///
  /// A malformed record is discarded and replaced by the defaults. Either way
  /// the resulting record is written back before this returns.
  pub fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
    let record = match storage.get(CONFIG_STORAGE_KEY)? {
      Some(raw) => match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(fields)) => overlay_defaults(fields).normalized(),
        Ok(_) => {
          warn!("Persisted config is not an object, resetting to defaults");
          ConfigRecord::default()
        }
        Err(e) => {
          warn!(error = %e, "Persisted config is malformed, resetting to defaults");
          ConfigRecord::default()
        }
      },
      None => {
        debug!("No persisted config, using defaults");
        ConfigRecord::default()
      }
    };

    persist(storage.as_ref(), &record)?;

    Ok(Self {
      storage,
      current: RwLock::new(Arc::new(record)),
      listeners: Arc::new(Mutex::new(Listeners::default())),
    })
  }

  /// Snapshot of the current record.
  pub fn get(&self) -> Arc<ConfigRecord> {
    self
      .current
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  pub fn mode(&self) -> StorageMode {
    self.get().storage_mode
  }

  /// Merge `patch` into the current record, persist it, then call every
  /// listener in subscription order.
  ///
  /// If persisting fails the current record is left untouched and no
  /// listener runs.
  pub fn save(&self, patch: &ConfigPatch) -> Result<Arc<ConfigRecord>, StorageError> {
    let next = {
      let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
      let mut next = ConfigRecord::clone(&current);
      patch.apply(&mut next);
      let next = Arc::new(next.normalized());

      persist(self.storage.as_ref(), &next)?;
      *current = next.clone();
      next
    };

    // Listeners run outside our locks so they may read or save config themselves
    let listeners: Vec<Listener> = self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .entries
      .iter()
      .map(|(_, listener)| listener.clone())
      .collect();

    for listener in listeners {
      listener(next.as_ref());
    }

    Ok(next)
  }

  pub fn set_mode(&self, mode: StorageMode) -> Result<Arc<ConfigRecord>, StorageError> {
    let previous = self.mode();
    let record = self.save(&ConfigPatch::mode(mode))?;
    info!(from = %previous, to = %mode, "Storage mode changed");
    Ok(record)
  }

  /// Register `listener` to be called with the new record after every save.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&ConfigRecord) + Send + Sync + 'static,
  {
    let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
    let id = listeners.next_id;
    listeners.next_id += 1;
    listeners.entries.push((id, Arc::new(listener)));

    Subscription {
      id,
      listeners: Arc::downgrade(&self.listeners),
    }
  }
}

/// Apply stored fields onto the defaults one at a time. A field that does
/// not decode keeps its default; the others survive.
fn overlay_defaults(stored: Map<String, Value>) -> ConfigRecord {
  let mut merged = match serde_json::to_value(ConfigRecord::default()) {
    Ok(Value::Object(defaults)) => defaults,
    _ => Map::new(),
  };

  for (field, value) in stored {
    let previous = merged.insert(field.clone(), value);
    if serde_json::from_value::<ConfigRecord>(Value::Object(merged.clone())).is_err() {
      warn!(field = %field, "Persisted config field has an invalid value, using the default");
      match previous {
        Some(default) => merged.insert(field, default),
        None => merged.remove(&field),
      };
    }
  }

  serde_json::from_value(Value::Object(merged)).unwrap_or_default()
}

fn persist(storage: &dyn KeyValueStore, record: &ConfigRecord) -> Result<(), StorageError> {
  // A record of strings, numbers and a unit enum always serializes
  let raw = serde_json::to_string(record).unwrap_or_default();
  storage.set(CONFIG_STORAGE_KEY, &raw)
}

/// Handle returned by [`ConfigStore::subscribe`].
pub struct Subscription {
  id: u64,
  listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
  /// Stop receiving config changes.
  pub fn unsubscribe(self) {
    if let Some(listeners) = self.listeners.upgrade() {
      listeners
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .entries
        .retain(|(id, _)| *id != self.id);
    }
  }
}
