//! Persistent key -> (payload, timestamp) cache.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use crate::clock::{self, Clock};
use crate::error::{Error, Result};

/// Storage key prefix for cache entries (`cache:<key>`).
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// A cached payload and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub key: String,
  pub data: T,
  pub written_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.written_at
  }

  /// `now - written_at < ttl`
  pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    self.age(now) < ttl
  }

  pub fn age_display(&self, now: DateTime<Utc>) -> String {
    let minutes = self.age(now).num_minutes();
    if minutes < 1 {
      // Also covers clock skew (negative ages)
      "just now".to_string()
    } else if minutes < 60 {
      format!("{}m ago", minutes)
    } else if minutes < 1440 {
      let hours = minutes / 60;
      if minutes % 60 >= 30 {
        format!("{}h ago", hours + 1)
      } else {
        format!("{}h ago", hours)
      }
    } else {
      let days = minutes / 1440;
      if (minutes % 1440) / 60 >= 12 {
        format!("{}d ago", days + 1)
      } else {
        format!("{}d ago", days)
      }
    }
  }
}

/// On-disk shape: `{"data": <json>, "timestamp": <epoch ms>}`.
#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
  data: T,
  timestamp: i64,
}

/// Cache of logical resources keyed by caller-chosen names.
///
/// At most one entry per key; a write replaces the previous entry wholesale.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, key)
  }

  /// Look up the entry for `key`.
  ///
  /// An entry whose payload does not decode as `T` is reported as absent.
  pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
    let raw = match self.storage.get(&Self::storage_key(key))? {
      Some(raw) => raw,
      None => {
        debug!(key, "Cache miss");
        return Ok(None);
      }
    };

    match serde_json::from_str::<StoredEntry<T>>(&raw) {
      Ok(stored) => Ok(Some(CacheEntry {
        key: key.to_string(),
        data: stored.data,
        written_at: clock::from_millis(stored.timestamp),
      })),
      Err(e) => {
        warn!(key, error = %e, "Ignoring undecodable cache entry");
        Ok(None)
      }
    }
  }

  /// Create or overwrite the entry for `key`, stamped with the current time.
  pub fn write<T: Serialize>(&self, key: &str, payload: &T) -> Result<DateTime<Utc>> {
    let written_at = self.clock.now();
    let stored = StoredEntry {
      data: payload,
      timestamp: written_at.timestamp_millis(),
    };
    let raw = serde_json::to_string(&stored).map_err(|source| Error::Encode {
      key: key.to_string(),
      source,
    })?;

    self.storage.set(&Self::storage_key(key), &raw)?;
    debug!(key, "Cache write");
    Ok(written_at)
  }

  /// Whether `entry` is younger than `ttl` right now.
  pub fn is_fresh<T>(&self, entry: &CacheEntry<T>, ttl: Duration) -> bool {
    entry.is_fresh_at(self.clock.now(), ttl)
  }

  /// Drop the entry for `key`. Returns whether one existed.
  pub fn invalidate(&self, key: &str) -> Result<bool> {
    Ok(self.storage.remove(&Self::storage_key(key))?)
  }

  /// Logical keys of every cached entry.
  pub fn keys(&self) -> Result<Vec<String>> {
    Ok(
      self
        .storage
        .keys_with_prefix(CACHE_KEY_PREFIX)?
        .into_iter()
        .map(|k| k[CACHE_KEY_PREFIX.len()..].to_string())
        .collect(),
    )
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }
}
