//! Persisted FIFO of writes the remote has not acknowledged yet.
//!
//! The whole queue lives as one JSON array under [`QUEUE_STORAGE_KEY`].
//! Delivery is at-least-once: an item leaves the queue only after its replay
//! succeeded, and a failed item keeps its place relative to the other
//! failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::KeyValueStore;
use crate::error::{Error, Result};

/// Storage key holding the queue.
pub const QUEUE_STORAGE_KEY: &str = "sync_queue";

/// A write waiting to be replayed against the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  /// Logical key the write was made under
  pub key: String,
  pub data: Value,
  /// Path the write is replayed to
  pub endpoint: String,
  /// When the write was first attempted
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
  /// Failed replays so far
  #[serde(default)]
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl QueueItem {
  pub fn new(
    key: impl Into<String>,
    data: Value,
    endpoint: impl Into<String>,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      key: key.into(),
      data,
      endpoint: endpoint.into(),
      timestamp,
      attempts: 0,
      last_error: None,
    }
  }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub synced: usize,
  pub remaining: usize,
}

/// Handle to the persisted queue. Clones share the same locks.
#[derive(Clone)]
pub struct SyncQueue {
  storage: Arc<dyn KeyValueStore>,
  // Guards read-modify-write of the persisted array
  edit_lock: Arc<Mutex<()>>,
  // Only one drain at a time; held across replay awaits
  drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncQueue {
  pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
    Self {
      storage,
      edit_lock: Arc::new(Mutex::new(())),
      drain_lock: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  fn load(&self) -> Result<Vec<QueueItem>> {
    match self.storage.get(QUEUE_STORAGE_KEY)? {
      Some(raw) => serde_json::from_str(&raw).map_err(|source| Error::Corrupt {
        key: QUEUE_STORAGE_KEY.to_string(),
        source,
      }),
      None => Ok(Vec::new()),
    }
  }

  fn persist(&self, items: &[QueueItem]) -> Result<()> {
    let raw = serde_json::to_string(items).map_err(|source| Error::Encode {
      key: QUEUE_STORAGE_KEY.to_string(),
      source,
    })?;
    self.storage.set(QUEUE_STORAGE_KEY, &raw)?;
    Ok(())
  }

  /// Append `item` to the tail. Returns the new queue length.
  pub fn enqueue(&self, item: QueueItem) -> Result<usize> {
    let _edit = self.edit_lock.lock().unwrap_or_else(|e| e.into_inner());
    let mut items = self.load()?;
    debug!(key = %item.key, endpoint = %item.endpoint, "Queueing write for replay");
    items.push(item);
    self.persist(&items)?;
    Ok(items.len())
  }

  /// Current items, oldest first.
  pub fn items(&self) -> Result<Vec<QueueItem>> {
    self.load()
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.load()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.load()?.is_empty())
  }

  /// Replay every queued item in order.
  ///
  /// Items whose replay succeeds are removed. Failed items stay, in their
  /// original relative order, with `attempts` bumped and `last_error` set. A
  /// failure never stops the batch. Items enqueued while this drain is waiting
  /// on `replay` are kept behind the survivors.
  pub async fn drain_and_replay<F, Fut, E>(&self, mut replay: F) -> Result<DrainReport>
  where
    F: FnMut(QueueItem) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: fmt::Display,
  {
    let _drain = self.drain_lock.lock().await;

    let snapshot = self.load()?;
    if snapshot.is_empty() {
      debug!("Sync queue empty, nothing to replay");
      return Ok(DrainReport::default());
    }

    let taken = snapshot.len();
    let mut survivors = Vec::new();
    let mut synced = 0;

    for mut item in snapshot {
      match replay(item.clone()).await {
        Ok(()) => {
          debug!(key = %item.key, endpoint = %item.endpoint, "Replayed queued write");
          synced += 1;
        }
        Err(e) => {
          item.attempts += 1;
          item.last_error = Some(e.to_string());
          warn!(
            key = %item.key,
            endpoint = %item.endpoint,
            attempts = item.attempts,
            error = %e,
            "Replay failed, keeping item queued"
          );
          survivors.push(item);
        }
      }
    }

    let remaining = {
      let _edit = self.edit_lock.lock().unwrap_or_else(|e| e.into_inner());
      let arrived = self.load()?.into_iter().skip(taken);
      survivors.extend(arrived);
      self.persist(&survivors)?;
      survivors.len()
    };

    info!(synced, remaining, "Sync queue drained");
    Ok(DrainReport { synced, remaining })
  }
}
