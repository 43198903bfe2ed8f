//! Wiring of the data layer.
//!
//! Build one [`DataContext`] at startup and hand out its handles. Every
//! component shares the same storage, so dropping the context together with
//! every handle cloned from it releases the storage (and closes the SQLite
//! connection). Nothing else needs tearing down.

use std::path::Path;
use std::sync::Arc;

use crate::api::{ReqwestTransport, RequestExecutor, Transport};
use crate::cache::{CacheStore, KeyValueStore, MemoryStorage, SqliteStorage};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigStore;
use crate::error::Result;
use crate::hybrid::HybridFacade;
use crate::sync::SyncQueue;

pub struct DataContext {
  storage: Arc<dyn KeyValueStore>,
  config: Arc<ConfigStore>,
  facade: HybridFacade,
}

impl DataContext {
  /// Assemble the layer over `storage`, loading (and writing back) the config.
  pub fn new(
    storage: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let config = Arc::new(ConfigStore::load(storage.clone())?);
    let cache = CacheStore::new(storage.clone(), clock);
    let queue = SyncQueue::new(storage.clone());
    let executor = RequestExecutor::new(config.clone(), transport);
    let facade = HybridFacade::new(config.clone(), cache, queue, executor);

    Ok(Self {
      storage,
      config,
      facade,
    })
  }

  /// SQLite storage at `path`, real HTTP, system clock.
  pub fn open(path: &Path) -> Result<Self> {
    let storage = SqliteStorage::open_at(path)?;
    Self::new(
      Arc::new(storage),
      Arc::new(ReqwestTransport::new()?),
      Arc::new(SystemClock),
    )
  }

  /// SQLite storage at the default data path.
  pub fn open_default() -> Result<Self> {
    let storage = SqliteStorage::open()?;
    Self::new(
      Arc::new(storage),
      Arc::new(ReqwestTransport::new()?),
      Arc::new(SystemClock),
    )
  }

  /// Non-persistent storage; everything is lost when the context drops.
  pub fn in_memory(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Result<Self> {
    Self::new(Arc::new(MemoryStorage::new()), transport, clock)
  }

  pub fn facade(&self) -> &HybridFacade {
    &self.facade
  }

  pub fn config(&self) -> &Arc<ConfigStore> {
    &self.config
  }

  pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
    &self.storage
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::config::{StorageMode, CONFIG_STORAGE_KEY};
  use crate::testing::StubTransport;
  use serde_json::{json, Value};

  #[tokio::test]
  async fn test_new_persists_config() {
    let context = DataContext::in_memory(
      Arc::new(StubTransport::ok(json!({}))),
      Arc::new(ManualClock::at_millis(0)),
    )
    .unwrap();

    assert!(context.storage().get(CONFIG_STORAGE_KEY).unwrap().is_some());
    assert_eq!(context.facade().mode(), StorageMode::Hybrid);
  }

  #[tokio::test]
  async fn test_handles_share_config() {
    let context = DataContext::in_memory(
      Arc::new(StubTransport::unreachable()),
      Arc::new(ManualClock::at_millis(0)),
    )
    .unwrap();
    let facade = context.facade().clone();

    context.config().set_mode(StorageMode::Local).unwrap();
    facade.write("users", &json!([1])).await.unwrap();
    assert_eq!(facade.get::<Value>("users").await.unwrap(), Some(json!([1])));
  }

  #[tokio::test]
  async fn test_reopen_keeps_state() {
    let path = std::env::temp_dir().join(format!("hybridgate-ctx-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    {
      let context = DataContext::open(&path).unwrap();
      context.config().set_mode(StorageMode::Local).unwrap();
      context.facade().write("models", &json!(["m1"])).await.unwrap();
    }

    let context = DataContext::open(&path).unwrap();
    assert_eq!(context.facade().mode(), StorageMode::Local);
    assert_eq!(
      context.facade().get::<Value>("models").await.unwrap(),
      Some(json!(["m1"]))
    );

    drop(context);
    let _ = std::fs::remove_file(&path);
  }
}
