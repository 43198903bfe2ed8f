//! Mode-dispatching facade over the cache, the remote API and the sync queue.
//!
//! The operating mode is read from the config at the start of every call, so
//! a mode change applies to the next call. Switching modes never migrates
//! cache or queue contents.
//!
//! Reads in hybrid mode:
//! 1. Fresh cache entry: return it without touching the network
//! 2. Otherwise ask the remote; on success cache the payload and return it
//! 3. If the remote fails, return the stale entry (offline fallback)
//! 4. With no entry at all, the request failure surfaces
//!
//! Concurrent calls on the same key are not serialized. Whichever call
//! resumes last writes the cache last, so a hybrid refresh that started
//! before a local write can overwrite it when its response arrives later.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{RequestExecutor, RequestOptions, Resource};
use crate::cache::{CacheResult, CacheStore, ResourceKey};
use crate::config::{ConfigRecord, ConfigStore, StorageMode, Subscription};
use crate::error::{Error, Result};
use crate::sync::{DrainReport, QueueItem, SyncQueue};

/// Where a write landed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
  pub committed_locally: bool,
  pub committed_remotely: bool,
  /// A replay item was queued because the remote rejected the write
  pub queued: bool,
}

impl WriteOutcome {
  fn local() -> Self {
    Self {
      committed_locally: true,
      ..Self::default()
    }
  }

  fn remote() -> Self {
    Self {
      committed_remotely: true,
      ..Self::default()
    }
  }
}

/// Entry point for every read and write. Clone is cheap.
#[derive(Clone)]
pub struct HybridFacade {
  config: Arc<ConfigStore>,
  cache: CacheStore,
  queue: SyncQueue,
  executor: RequestExecutor,
}

impl HybridFacade {
  pub fn new(
    config: Arc<ConfigStore>,
    cache: CacheStore,
    queue: SyncQueue,
    executor: RequestExecutor,
  ) -> Self {
    Self {
      config,
      cache,
      queue,
      executor,
    }
  }

  /// Read `key` according to the current mode.
  ///
  /// `None` only happens in local mode on a cache miss. The result says where
  /// the payload came from.
  pub async fn read<T>(&self, key: &str) -> Result<Option<CacheResult<T>>>
  where
    T: Serialize + DeserializeOwned,
  {
    let config = self.config.get();
    match config.storage_mode {
      StorageMode::Local => self.read_local(key, &config),
      StorageMode::Remote => {
        let data = self
          .executor
          .execute_as::<T>(&Resource::from_key(key), RequestOptions::get())
          .await?;
        Ok(Some(CacheResult::network(data)))
      }
      StorageMode::Hybrid => self.read_hybrid(key, &config).await.map(Some),
    }
  }

  fn read_local<T: DeserializeOwned>(
    &self,
    key: &str,
    config: &ConfigRecord,
  ) -> Result<Option<CacheResult<T>>> {
    Ok(self.cache.read::<T>(key)?.map(|entry| {
      let fresh = self.cache.is_fresh(&entry, config.ttl());
      CacheResult::cached(entry, fresh)
    }))
  }

  async fn read_hybrid<T>(&self, key: &str, config: &ConfigRecord) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
  {
    let cached = match self.cache.read::<T>(key)? {
      Some(entry) if self.cache.is_fresh(&entry, config.ttl()) => {
        debug!(key, "Serving fresh cache entry");
        return Ok(CacheResult::cached(entry, true));
      }
      other => other,
    };

    match self
      .executor
      .execute_as::<T>(&Resource::from_key(key), RequestOptions::get())
      .await
    {
      Ok(data) => {
        self.cache.write(key, &data)?;
        Ok(CacheResult::network(data))
      }
      Err(failure) => match cached {
        Some(entry) => {
          warn!(
            key,
            error = %failure,
            age = %entry.age_display(self.cache.now()),
            "Remote unavailable, serving stale cache entry"
          );
          Ok(CacheResult::fallback(entry))
        }
        None => Err(failure.into()),
      },
    }
  }

  /// Payload only, dropping the source metadata.
  pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
  where
    T: Serialize + DeserializeOwned,
  {
    Ok(self.read::<T>(key).await?.map(CacheResult::into_data))
  }

  /// Write `payload` under `key` according to the current mode.
  ///
  /// In hybrid mode the local commit must succeed; a rejected remote write is
  /// queued for replay and reported through the outcome rather than as an
  /// error.
  pub async fn write<T: Serialize>(&self, key: &str, payload: &T) -> Result<WriteOutcome> {
    let data = serde_json::to_value(payload).map_err(|source| Error::Encode {
      key: key.to_string(),
      source,
    })?;
    let resource = Resource::from_key(key);

    match self.config.mode() {
      StorageMode::Local => {
        self.cache.write(key, &data)?;
        Ok(WriteOutcome::local())
      }
      StorageMode::Remote => {
        self
          .executor
          .submit(&resource, RequestOptions::post(data))
          .await?;
        Ok(WriteOutcome::remote())
      }
      StorageMode::Hybrid => {
        self.cache.write(key, &data)?;

        match self
          .executor
          .submit(&resource, RequestOptions::post(data.clone()))
          .await
        {
          Ok(()) => Ok(WriteOutcome {
            committed_locally: true,
            committed_remotely: true,
            queued: false,
          }),
          Err(failure) => {
            let queued = self
              .queue
              .enqueue(QueueItem::new(key, data, resource.path(), self.cache.now()))?;
            warn!(key, error = %failure, queued, "Remote write failed, queued for replay");
            Ok(WriteOutcome {
              committed_locally: true,
              committed_remotely: false,
              queued: true,
            })
          }
        }
      }
    }
  }

  /// Alias of [`write`](Self::write).
  pub async fn save<T: Serialize>(&self, key: &str, payload: &T) -> Result<WriteOutcome> {
    self.write(key, payload).await
  }

  /// Typed read through a [`ResourceKey`].
  pub async fn fetch<T>(&self, key: &ResourceKey<T>) -> Result<Option<CacheResult<T>>>
  where
    T: Serialize + DeserializeOwned,
  {
    self.read::<T>(key.name()).await
  }

  /// Typed write through a [`ResourceKey`].
  pub async fn store<T: Serialize>(&self, key: &ResourceKey<T>, payload: &T) -> Result<WriteOutcome> {
    self.write(key.name(), payload).await
  }

  /// Replay queued writes as POSTs to their recorded endpoints.
  ///
  /// Runs regardless of mode.
  pub async fn drain_and_replay(&self) -> Result<DrainReport> {
    let executor = self.executor.clone();
    self
      .queue
      .drain_and_replay(move |item| {
        let executor = executor.clone();
        async move {
          executor
            .submit(
              &Resource::Path(item.endpoint),
              RequestOptions::post(item.data),
            )
            .await
        }
      })
      .await
  }

  /// Drop the cached entry for `key`.
  pub fn invalidate(&self, key: &str) -> Result<bool> {
    self.cache.invalidate(key)
  }

  pub fn mode(&self) -> StorageMode {
    self.config.mode()
  }

  pub fn set_mode(&self, mode: StorageMode) -> Result<()> {
    self.config.set_mode(mode)?;
    Ok(())
  }

  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&ConfigRecord) + Send + Sync + 'static,
  {
    self.config.subscribe(listener)
  }

  pub fn config(&self) -> &Arc<ConfigStore> {
    &self.config
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn queue(&self) -> &SyncQueue {
    &self.queue
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, KeyValueStore, MemoryStorage, StorageError};
  use crate::clock::ManualClock;
  use crate::config::ConfigPatch;
  use crate::context::DataContext;
  use crate::testing::{self, Reply, StubTransport};
  use reqwest::Method;
  use serde::Deserialize;
  use serde_json::{json, Value};
  use std::time::Duration;

  fn setup(mode: StorageMode, fallback: Reply) -> (HybridFacade, Arc<StubTransport>, ManualClock) {
    let transport = Arc::new(StubTransport::new(fallback));
    let clock = ManualClock::at_millis(0);
    let context = testing::context(transport.clone(), clock.clone(), mode);
    (context.facade().clone(), transport, clock)
  }

  #[tokio::test]
  async fn test_local_mode_never_touches_network() {
    let (facade, transport, _) = setup(StorageMode::Local, testing::ok(json!({})));

    let outcome = facade.write("models", &json!([1, 2, 3])).await.unwrap();
    assert_eq!(outcome, WriteOutcome::local());

    let read = facade.read::<Value>("models").await.unwrap().unwrap();
    assert_eq!(read.data, json!([1, 2, 3]));
    assert_eq!(read.source, CacheSource::CacheFresh);
    assert_eq!(transport.call_count(), 0);
    assert!(facade.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_local_mode_miss_and_stale_entry() {
    let (facade, _, clock) = setup(StorageMode::Local, testing::unreachable());
    assert!(facade.get::<Value>("users").await.unwrap().is_none());

    facade.write("users", &json!(["ann"])).await.unwrap();
    clock.set_millis(1_000_000);
    let read = facade.read::<Value>("users").await.unwrap().unwrap();
    assert_eq!(read.data, json!(["ann"]));
    assert_eq!(read.source, CacheSource::CacheStale);
  }

  #[tokio::test]
  async fn test_fresh_entry_short_circuits() {
    let (facade, transport, clock) = setup(StorageMode::Hybrid, testing::ok(json!({"remote": true})));
    facade.cache().write("categories", &json!(["a"])).unwrap();

    clock.set_millis(299_999);
    let read = facade.read::<Value>("categories").await.unwrap().unwrap();
    assert_eq!(read.data, json!(["a"]));
    assert_eq!(read.source, CacheSource::CacheFresh);
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_dashboard_refreshes_after_ttl() {
    let (facade, transport, clock) = setup(StorageMode::Hybrid, testing::ok(json!({"ok": true})));

    facade.write("dashboard", &json!({"models": 10})).await.unwrap();
    let after_write = transport.call_count();

    clock.set_millis(100_000);
    let read = facade.read::<Value>("dashboard").await.unwrap().unwrap();
    assert_eq!(read.data, json!({"models": 10}));
    assert_eq!(transport.call_count(), after_write);

    clock.set_millis(400_000);
    transport.set_fallback(testing::ok(json!({"models": 12})));
    let read = facade.read::<Value>("dashboard").await.unwrap().unwrap();
    assert_eq!(read.data, json!({"models": 12}));
    assert_eq!(read.source, CacheSource::Network);
    assert_eq!(transport.call_count(), after_write + 1);
    assert_eq!(transport.calls().last().unwrap().method, Method::GET);

    let entry = facade.cache().read::<Value>("dashboard").unwrap().unwrap();
    assert_eq!(entry.data, json!({"models": 12}));
    assert_eq!(entry.written_at.timestamp_millis(), 400_000);
    assert!(facade.cache().is_fresh(&entry, chrono::Duration::milliseconds(300_000)));
  }

  #[tokio::test]
  async fn test_dashboard_stale_fallback_when_remote_down() {
    let (facade, transport, clock) = setup(StorageMode::Hybrid, testing::ok(json!({"ok": true})));
    facade.write("dashboard", &json!({"models": 10})).await.unwrap();

    transport.set_fallback(testing::unreachable());
    clock.set_millis(400_000);
    let read = facade.read::<Value>("dashboard").await.unwrap().unwrap();
    assert_eq!(read.data, json!({"models": 10}));
    assert_eq!(read.source, CacheSource::Offline);
    assert_eq!(read.cached_at.unwrap().timestamp_millis(), 0);
  }

  #[tokio::test]
  async fn test_configured_ttl_applies() {
    let (facade, transport, clock) = setup(StorageMode::Hybrid, testing::ok(json!(2)));
    facade
      .config()
      .save(&ConfigPatch {
        cache_ttl: Some(1_000),
        ..ConfigPatch::default()
      })
      .unwrap();
    facade.cache().write("sections", &json!(1)).unwrap();

    clock.set_millis(1_000);
    assert_eq!(facade.get::<Value>("sections").await.unwrap(), Some(json!(2)));
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_hard_miss_surfaces_request_failure() {
    let (facade, transport, _) = setup(StorageMode::Hybrid, testing::unreachable());

    let err = facade.read::<Value>("users").await.unwrap_err();
    let failure = err.as_request_failure().unwrap();
    assert_eq!(failure.resource, "users");
    assert_eq!(failure.attempts, 2);
    assert_eq!(transport.call_count(), 2);
    assert!(facade.cache().read::<Value>("users").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_failed_remote_write_is_cached_and_queued() {
    let (facade, _, clock) = setup(StorageMode::Hybrid, testing::status(503));
    clock.set_millis(5_000);

    let outcome = facade.write("users", &json!({"name": "ann"})).await.unwrap();
    assert_eq!(
      outcome,
      WriteOutcome {
        committed_locally: true,
        committed_remotely: false,
        queued: true,
      }
    );

    let entry = facade.cache().read::<Value>("users").unwrap().unwrap();
    assert_eq!(entry.data, json!({"name": "ann"}));

    let items = facade.queue().items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key, "users");
    assert_eq!(items[0].endpoint, "/users.json");
    assert_eq!(items[0].data, json!({"name": "ann"}));
    assert_eq!(items[0].timestamp.timestamp_millis(), 5_000);
  }

  #[tokio::test]
  async fn test_successful_remote_write_not_queued() {
    let (facade, transport, _) = setup(StorageMode::Hybrid, testing::ok(json!({"saved": true})));

    let outcome = facade.write("pricing", &json!({"tier": 2})).await.unwrap();
    assert!(outcome.committed_locally && outcome.committed_remotely && !outcome.queued);
    assert!(facade.queue().is_empty().unwrap());

    let request = &transport.calls()[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.url.as_str(), "http://stub.test/api/api_pricing.php");
  }

  #[tokio::test]
  async fn test_local_commit_failure_is_an_error() {
    struct CacheWritesFail(MemoryStorage);

    impl KeyValueStore for CacheWritesFail {
      fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
        self.0.get(key)
      }
      fn set(&self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
        if key.starts_with("cache:") {
          return Err(StorageError::LockPoisoned("disk full".to_string()));
        }
        self.0.set(key, value)
      }
      fn remove(&self, key: &str) -> std::result::Result<bool, StorageError> {
        self.0.remove(key)
      }
      fn keys_with_prefix(&self, prefix: &str) -> std::result::Result<Vec<String>, StorageError> {
        self.0.keys_with_prefix(prefix)
      }
    }

    let transport = Arc::new(StubTransport::ok(json!({})));
    let context = DataContext::new(
      Arc::new(CacheWritesFail(MemoryStorage::new())),
      transport.clone(),
      Arc::new(ManualClock::at_millis(0)),
    )
    .unwrap();

    let err = context.facade().write("users", &json!([])).await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(transport.call_count(), 0);
    assert!(context.facade().queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_remote_mode_bypasses_cache_and_queue() {
    let (facade, transport, _) = setup(StorageMode::Remote, testing::ok(json!([7])));

    let read = facade.read::<Value>("models").await.unwrap().unwrap();
    assert_eq!(read.data, json!([7]));
    assert_eq!(read.source, CacheSource::Network);

    let outcome = facade.write("models", &json!([8])).await.unwrap();
    assert_eq!(outcome, WriteOutcome::remote());
    assert!(facade.cache().keys().unwrap().is_empty());
    assert_eq!(transport.call_count(), 2);

    transport.set_fallback(testing::status(500));
    let err = facade.write("models", &json!([9])).await.unwrap_err();
    assert_eq!(err.as_request_failure().unwrap().status(), Some(500));
    assert!(facade.queue().is_empty().unwrap());
    assert!(facade.cache().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_mode_switch_does_not_migrate() {
    let (facade, transport, _) = setup(StorageMode::Local, testing::ok(json!("remote")));
    facade.write("colors", &json!("local")).await.unwrap();

    facade.set_mode(StorageMode::Remote).unwrap();
    assert_eq!(facade.get::<Value>("colors").await.unwrap(), Some(json!("remote")));
    assert_eq!(transport.call_count(), 1);

    facade.set_mode(StorageMode::Local).unwrap();
    assert_eq!(facade.get::<Value>("colors").await.unwrap(), Some(json!("local")));
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_drain_replays_to_recorded_endpoints() {
    let (facade, transport, _) = setup(StorageMode::Hybrid, testing::unreachable());
    for key in ["users", "pricing", "models"] {
      facade.write(key, &json!({"key": key})).await.unwrap();
    }
    assert_eq!(facade.queue().len().unwrap(), 3);
    let before = transport.call_count();

    // users succeeds, pricing fails on both attempts, models succeeds
    transport.push(testing::ok(json!({})));
    transport.push(testing::unreachable());
    transport.push(testing::unreachable());
    transport.set_fallback(testing::ok(json!({})));

    let report = facade.drain_and_replay().await.unwrap();
    assert_eq!(report, DrainReport { synced: 2, remaining: 1 });

    let remaining = facade.queue().items().unwrap();
    assert_eq!(remaining[0].key, "pricing");
    assert_eq!(remaining[0].attempts, 1);
    assert!(remaining[0].last_error.as_deref().unwrap().contains("pricing"));

    let replayed: Vec<String> = transport.calls()[before..]
      .iter()
      .map(|r| r.url.path().to_string())
      .collect();
    assert_eq!(
      replayed,
      vec![
        "/users.json",
        "/api/api_pricing.php",
        "/api/api_pricing.php",
        "/models.json"
      ]
    );
    assert!(transport.calls()[before..].iter().all(|r| r.method == Method::POST));
  }

  #[tokio::test]
  async fn test_drain_runs_in_any_mode() {
    let (facade, _, _) = setup(StorageMode::Hybrid, testing::unreachable());
    facade.write("users", &json!([])).await.unwrap();

    facade.set_mode(StorageMode::Local).unwrap();
    let report = facade.drain_and_replay().await.unwrap();
    assert_eq!(report, DrainReport { synced: 0, remaining: 1 });
    assert_eq!(facade.queue().items().unwrap()[0].attempts, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_reads_last_resumer_wins() {
    let (facade, transport, _) = setup(StorageMode::Hybrid, testing::unreachable());
    transport.push_delayed(Duration::from_millis(200), testing::ok(json!({"v": "slow"})));
    transport.push_delayed(Duration::from_millis(50), testing::ok(json!({"v": "fast"})));

    let (slow, fast) = futures::join!(
      facade.read::<Value>("dashboard"),
      facade.read::<Value>("dashboard"),
    );
    assert_eq!(slow.unwrap().unwrap().data, json!({"v": "slow"}));
    assert_eq!(fast.unwrap().unwrap().data, json!({"v": "fast"}));

    // No per-key lock: the slower response resumed last and overwrote the cache
    let entry = facade.cache().read::<Value>("dashboard").unwrap().unwrap();
    assert_eq!(entry.data, json!({"v": "slow"}));
  }

  #[tokio::test(start_paused = true)]
  async fn test_refresh_can_overwrite_concurrent_write() {
    let (facade, transport, clock) = setup(StorageMode::Hybrid, testing::unreachable());
    facade.cache().write("dashboard", &json!({"v": "old"})).unwrap();
    clock.set_millis(400_000);

    // The refresh GET answers after the write's POST has already succeeded
    transport.push_delayed(Duration::from_millis(200), testing::ok(json!({"v": "remote"})));
    transport.push_delayed(Duration::from_millis(50), testing::ok(json!({"saved": true})));

    let local = json!({"v": "local"});
    let (refresh, write) = futures::join!(
      facade.read::<Value>("dashboard"),
      facade.write("dashboard", &local),
    );
    assert_eq!(refresh.unwrap().unwrap().data, json!({"v": "remote"}));
    assert!(write.unwrap().committed_remotely);

    // Known race: the refresh resumed last, so its payload replaced the local write
    let entry = facade.cache().read::<Value>("dashboard").unwrap().unwrap();
    assert_eq!(entry.data, json!({"v": "remote"}));
    assert!(facade.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_plain_text_write_response_commits() {
    let (facade, transport, _) = setup(
      StorageMode::Hybrid,
      Ok(crate::api::HttpResponse::new(200, "OK")),
    );

    let outcome = facade.write("users", &json!({"name": "ann"})).await.unwrap();
    assert_eq!(
      outcome,
      WriteOutcome {
        committed_locally: true,
        committed_remotely: true,
        queued: false,
      }
    );
    assert!(facade.queue().is_empty().unwrap());
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_plain_text_replay_response_clears_queue() {
    let (facade, transport, _) = setup(StorageMode::Hybrid, testing::unreachable());
    facade.write("users", &json!([1])).await.unwrap();
    assert_eq!(facade.queue().len().unwrap(), 1);

    transport.set_fallback(Ok(crate::api::HttpResponse::new(200, "")));
    transport.push(Ok(crate::api::HttpResponse::new(200, "OK")));
    let before = transport.call_count();

    let report = facade.drain_and_replay().await.unwrap();
    assert_eq!(report, DrainReport { synced: 1, remaining: 0 });
    assert_eq!(transport.call_count(), before + 1);

    let report = facade.drain_and_replay().await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert_eq!(transport.call_count(), before + 1);
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Dashboard {
    models: u32,
    users: u32,
  }

  const DASHBOARD: ResourceKey<Dashboard> = ResourceKey::new("dashboard");

  #[tokio::test]
  async fn test_typed_keys() {
    let (facade, transport, _) = setup(StorageMode::Hybrid, testing::ok(json!({"models": 4, "users": 1})));

    let read = facade.fetch(&DASHBOARD).await.unwrap().unwrap();
    assert_eq!(read.data, Dashboard { models: 4, users: 1 });
    assert_eq!(transport.calls()[0].url.path(), "/dashboard.json");

    facade.set_mode(StorageMode::Local).unwrap();
    facade.store(&DASHBOARD, &Dashboard { models: 5, users: 2 }).await.unwrap();
    let read = facade.fetch(&DASHBOARD).await.unwrap().unwrap();
    assert_eq!(read.into_data(), Dashboard { models: 5, users: 2 });
  }

  #[tokio::test]
  async fn test_subscribers_see_mode_changes() {
    let (facade, _, _) = setup(StorageMode::Hybrid, testing::unreachable());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = facade.subscribe(move |record| sink.lock().unwrap().push(record.storage_mode));

    facade.set_mode(StorageMode::Remote).unwrap();
    assert_eq!(facade.mode(), StorageMode::Remote);
    assert_eq!(*seen.lock().unwrap(), vec![StorageMode::Remote]);
  }
}
