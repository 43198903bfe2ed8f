//! Typed keys and tagged read results.

use chrono::{DateTime, Duration, Utc};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use super::store::CacheEntry;

/// A logical resource key tied to the payload type stored under it.
///
/// Going through a `ResourceKey<T>` means every read and write of that key
/// agrees on `T` at compile time. Plain string keys still work for callers
/// that want untyped `serde_json::Value` payloads.
pub struct ResourceKey<T> {
  name: Cow<'static, str>,
  _payload: PhantomData<fn() -> T>,
}

impl<T> ResourceKey<T> {
  pub const fn new(name: &'static str) -> Self {
    Self {
      name: Cow::Borrowed(name),
      _payload: PhantomData,
    }
  }

  /// Key built at runtime (e.g. per-entity keys like `model_42`).
  pub fn owned(name: impl Into<String>) -> Self {
    Self {
      name: Cow::Owned(name.into()),
      _payload: PhantomData,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl<T> Clone for ResourceKey<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      _payload: PhantomData,
    }
  }
}

impl<T> fmt::Debug for ResourceKey<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("ResourceKey").field(&self.name).finish()
  }
}

impl<T> fmt::Display for ResourceKey<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

/// A payload handed out by the facade, tagged with where it was served from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Write time of the served cache entry; `None` when the remote answered
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Serve `entry` directly; `fresh` is judged against the configured TTL.
  pub fn cached(entry: CacheEntry<T>, fresh: bool) -> Self {
    let source = if fresh {
      CacheSource::CacheFresh
    } else {
      CacheSource::CacheStale
    };
    Self {
      data: entry.data,
      source,
      cached_at: Some(entry.written_at),
    }
  }

  /// Serve a stale `entry` because the remote request failed.
  pub fn fallback(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.data,
      source: CacheSource::Offline,
      cached_at: Some(entry.written_at),
    }
  }

  /// True when the remote was asked and failed, so the payload may be outdated.
  pub fn is_fallback(&self) -> bool {
    self.source == CacheSource::Offline
  }

  /// How old the served entry is at `now`.
  pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
    self.cached_at.map(|at| now - at)
  }

  pub fn into_data(self) -> T {
    self.data
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// The remote answered this call
  Network,
  /// Cache entry younger than the TTL
  CacheFresh,
  /// Cache entry past the TTL, returned as-is by a local-mode read
  CacheStale,
  /// Cache entry past the TTL, returned because the hybrid refresh failed
  Offline,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      CacheSource::Network => "remote",
      CacheSource::CacheFresh => "cache",
      CacheSource::CacheStale => "cache (past TTL)",
      CacheSource::Offline => "cache (remote unreachable)",
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::from_millis;

  fn entry(written_ms: i64) -> CacheEntry<&'static str> {
    CacheEntry {
      key: "dashboard".to_string(),
      data: "payload",
      written_at: from_millis(written_ms),
    }
  }

  #[test]
  fn test_sources() {
    assert_eq!(CacheResult::cached(entry(0), true).source, CacheSource::CacheFresh);
    assert_eq!(CacheResult::cached(entry(0), false).source, CacheSource::CacheStale);

    let fallback = CacheResult::fallback(entry(10));
    assert!(fallback.is_fallback());
    assert_eq!(fallback.cached_at, Some(from_millis(10)));

    let network = CacheResult::network("payload");
    assert!(!network.is_fallback());
    assert_eq!(network.cached_at, None);
  }

  #[test]
  fn test_age() {
    let now = from_millis(400_000);
    assert_eq!(
      CacheResult::fallback(entry(100_000)).age(now),
      Some(Duration::milliseconds(300_000))
    );
    assert_eq!(CacheResult::network(()).age(now), None);
  }
}
