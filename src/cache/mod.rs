//! Local persistent cache for offline data access.
//!
//! This module provides:
//! - `KeyValueStore`: the persistence substrate (SQLite or in-memory)
//! - `CacheStore`: key -> (payload, timestamp) entries with a staleness predicate
//! - `CacheResult`: data plus where it came from (network, fresh/stale cache, offline)
//!
//! Entries are never evicted automatically; a stale entry stays usable as an
//! offline fallback until it is overwritten or explicitly invalidated.

mod storage;
mod store;
mod traits;

pub use storage::{KeyValueStore, MemoryStorage, SqliteStorage, StorageError};
pub use store::{CacheEntry, CacheStore, CACHE_KEY_PREFIX};
pub use traits::{CacheResult, CacheSource, ResourceKey};
