//! Hybrid data-access layer for the marketplace admin console.
//!
//! Every read and write the console makes goes through [`HybridFacade`], which
//! picks between the local persistent cache and the remote API according to the
//! operating mode held in the [`ConfigStore`]:
//!
//! - `local`: cache only, never touches the network
//! - `api`: remote only, failures surface unchanged
//! - `hybrid`: fresh cache short-circuits, stale cache is refreshed from the
//!   remote, and served as a fallback when the remote is unreachable; writes go
//!   through to the cache and are queued for replay when the remote rejects them
//!
//! Build one [`DataContext`] at startup and hand its facade to whoever needs it.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod hybrid;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{FailureKind, RequestExecutor, RequestFailure, RequestOptions, Resource};
pub use auth::{resolve_auth_header, AuthHeader, CredentialProvider, CredentialResolver};
pub use cache::{
  CacheEntry, CacheResult, CacheSource, CacheStore, KeyValueStore, MemoryStorage, ResourceKey,
  SqliteStorage, StorageError,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigPatch, ConfigRecord, ConfigStore, StorageMode, Subscription};
pub use context::DataContext;
pub use error::{Error, Result};
pub use hybrid::{HybridFacade, WriteOutcome};
pub use sync::{DrainReport, QueueItem, SyncQueue};
