use thiserror::Error;

use crate::api::{RequestFailure, TransportError};
use crate::cache::StorageError;

/// Result type alias for data-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can escape the data layer.
///
/// Cache misses are not errors (they are `None`), and stale fallbacks and
/// queued writes are reported through the return value, so anything here means
/// no fallback was possible.
#[derive(Debug, Error)]
pub enum Error {
  /// The remote API could not serve the request.
  #[error(transparent)]
  Request(#[from] RequestFailure),

  /// The local persistence substrate failed.
  #[error(transparent)]
  Storage(#[from] StorageError),

  /// The HTTP transport could not be constructed.
  #[error("Failed to initialize HTTP transport: {0}")]
  Transport(#[from] TransportError),

  /// A payload could not be serialized to JSON.
  #[error("Failed to encode payload for '{key}': {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  /// A persisted value that must not be silently dropped could not be parsed.
  #[error("Stored value under '{key}' is corrupt: {source}")]
  Corrupt {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

impl Error {
  /// The request failure behind this error, if it came from the remote.
  pub fn as_request_failure(&self) -> Option<&RequestFailure> {
    match self {
      Error::Request(failure) => Some(failure),
      _ => None,
    }
  }
}
