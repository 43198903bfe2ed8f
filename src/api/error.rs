use thiserror::Error;

/// Maximum length for error response bodies kept in a failure
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
  /// Transport-level failure: unreachable host, DNS, TLS, timeout.
  #[error("network error: {0}")]
  Network(String),

  /// The server answered outside 2xx.
  #[error("HTTP status {status}: {body}")]
  HttpStatus { status: u16, body: String },

  /// The server answered 2xx but the body was not the expected JSON.
  #[error("invalid response body: {0}")]
  Decode(String),

  /// Base URL and resource path do not form a valid URL.
  #[error("invalid URL: {0}")]
  InvalidUrl(String),
}

impl FailureKind {
  /// Network and status failures are retried; decode and URL failures are not.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FailureKind::Network(_) | FailureKind::HttpStatus { .. })
  }

  pub fn from_status(status: u16, body: &str) -> Self {
    FailureKind::HttpStatus {
      status,
      body: truncate_body(body),
    }
  }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
  if body.len() <= MAX_ERROR_BODY_LENGTH {
    return body.to_string();
  }

  let mut end = MAX_ERROR_BODY_LENGTH;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!(
    "{}... (truncated, {} total bytes)",
    &body[..end],
    body.len()
  )
}

/// A request that could not be completed, with enough context to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Request for '{resource}' failed after {attempts} attempt(s): {kind}")]
pub struct RequestFailure {
  /// Logical resource name (or path for explicit-path resources)
  pub resource: String,
  pub kind: FailureKind,
  /// Attempts actually made
  pub attempts: u32,
}

impl RequestFailure {
  /// Final HTTP status, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self.kind {
      FailureKind::HttpStatus { status, .. } => Some(status),
      _ => None,
    }
  }
}
