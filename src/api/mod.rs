//! Remote API access.
//!
//! - `Resource`: logical resource names and the paths they map to
//! - `Transport`: the HTTP seam (reqwest in production, scripted in tests)
//! - `RequestExecutor`: headers, credentials, bounded retry with linear backoff

pub mod client;
pub mod error;
pub mod resource;
pub mod transport;

pub use client::{RequestExecutor, RequestOptions};
pub use error::{FailureKind, RequestFailure};
pub use resource::Resource;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
