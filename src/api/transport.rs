//! The HTTP seam between the request executor and the network.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Url};
use std::time::Duration;
use thiserror::Error;

/// A fully built request, ready to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Option<String>,
  /// `None` leaves the request bounded only by the client defaults
  pub timeout: Option<Duration>,
}

/// Status and raw body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: String,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one HTTP request. Retries are the caller's business.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = Client::builder()
      .build()
      .map_err(|e| TransportError(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let mut builder = self
      .client
      .request(request.method, request.url)
      .headers(request.headers);

    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }

    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        TransportError(format!("Request timed out: {}", e))
      } else {
        TransportError(e.to_string())
      }
    })?;

    let status = response.status().as_u16();
    let body = response
      .text()
      .await
      .map_err(|e| TransportError(format!("Failed to read response body: {}", e)))?;

    Ok(HttpResponse { status, body })
  }
}
