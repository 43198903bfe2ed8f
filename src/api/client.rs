//! Request executor for the remote API.
//!
//! Builds the request for a [`Resource`] (default headers, credentials,
//! session cookie, caller overrides), then sends it up to `RETRY_ATTEMPTS`
//! times. Before attempt k+1 it waits k × `RETRY_DELAY`.

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{FailureKind, RequestFailure};
use super::resource::Resource;
use super::transport::{HttpRequest, Transport};
use crate::auth::CredentialResolver;
use crate::config::{ConfigRecord, ConfigStore};

/// Per-call request settings. Headers here are applied last and win over the
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub method: Method,
  pub body: Option<Value>,
  pub headers: HeaderMap,
}

impl RequestOptions {
  pub fn get() -> Self {
    Self::default()
  }

  pub fn post(body: Value) -> Self {
    Self {
      method: Method::POST,
      body: Some(body),
      ..Self::default()
    }
  }

  pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }
}

/// Executes requests against the configured API.
/// Clone is cheap; all state is behind `Arc`.
#[derive(Clone)]
pub struct RequestExecutor {
  config: Arc<ConfigStore>,
  transport: Arc<dyn Transport>,
  credentials: Arc<CredentialResolver>,
}

impl RequestExecutor {
  pub fn new(config: Arc<ConfigStore>, transport: Arc<dyn Transport>) -> Self {
    Self {
      config,
      transport,
      credentials: Arc::new(CredentialResolver::default()),
    }
  }

  /// Replace the standard credential chain.
  pub fn with_credentials(mut self, credentials: CredentialResolver) -> Self {
    self.credentials = Arc::new(credentials);
    self
  }

  fn build_request(
    &self,
    config: &ConfigRecord,
    resource: &Resource,
    options: &RequestOptions,
  ) -> Result<HttpRequest, FailureKind> {
    let raw_url = format!(
      "{}{}",
      config.api_base_url.trim_end_matches('/'),
      resource.path()
    );
    let url =
      Url::parse(&raw_url).map_err(|e| FailureKind::InvalidUrl(format!("{}: {}", raw_url, e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(
      header::CONTENT_TYPE,
      HeaderValue::from_static("application/json"),
    );
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(auth) = self.credentials.resolve(config) {
      headers.insert(auth.name, auth.value);
    }

    if !config.session_cookie.is_empty() {
      match HeaderValue::from_str(&config.session_cookie) {
        Ok(cookie) => {
          headers.insert(header::COOKIE, cookie);
        }
        Err(_) => warn!("Session cookie is not a valid header value, omitting it"),
      }
    }

    for (name, value) in options.headers.iter() {
      headers.insert(name.clone(), value.clone());
    }

    Ok(HttpRequest {
      method: options.method.clone(),
      url,
      headers,
      body: options.body.as_ref().map(Value::to_string),
      // API_TIMEOUT = 0 disables the per-request timeout
      timeout: (config.api_timeout > 0).then(|| Duration::from_millis(config.api_timeout)),
    })
  }

  /// Send with retry. Returns the 2xx body and the attempt it succeeded on.
  async fn send_with_retry(
    &self,
    resource: &Resource,
    options: &RequestOptions,
  ) -> Result<(String, u32), RequestFailure> {
    let config = self.config.get();
    let failure = |kind: FailureKind, attempts: u32| RequestFailure {
      resource: resource.name().to_string(),
      kind,
      attempts,
    };

    let request = self
      .build_request(&config, resource, options)
      .map_err(|kind| failure(kind, 0))?;
    let max_attempts = config.retry_attempts.max(1);

    let mut attempt = 1;
    loop {
      debug!(
        resource = %resource,
        method = %request.method,
        url = %request.url,
        attempt,
        "Sending request"
      );

      let kind = match self.transport.send(request.clone()).await {
        Ok(response) if response.is_success() => return Ok((response.body, attempt)),
        Ok(response) => FailureKind::from_status(response.status, &response.body),
        Err(e) => FailureKind::Network(e.0),
      };

      if attempt >= max_attempts || !kind.is_retryable() {
        warn!(resource = %resource, attempts = attempt, error = %kind, "Request failed, giving up");
        return Err(failure(kind, attempt));
      }

      let delay = Duration::from_millis(config.retry_delay.saturating_mul(u64::from(attempt)));
      warn!(
        resource = %resource,
        attempt,
        max_attempts,
        delay_ms = delay.as_millis() as u64,
        error = %kind,
        "Request failed, backing off"
      );
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }

  /// Execute a request and return the decoded JSON payload.
  pub async fn execute(
    &self,
    resource: &Resource,
    options: RequestOptions,
  ) -> Result<Value, RequestFailure> {
    self.execute_as(resource, options).await
  }

  /// Execute a request and decode the payload as `T`.
  ///
  /// A body that does not decode fails immediately; it is not retried.
  pub async fn execute_as<T: DeserializeOwned>(
    &self,
    resource: &Resource,
    options: RequestOptions,
  ) -> Result<T, RequestFailure> {
    let (body, attempts) = self.send_with_retry(resource, &options).await?;

    decode(&body).map_err(|e| {
      warn!(resource = %resource, error = %e, "Response body did not decode");
      RequestFailure {
        resource: resource.name().to_string(),
        kind: FailureKind::Decode(e.to_string()),
        attempts,
      }
    })
  }

  /// Send a write. Any 2xx status counts as committed; the body is ignored.
  pub async fn submit(
    &self,
    resource: &Resource,
    options: RequestOptions,
  ) -> Result<(), RequestFailure> {
    let (_, attempts) = self.send_with_retry(resource, &options).await?;
    debug!(resource = %resource, attempts, "Write accepted");
    Ok(())
  }
}

/// An empty body (e.g. 204) decodes as JSON `null`.
fn decode<T: DeserializeOwned>(body: &str) -> serde_json::Result<T> {
  if body.trim().is_empty() {
    serde_json::from_value(Value::Null)
  } else {
    serde_json::from_str(body)
  }
}
