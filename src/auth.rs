//! Authorization header resolution.
//!
//! Credentials are tried in a fixed priority order, first match wins:
//! 1. Bearer token (`API_TOKEN`)
//! 2. API key header (`API_KEY`)
//! 3. Basic auth from `API_USERNAME` / `API_PASSWORD`
//! 4. Basic auth from the transport-level `HTTP_AUTH_USER` / `HTTP_AUTH_PASSWORD`

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tracing::debug;

use crate::config::ConfigRecord;

/// Header name used for API key auth.
pub const API_KEY_HEADER: &str = "x-api-key";

/// A single header to attach to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
  pub name: HeaderName,
  pub value: HeaderValue,
}

impl AuthHeader {
  fn sensitive(name: HeaderName, value: &str) -> Option<Self> {
    let mut value = HeaderValue::from_str(value).ok()?;
    value.set_sensitive(true);
    Some(Self { name, value })
  }
}

/// One link in the credential chain.
pub trait CredentialProvider: Send + Sync {
  /// Short name for logs.
  fn name(&self) -> &'static str;

  /// Build a header from `config`, or `None` if this provider has nothing to offer.
  fn try_header(&self, config: &ConfigRecord) -> Option<AuthHeader>;
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|v| !v.is_empty())
}

fn basic_auth(username: &Option<String>, password: &Option<String>) -> Option<AuthHeader> {
  let username = non_empty(username)?;
  let password = non_empty(password)?;
  let encoded = STANDARD.encode(format!("{}:{}", username, password));
  AuthHeader::sensitive(AUTHORIZATION, &format!("Basic {}", encoded))
}

/// `Authorization: Bearer <API_TOKEN>`
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerToken;

impl CredentialProvider for BearerToken {
  fn name(&self) -> &'static str {
    "bearer"
  }

  fn try_header(&self, config: &ConfigRecord) -> Option<AuthHeader> {
    let token = non_empty(&config.api_token)?;
    AuthHeader::sensitive(AUTHORIZATION, &format!("Bearer {}", token))
  }
}

/// `X-API-Key: <API_KEY>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKey;

impl CredentialProvider for ApiKey {
  fn name(&self) -> &'static str {
    "api_key"
  }

  fn try_header(&self, config: &ConfigRecord) -> Option<AuthHeader> {
    let key = non_empty(&config.api_key)?;
    AuthHeader::sensitive(HeaderName::from_static(API_KEY_HEADER), key)
  }
}

/// Basic auth from the API username/password.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryBasicAuth;

impl CredentialProvider for PrimaryBasicAuth {
  fn name(&self) -> &'static str {
    "basic"
  }

  fn try_header(&self, config: &ConfigRecord) -> Option<AuthHeader> {
    basic_auth(&config.api_username, &config.api_password)
  }
}

/// Basic auth from the transport-level credential pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackBasicAuth;

impl CredentialProvider for FallbackBasicAuth {
  fn name(&self) -> &'static str {
    "basic_fallback"
  }

  fn try_header(&self, config: &ConfigRecord) -> Option<AuthHeader> {
    basic_auth(&config.http_auth_user, &config.http_auth_password)
  }
}

/// Ordered chain of credential providers.
pub struct CredentialResolver {
  providers: Vec<Box<dyn CredentialProvider>>,
}

impl Default for CredentialResolver {
  fn default() -> Self {
    Self::new(vec![
      Box::new(BearerToken),
      Box::new(ApiKey),
      Box::new(PrimaryBasicAuth),
      Box::new(FallbackBasicAuth),
    ])
  }
}

impl CredentialResolver {
  pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
    Self { providers }
  }

  /// First header any provider can build, in chain order.
  pub fn resolve(&self, config: &ConfigRecord) -> Option<AuthHeader> {
    self.providers.iter().find_map(|provider| {
      let header = provider.try_header(config);
      if header.is_some() {
        debug!(provider = provider.name(), "Resolved auth header");
      }
      header
    })
  }
}

/// Resolve the auth header using the standard provider chain.
pub fn resolve_auth_header(config: &ConfigRecord) -> Option<AuthHeader> {
  CredentialResolver::default().resolve(config)
}
