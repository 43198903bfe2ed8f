//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::api::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::cache::MemoryStorage;
use crate::clock::ManualClock;
use crate::config::{ConfigPatch, StorageMode};
use crate::context::DataContext;

pub(crate) type Reply = Result<HttpResponse, TransportError>;

pub(crate) fn ok(body: Value) -> Reply {
  Ok(HttpResponse::new(200, body.to_string()))
}

pub(crate) fn status(status: u16) -> Reply {
  Ok(HttpResponse::new(status, format!("status {}", status)))
}

pub(crate) fn unreachable() -> Reply {
  Err(TransportError("connection refused".to_string()))
}

/// Scripted transport that records every request.
///
/// Queued replies are used first, in order; once they run out every request
/// gets the fallback reply.
pub(crate) struct StubTransport {
  queued: Mutex<VecDeque<(Duration, Reply)>>,
  fallback: Mutex<Reply>,
  calls: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl StubTransport {
  pub fn new(fallback: Reply) -> Self {
    Self {
      queued: Mutex::new(VecDeque::new()),
      fallback: Mutex::new(fallback),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn ok(body: Value) -> Self {
    Self::new(ok(body))
  }

  pub fn unreachable() -> Self {
    Self::new(unreachable())
  }

  pub fn push(&self, reply: Reply) {
    self.push_delayed(Duration::ZERO, reply);
  }

  /// Queue a reply that is only delivered after `delay`.
  pub fn push_delayed(&self, delay: Duration, reply: Reply) {
    self.queued.lock().unwrap().push_back((delay, reply));
  }

  pub fn set_fallback(&self, reply: Reply) {
    *self.fallback.lock().unwrap() = reply;
  }

  pub fn calls(&self) -> Vec<HttpRequest> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(_, request)| request.clone())
      .collect()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn call_times(&self) -> Vec<Instant> {
    self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
  }
}

#[async_trait]
impl Transport for StubTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    self.calls.lock().unwrap().push((Instant::now(), request));

    let next = self.queued.lock().unwrap().pop_front();
    let (delay, reply) = match next {
      Some(scripted) => scripted,
      None => (Duration::ZERO, self.fallback.lock().unwrap().clone()),
    };

    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    reply
  }
}

/// In-memory context talking to `transport`, with a stub base URL, two
/// attempts per request and no backoff delay.
pub(crate) fn context(
  transport: Arc<StubTransport>,
  clock: ManualClock,
  mode: StorageMode,
) -> DataContext {
  let context = DataContext::new(
    Arc::new(MemoryStorage::new()),
    transport,
    Arc::new(clock),
  )
  .unwrap();

  context
    .config()
    .save(&ConfigPatch {
      api_base_url: Some("http://stub.test".to_string()),
      retry_attempts: Some(2),
      retry_delay: Some(0),
      storage_mode: Some(mode),
      ..ConfigPatch::default()
    })
    .unwrap();

  context
}
