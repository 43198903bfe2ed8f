//! Time source for cache stamping and queue bookkeeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Anything that can tell the current wall-clock time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// pass another into the data layer.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  /// Start at the given number of milliseconds after the Unix epoch.
  pub fn at_millis(millis: i64) -> Self {
    Self::new(from_millis(millis))
  }

  pub fn set(&self, now: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
  }

  pub fn set_millis(&self, millis: i64) {
    self.set(from_millis(millis));
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Convert epoch milliseconds to a UTC timestamp, clamping out-of-range values
/// to the epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
  DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_moves_only_when_told() {
    let clock = ManualClock::at_millis(0);
    assert_eq!(clock.now().timestamp_millis(), 0);

    clock.advance(Duration::milliseconds(1500));
    assert_eq!(clock.now().timestamp_millis(), 1500);

    clock.set_millis(400_000);
    assert_eq!(clock.now().timestamp_millis(), 400_000);
  }

  #[test]
  fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::at_millis(10);
    let other = clock.clone();
    clock.set_millis(99);
    assert_eq!(other.now().timestamp_millis(), 99);
  }
}
