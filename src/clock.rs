//! Wall-clock abstraction so TTLs can be tested without sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Current time as epoch milliseconds, the unit every store persists.
  fn now_millis(&self) -> i64 {
    self.now().timestamp_millis()
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  millis: AtomicI64,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      millis: AtomicI64::new(start.timestamp_millis()),
    }
  }

  /// Start at the Unix epoch.
  pub fn at_epoch() -> Self {
    Self {
      millis: AtomicI64::new(0),
    }
  }

  pub fn advance(&self, by: Duration) {
    self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::at_epoch();
    assert_eq!(clock.now_millis(), 0);

    clock.advance(Duration::days(1));
    assert_eq!(clock.now_millis(), 86_400_000);
  }
}
