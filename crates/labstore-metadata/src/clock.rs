//! Time source for created/updated timestamps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that starts at a fixed instant and moves forward by `step` on
/// every reading. Deterministic timestamps for tests and tooling.
#[derive(Debug, Clone)]
pub struct SteppingClock {
    next: Arc<Mutex<DateTime<Utc>>>,
    step: chrono::Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            next: Arc::new(Mutex::new(start)),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock();
        let now = *next;
        *next = now + self.step;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stepping_clock_advances() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let clock = SteppingClock::new(start, chrono::Duration::seconds(1));
        let shared = clock.clone();
        assert_eq!(clock.now(), start);
        assert_eq!(shared.now(), start + chrono::Duration::seconds(1));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(2));
    }

    #[test]
    fn test_system_clock_is_utc() {
        let before = Utc::now();
        assert!(SystemClock.now() >= before);
    }
}
