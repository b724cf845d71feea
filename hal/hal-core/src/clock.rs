//! AP-side time source.

use std::sync::Mutex;
use std::time::Instant;

use hal_types::{Duration, Timestamp};

/// Source of AP-clock timestamps.
///
/// Enable windows, rate-switch records, and flush requests are all
/// stamped from this clock. Injected explicitly so tests can drive
/// time deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current AP timestamp.
    fn now(&self) -> Timestamp;
}

/// Monotonic wall clock measured from construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock with its zero point at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        #[allow(clippy::cast_possible_truncation)]
        Timestamp::from_nanos(self.origin.elapsed().as_nanos() as u64)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Creates a clock stopped at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time.
    pub fn set(&self, ts: Timestamp) {
        if let Ok(mut now) = self.now.lock() {
            *now = ts;
        }
    }

    /// Advances the current time.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = now.checked_add(by).unwrap_or(*now);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map(|g| *g).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Timestamp::zero());

        clock.set(Timestamp::from_nanos(100));
        assert_eq!(clock.now(), Timestamp::from_nanos(100));

        clock.advance(Duration::from_nanos(50));
        assert_eq!(clock.now(), Timestamp::from_nanos(150));
    }
}
