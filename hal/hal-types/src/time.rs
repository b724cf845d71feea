//! Time types for sensor data.
//!
//! Provides nanosecond-precision timing for samples, enable windows, and
//! rate-switch records.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Nanosecond-precision timestamp.
///
/// Used for every sample, enable/disable window edge, rate-switch record,
/// and flush request in the pipeline. Ordering of pipeline events is
/// enforced by comparing timestamps, never by boolean flags.
///
/// # Example
///
/// ```
/// use hal_types::Timestamp;
///
/// let ts = Timestamp::from_secs_f64(1.5);
/// assert_eq!(ts.as_nanos(), 1_500_000_000);
///
/// let same = Timestamp::from_nanos(1_500_000_000);
/// assert_eq!(ts, same);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp {
    /// Nanoseconds since boot.
    nanos: u64,
}

impl Timestamp {
    /// Creates a timestamp from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Creates a timestamp from seconds (floating point).
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn from_secs_f64(secs: f64) -> Self {
        let nanos = (secs * 1e9).max(0.0) as u64;
        Self { nanos }
    }

    /// Returns the timestamp as nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }

    /// Returns the timestamp as seconds (floating point).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.nanos as f64 / 1e9
    }

    /// Returns the zero timestamp.
    ///
    /// Zero doubles as the "never" sentinel for enable/disable window
    /// edges that have not been recorded yet.
    #[must_use]
    pub const fn zero() -> Self {
        Self { nanos: 0 }
    }

    /// Checks if this is the zero timestamp.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.nanos == 0
    }

    /// Adds a duration to this timestamp.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.nanos.checked_add(duration.as_nanos()) {
            Some(nanos) => Some(Self { nanos }),
            None => None,
        }
    }

    /// Subtracts a duration from this timestamp.
    ///
    /// Returns `None` on underflow.
    #[must_use]
    pub const fn checked_sub(self, duration: Duration) -> Option<Self> {
        match self.nanos.checked_sub(duration.as_nanos()) {
            Some(nanos) => Some(Self { nanos }),
            None => None,
        }
    }

    /// Returns the absolute difference between two timestamps.
    #[must_use]
    pub const fn abs_diff(self, other: Self) -> Duration {
        Duration::from_nanos(self.nanos.abs_diff(other.nanos))
    }
}

/// A duration of time with nanosecond precision.
///
/// Doubles as a sampling period ("pollrate"): the pipeline expresses
/// output data rates as periods in nanoseconds and converts to hertz only
/// at the device boundary.
///
/// # Example
///
/// ```
/// use hal_types::Duration;
///
/// let period = Duration::from_hz(100.0);
/// assert_eq!(period.as_nanos(), 10_000_000);
/// assert!((period.as_hz() - 100.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Duration {
    /// Duration in nanoseconds.
    nanos: u64,
}

impl Duration {
    /// Creates a duration from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Creates a duration from microseconds.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros * 1_000,
        }
    }

    /// Creates a duration from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Creates a duration from seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Creates a sampling period from a rate in hertz.
    ///
    /// Returns [`Duration::zero`] for non-positive rates.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn from_hz(hz: f64) -> Self {
        if hz <= 0.0 {
            return Self::zero();
        }
        Self {
            nanos: (1e9 / hz) as u64,
        }
    }

    /// Returns the duration as nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }

    /// Returns the duration as milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Returns the duration as seconds (floating point).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.nanos as f64 / 1e9
    }

    /// Returns the rate in hertz for this sampling period.
    ///
    /// Returns `0.0` for the zero duration.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_hz(self) -> f64 {
        if self.nanos == 0 {
            return 0.0;
        }
        1e9 / self.nanos as f64
    }

    /// Returns the zero duration.
    #[must_use]
    pub const fn zero() -> Self {
        Self { nanos: 0 }
    }

    /// Checks if this is a zero duration.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.nanos == 0
    }

    /// Returns the ratio of two periods rounded to the nearest integer.
    ///
    /// This is the decimation factor between a consumer running at period
    /// `self` and a producer running at period `other`. Returns `1` when
    /// `other` is zero or the consumer is at least as fast as the producer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn decimation_factor(self, other: Self) -> u32 {
        if other.nanos == 0 {
            return 1;
        }
        let factor = (self.nanos as f64 / other.nanos as f64).round() as u32;
        factor.max(1)
    }

    /// Adds two durations.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.nanos.checked_add(other.nanos) {
            Some(nanos) => Some(Self { nanos }),
            None => None,
        }
    }

    /// Multiplies the duration by a scalar.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub const fn checked_mul(self, factor: u64) -> Option<Self> {
        match self.nanos.checked_mul(factor) {
            Some(nanos) => Some(Self { nanos }),
            None => None,
        }
    }

    /// Returns the smaller of two durations, treating zero as "unset".
    ///
    /// Rate negotiation folds requester periods with this: a requester
    /// that has not asked for a rate (zero period) never wins.
    #[must_use]
    pub fn min_nonzero(self, other: Self) -> Self {
        match (self.is_zero(), other.is_zero()) {
            (true, _) => other,
            (_, true) => self,
            (false, false) => {
                if self.nanos <= other.nanos {
                    self
                } else {
                    other
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_from_secs_f64() {
        let ts = Timestamp::from_secs_f64(1.5);
        assert_eq!(ts.as_nanos(), 1_500_000_000);
        assert!((ts.as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn timestamp_checked_ops() {
        let ts = Timestamp::from_nanos(1000);
        let d = Duration::from_nanos(500);

        assert_eq!(ts.checked_add(d), Some(Timestamp::from_nanos(1500)));
        assert_eq!(ts.checked_sub(d), Some(Timestamp::from_nanos(500)));
        assert_eq!(ts.checked_sub(Duration::from_nanos(2000)), None);
    }

    #[test]
    fn timestamp_abs_diff() {
        let a = Timestamp::from_nanos(1000);
        let b = Timestamp::from_nanos(300);

        assert_eq!(a.abs_diff(b), Duration::from_nanos(700));
        assert_eq!(b.abs_diff(a), Duration::from_nanos(700));
    }

    #[test]
    fn duration_conversions() {
        let d = Duration::from_millis(1500);
        assert_eq!(d.as_nanos(), 1_500_000_000);
        assert_eq!(d.as_millis(), 1500);
        assert!((d.as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn duration_hz_round_trip() {
        let period = Duration::from_hz(104.0);
        assert!((period.as_hz() - 104.0).abs() < 1e-3);

        assert_eq!(Duration::from_hz(0.0), Duration::zero());
        assert_eq!(Duration::from_hz(-5.0), Duration::zero());
        assert!((Duration::zero().as_hz()).abs() < f64::EPSILON);
    }

    #[test]
    fn duration_decimation_factor() {
        let producer = Duration::from_hz(400.0);
        let consumer = Duration::from_hz(100.0);

        assert_eq!(consumer.decimation_factor(producer), 4);
        // Consumer faster than producer: never decimate below 1.
        assert_eq!(producer.decimation_factor(consumer), 1);
        // Unknown producer rate: pass everything through.
        assert_eq!(consumer.decimation_factor(Duration::zero()), 1);
    }

    #[test]
    fn duration_min_nonzero() {
        let fast = Duration::from_millis(10);
        let slow = Duration::from_millis(100);

        assert_eq!(fast.min_nonzero(slow), fast);
        assert_eq!(slow.min_nonzero(fast), fast);
        assert_eq!(Duration::zero().min_nonzero(slow), slow);
        assert_eq!(slow.min_nonzero(Duration::zero()), slow);
        assert_eq!(Duration::zero().min_nonzero(Duration::zero()), Duration::zero());
    }

    #[test]
    fn duration_checked_ops() {
        let a = Duration::from_nanos(1000);
        assert_eq!(a.checked_add(a), Some(Duration::from_nanos(2000)));
        assert_eq!(a.checked_mul(3), Some(Duration::from_nanos(3000)));
        assert_eq!(Duration::from_nanos(u64::MAX).checked_mul(2), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn timestamp_serialization() {
        let ts = Timestamp::from_nanos(1_500_000_000);
        let json = serde_json::to_string(&ts).ok();
        assert!(json.is_some());

        let parsed: Result<Timestamp, _> = serde_json::from_str(&json.unwrap_or_default());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_default(), ts);
    }
}
