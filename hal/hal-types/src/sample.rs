//! Samples in transit through the pipeline.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::descriptor::SensorHandle;
use crate::time::{Duration, Timestamp};

/// Largest number of flush completions one sample may carry.
pub const MAX_FLUSH_HANDLES: usize = 10;

/// Reported confidence of a sample's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Accuracy {
    /// Values cannot be trusted.
    Unreliable,
    /// Calibration is poor.
    Low,
    /// Calibration is usable but improving.
    Medium,
    /// Fully calibrated.
    #[default]
    High,
}

/// One timestamped reading moving between pipeline stages.
///
/// Produced by a hardware decode or a software computation, fanned out to
/// every sensor registered as a push target of the producer, and never
/// persisted: it exists only in transit through rings and pipes.
///
/// The `pollrate` field records the sampling period in effect when the
/// sample left the producer. Rate switches are timestamp-gated, so
/// samples already buffered when a switch lands keep their pre-switch
/// pollrate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// Handle of the producing sensor.
    pub sensor: SensorHandle,
    /// Raw decoded axis values. Unused trailing slots stay zero.
    pub raw: [f32; 4],
    /// Calibration bias in effect for this sample.
    pub offset: [f32; 3],
    /// Processed output values. Layout is kind-specific.
    pub processed: [f32; 5],
    /// Confidence of the processed values.
    pub accuracy: Accuracy,
    /// Timestamp from the hardware FIFO clock.
    pub hw_timestamp: Timestamp,
    /// Timestamp reconciled to the AP clock.
    pub ap_timestamp: Timestamp,
    /// Flush requests that complete once this sample is delivered.
    pub flush_handles: SmallVec<[SensorHandle; MAX_FLUSH_HANDLES]>,
    /// Sampling period in effect when this sample was produced.
    pub pollrate: Duration,
}

impl Sample {
    /// Creates an empty sample for the given producer and timestamp.
    #[must_use]
    pub fn new(sensor: SensorHandle, timestamp: Timestamp) -> Self {
        Self {
            sensor,
            raw: [0.0; 4],
            offset: [0.0; 3],
            processed: [0.0; 5],
            accuracy: Accuracy::default(),
            hw_timestamp: timestamp,
            ap_timestamp: timestamp,
            flush_handles: SmallVec::new(),
            pollrate: Duration::zero(),
        }
    }

    /// Returns the first three raw values as a vector.
    #[must_use]
    pub const fn raw_vec3(&self) -> [f32; 3] {
        [self.raw[0], self.raw[1], self.raw[2]]
    }

    /// Returns the first three processed values as a vector.
    #[must_use]
    pub const fn processed_vec3(&self) -> [f32; 3] {
        [self.processed[0], self.processed[1], self.processed[2]]
    }

    /// Stores a vector in the first three processed slots.
    pub fn set_processed_vec3(&mut self, v: [f32; 3]) {
        self.processed[0] = v[0];
        self.processed[1] = v[1];
        self.processed[2] = v[2];
    }

    /// Records a flush completion to deliver with this sample.
    ///
    /// Returns `false` when the sample already carries
    /// [`MAX_FLUSH_HANDLES`] completions; the caller drops the request.
    pub fn push_flush_handle(&mut self, handle: SensorHandle) -> bool {
        if self.flush_handles.len() >= MAX_FLUSH_HANDLES {
            return false;
        }
        self.flush_handles.push(handle);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn new_sample_is_zeroed() {
        let s = Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(100));
        assert_eq!(s.raw, [0.0; 4]);
        assert_eq!(s.processed, [0.0; 5]);
        assert_eq!(s.accuracy, Accuracy::High);
        assert_eq!(s.hw_timestamp, s.ap_timestamp);
        assert!(s.flush_handles.is_empty());
    }

    #[test]
    fn vec3_accessors() {
        let mut s = Sample::new(SensorHandle::from_raw(1), Timestamp::zero());
        s.raw = [1.0, 2.0, 3.0, 0.0];
        assert_eq!(s.raw_vec3(), [1.0, 2.0, 3.0]);

        s.set_processed_vec3([4.0, 5.0, 6.0]);
        assert_eq!(s.processed_vec3(), [4.0, 5.0, 6.0]);
        assert_eq!(s.processed[3], 0.0);
    }

    #[test]
    fn flush_handles_bounded() {
        let mut s = Sample::new(SensorHandle::from_raw(1), Timestamp::zero());
        for i in 0..MAX_FLUSH_HANDLES {
            assert!(s.push_flush_handle(SensorHandle::from_raw(i as u32 + 1)));
        }
        assert!(!s.push_flush_handle(SensorHandle::from_raw(99)));
        assert_eq!(s.flush_handles.len(), MAX_FLUSH_HANDLES);
    }

    #[test]
    fn accuracy_ordering() {
        assert!(Accuracy::Unreliable < Accuracy::Low);
        assert!(Accuracy::Medium < Accuracy::High);
    }
}
