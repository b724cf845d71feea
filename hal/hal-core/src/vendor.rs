//! Vendor algorithm interfaces.
//!
//! Calibration, fusion, and clock-reconciliation algorithms are
//! collaborators consumed through their published shapes; the engine
//! schedules them and routes their outputs but does not own their math.
//! The reference implementations here are deliberately simple - enough
//! to wire the pipeline and drive tests - and are swapped out for the
//! real libraries at integration time. Real vendor libraries carry
//! process-global state; they are still passed in as explicit services,
//! with single-instance semantics being the caller's responsibility.

use std::sync::Mutex;

use hal_types::{Accuracy, Timestamp};

/// Bias-estimating calibration for a 3-axis sensor.
pub trait Calibration: Send {
    /// Prepares the algorithm for a stream at the given rate.
    fn init(&mut self, rate_hz: f64);

    /// Discards learned state.
    fn reset(&mut self);

    /// Feeds one sample; returns the current calibration quality.
    fn update(&mut self, sample: [f32; 3], ts: Timestamp) -> Accuracy;

    /// Returns the current bias estimate.
    fn bias(&self) -> [f32; 3];

    /// Restores previously persisted state.
    fn load_state(&mut self, bytes: &[u8]);

    /// Serializes state for persistence.
    fn save_state(&self) -> Vec<u8>;
}

/// Calibration that never learns a bias.
///
/// Used for sensors whose driver already compensates, and as the default
/// when no vendor library is wired.
#[derive(Debug, Default)]
pub struct NoCalibration;

impl Calibration for NoCalibration {
    fn init(&mut self, _rate_hz: f64) {}

    fn reset(&mut self) {}

    fn update(&mut self, _sample: [f32; 3], _ts: Timestamp) -> Accuracy {
        Accuracy::High
    }

    fn bias(&self) -> [f32; 3] {
        [0.0; 3]
    }

    fn load_state(&mut self, _bytes: &[u8]) {}

    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Slow exponential bias tracker.
///
/// Converges toward the stream mean; usable as a stand-in gyroscope
/// zero-rate calibration in tests and simulation.
#[derive(Debug)]
pub struct LowPassBias {
    alpha: f32,
    bias: [f32; 3],
    samples_seen: u32,
}

impl LowPassBias {
    /// Creates a tracker with the given smoothing factor (0, 1].
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(1e-6, 1.0),
            bias: [0.0; 3],
            samples_seen: 0,
        }
    }
}

impl Default for LowPassBias {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl Calibration for LowPassBias {
    fn init(&mut self, _rate_hz: f64) {}

    fn reset(&mut self) {
        self.bias = [0.0; 3];
        self.samples_seen = 0;
    }

    fn update(&mut self, sample: [f32; 3], _ts: Timestamp) -> Accuracy {
        for (b, s) in self.bias.iter_mut().zip(sample) {
            *b += self.alpha * (s - *b);
        }
        self.samples_seen = self.samples_seen.saturating_add(1);
        // Quality tracks how much evidence the estimate has absorbed.
        match self.samples_seen {
            0..=10 => Accuracy::Unreliable,
            11..=100 => Accuracy::Low,
            101..=1000 => Accuracy::Medium,
            _ => Accuracy::High,
        }
    }

    fn bias(&self) -> [f32; 3] {
        self.bias
    }

    fn load_state(&mut self, bytes: &[u8]) {
        if bytes.len() == 12 {
            for (i, b) in self.bias.iter_mut().enumerate() {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
                *b = f32::from_le_bytes(buf);
            }
            self.samples_seen = 1001;
        }
    }

    fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        for b in self.bias {
            out.extend_from_slice(&b.to_le_bytes());
        }
        out
    }
}

/// Orientation fusion over accelerometer, gyroscope, and magnetometer.
///
/// One instance is shared between the fusion-core node that drives it and
/// the consumer nodes that select its outputs.
pub trait Fusion: Send {
    /// Prepares the filter for a stream at the given rate.
    fn init(&mut self, rate_hz: f64);

    /// Discards filter state.
    fn reset(&mut self);

    /// Feeds one synchronized sample set.
    fn update(
        &mut self,
        accel: [f32; 3],
        gyro: Option<[f32; 3]>,
        mag: Option<[f32; 3]>,
        ts: Timestamp,
    );

    /// Current orientation quaternion `[x, y, z, w]`.
    fn quaternion(&self) -> [f32; 4];

    /// Current gravity vector estimate.
    fn gravity(&self) -> [f32; 3];

    /// Current gravity-free acceleration.
    fn linear_acceleration(&self) -> [f32; 3];
}

/// Complementary-filter fusion.
///
/// Gravity is a low-pass of the accelerometer; linear acceleration the
/// residual; the quaternion is the tilt rotating measured gravity onto
/// the reference Z axis. Accurate enough to exercise every pipeline path
/// without the vendor library.
#[derive(Debug)]
pub struct ComplementaryFusion {
    alpha: f32,
    gravity: [f32; 3],
    linear: [f32; 3],
    quat: [f32; 4],
    initialized: bool,
}

impl ComplementaryFusion {
    /// Creates a filter with the default smoothing factor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: 0.1,
            gravity: [0.0, 0.0, 9.81],
            linear: [0.0; 3],
            quat: [0.0, 0.0, 0.0, 1.0],
            initialized: false,
        }
    }

    fn recompute_quaternion(&mut self) {
        // Tilt from reference +Z to the measured gravity direction.
        let [gx, gy, gz] = self.gravity;
        let norm = (gx * gx + gy * gy + gz * gz).sqrt();
        if norm < 1e-6 {
            return;
        }
        let (ux, uy, uz) = (gx / norm, gy / norm, gz / norm);
        // Half-angle construction between (0,0,1) and gravity unit.
        let w = 1.0 + uz;
        if w < 1e-6 {
            // Antipodal: gravity points straight down the -Z axis.
            self.quat = [1.0, 0.0, 0.0, 0.0];
            return;
        }
        let (x, y, z) = (-uy, ux, 0.0);
        let mag = (w * w + x * x + y * y + z * z).sqrt();
        self.quat = [x / mag, y / mag, z / mag, w / mag];
    }
}

impl Default for ComplementaryFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl Fusion for ComplementaryFusion {
    fn init(&mut self, rate_hz: f64) {
        // Faster streams get a smaller per-sample blend.
        #[allow(clippy::cast_possible_truncation)]
        let alpha = (10.0 / rate_hz.max(1.0)) as f32;
        self.alpha = alpha.clamp(0.001, 1.0);
    }

    fn reset(&mut self) {
        self.gravity = [0.0, 0.0, 9.81];
        self.linear = [0.0; 3];
        self.quat = [0.0, 0.0, 0.0, 1.0];
        self.initialized = false;
    }

    fn update(
        &mut self,
        accel: [f32; 3],
        _gyro: Option<[f32; 3]>,
        _mag: Option<[f32; 3]>,
        _ts: Timestamp,
    ) {
        if self.initialized {
            for (g, a) in self.gravity.iter_mut().zip(accel) {
                *g += self.alpha * (a - *g);
            }
        } else {
            self.gravity = accel;
            self.initialized = true;
        }
        for ((l, a), g) in self.linear.iter_mut().zip(accel).zip(self.gravity) {
            *l = a - g;
        }
        self.recompute_quaternion();
    }

    fn quaternion(&self) -> [f32; 4] {
        self.quat
    }

    fn gravity(&self) -> [f32; 3] {
        self.gravity
    }

    fn linear_acceleration(&self) -> [f32; 3] {
        self.linear
    }
}

/// Reconciliation between the hardware FIFO clock and the AP clock.
pub trait Timesync: Send + Sync {
    /// Records one (hardware, AP) observation pair.
    fn add_pair(&self, hw: Timestamp, ap: Timestamp);

    /// Estimates the AP time of a hardware timestamp.
    ///
    /// Returns `None` before the first observation.
    fn estimate(&self, hw: Timestamp) -> Option<Timestamp>;
}

/// Offset-tracking timesync: AP = HW + last observed offset.
#[derive(Debug, Default)]
pub struct LinearTimesync {
    // (hw, ap) of the most recent pair; offset is recomputed per estimate.
    last: Mutex<Option<(Timestamp, Timestamp)>>,
}

impl LinearTimesync {
    /// Creates an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Timesync for LinearTimesync {
    fn add_pair(&self, hw: Timestamp, ap: Timestamp) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some((hw, ap));
        }
    }

    fn estimate(&self, hw: Timestamp) -> Option<Timestamp> {
        let (ref_hw, ref_ap) = (*self.last.lock().ok()?)?;
        let delta = hw.abs_diff(ref_hw);
        if hw >= ref_hw {
            ref_ap.checked_add(delta)
        } else {
            ref_ap.checked_sub(delta)
        }
    }
}
