//! Per-kind sample processing.
//!
//! Each node owns one [`SampleProcessor`]: the policy turning decoded or
//! dependency-provided samples into that sensor's output. Processors are
//! self-contained - placement, calibration, and fusion services are
//! injected at construction - so the node runtime stays kind-agnostic.

use std::sync::{Arc, Mutex};

use smallvec::SmallVec;
use tracing::warn;

use hal_types::{Sample, SensorHandle};

use crate::persist::BiasStore;
use crate::placement::Placement;
use crate::vendor::{Calibration, Fusion};
use crate::Result;

/// Input of one processing cycle.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// The trigger sample driving this cycle.
    pub sample: Sample,
    /// Latest data from non-trigger dependencies, synchronized to the
    /// trigger timestamp.
    pub aux: SmallVec<[(SensorHandle, Sample); 4]>,
}

impl ProcessInput {
    /// Creates an input with no auxiliary dependency data.
    #[must_use]
    pub fn trigger_only(sample: Sample) -> Self {
        Self {
            sample,
            aux: SmallVec::new(),
        }
    }

    /// Returns the auxiliary sample from a given producer, if present.
    #[must_use]
    pub fn aux_for(&self, producer: SensorHandle) -> Option<&Sample> {
        self.aux
            .iter()
            .find(|(h, _)| *h == producer)
            .map(|(_, s)| s)
    }
}

/// Kind-specific processing policy of one node.
pub trait SampleProcessor: Send {
    /// Called on the node's first enable, before data flows.
    ///
    /// # Errors
    ///
    /// A failure is logged by the node; data flow proceeds uncalibrated.
    fn on_first_enable(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on the node's last disable.
    fn on_last_disable(&mut self) {}

    /// Turns one input into an output sample, or `None` to emit nothing.
    fn process(&mut self, input: ProcessInput) -> Option<Sample>;
}

/// Copies raw values through unchanged.
///
/// Used for scalar sensors whose driver already applies scaling, and as
/// the neutral processor in tests.
#[derive(Debug, Default)]
pub struct PassthroughProcessor;

impl PassthroughProcessor {
    /// Creates a passthrough processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SampleProcessor for PassthroughProcessor {
    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        for i in 0..4 {
            out.processed[i] = out.raw[i];
        }
        Some(out)
    }
}

/// Emits only when the value changed since the last emission.
#[derive(Debug, Default)]
pub struct OnChangeProcessor {
    last: Option<[f32; 4]>,
}

impl OnChangeProcessor {
    /// Creates an on-change processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleProcessor for OnChangeProcessor {
    fn on_last_disable(&mut self) {
        self.last = None;
    }

    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        for i in 0..4 {
            out.processed[i] = out.raw[i];
        }
        if self.last == Some(out.raw) {
            return None;
        }
        self.last = Some(out.raw);
        Some(out)
    }
}

/// 3-axis motion sensor: placement rotation plus vendor calibration.
///
/// Output layout: `processed[0..3]` calibrated axes, `offset` the bias in
/// effect, accuracy from the calibration quality. Bias state round-trips
/// through the [`BiasStore`] at enable/disable.
pub struct MotionProcessor {
    placement: Placement,
    calibration: Box<dyn Calibration>,
    store: Arc<dyn BiasStore>,
    resource_id: String,
    rate_hz: f64,
}

impl MotionProcessor {
    /// Creates a motion processor.
    #[must_use]
    pub fn new(
        placement: Placement,
        calibration: Box<dyn Calibration>,
        store: Arc<dyn BiasStore>,
        resource_id: impl Into<String>,
        rate_hz: f64,
    ) -> Self {
        Self {
            placement,
            calibration,
            store,
            resource_id: resource_id.into(),
            rate_hz,
        }
    }
}

impl SampleProcessor for MotionProcessor {
    fn on_first_enable(&mut self) -> Result<()> {
        self.calibration.init(self.rate_hz);
        if let Some(state) = self.store.load(&self.resource_id) {
            self.calibration.load_state(&state);
        }
        Ok(())
    }

    fn on_last_disable(&mut self) {
        let state = self.calibration.save_state();
        if let Err(err) = self.store.save(&self.resource_id, &state) {
            warn!(resource = %self.resource_id, %err, "bias save failed");
        }
    }

    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        let rotated = self.placement.apply(out.raw_vec3());
        out.raw[0] = rotated[0];
        out.raw[1] = rotated[1];
        out.raw[2] = rotated[2];

        out.accuracy = self.calibration.update(rotated, out.hw_timestamp);
        let bias = self.calibration.bias();
        out.offset = bias;
        out.set_processed_vec3([
            rotated[0] - bias[0],
            rotated[1] - bias[1],
            rotated[2] - bias[2],
        ]);
        Some(out)
    }
}

/// Uncalibrated mirror of a calibrated motion sensor.
///
/// Re-adds the bias the calibrated path removed: `processed[0..3]` the
/// raw (bias-inclusive) axes, `offset` the bias so consumers can undo it.
#[derive(Debug, Default)]
pub struct UncalibratedProcessor;

impl UncalibratedProcessor {
    /// Creates an uncalibrated-variant processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SampleProcessor for UncalibratedProcessor {
    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        let calibrated = out.processed_vec3();
        out.set_processed_vec3([
            calibrated[0] + out.offset[0],
            calibrated[1] + out.offset[1],
            calibrated[2] + out.offset[2],
        ]);
        Some(out)
    }
}

/// Shared fusion algorithm instance.
pub type SharedFusion = Arc<Mutex<Box<dyn Fusion>>>;

/// Internal fusion core: feeds the fusion algorithm from its wired
/// dependencies and emits the orientation quaternion.
///
/// The trigger is the accelerometer; gyroscope and magnetometer data are
/// looked up from their rings at the trigger timestamp.
pub struct FusionCoreProcessor {
    fusion: SharedFusion,
    gyro: Option<SensorHandle>,
    mag: Option<SensorHandle>,
    rate_hz: f64,
}

impl FusionCoreProcessor {
    /// Creates a fusion core over the given auxiliary producers.
    #[must_use]
    pub fn new(
        fusion: SharedFusion,
        gyro: Option<SensorHandle>,
        mag: Option<SensorHandle>,
        rate_hz: f64,
    ) -> Self {
        Self {
            fusion,
            gyro,
            mag,
            rate_hz,
        }
    }

    fn lock_fusion(&self) -> std::sync::MutexGuard<'_, Box<dyn Fusion>> {
        match self.fusion.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SampleProcessor for FusionCoreProcessor {
    fn on_first_enable(&mut self) -> Result<()> {
        self.lock_fusion().init(self.rate_hz);
        Ok(())
    }

    fn on_last_disable(&mut self) {
        self.lock_fusion().reset();
    }

    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let accel = input.sample.processed_vec3();
        let gyro = self
            .gyro
            .and_then(|h| input.aux_for(h))
            .map(Sample::processed_vec3);
        let mag = self
            .mag
            .and_then(|h| input.aux_for(h))
            .map(Sample::processed_vec3);

        let mut out = input.sample;
        let quat = {
            let mut fusion = self.lock_fusion();
            fusion.update(accel, gyro, mag, out.hw_timestamp);
            fusion.quaternion()
        };
        out.processed[0] = quat[0];
        out.processed[1] = quat[1];
        out.processed[2] = quat[2];
        out.processed[3] = quat[3];
        out.processed[4] = 0.0;
        Some(out)
    }
}

/// Output selected from a fusion core by its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionOutput {
    /// Gravity vector.
    Gravity,
    /// Gravity-free acceleration.
    LinearAcceleration,
    /// Orientation quaternion.
    Quaternion,
}

/// Consumer of a fusion core: selects one of the fusion outputs per
/// trigger sample.
pub struct FusionOutputProcessor {
    fusion: SharedFusion,
    select: FusionOutput,
}

impl FusionOutputProcessor {
    /// Creates a selector over the shared fusion instance.
    #[must_use]
    pub fn new(fusion: SharedFusion, select: FusionOutput) -> Self {
        Self { fusion, select }
    }
}

impl SampleProcessor for FusionOutputProcessor {
    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        let fusion = match self.fusion.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.select {
            FusionOutput::Gravity => out.set_processed_vec3(fusion.gravity()),
            FusionOutput::LinearAcceleration => {
                out.set_processed_vec3(fusion.linear_acceleration());
            }
            FusionOutput::Quaternion => {
                let q = fusion.quaternion();
                out.processed[0] = q[0];
                out.processed[1] = q[1];
                out.processed[2] = q[2];
                out.processed[3] = q[3];
            }
        }
        Some(out)
    }
}

/// Monotonic step counter, emitting on change only.
#[derive(Debug, Default)]
pub struct StepCounterProcessor {
    last_count: Option<f32>,
}

impl StepCounterProcessor {
    /// Creates a step-counter processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleProcessor for StepCounterProcessor {
    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        let count = out.raw[0];
        if self.last_count == Some(count) {
            return None;
        }
        self.last_count = Some(count);
        out.processed[0] = count;
        Some(out)
    }
}

/// One event per detected step.
#[derive(Debug, Default)]
pub struct StepDetectorProcessor;

impl SampleProcessor for StepDetectorProcessor {
    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        out.processed[0] = 1.0;
        Some(out)
    }
}

/// Single significant-motion event; the node disables itself after it.
#[derive(Debug, Default)]
pub struct SignificantMotionProcessor;

impl SampleProcessor for SignificantMotionProcessor {
    fn process(&mut self, input: ProcessInput) -> Option<Sample> {
        let mut out = input.sample;
        out.processed[0] = 1.0;
        Some(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use glam::{Mat3, Vec3};

    use hal_types::{Accuracy, Timestamp};

    use crate::persist::MemoryBiasStore;
    use crate::vendor::{ComplementaryFusion, LowPassBias};

    fn sample(raw: [f32; 4], ts: u64) -> Sample {
        let mut s = Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(ts));
        s.raw = raw;
        s
    }

    #[test]
    fn passthrough_copies_raw() {
        let mut p = PassthroughProcessor::new();
        let out = p
            .process(ProcessInput::trigger_only(sample([1.0, 2.0, 3.0, 4.0], 1)))
            .unwrap();
        assert_eq!(out.processed[..4], [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn on_change_suppresses_repeats() {
        let mut p = OnChangeProcessor::new();
        assert!(p
            .process(ProcessInput::trigger_only(sample([25.0, 0.0, 0.0, 0.0], 1)))
            .is_some());
        assert!(p
            .process(ProcessInput::trigger_only(sample([25.0, 0.0, 0.0, 0.0], 2)))
            .is_none());
        assert!(p
            .process(ProcessInput::trigger_only(sample([26.0, 0.0, 0.0, 0.0], 3)))
            .is_some());
    }

    #[test]
    fn motion_applies_placement_and_bias() {
        // 90-degree Z rotation: +X -> +Y.
        let placement = Placement {
            rotation: Mat3::from_cols_array_2d(&[
                [0.0, 1.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0],
            ]),
            location: Vec3::ZERO,
        };
        let store = Arc::new(MemoryBiasStore::new());
        let mut p = MotionProcessor::new(
            placement,
            Box::new(LowPassBias::new(1.0)),
            store,
            "accel_bias_m0",
            100.0,
        );
        p.on_first_enable().unwrap();

        let out = p
            .process(ProcessInput::trigger_only(sample([2.0, 0.0, 0.0, 0.0], 1)))
            .unwrap();
        // Rotated to +Y; alpha=1 bias swallows it entirely.
        assert_eq!(out.raw[1], 2.0);
        assert_eq!(out.offset[1], 2.0);
        assert_eq!(out.processed_vec3(), [0.0, 0.0, 0.0]);
        assert_eq!(out.accuracy, Accuracy::Unreliable);
    }

    #[test]
    fn motion_persists_bias_across_sessions() {
        let store: Arc<MemoryBiasStore> = Arc::new(MemoryBiasStore::new());
        let mut p = MotionProcessor::new(
            Placement::default(),
            Box::new(LowPassBias::new(0.5)),
            Arc::clone(&store) as Arc<dyn BiasStore>,
            "gyro_bias_m0",
            100.0,
        );
        p.on_first_enable().unwrap();
        for i in 0..32 {
            p.process(ProcessInput::trigger_only(sample([0.4, 0.0, 0.0, 0.0], i)));
        }
        p.on_last_disable();
        assert_eq!(store.len(), 1);

        // A fresh session restores the learned bias.
        let mut p2 = MotionProcessor::new(
            Placement::default(),
            Box::new(LowPassBias::new(0.5)),
            Arc::clone(&store) as Arc<dyn BiasStore>,
            "gyro_bias_m0",
            100.0,
        );
        p2.on_first_enable().unwrap();
        let out = p2
            .process(ProcessInput::trigger_only(sample([0.4, 0.0, 0.0, 0.0], 99)))
            .unwrap();
        assert!((out.offset[0] - 0.4).abs() < 1e-3);
    }

    #[test]
    fn uncalibrated_readds_bias() {
        let mut p = UncalibratedProcessor::new();
        let mut s = sample([0.0; 4], 1);
        s.set_processed_vec3([1.0, 2.0, 3.0]);
        s.offset = [0.1, 0.2, 0.3];

        let out = p.process(ProcessInput::trigger_only(s)).unwrap();
        assert!((out.processed[0] - 1.1).abs() < 1e-6);
        assert!((out.processed[1] - 2.2).abs() < 1e-6);
        assert!((out.processed[2] - 3.3).abs() < 1e-6);
        assert_eq!(out.offset, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn fusion_core_emits_quaternion() {
        let fusion: SharedFusion =
            Arc::new(Mutex::new(Box::new(ComplementaryFusion::new())));
        let gyro = SensorHandle::from_raw(2);
        let mut p = FusionCoreProcessor::new(Arc::clone(&fusion), Some(gyro), None, 100.0);
        p.on_first_enable().unwrap();

        let mut accel = sample([0.0; 4], 10);
        accel.set_processed_vec3([0.0, 0.0, 9.81]);
        let mut gyro_sample = Sample::new(gyro, Timestamp::from_nanos(9));
        gyro_sample.set_processed_vec3([0.0, 0.0, 0.01]);

        let mut input = ProcessInput::trigger_only(accel);
        input.aux.push((gyro, gyro_sample));

        let out = p.process(input).unwrap();
        // Flat: identity-ish quaternion with w ~ 1.
        assert!((out.processed[3] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn fusion_output_selects_gravity() {
        let fusion: SharedFusion =
            Arc::new(Mutex::new(Box::new(ComplementaryFusion::new())));
        {
            let mut f = fusion.lock().unwrap();
            f.init(100.0);
            f.update([0.0, 0.0, 9.81], None, None, Timestamp::from_nanos(1));
        }
        let mut p = FusionOutputProcessor::new(Arc::clone(&fusion), FusionOutput::Gravity);
        let out = p
            .process(ProcessInput::trigger_only(sample([0.0; 4], 2)))
            .unwrap();
        assert!((out.processed[2] - 9.81).abs() < 1e-2);
    }

    #[test]
    fn step_counter_emits_on_change_only() {
        let mut p = StepCounterProcessor::new();
        assert!(p
            .process(ProcessInput::trigger_only(sample([10.0, 0.0, 0.0, 0.0], 1)))
            .is_some());
        assert!(p
            .process(ProcessInput::trigger_only(sample([10.0, 0.0, 0.0, 0.0], 2)))
            .is_none());
        assert!(p
            .process(ProcessInput::trigger_only(sample([11.0, 0.0, 0.0, 0.0], 3)))
            .is_some());
    }
}
