//! Sensor kind taxonomy.
//!
//! Identifies the physical or derived quantity a sensor reports, and
//! carries the static dependency wiring for virtual (software) kinds.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The physical or derived quantity a sensor reports.
///
/// Hardware kinds are backed by an IIO driver; virtual kinds are computed
/// from the data of other sensors. Internal kinds exist only as graph
/// nodes feeding other virtual sensors and are never exposed in the
/// registered sensor list.
///
/// # Example
///
/// ```
/// use hal_types::SensorKind;
///
/// assert!(!SensorKind::Accelerometer.is_virtual());
/// assert!(SensorKind::Gravity.is_virtual());
/// assert!(SensorKind::Fusion6Axis.is_internal());
/// assert_eq!(
///     SensorKind::Gravity.dependencies(),
///     &[SensorKind::Fusion6Axis],
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum SensorKind {
    /// 3-axis linear acceleration, including gravity.
    Accelerometer,
    /// 3-axis magnetic field strength.
    Magnetometer,
    /// 3-axis angular velocity.
    Gyroscope,
    /// Barometric pressure.
    Pressure,
    /// Ambient temperature (on-change reporting).
    AmbientTemperature,
    /// Monotonically increasing step count (on-change reporting).
    StepCounter,
    /// One event per detected step.
    StepDetector,
    /// One-shot significant-motion trigger.
    SignificantMotion,
    /// Accelerometer without calibration bias removed.
    AccelerometerUncalibrated,
    /// Gyroscope without calibration bias removed.
    GyroscopeUncalibrated,
    /// Magnetometer without calibration bias removed.
    MagnetometerUncalibrated,
    /// Gravity vector isolated from linear acceleration.
    Gravity,
    /// Linear acceleration with gravity removed.
    LinearAcceleration,
    /// Rotation vector from 6-axis (accel + gyro) fusion.
    GameRotationVector,
    /// Rotation vector from 9-axis (accel + gyro + mag) fusion.
    RotationVector,
    /// Rotation vector from accel + mag fusion.
    GeomagneticRotationVector,
    /// Internal 6-axis fusion core (accel + gyro). Not exposed.
    Fusion6Axis,
    /// Internal 9-axis fusion core (accel + gyro + mag). Not exposed.
    Fusion9Axis,
    /// Internal accel + mag fusion core. Not exposed.
    GeomagFusion,
}

impl SensorKind {
    /// Checks whether this kind is internal-only.
    ///
    /// Internal kinds feed other virtual sensors but never appear in the
    /// list exposed to the upper framework.
    #[must_use]
    pub const fn is_internal(self) -> bool {
        matches!(
            self,
            Self::Fusion6Axis | Self::Fusion9Axis | Self::GeomagFusion
        )
    }

    /// Checks whether this kind is computed from other sensors' data.
    #[must_use]
    pub fn is_virtual(self) -> bool {
        !self.dependencies().is_empty()
    }

    /// Checks whether this kind auto-disables after a single event.
    #[must_use]
    pub const fn is_one_shot(self) -> bool {
        matches!(self, Self::SignificantMotion)
    }

    /// Checks whether this kind reports on-change rather than continuously,
    /// regardless of its declared rate bounds.
    #[must_use]
    pub const fn default_on_change(self) -> bool {
        matches!(self, Self::AmbientTemperature | Self::StepCounter)
    }

    /// Checks whether this kind delivers discrete events rather than a
    /// sampled data stream.
    #[must_use]
    pub const fn is_event_driven(self) -> bool {
        matches!(
            self,
            Self::StepCounter | Self::StepDetector | Self::SignificantMotion
        )
    }

    /// Returns the kinds this kind consumes data from.
    ///
    /// Empty for hardware kinds. The first entry is the trigger
    /// dependency: the one whose arriving sample drives this kind's
    /// computation cycle.
    #[must_use]
    pub const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::AccelerometerUncalibrated => &[Self::Accelerometer],
            Self::GyroscopeUncalibrated => &[Self::Gyroscope],
            Self::MagnetometerUncalibrated => &[Self::Magnetometer],
            Self::Fusion6Axis => &[Self::Accelerometer, Self::Gyroscope],
            Self::Fusion9Axis => &[
                Self::Accelerometer,
                Self::Gyroscope,
                Self::Magnetometer,
            ],
            Self::GeomagFusion => &[Self::Accelerometer, Self::Magnetometer],
            Self::Gravity | Self::LinearAcceleration | Self::GameRotationVector => {
                &[Self::Fusion6Axis]
            }
            Self::RotationVector => &[Self::Fusion9Axis],
            Self::GeomagneticRotationVector => &[Self::GeomagFusion],
            _ => &[],
        }
    }

    /// Returns the trigger dependency, if this kind has dependencies.
    #[must_use]
    pub fn trigger_dependency(self) -> Option<Self> {
        self.dependencies().first().copied()
    }

    /// Every virtual kind the engine knows how to build.
    ///
    /// Graph construction walks this list, adding each kind whose
    /// dependencies resolve within a module. Internal fusion cores come
    /// first so their consumers can resolve against them.
    #[must_use]
    pub const fn virtual_kinds() -> &'static [Self] {
        &[
            Self::Fusion6Axis,
            Self::Fusion9Axis,
            Self::GeomagFusion,
            Self::AccelerometerUncalibrated,
            Self::GyroscopeUncalibrated,
            Self::MagnetometerUncalibrated,
            Self::Gravity,
            Self::LinearAcceleration,
            Self::GameRotationVector,
            Self::RotationVector,
            Self::GeomagneticRotationVector,
        ]
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Accelerometer => "accelerometer",
            Self::Magnetometer => "magnetometer",
            Self::Gyroscope => "gyroscope",
            Self::Pressure => "pressure",
            Self::AmbientTemperature => "ambient-temperature",
            Self::StepCounter => "step-counter",
            Self::StepDetector => "step-detector",
            Self::SignificantMotion => "significant-motion",
            Self::AccelerometerUncalibrated => "accelerometer-uncalibrated",
            Self::GyroscopeUncalibrated => "gyroscope-uncalibrated",
            Self::MagnetometerUncalibrated => "magnetometer-uncalibrated",
            Self::Gravity => "gravity",
            Self::LinearAcceleration => "linear-acceleration",
            Self::GameRotationVector => "game-rotation-vector",
            Self::RotationVector => "rotation-vector",
            Self::GeomagneticRotationVector => "geomagnetic-rotation-vector",
            Self::Fusion6Axis => "fusion-6axis",
            Self::Fusion9Axis => "fusion-9axis",
            Self::GeomagFusion => "geomag-fusion",
        };
        f.write_str(name)
    }
}
