//! Static sensor descriptors and handles.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::SensorError;
use crate::kind::SensorKind;

/// Stable identifier of one registered sensor.
///
/// Handles are 1-based integers assigned at registration, strictly
/// increasing, and never reused for the process lifetime. Handle `0` is
/// reserved and never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorHandle(u32);

impl SensorHandle {
    /// Creates a handle from its raw value.
    ///
    /// Intended for test fixtures and deserialization; live handles come
    /// from [`crate::SensorsList::add`].
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static attributes of one sensor instance.
///
/// Built once at HAL-open time from a discovered IIO device or from a
/// virtual-sensor template, validated on registration, and immutable
/// afterward.
///
/// # Example
///
/// ```
/// use hal_types::{SensorDescriptor, SensorKind};
///
/// let desc = SensorDescriptor::builder(SensorKind::Gyroscope, "lsm6dsm gyro")
///     .vendor("STMicroelectronics")
///     .max_range(34.9)
///     .rate_bounds(1.6, 416.0)
///     .fifo(64, 416)
///     .module(1)
///     .build();
///
/// assert!(desc.validate().is_ok());
/// assert!(!desc.is_on_change());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorDescriptor {
    /// Quantity this sensor reports.
    pub kind: SensorKind,
    /// Human-readable sensor name.
    pub name: String,
    /// Vendor string.
    pub vendor: String,
    /// Driver or template version.
    pub version: u32,
    /// Smallest distinguishable value change, in the kind's unit.
    pub resolution: f32,
    /// Largest representable value, in the kind's unit.
    pub max_range: f32,
    /// Current draw while streaming, in mA.
    pub power_ma: f32,
    /// Slowest supported output rate in Hz. Zero means on-change.
    pub min_rate_hz: f32,
    /// Fastest supported output rate in Hz.
    pub max_rate_hz: f32,
    /// FIFO slots reserved for this sensor when sharing a hardware FIFO.
    pub fifo_reserved: u32,
    /// Largest number of samples the hardware FIFO can batch.
    pub fifo_max: u32,
    /// Whether events from this sensor hold a wake lock.
    pub wake_up: bool,
    /// Distinguishes multiple physical instances of the same kind.
    pub module_id: u16,
}

impl SensorDescriptor {
    /// Starts building a descriptor with the given kind and name.
    #[must_use]
    pub fn builder(kind: SensorKind, name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(kind, name)
    }

    /// Checks the registration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::InvalidDescriptor`] when `max_range` is not
    /// positive, the rate bounds are negative or inverted, or the FIFO
    /// maximum is below the reserved count.
    pub fn validate(&self) -> Result<(), SensorError> {
        if self.max_range <= 0.0 {
            return Err(SensorError::invalid_descriptor(
                &self.name,
                "max range must be positive",
            ));
        }
        if self.min_rate_hz < 0.0 {
            return Err(SensorError::invalid_descriptor(
                &self.name,
                "min rate must not be negative",
            ));
        }
        if self.max_rate_hz < self.min_rate_hz {
            return Err(SensorError::invalid_descriptor(
                &self.name,
                "max rate must not be below min rate",
            ));
        }
        if self.fifo_max < self.fifo_reserved {
            return Err(SensorError::invalid_descriptor(
                &self.name,
                "fifo max must not be below fifo reserved",
            ));
        }
        Ok(())
    }

    /// Checks whether this sensor reports on-change rather than streaming.
    ///
    /// True when the minimum rate is (approximately) zero or the kind is
    /// on-change by contract.
    #[must_use]
    pub fn is_on_change(&self) -> bool {
        self.min_rate_hz.abs() < 1e-6 || self.kind.default_on_change()
    }

    /// Returns the registry identity triple.
    #[must_use]
    pub fn identity(&self) -> (SensorKind, &str, u16) {
        (self.kind, &self.name, self.module_id)
    }
}

/// Builder for [`SensorDescriptor`].
///
/// Unset fields default to safe values: identity version 1, zero power,
/// rate bounds `[0, 0]`, no FIFO, not waking, module 0.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    descriptor: SensorDescriptor,
}

impl DescriptorBuilder {
    fn new(kind: SensorKind, name: impl Into<String>) -> Self {
        Self {
            descriptor: SensorDescriptor {
                kind,
                name: name.into(),
                vendor: String::new(),
                version: 1,
                resolution: 0.0,
                max_range: 0.0,
                power_ma: 0.0,
                min_rate_hz: 0.0,
                max_rate_hz: 0.0,
                fifo_reserved: 0,
                fifo_max: 0,
                wake_up: false,
                module_id: 0,
            },
        }
    }

    /// Sets the vendor string.
    #[must_use]
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.descriptor.vendor = vendor.into();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.descriptor.version = version;
        self
    }

    /// Sets the resolution.
    #[must_use]
    pub fn resolution(mut self, resolution: f32) -> Self {
        self.descriptor.resolution = resolution;
        self
    }

    /// Sets the maximum range.
    #[must_use]
    pub fn max_range(mut self, max_range: f32) -> Self {
        self.descriptor.max_range = max_range;
        self
    }

    /// Sets the power draw in mA.
    #[must_use]
    pub fn power(mut self, power_ma: f32) -> Self {
        self.descriptor.power_ma = power_ma;
        self
    }

    /// Sets the output rate bounds in Hz.
    #[must_use]
    pub fn rate_bounds(mut self, min_hz: f32, max_hz: f32) -> Self {
        self.descriptor.min_rate_hz = min_hz;
        self.descriptor.max_rate_hz = max_hz;
        self
    }

    /// Sets the FIFO reserved and maximum counts.
    #[must_use]
    pub fn fifo(mut self, reserved: u32, max: u32) -> Self {
        self.descriptor.fifo_reserved = reserved;
        self.descriptor.fifo_max = max;
        self
    }

    /// Marks the sensor as wake-up.
    #[must_use]
    pub fn wake_up(mut self, wake_up: bool) -> Self {
        self.descriptor.wake_up = wake_up;
        self
    }

    /// Sets the module id.
    #[must_use]
    pub fn module(mut self, module_id: u16) -> Self {
        self.descriptor.module_id = module_id;
        self
    }

    /// Finishes the build.
    #[must_use]
    pub fn build(self) -> SensorDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn accel() -> SensorDescriptor {
        SensorDescriptor::builder(SensorKind::Accelerometer, "test accel")
            .vendor("test")
            .max_range(156.9)
            .rate_bounds(1.6, 416.0)
            .fifo(32, 416)
            .build()
    }

    #[test]
    fn builder_defaults() {
        let desc = SensorDescriptor::builder(SensorKind::Pressure, "baro").build();
        assert_eq!(desc.version, 1);
        assert_eq!(desc.module_id, 0);
        assert!(!desc.wake_up);
    }

    #[test]
    fn validate_accepts_wellformed() {
        assert!(accel().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_range() {
        let mut desc = accel();
        desc.max_range = 0.0;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_min_rate() {
        let mut desc = accel();
        desc.min_rate_hz = -1.0;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_rates() {
        let mut desc = accel();
        desc.min_rate_hz = 100.0;
        desc.max_rate_hz = 50.0;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn validate_rejects_fifo_below_reserved() {
        let mut desc = accel();
        desc.fifo_reserved = 64;
        desc.fifo_max = 32;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn on_change_from_zero_min_rate() {
        let mut desc = accel();
        assert!(!desc.is_on_change());
        desc.min_rate_hz = 0.0;
        assert!(desc.is_on_change());
    }

    #[test]
    fn on_change_from_kind() {
        let desc = SensorDescriptor::builder(SensorKind::AmbientTemperature, "temp")
            .max_range(85.0)
            .rate_bounds(1.0, 1.0)
            .build();
        assert!(desc.is_on_change());
    }

    #[test]
    fn handle_display() {
        assert_eq!(SensorHandle::from_raw(3).to_string(), "#3");
    }
}
