//! The handle-assigning sensor registry.

use crate::descriptor::{SensorDescriptor, SensorHandle};
use crate::error::SensorError;
use crate::kind::SensorKind;

/// Append-only list of registered sensors.
///
/// Assigns strictly increasing 1-based handles on successful insertion.
/// Built once at HAL-open time and read-only afterward; sensors are never
/// removed individually, only dropped with the whole list at teardown.
///
/// # Example
///
/// ```
/// use hal_types::{SensorDescriptor, SensorKind, SensorsList};
///
/// let mut list = SensorsList::new();
/// let desc = SensorDescriptor::builder(SensorKind::Accelerometer, "accel")
///     .max_range(156.9)
///     .rate_bounds(1.6, 416.0)
///     .build();
///
/// let handle = list.add(desc).unwrap();
/// assert_eq!(handle.as_raw(), 1);
/// assert_eq!(list.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SensorsList {
    sensors: Vec<(SensorHandle, SensorDescriptor)>,
    next_handle: u32,
}

impl SensorsList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sensors: Vec::new(),
            next_handle: 1,
        }
    }

    /// Registers a sensor, assigning the next handle.
    ///
    /// # Errors
    ///
    /// Returns an error and leaves the list unchanged when the descriptor
    /// fails [`SensorDescriptor::validate`] or a sensor with the same
    /// (kind, name, module) triple is already registered.
    pub fn add(&mut self, descriptor: SensorDescriptor) -> Result<SensorHandle, SensorError> {
        descriptor.validate()?;

        if self
            .sensors
            .iter()
            .any(|(_, d)| d.identity() == descriptor.identity())
        {
            return Err(SensorError::duplicate(
                descriptor.kind,
                descriptor.name,
                descriptor.module_id,
            ));
        }

        let handle = SensorHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        self.sensors.push((handle, descriptor));
        Ok(handle)
    }

    /// Returns the number of registered sensors, internal ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Checks whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Looks up a descriptor by handle.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::UnknownHandle`] when no sensor is
    /// registered under `handle`.
    pub fn get(&self, handle: SensorHandle) -> Result<&SensorDescriptor, SensorError> {
        self.sensors
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, d)| d)
            .ok_or(SensorError::UnknownHandle(handle.as_raw()))
    }

    /// Finds the handle of a sensor by kind within a module.
    ///
    /// When several instances of the same kind share a module, the first
    /// registered wins. Used by dependency wiring, which only connects
    /// sensors within the same module.
    #[must_use]
    pub fn find(&self, kind: SensorKind, module_id: u16) -> Option<SensorHandle> {
        self.sensors
            .iter()
            .find(|(_, d)| d.kind == kind && d.module_id == module_id)
            .map(|(h, _)| *h)
    }

    /// Iterates over every registered sensor.
    pub fn iter(&self) -> impl Iterator<Item = (SensorHandle, &SensorDescriptor)> {
        self.sensors.iter().map(|(h, d)| (*h, d))
    }

    /// Iterates over the sensors exposed to the upper framework.
    ///
    /// Internal fusion cores are filtered out.
    pub fn exposed(&self) -> impl Iterator<Item = (SensorHandle, &SensorDescriptor)> {
        self.iter().filter(|(_, d)| !d.kind.is_internal())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn descriptor(kind: SensorKind, name: &str, module: u16) -> SensorDescriptor {
        SensorDescriptor::builder(kind, name)
            .max_range(100.0)
            .rate_bounds(1.0, 400.0)
            .module(module)
            .build()
    }

    #[test]
    fn handles_start_at_one_and_increase() {
        let mut list = SensorsList::new();
        let h1 = list
            .add(descriptor(SensorKind::Accelerometer, "accel", 0))
            .unwrap();
        let h2 = list
            .add(descriptor(SensorKind::Gyroscope, "gyro", 0))
            .unwrap();
        let h3 = list
            .add(descriptor(SensorKind::Magnetometer, "mag", 0))
            .unwrap();

        assert_eq!(h1.as_raw(), 1);
        assert_eq!(h2.as_raw(), 2);
        assert_eq!(h3.as_raw(), 3);
    }

    #[test]
    fn rejected_descriptor_leaves_list_unchanged() {
        let mut list = SensorsList::new();
        list.add(descriptor(SensorKind::Accelerometer, "accel", 0))
            .unwrap();

        let mut bad = descriptor(SensorKind::Gyroscope, "gyro", 0);
        bad.max_range = 0.0;
        assert!(list.add(bad).is_err());
        assert_eq!(list.len(), 1);

        // The next accepted sensor still gets the next handle.
        let h = list
            .add(descriptor(SensorKind::Gyroscope, "gyro", 0))
            .unwrap();
        assert_eq!(h.as_raw(), 2);
    }

    #[test]
    fn duplicate_triple_rejected() {
        let mut list = SensorsList::new();
        list.add(descriptor(SensorKind::Accelerometer, "accel", 1))
            .unwrap();

        let dup = descriptor(SensorKind::Accelerometer, "accel", 1);
        assert!(matches!(list.add(dup), Err(SensorError::Duplicate { .. })));

        // Same kind and name in a different module is a distinct sensor.
        let other_module = descriptor(SensorKind::Accelerometer, "accel", 2);
        assert!(list.add(other_module).is_ok());
    }

    #[test]
    fn find_by_kind_and_module() {
        let mut list = SensorsList::new();
        let h1 = list
            .add(descriptor(SensorKind::Accelerometer, "accel-a", 1))
            .unwrap();
        let h2 = list
            .add(descriptor(SensorKind::Accelerometer, "accel-b", 2))
            .unwrap();

        assert_eq!(list.find(SensorKind::Accelerometer, 1), Some(h1));
        assert_eq!(list.find(SensorKind::Accelerometer, 2), Some(h2));
        assert_eq!(list.find(SensorKind::Gyroscope, 1), None);
    }

    #[test]
    fn exposed_filters_internal_kinds() {
        let mut list = SensorsList::new();
        list.add(descriptor(SensorKind::Accelerometer, "accel", 0))
            .unwrap();
        list.add(descriptor(SensorKind::Fusion6Axis, "6x fusion", 0))
            .unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.exposed().count(), 1);
    }

    #[test]
    fn get_unknown_handle() {
        let list = SensorsList::new();
        assert!(list.get(SensorHandle::from_raw(7)).is_err());
    }
}
