//! Requester bitmask for enable reference counting.

use hal_types::SensorHandle;

use crate::error::HalError;

/// Bitmask of requester handles holding a sensor enabled.
///
/// A sensor transitions its underlying resource only when this mask goes
/// `0 -> nonzero` (first enable) or `nonzero -> 0` (last disable); every
/// other enable call just flips a bit. Bit index is the raw handle value,
/// so the framework requester (raw handle 0) and up to 63 sensor handles
/// fit - comfortably above the O(10) sensors a HAL instance manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleMask(u64);

impl HandleMask {
    /// Creates an empty mask.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Checks whether no requester holds the sensor enabled.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Checks whether `requester` holds the sensor enabled.
    #[must_use]
    pub const fn contains(self, requester: SensorHandle) -> bool {
        let raw = requester.as_raw();
        raw < 64 && (self.0 >> raw) & 1 == 1
    }

    /// Sets the requester's bit.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::RequesterOutOfRange`] for handles above 63.
    pub fn set(&mut self, requester: SensorHandle) -> Result<(), HalError> {
        let raw = requester.as_raw();
        if raw >= 64 {
            return Err(HalError::RequesterOutOfRange(raw));
        }
        self.0 |= 1 << raw;
        Ok(())
    }

    /// Clears the requester's bit.
    pub fn clear(&mut self, requester: SensorHandle) {
        let raw = requester.as_raw();
        if raw < 64 {
            self.0 &= !(1 << raw);
        }
    }

    /// Returns every requester currently holding the sensor enabled.
    #[must_use]
    pub fn requesters(self) -> Vec<SensorHandle> {
        (0..64)
            .filter(|bit| (self.0 >> bit) & 1 == 1)
            .map(SensorHandle::from_raw)
            .collect()
    }
}
