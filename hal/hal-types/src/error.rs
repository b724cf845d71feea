//! Error types for the hal-types crate.

use thiserror::Error;

use crate::kind::SensorKind;

/// Errors raised while building or querying the sensor registry.
#[derive(Debug, Error)]
pub enum SensorError {
    /// A descriptor field violates a registration invariant.
    #[error("invalid descriptor for '{name}': {reason}")]
    InvalidDescriptor {
        /// Name of the offending sensor.
        name: String,
        /// Which invariant was violated.
        reason: String,
    },

    /// A sensor with the same (kind, name, module) triple is registered.
    #[error("duplicate sensor: {kind} '{name}' in module {module}")]
    Duplicate {
        /// Kind of the duplicate.
        kind: SensorKind,
        /// Name of the duplicate.
        name: String,
        /// Module id of the duplicate.
        module: u16,
    },

    /// No sensor is registered under the given handle.
    #[error("unknown sensor handle: {0}")]
    UnknownHandle(u32),
}

impl SensorError {
    /// Creates an invalid descriptor error.
    #[must_use]
    pub fn invalid_descriptor(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a duplicate sensor error.
    #[must_use]
    pub fn duplicate(kind: SensorKind, name: impl Into<String>, module: u16) -> Self {
        Self::Duplicate {
            kind,
            name: name.into(),
            module,
        }
    }
}
