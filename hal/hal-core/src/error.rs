//! Error types for the hal-core crate.

use thiserror::Error;

/// Errors raised by the HAL engine.
///
/// Configuration and API-contract failures propagate synchronously to
/// the caller; device I/O failures inside worker threads are logged and
/// recovered locally instead (a continuing data stream is worth more
/// than strict correctness of one event).
#[derive(Debug, Error)]
pub enum HalError {
    /// Registry-level failure.
    #[error(transparent)]
    Sensor(#[from] hal_types::SensorError),

    /// Graph construction or ordering failure.
    #[error(transparent)]
    Graph(#[from] hal_graph::GraphError),

    /// Bounded plumbing structure rejected an entry.
    #[error(transparent)]
    Plumbing(#[from] hal_plumbing::PlumbingError),

    /// A caller-supplied parameter violates the sensor's contract.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The operation is not valid in the sensor's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A device read or write failed.
    #[error("device i/o: {0}")]
    DeviceIo(String),

    /// A node already has the maximum number of dependencies.
    #[error("too many dependencies (max {max})")]
    TooManyDependencies {
        /// The dependency slot limit.
        max: usize,
    },

    /// A requester handle does not fit the enable bitmask.
    #[error("requester handle {0} out of mask range")]
    RequesterOutOfRange(u32),

    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),

    /// Placement rotation matrix is singular.
    #[error("rotation matrix is singular (|det| = {det:e})")]
    SingularMatrix {
        /// Absolute determinant of the rejected matrix.
        det: f32,
    },

    /// Discovery found no usable hardware sensor.
    #[error("no valid hardware sensor discovered")]
    NoSensors,
}

impl HalError {
    /// Creates an invalid parameter error.
    #[must_use]
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter(reason.into())
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    /// Creates a device I/O error.
    #[must_use]
    pub fn device_io(reason: impl Into<String>) -> Self {
        Self::DeviceIo(reason.into())
    }

    /// Creates a config error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}

impl From<serde_json::Error> for HalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert!(HalError::invalid_parameter("timeout on zero fifo")
            .to_string()
            .contains("timeout"));
        assert!(HalError::TooManyDependencies { max: 6 }
            .to_string()
            .contains('6'));
        assert!(HalError::SingularMatrix { det: 1e-9 }
            .to_string()
            .contains("singular"));
    }

    #[test]
    fn from_sensor_error() {
        let err: HalError = hal_types::SensorError::UnknownHandle(3).into();
        assert!(err.to_string().contains('3'));
    }
}
