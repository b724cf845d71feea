//! Sensor dependency-graph engine for Linux IIO MEMS sensors.
//!
//! The engine bridges IIO-backed hardware sensors and the virtual
//! sensors computed from them - fusion, calibration, uncalibrated
//! variants - through a directed acyclic graph of sensor nodes, each
//! running on its own thread and exchanging timestamped samples through
//! bounded rings and pipes.
//!
//! # Architecture
//!
//! - [`SensorHal`] - the composition root: discovery, graph
//!   construction, pruning, wiring, thread startup
//! - [`node::SensorNode`] - one graph node: enable reference counting,
//!   rate negotiation, flush sequencing, dependency fan-out
//! - [`hw`] / [`sw`] - the polling and computation worker loops
//! - [`processors`] - per-kind processing policy
//! - [`proxy::ProxyManager`] - per-channel decimation and routing
//! - [`placement`] - layered mounting correction
//! - [`iio`] / [`vendor`] / [`persist`] - collaborator boundaries:
//!   device I/O, vendor algorithms, calibration persistence
//!
//! # Ordering by timestamp
//!
//! The engine has no global clock across hardware FIFOs, so every
//! cross-thread ordering guarantee - enable windows, rate switches,
//! flush completion - is enforced by timestamp comparison, never by
//! boolean flags. See `hal-plumbing` for the gated structures.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hal_core::{HalConfig, HalServices, SensorHal};
//! use hal_core::iio::{IioDevice, MockIioDevice};
//! use hal_types::SensorKind;
//!
//! let devices: Vec<Arc<dyn IioDevice>> = vec![
//!     Arc::new(MockIioDevice::three_axis(SensorKind::Accelerometer, "accel", 0, 0.01)),
//!     Arc::new(MockIioDevice::three_axis(SensorKind::Gyroscope, "gyro", 0, 0.001)),
//! ];
//! let mut hal = SensorHal::open(HalConfig::default(), devices, HalServices::default()).unwrap();
//!
//! // The 6-axis chain resolved: gravity is exposed.
//! assert!(hal.sensors().iter().any(|(_, d)| d.kind == SensorKind::Gravity));
//! hal.close();
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
mod config;
mod error;
pub mod hw;
pub mod iio;
mod mask;
pub mod node;
pub mod persist;
pub mod placement;
pub mod processors;
pub mod proxy;
mod service;
pub mod sw;
pub mod vendor;

pub use config::{HalConfig, KindOverride, LayerConfig, PlacementEntry, SwRetryPolicy};
pub use error::HalError;
pub use mask::HandleMask;
pub use node::{EventPayload, SensorEvent};
pub use service::{HalServices, SensorHal, FRAMEWORK_REQUESTER};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, HalError>;
