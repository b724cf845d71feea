//! Foundational sensor value types for the IIO HAL engine.
//!
//! This crate provides the vocabulary shared by every layer of the HAL:
//!
//! - [`Timestamp`] / [`Duration`] - nanosecond-precision timing
//! - [`SensorKind`] - physical and derived sensor quantities
//! - [`SensorDescriptor`] - static attributes of one sensor instance
//! - [`SensorsList`] - the handle-assigning sensor registry
//! - [`Sample`] - one timestamped reading in transit through the pipeline
//!
//! # Layer 0 Crate
//!
//! This crate has no I/O, no threads, and no platform dependencies. It can
//! be used in:
//! - The HAL engine itself
//! - Offline trace analysis tools
//! - Test harnesses and simulators
//!
//! # Handles
//!
//! Every registered sensor is identified by a [`SensorHandle`]: a 1-based
//! integer assigned at registration time, strictly increasing, unique, and
//! stable for the process lifetime. Handle `0` is never assigned.
//!
//! # Time
//!
//! All readings use [`Timestamp`] for nanosecond-precision timing. Enable
//! windows, rate switches, and flush sequencing all compare timestamps
//! rather than flags, so timing types are checked-arithmetic throughout.
//!
//! # Example
//!
//! ```
//! use hal_types::{SensorDescriptor, SensorKind, SensorsList};
//!
//! let mut list = SensorsList::new();
//! let accel = SensorDescriptor::builder(SensorKind::Accelerometer, "lsm6dsm accel")
//!     .vendor("STMicroelectronics")
//!     .max_range(156.9)
//!     .rate_bounds(1.6, 416.0)
//!     .fifo(64, 416)
//!     .build();
//!
//! let handle = list.add(accel).unwrap();
//! assert_eq!(handle.as_raw(), 1);
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod descriptor;
mod error;
mod kind;
mod registry;
mod sample;
mod time;

pub use descriptor::{DescriptorBuilder, SensorDescriptor, SensorHandle};
pub use error::SensorError;
pub use kind::SensorKind;
pub use registry::SensorsList;
pub use sample::{Accuracy, Sample, MAX_FLUSH_HANDLES};
pub use time::{Duration, Timestamp};

/// Result type for sensor type operations.
pub type Result<T> = std::result::Result<T, SensorError>;
