//! Thread-safe fixed-capacity plumbing between sensor pipeline stages.
//!
//! Every structure in this crate sits between a producer thread and a
//! consumer thread and is bounded: when full it either evicts the oldest
//! entry ([`TimedRing`]) or rejects the new one ([`FlushStack`],
//! [`OdrSwitchStack`], [`PipeSender`]) - it never blocks the producer.
//!
//! # Ordering by timestamp
//!
//! Flush completion and rate switching are both ordering problems between
//! independently-clocked threads. The structures here resolve them by
//! comparing timestamps rather than flags:
//!
//! - [`FlushStack`] releases a flush request only once a sample timestamp
//!   passes the request timestamp.
//! - [`OdrSwitchStack`] tags each sample with the rate whose switch
//!   record it has passed, so in-flight samples keep their pre-switch
//!   pollrate.
//! - [`DeferredFlush`] parks a flush aimed at a node until that node has
//!   processed data up to the request timestamp.
//!
//! # Example
//!
//! ```
//! use hal_plumbing::TimedRing;
//! use hal_types::Timestamp;
//!
//! let ring: TimedRing<f32> = TimedRing::new(4);
//! ring.push(Timestamp::from_nanos(100), 1.0);
//! ring.push(Timestamp::from_nanos(200), 2.0);
//!
//! assert_eq!(ring.latest_at_or_before(Timestamp::from_nanos(150)), Some((Timestamp::from_nanos(100), 1.0)));
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod flush;
mod odr;
mod pipe;
mod ring;

pub use error::PlumbingError;
pub use flush::{DeferredFlush, FlushRequest, FlushStack, FLUSH_STACK_DEPTH};
pub use odr::{OdrSwitch, OdrSwitchStack, ODR_STACK_DEPTH};
pub use pipe::{event_pipe, PipeEvent, PipeReceiver, PipeSender};
pub use ring::TimedRing;

/// Result type for plumbing operations.
pub type Result<T> = std::result::Result<T, PlumbingError>;
