//! Timestamp-gated output-data-rate switch records.

use std::collections::VecDeque;
use std::sync::Mutex;

use hal_types::{Duration, Timestamp};

use crate::error::PlumbingError;

/// Depth of the bounded rate-switch record queue.
pub const ODR_STACK_DEPTH: usize = 20;

/// One recorded rate switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdrSwitch {
    /// Timestamp the switch was requested at.
    pub at: Timestamp,
    /// Sampling period in effect from `at` onward.
    pub pollrate: Duration,
}

/// Bounded queue of pending rate switches, committed by data timestamps.
///
/// When a sensor's rate changes, samples already buffered in the kernel
/// FIFO were produced at the old rate. The configuring thread records
/// (timestamp, new period) here; the polling thread tags each sample via
/// [`OdrSwitchStack::current_for`], which commits a switch only once a
/// sample timestamp reaches it. A sample is therefore never tagged with
/// a rate whose switch record is newer than the sample itself.
///
/// # Example
///
/// ```
/// use hal_plumbing::OdrSwitchStack;
/// use hal_types::{Duration, Timestamp};
///
/// let stack = OdrSwitchStack::new(Duration::from_hz(100.0));
/// stack.push(Timestamp::from_nanos(1_000), Duration::from_hz(400.0)).unwrap();
///
/// // A sample from before the switch keeps the old rate.
/// assert_eq!(stack.current_for(Timestamp::from_nanos(500)), Duration::from_hz(100.0));
/// // A sample at or after the switch gets the new rate.
/// assert_eq!(stack.current_for(Timestamp::from_nanos(1_000)), Duration::from_hz(400.0));
/// ```
#[derive(Debug)]
pub struct OdrSwitchStack {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    current: Duration,
    pending: VecDeque<OdrSwitch>,
}

impl OdrSwitchStack {
    /// Creates a stack with the given initial pollrate.
    #[must_use]
    pub fn new(initial: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: initial,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Records a rate switch effective from `at` onward.
    ///
    /// # Errors
    ///
    /// Returns [`PlumbingError::StackFull`] when [`ODR_STACK_DEPTH`]
    /// switches are already pending; the switch is dropped.
    pub fn push(&self, at: Timestamp, pollrate: Duration) -> crate::Result<()> {
        let mut inner = self.lock();
        if inner.pending.len() >= ODR_STACK_DEPTH {
            return Err(PlumbingError::stack_full(ODR_STACK_DEPTH));
        }
        inner.pending.push_back(OdrSwitch { at, pollrate });
        Ok(())
    }

    /// Returns the pollrate in effect for a sample at `ts`, committing
    /// every switch the sample has passed.
    #[must_use]
    pub fn current_for(&self, ts: Timestamp) -> Duration {
        let mut inner = self.lock();
        while let Some(front) = inner.pending.front() {
            if front.at <= ts {
                inner.current = front.pollrate;
                inner.pending.pop_front();
            } else {
                break;
            }
        }
        inner.current
    }

    /// Returns the last committed pollrate without committing anything.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.lock().current
    }

    /// Returns the number of pending switches.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
