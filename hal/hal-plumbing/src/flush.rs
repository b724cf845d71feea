//! Flush request sequencing.
//!
//! A flush must complete only after every sample with a timestamp at or
//! before the request has been delivered. Requests are therefore parked
//! in bounded, timestamp-keyed structures and released by the data path
//! itself as samples catch up.

use std::sync::Mutex;

use hal_types::{SensorHandle, Timestamp};

use crate::error::PlumbingError;

/// Depth of the bounded flush request stack.
pub const FLUSH_STACK_DEPTH: usize = 20;

/// One parked flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRequest {
    /// Sensor whose flush completion is awaited.
    pub target: SensorHandle,
    /// Timestamp the flush was requested at.
    pub requested_at: Timestamp,
}

/// Bounded stack of pending flush requests on a producer node.
///
/// The polling thread drains it with [`FlushStack::pop_expired`] as data
/// timestamps advance: a request is released only once a sample timestamp
/// reaches it, guaranteeing "all data up to the flush point first, then
/// the completion marker".
///
/// When full, [`FlushStack::push`] fails and the request is dropped; the
/// producer is never blocked by flush bookkeeping.
#[derive(Debug, Default)]
pub struct FlushStack {
    requests: Mutex<Vec<FlushRequest>>,
}

impl FlushStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a flush request.
    ///
    /// # Errors
    ///
    /// Returns [`PlumbingError::StackFull`] when [`FLUSH_STACK_DEPTH`]
    /// requests are already pending.
    pub fn push(&self, target: SensorHandle, requested_at: Timestamp) -> crate::Result<()> {
        let mut requests = lock(&self.requests);
        if requests.len() >= FLUSH_STACK_DEPTH {
            return Err(PlumbingError::stack_full(FLUSH_STACK_DEPTH));
        }
        requests.push(FlushRequest {
            target,
            requested_at,
        });
        Ok(())
    }

    /// Releases every request whose timestamp has been reached.
    ///
    /// Returns the released requests in arrival order.
    #[must_use]
    pub fn pop_expired(&self, data_ts: Timestamp) -> Vec<FlushRequest> {
        let mut requests = lock(&self.requests);
        let mut expired = Vec::new();
        requests.retain(|req| {
            if req.requested_at <= data_ts {
                expired.push(*req);
                false
            } else {
                true
            }
        });
        expired
    }

    /// Returns the number of pending requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.requests).len()
    }
}

/// Flush requests aimed at a software node, deferred until its own
/// processing catches up.
///
/// Used when the in-flight sample being processed is strictly newer than
/// the flush request: completing then would reorder "data before flush".
#[derive(Debug, Default)]
pub struct DeferredFlush {
    parked: Mutex<Vec<FlushRequest>>,
}

impl DeferredFlush {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a request until data reaches its timestamp.
    pub fn park(&self, target: SensorHandle, requested_at: Timestamp) {
        lock(&self.parked).push(FlushRequest {
            target,
            requested_at,
        });
    }

    /// Takes every request satisfied by a sample at `data_ts`.
    #[must_use]
    pub fn take_ready(&self, data_ts: Timestamp) -> Vec<FlushRequest> {
        let mut parked = lock(&self.parked);
        let mut ready = Vec::new();
        parked.retain(|req| {
            if req.requested_at <= data_ts {
                ready.push(*req);
                false
            } else {
                true
            }
        });
        ready
    }

    /// Returns the number of parked requests.
    #[must_use]
    pub fn parked(&self) -> usize {
        lock(&self.parked).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn h(raw: u32) -> SensorHandle {
        SensorHandle::from_raw(raw)
    }

    #[test]
    fn pop_expired_releases_in_order() {
        let stack = FlushStack::new();
        stack.push(h(1), Timestamp::from_nanos(100)).unwrap();
        stack.push(h(2), Timestamp::from_nanos(200)).unwrap();
        stack.push(h(3), Timestamp::from_nanos(300)).unwrap();

        // Nothing has caught up yet.
        assert!(stack.pop_expired(Timestamp::from_nanos(50)).is_empty());
        assert_eq!(stack.pending(), 3);

        // Data at 250 releases the first two, oldest first.
        let expired = stack.pop_expired(Timestamp::from_nanos(250));
        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].target, h(1));
        assert_eq!(expired[1].target, h(2));
        assert_eq!(stack.pending(), 1);
    }

    #[test]
    fn exact_timestamp_releases() {
        let stack = FlushStack::new();
        stack.push(h(1), Timestamp::from_nanos(100)).unwrap();
        let expired = stack.pop_expired(Timestamp::from_nanos(100));
        assert_eq!(expired.len(), 1);
    }

    #[test]
    fn full_stack_rejects() {
        let stack = FlushStack::new();
        for i in 0..FLUSH_STACK_DEPTH {
            stack
                .push(h(1), Timestamp::from_nanos(i as u64))
                .unwrap();
        }
        let err = stack.push(h(1), Timestamp::from_nanos(999)).unwrap_err();
        assert_eq!(
            err,
            PlumbingError::StackFull {
                depth: FLUSH_STACK_DEPTH
            }
        );
        assert_eq!(stack.pending(), FLUSH_STACK_DEPTH);
    }

    #[test]
    fn deferred_flush_take_ready() {
        let deferred = DeferredFlush::new();
        deferred.park(h(4), Timestamp::from_nanos(500));
        deferred.park(h(5), Timestamp::from_nanos(900));

        assert!(deferred.take_ready(Timestamp::from_nanos(400)).is_empty());
        assert_eq!(deferred.parked(), 2);

        let ready = deferred.take_ready(Timestamp::from_nanos(600));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].target, h(4));
        assert_eq!(deferred.parked(), 1);
    }
}
