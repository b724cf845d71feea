//! Per-node event pipes.
//!
//! Every sensor node owns one pipe: producers (its polling thread or its
//! dependencies' workers) write fixed-shape event records, the node's
//! consumer thread blocks reading them. Built on a bounded channel so a
//! stalled consumer back-pressures into dropped events, never into a
//! blocked producer.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::error;

use hal_types::{Duration, Sample, SensorHandle, Timestamp};

use crate::error::PlumbingError;

/// One event record traveling through a node pipe.
#[derive(Debug, Clone)]
pub enum PipeEvent {
    /// A sample from the node's trigger dependency or its own device.
    Data(Box<Sample>),
    /// A flush aimed at `target`, requested at `timestamp`.
    Flush {
        /// Sensor whose flush should complete.
        target: SensorHandle,
        /// Request time.
        timestamp: Timestamp,
    },
    /// The producer's pollrate changed at `timestamp`.
    OdrChange {
        /// Time the new rate takes effect.
        timestamp: Timestamp,
        /// New sampling period.
        pollrate: Duration,
    },
}

/// Producer half of a node pipe. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PipeSender {
    tx: Sender<PipeEvent>,
}

/// Consumer half of a node pipe. Held by exactly one worker thread.
#[derive(Debug)]
pub struct PipeReceiver {
    rx: Receiver<PipeEvent>,
}

/// Creates a bounded node pipe.
#[must_use]
pub fn event_pipe(capacity: usize) -> (PipeSender, PipeReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (PipeSender { tx }, PipeReceiver { rx })
}

impl PipeSender {
    /// Writes an event without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PlumbingError::PipeFull`] when the channel is at
    /// capacity (the event is dropped and the overflow logged) or
    /// [`PlumbingError::PipeDisconnected`] when the consumer is gone.
    pub fn send(&self, event: PipeEvent) -> crate::Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                error!("node pipe full; event dropped");
                Err(PlumbingError::PipeFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(PlumbingError::PipeDisconnected),
        }
    }
}

impl PipeReceiver {
    /// Blocks for the next event, up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout so poll loops can check their
    /// running flag and go back to waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PlumbingError::PipeDisconnected`] when every sender is
    /// gone.
    pub fn recv_timeout(&self, timeout: Duration) -> crate::Result<Option<PipeEvent>> {
        match self
            .rx
            .recv_timeout(std::time::Duration::from_nanos(timeout.as_nanos()))
        {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PlumbingError::PipeDisconnected),
        }
    }

    /// Drains any immediately available event.
    #[must_use]
    pub fn try_recv(&self) -> Option<PipeEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn send_and_receive() {
        let (tx, rx) = event_pipe(8);
        let sample = Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(42));
        tx.send(PipeEvent::Data(Box::new(sample))).unwrap();

        match rx.recv_timeout(Duration::from_millis(100)).unwrap() {
            Some(PipeEvent::Data(s)) => {
                assert_eq!(s.hw_timestamp, Timestamp::from_nanos(42));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn timeout_returns_none() {
        let (_tx, rx) = event_pipe(8);
        let got = rx.recv_timeout(Duration::from_millis(5)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn full_pipe_drops_event() {
        let (tx, _rx) = event_pipe(1);
        tx.send(PipeEvent::Flush {
            target: SensorHandle::from_raw(1),
            timestamp: Timestamp::zero(),
        })
        .unwrap();

        let err = tx
            .send(PipeEvent::Flush {
                target: SensorHandle::from_raw(1),
                timestamp: Timestamp::zero(),
            })
            .unwrap_err();
        assert_eq!(err, PlumbingError::PipeFull);
    }

    #[test]
    fn disconnected_consumer() {
        let (tx, rx) = event_pipe(1);
        drop(rx);
        let err = tx
            .send(PipeEvent::OdrChange {
                timestamp: Timestamp::zero(),
                pollrate: Duration::from_hz(100.0),
            })
            .unwrap_err();
        assert_eq!(err, PlumbingError::PipeDisconnected);
    }

    #[test]
    fn cross_thread_hand_off() {
        let (tx, rx) = event_pipe(32);
        let producer = std::thread::spawn(move || {
            for i in 0..10u64 {
                let sample =
                    Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(i * 100));
                tx.send(PipeEvent::Data(Box::new(sample))).unwrap();
            }
        });

        let mut received = 0;
        while received < 10 {
            if let Some(PipeEvent::Data(_)) =
                rx.recv_timeout(Duration::from_millis(200)).unwrap()
            {
                received += 1;
            }
        }
        producer.join().unwrap();
        assert_eq!(received, 10);
    }
}
