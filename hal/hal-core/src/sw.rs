//! Software sensor workers.
//!
//! One thread per software node, blocking on the node's private pipe.
//! Trigger samples drive a processing cycle; data from the remaining
//! dependencies is looked up from their rings at the trigger timestamp,
//! retrying briefly when the producer thread has not caught up yet.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, trace};

use hal_types::Duration;

use crate::config::SwRetryPolicy;
use crate::node::{NodeArena, SensorNode};
use crate::processors::ProcessInput;
use hal_plumbing::PipeEvent;

/// Pipe-read timeout between running-flag checks.
pub const PIPE_TIMEOUT: Duration = Duration::from_millis(200);

/// Spawns the worker thread for a software node.
///
/// # Panics
///
/// Panics when the OS refuses to spawn a thread, which is fatal at
/// HAL-open time anyway.
#[must_use]
pub fn spawn_software_worker(
    node: Arc<SensorNode>,
    arena: Arc<NodeArena>,
    retry: SwRetryPolicy,
) -> JoinHandle<()> {
    let name = format!("sw-{}", node.handle());
    #[allow(clippy::expect_used)]
    std::thread::Builder::new()
        .name(name)
        .spawn(move || software_loop(&node, &arena, retry))
        .expect("failed to spawn software worker thread")
}

fn software_loop(node: &SensorNode, arena: &NodeArena, retry: SwRetryPolicy) {
    let Some(rx) = node.take_pipe_receiver() else {
        return;
    };
    debug!(node = %node.handle(), "software worker started");

    while node.is_running() {
        match rx.recv_timeout(PIPE_TIMEOUT) {
            Ok(Some(PipeEvent::Data(sample))) => {
                let input = gather_input(node, *sample, retry);
                node.process_and_emit(arena, input);
            }
            Ok(Some(PipeEvent::Flush { target, timestamp })) => {
                node.handle_flush_event(arena, target, timestamp);
            }
            Ok(Some(PipeEvent::OdrChange { .. })) => {
                node.reprime_decimation();
            }
            Ok(None) => {}
            Err(_) => break,
        }
    }
    debug!(node = %node.handle(), "software worker stopped");
}

/// Collects the trigger sample plus synchronized data from the other
/// dependencies.
///
/// A dependency with no data at or before the trigger timestamp is
/// retried `retry.attempts` times with a `retry.backoff_us` sleep; a
/// still-empty ring after that means the cycle runs without that input.
fn gather_input(node: &SensorNode, sample: hal_types::Sample, retry: SwRetryPolicy) -> ProcessInput {
    let trigger = node.trigger();
    let ts = sample.hw_timestamp;
    let mut input = ProcessInput::trigger_only(sample);

    for slot in node.dependencies() {
        if Some(slot.handle) == trigger {
            continue;
        }
        let mut attempt = 0;
        loop {
            if let Some((_, aux)) = slot.ring.latest_at_or_before(ts) {
                input.aux.push((slot.handle, aux));
                break;
            }
            attempt += 1;
            if attempt >= retry.attempts.max(1) {
                trace!(
                    node = %node.handle(),
                    dependency = %slot.handle,
                    "no dependency data at sync time"
                );
                break;
            }
            std::thread::sleep(std::time::Duration::from_micros(retry.backoff_us));
        }
    }
    input
}
