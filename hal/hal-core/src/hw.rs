//! Hardware polling workers.
//!
//! One thread per hardware node, blocking on the device's scan buffer
//! with a bounded timeout so the running flag is observed between reads.
//! Device I/O failures are logged and the loop continues; a transient
//! error costs a gap in the stream, never the sensor.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use hal_types::{Duration, Sample};

use crate::iio::{decode_scan, ChannelSpec, RawScan};
use crate::node::{NodeArena, SensorNode};
use crate::processors::ProcessInput;
use crate::vendor::Timesync;

/// Blocking-read timeout of the polling loop.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Spawns the polling thread for a hardware node.
///
/// # Panics
///
/// Panics when the OS refuses to spawn a thread, which is fatal at
/// HAL-open time anyway.
#[must_use]
pub fn spawn_hardware_worker(
    node: Arc<SensorNode>,
    arena: Arc<NodeArena>,
    timesync: Arc<dyn Timesync>,
) -> JoinHandle<()> {
    let name = format!("hw-{}", node.handle());
    #[allow(clippy::expect_used)]
    std::thread::Builder::new()
        .name(name)
        .spawn(move || hardware_loop(&node, &arena, timesync.as_ref()))
        .expect("failed to spawn hardware polling thread")
}

fn hardware_loop(node: &SensorNode, arena: &NodeArena, timesync: &dyn Timesync) {
    let Some(device) = node.device() else {
        return;
    };
    let channels = device.channels();
    debug!(node = %node.handle(), "hardware worker started");

    while node.is_running() {
        match device.read_scan(POLL_TIMEOUT) {
            Ok(Some(scan)) => handle_scan(node, arena, timesync, &channels, &scan),
            Ok(None) => {}
            Err(err) => {
                warn!(node = %node.handle(), %err, "scan read failed");
            }
        }
    }
    debug!(node = %node.handle(), "hardware worker stopped");
}

fn handle_scan(
    node: &SensorNode,
    arena: &NodeArena,
    timesync: &dyn Timesync,
    channels: &[ChannelSpec],
    scan: &RawScan,
) {
    let ts = scan.timestamp;

    // Tag with the rate in effect when this sample was produced: switches
    // newer than the sample stay pending.
    let pollrate = node.odr_stack().current_for(ts);

    let values = match decode_scan(channels, scan) {
        Ok(values) => values,
        Err(err) => {
            warn!(node = %node.handle(), %err, "scan decode failed");
            return;
        }
    };

    timesync.add_pair(ts, node.now());

    if !node.in_enable_window(ts) {
        return;
    }

    let mut sample = Sample::new(node.handle(), ts);
    for (slot, value) in sample.raw.iter_mut().zip(values) {
        *slot = value;
    }
    sample.pollrate = pollrate;
    sample.ap_timestamp = timesync.estimate(ts).unwrap_or(ts);

    // Flush requests whose timestamp this sample has reached complete
    // behind it.
    for req in node.flush_stack().pop_expired(ts) {
        if !sample.push_flush_handle(req.target) {
            warn!(node = %node.handle(), "flush handle overflow; request dropped");
        }
    }

    node.process_and_emit(arena, ProcessInput::trigger_only(sample));
}
