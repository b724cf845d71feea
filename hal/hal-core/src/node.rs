//! Sensor node runtime.
//!
//! One [`SensorNode`] per registered sensor: the graph node that owns
//! enable reference counting, rate negotiation, flush sequencing, and
//! dependency fan-out. Hardware and software nodes share this runtime
//! and differ only in their [`NodeClass`] and worker loop.
//!
//! Enable state is gated by *timestamps*, not booleans: a sample is
//! accepted when its timestamp falls inside an enabled window, which
//! stays correct even when enable/disable races in-flight samples from
//! the producer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use hal_plumbing::{
    event_pipe, DeferredFlush, FlushStack, OdrSwitchStack, PipeEvent, PipeReceiver, PipeSender,
    TimedRing,
};
use hal_types::{Accuracy, Duration, Sample, SensorDescriptor, SensorHandle, Timestamp};

use crate::clock::Clock;
use crate::error::HalError;
use crate::iio::IioDevice;
use crate::mask::HandleMask;
use crate::processors::{ProcessInput, SampleProcessor};
use crate::proxy::{ProxyManager, FRAMEWORK_CHANNEL};
use crate::Result;

/// Largest number of dependencies one node may have.
pub const MAX_DEPENDENCIES: usize = 6;

/// Ring slots per unit of producer FIFO depth.
const RING_FIFO_FACTOR: u32 = 10;
/// Smallest dependency ring.
const RING_MIN_SLOTS: u32 = 10;

/// Framework-facing event emitted by a node.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    /// Producing sensor.
    pub sensor: SensorHandle,
    /// Event payload.
    pub payload: EventPayload,
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// Channels due to receive this event.
    pub channels: SmallVec<[u32; 4]>,
}

/// Payload of a [`SensorEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Processed sensor values.
    Data {
        /// Kind-specific value layout.
        values: [f32; 5],
        /// Bias in effect, for uncalibrated outputs.
        bias: [f32; 3],
        /// Reported accuracy.
        accuracy: Accuracy,
    },
    /// A flush completed for the sensor.
    FlushComplete,
}

/// What backs a node: a kernel device or a computation.
pub enum NodeClass {
    /// Node polls an IIO device.
    Hardware {
        /// The device driven by this node's polling thread.
        device: Arc<dyn IioDevice>,
    },
    /// Node computes from dependency data.
    Software,
}

impl std::fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware { .. } => f.write_str("Hardware"),
            Self::Software => f.write_str("Software"),
        }
    }
}

/// One wired dependency slot.
#[derive(Debug, Clone)]
pub struct DepSlot {
    /// Producer this slot receives from.
    pub handle: SensorHandle,
    /// Buffered samples for on-demand lookup.
    pub ring: Arc<TimedRing<Sample>>,
}

#[derive(Debug, Default)]
struct NodeState {
    enable_mask: HandleMask,
    enabled_at: Timestamp,
    disabled_at: Timestamp,
    rate_requests: HashMap<u32, (Duration, Duration)>,
    current_pollrate: Duration,
    current_timeout: Duration,
    deps: Vec<DepSlot>,
    push_targets: Vec<SensorHandle>,
    trigger: Option<SensorHandle>,
    decimator: u32,
    decim_count: u32,
    last_producer_pollrate: Duration,
    last_emitted: Timestamp,
}

/// Arena of nodes addressed by raw handle.
///
/// Built once during HAL open, read-only afterward. Nodes reference each
/// other only through this arena, never by direct pointer.
#[derive(Default)]
pub struct NodeArena {
    nodes: HashMap<u32, Arc<SensorNode>>,
}

impl NodeArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node under its handle.
    pub fn insert(&mut self, node: Arc<SensorNode>) {
        self.nodes.insert(node.handle().as_raw(), node);
    }

    /// Removes a node.
    pub fn remove(&mut self, handle: SensorHandle) {
        self.nodes.remove(&handle.as_raw());
    }

    /// Looks a node up.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Sensor`] for unknown handles.
    pub fn get(&self, handle: SensorHandle) -> Result<Arc<SensorNode>> {
        self.nodes
            .get(&handle.as_raw())
            .cloned()
            .ok_or_else(|| hal_types::SensorError::UnknownHandle(handle.as_raw()).into())
    }

    /// Iterates over all nodes.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SensorNode>> {
        self.nodes.values()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Checks whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Services every node shares.
pub struct NodeServices {
    /// AP time source.
    pub clock: Arc<dyn Clock>,
    /// Channel routing and per-channel decimation.
    pub proxy: Arc<ProxyManager>,
    /// Framework-facing event stream.
    pub events_tx: Sender<SensorEvent>,
}

/// One sensor in the dependency graph.
pub struct SensorNode {
    descriptor: SensorDescriptor,
    handle: SensorHandle,
    class: NodeClass,
    state: Mutex<NodeState>,
    processor: Mutex<Box<dyn SampleProcessor>>,
    flush_stack: FlushStack,
    odr_stack: OdrSwitchStack,
    deferred_flush: DeferredFlush,
    pipe_tx: PipeSender,
    pipe_rx: Mutex<Option<PipeReceiver>>,
    running: AtomicBool,
    services: NodeServices,
}

impl SensorNode {
    /// Creates a node with its private pipe.
    #[must_use]
    pub fn new(
        handle: SensorHandle,
        descriptor: SensorDescriptor,
        class: NodeClass,
        processor: Box<dyn SampleProcessor>,
        services: NodeServices,
        pipe_capacity: usize,
    ) -> Self {
        let (pipe_tx, pipe_rx) = event_pipe(pipe_capacity);
        Self {
            descriptor,
            handle,
            class,
            state: Mutex::new(NodeState::default()),
            processor: Mutex::new(processor),
            flush_stack: FlushStack::new(),
            odr_stack: OdrSwitchStack::new(Duration::zero()),
            deferred_flush: DeferredFlush::new(),
            pipe_tx,
            pipe_rx: Mutex::new(Some(pipe_rx)),
            running: AtomicBool::new(false),
            services,
        }
    }

    /// Returns the node's handle.
    #[must_use]
    pub const fn handle(&self) -> SensorHandle {
        self.handle
    }

    /// Returns the node's descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    /// Returns the device of a hardware node.
    #[must_use]
    pub fn device(&self) -> Option<Arc<dyn IioDevice>> {
        match &self.class {
            NodeClass::Hardware { device } => Some(Arc::clone(device)),
            NodeClass::Software => None,
        }
    }

    /// Checks whether this node is hardware-backed.
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        matches!(self.class, NodeClass::Hardware { .. })
    }

    /// The node's rate-switch record stack.
    #[must_use]
    pub const fn odr_stack(&self) -> &OdrSwitchStack {
        &self.odr_stack
    }

    /// The node's flush request stack.
    #[must_use]
    pub const fn flush_stack(&self) -> &FlushStack {
        &self.flush_stack
    }

    /// Current AP time from the node's clock service.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.services.clock.now()
    }

    /// Whether the worker loop should keep running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flips the worker running flag.
    pub fn set_running(&self, on: bool) {
        self.running.store(on, Ordering::Release);
    }

    /// Takes the consumer end of the node pipe. Callable once.
    #[must_use]
    pub fn take_pipe_receiver(&self) -> Option<PipeReceiver> {
        self.lock_pipe_rx().take()
    }

    /// Checks whether any requester holds the node enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.lock_state().enable_mask.is_empty()
    }

    /// Current negotiated pollrate.
    #[must_use]
    pub fn current_pollrate(&self) -> Duration {
        self.lock_state().current_pollrate
    }

    // ---- wiring (HAL-open time, single-threaded) ----

    /// Registers this node as a sink of `producer`.
    ///
    /// Allocates the per-dependency ring, sized at ten times the
    /// producer's FIFO depth (minimum ten slots) to ride out consumer
    /// scheduling jitter.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::TooManyDependencies`] past [`MAX_DEPENDENCIES`].
    pub fn add_dependency(&self, producer: &SensorNode) -> Result<()> {
        let mut st = self.lock_state();
        if st.deps.len() >= MAX_DEPENDENCIES {
            return Err(HalError::TooManyDependencies {
                max: MAX_DEPENDENCIES,
            });
        }
        let fifo = producer.descriptor().fifo_max.max(1);
        let slots = (fifo * RING_FIFO_FACTOR).max(RING_MIN_SLOTS);
        st.deps.push(DepSlot {
            handle: producer.handle(),
            ring: Arc::new(TimedRing::new(slots as usize)),
        });
        debug!(
            node = %self.handle,
            producer = %producer.handle(),
            slots,
            "dependency wired"
        );
        Ok(())
    }

    /// Unregisters a dependency and frees its ring.
    pub fn remove_dependency(&self, producer: SensorHandle) {
        let mut st = self.lock_state();
        st.deps.retain(|slot| slot.handle != producer);
        if st.trigger == Some(producer) {
            st.trigger = None;
        }
    }

    /// Marks which dependency drives this node's computation.
    pub fn set_trigger(&self, producer: SensorHandle) {
        self.lock_state().trigger = Some(producer);
    }

    /// Adds a node that receives this node's output samples.
    pub fn add_push_target(&self, consumer: SensorHandle) {
        let mut st = self.lock_state();
        if !st.push_targets.contains(&consumer) {
            st.push_targets.push(consumer);
        }
    }

    /// Returns the wired dependency slots.
    #[must_use]
    pub fn dependencies(&self) -> Vec<DepSlot> {
        self.lock_state().deps.clone()
    }

    /// Returns the trigger dependency, if set.
    #[must_use]
    pub fn trigger(&self) -> Option<SensorHandle> {
        self.lock_state().trigger
    }

    // ---- enable / disable ----

    /// Enables or disables the node for one requester.
    ///
    /// Reference-counted through the requester bitmask: the underlying
    /// resource transitions only on the first enable and the last
    /// disable. The first enable propagates to every dependency (using
    /// this node's own handle as the requester) before the node itself
    /// activates; on failure already-enabled dependencies are unwound in
    /// reverse order and the mask is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates the first dependency or device failure encountered.
    pub fn enable(&self, arena: &NodeArena, requester: SensorHandle, on: bool) -> Result<()> {
        if requester.as_raw() >= 64 {
            return Err(HalError::RequesterOutOfRange(requester.as_raw()));
        }
        let mut st = self.lock_state();
        if on {
            self.enable_locked(arena, &mut st, requester)
        } else {
            self.disable_locked(arena, &mut st, requester);
            Ok(())
        }
    }

    fn enable_locked(
        &self,
        arena: &NodeArena,
        st: &mut NodeState,
        requester: SensorHandle,
    ) -> Result<()> {
        if st.enable_mask.contains(requester) {
            return Ok(());
        }

        if st.enable_mask.is_empty() {
            // First enable: dependencies first, strict LIFO unwind on
            // failure.
            let deps: Vec<SensorHandle> = st.deps.iter().map(|slot| slot.handle).collect();
            let mut enabled: Vec<SensorHandle> = Vec::with_capacity(deps.len());
            for dep in deps {
                match arena.get(dep).and_then(|node| node.enable(arena, self.handle, true)) {
                    Ok(()) => enabled.push(dep),
                    Err(err) => {
                        self.unwind_dependencies(arena, &enabled);
                        return Err(err);
                    }
                }
            }

            if let Err(err) = self.activate() {
                self.unwind_dependencies(arena, &enabled);
                return Err(err);
            }

            st.enabled_at = self.services.clock.now();
            st.decim_count = 0;
            if let Err(err) = self.lock_processor().on_first_enable() {
                warn!(node = %self.handle, %err, "processor init failed");
            }
            info!(node = %self.handle, kind = %self.descriptor.kind, "enabled");
        }

        st.enable_mask.set(requester)?;
        Ok(())
    }

    fn disable_locked(&self, arena: &NodeArena, st: &mut NodeState, requester: SensorHandle) {
        if !st.enable_mask.contains(requester) {
            return;
        }
        st.enable_mask.clear(requester);
        st.rate_requests.remove(&requester.as_raw());

        if st.enable_mask.is_empty() {
            st.disabled_at = self.services.clock.now();
            self.deactivate();
            self.lock_processor().on_last_disable();

            let deps: Vec<SensorHandle> = st.deps.iter().map(|slot| slot.handle).collect();
            self.unwind_dependencies(arena, &deps);
            info!(node = %self.handle, kind = %self.descriptor.kind, "disabled");
        }
    }

    fn unwind_dependencies(&self, arena: &NodeArena, enabled: &[SensorHandle]) {
        for dep in enabled.iter().rev() {
            if let Ok(node) = arena.get(*dep) {
                let _ = node.enable(arena, self.handle, false);
            }
        }
    }

    /// Releases every requester, fully disabling the node.
    ///
    /// One-shot sensors call this on themselves after their single event.
    pub fn disable_all(&self, arena: &NodeArena) {
        let requesters = {
            let st = self.lock_state();
            st.enable_mask.requesters()
        };
        for requester in requesters {
            let _ = self.enable(arena, requester, false);
        }
    }

    fn activate(&self) -> Result<()> {
        match &self.class {
            NodeClass::Hardware { device } => device.set_enabled(true),
            NodeClass::Software => Ok(()),
        }
    }

    fn deactivate(&self) {
        if let NodeClass::Hardware { device } = &self.class {
            if let Err(err) = device.set_enabled(false) {
                warn!(node = %self.handle, %err, "device disable failed");
            }
        }
    }

    /// Checks whether a sample timestamp falls inside an enabled window.
    #[must_use]
    pub fn in_enable_window(&self, ts: Timestamp) -> bool {
        let st = self.lock_state();
        Self::window_accepts(&st, ts)
    }

    fn window_accepts(st: &NodeState, ts: Timestamp) -> bool {
        if st.enabled_at.is_zero() {
            return false;
        }
        if ts < st.enabled_at {
            return false;
        }
        // disabled_at older than enabled_at belongs to a closed window
        // in the past; otherwise the window has closed and only samples
        // produced before the close are still valid.
        st.disabled_at < st.enabled_at || ts <= st.disabled_at
    }

    // ---- rate negotiation ----

    /// Stores one requester's period and batching timeout, recomputes
    /// the minimum across requesters, and applies it.
    ///
    /// The period is clamped to the descriptor's rate bounds. A new
    /// minimum is written to the device (hardware nodes), recorded on
    /// the rate-switch stack, and propagated to every dependency.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidParameter`] when a nonzero timeout is
    /// requested on a sensor without a FIFO.
    pub fn set_rate(
        &self,
        arena: &NodeArena,
        requester: SensorHandle,
        period: Duration,
        timeout: Duration,
    ) -> Result<()> {
        if !timeout.is_zero() && self.descriptor.fifo_max == 0 {
            return Err(HalError::invalid_parameter(
                "batching timeout requested on a sensor without a fifo",
            ));
        }

        let clamped = self.clamp_period(period);
        let mut st = self.lock_state();
        st.rate_requests
            .insert(requester.as_raw(), (clamped, timeout));

        let mut min_period = Duration::zero();
        let mut min_timeout: Option<Duration> = None;
        for (p, t) in st.rate_requests.values() {
            min_period = min_period.min_nonzero(*p);
            min_timeout = Some(match min_timeout {
                Some(current) => current.min(*t),
                None => *t,
            });
        }
        let min_timeout = min_timeout.unwrap_or(Duration::zero());

        if min_period == st.current_pollrate && min_timeout == st.current_timeout {
            return Ok(());
        }

        let now = self.services.clock.now();
        st.current_timeout = min_timeout;
        if min_period != st.current_pollrate && !min_period.is_zero() {
            self.apply_rate(&mut st, now, min_period)?;
        }

        // Propagate the new minimum downward.
        let deps: Vec<SensorHandle> = st.deps.iter().map(|slot| slot.handle).collect();
        for dep in deps {
            arena
                .get(dep)?
                .set_rate(arena, self.handle, min_period, min_timeout)?;
        }
        Ok(())
    }

    fn apply_rate(&self, st: &mut NodeState, now: Timestamp, period: Duration) -> Result<()> {
        match &self.class {
            NodeClass::Hardware { device } => {
                device.set_rate_hz(period.as_hz())?;
                let watermark = self.watermark_for(period, st.current_timeout);
                if let Err(err) = device.set_watermark(watermark) {
                    warn!(node = %self.handle, %err, "watermark write failed");
                }
                self.odr_stack.push(now, period)?;
            }
            NodeClass::Software => {
                self.odr_stack.push(now, period)?;
                // Wake the worker so decimation re-primes immediately.
                let _ = self.pipe_tx.send(PipeEvent::OdrChange {
                    timestamp: now,
                    pollrate: period,
                });
            }
        }
        debug!(
            node = %self.handle,
            hz = period.as_hz(),
            "pollrate applied"
        );
        st.current_pollrate = period;
        Ok(())
    }

    fn clamp_period(&self, period: Duration) -> Duration {
        if period.is_zero() {
            return period;
        }
        let shortest = Duration::from_hz(f64::from(self.descriptor.max_rate_hz));
        let longest = Duration::from_hz(f64::from(self.descriptor.min_rate_hz));
        let mut clamped = period;
        if !shortest.is_zero() && clamped < shortest {
            clamped = shortest;
        }
        if !longest.is_zero() && clamped > longest {
            clamped = longest;
        }
        clamped
    }

    fn watermark_for(&self, period: Duration, timeout: Duration) -> u32 {
        if timeout.is_zero() || period.is_zero() {
            return 1;
        }
        #[allow(clippy::cast_possible_truncation)]
        let batch = (timeout.as_nanos() / period.as_nanos().max(1)) as u32;
        batch.clamp(1, self.descriptor.fifo_max.max(1))
    }

    // ---- flush ----

    /// Requests a flush of this node, completing on its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidState`] when the node is disabled and
    /// [`HalError::InvalidParameter`] for one-shot sensors.
    pub fn request_flush(&self, arena: &NodeArena, requested_at: Timestamp) -> Result<()> {
        if !self.is_enabled() {
            return Err(HalError::invalid_state("flush on a disabled sensor"));
        }
        if self.descriptor.kind.is_one_shot() {
            return Err(HalError::invalid_parameter("flush on a one-shot sensor"));
        }
        if self.descriptor.fifo_max == 0 && self.is_hardware() {
            // Nothing buffered anywhere: complete immediately.
            self.emit_flush_complete();
            return Ok(());
        }
        self.flush_for(arena, self.handle, requested_at)
    }

    fn flush_for(
        &self,
        arena: &NodeArena,
        target: SensorHandle,
        requested_at: Timestamp,
    ) -> Result<()> {
        match &self.class {
            NodeClass::Hardware { device } => {
                device.flush()?;
                self.flush_stack.push(target, requested_at)?;
                Ok(())
            }
            NodeClass::Software => {
                // Ride the trigger chain down to the hardware FIFO.
                let trigger = self
                    .trigger()
                    .ok_or_else(|| HalError::invalid_state("software node without trigger"))?;
                arena.get(trigger)?.flush_for(arena, target, requested_at)
            }
        }
    }

    /// Delivers a flush notification traveling up the dependency chain.
    ///
    /// Software nodes serialize it through their pipe so the worker
    /// thread orders it against in-flight data.
    pub fn process_flush(&self, target: SensorHandle, timestamp: Timestamp) {
        match &self.class {
            NodeClass::Software => {
                let _ = self.pipe_tx.send(PipeEvent::Flush { target, timestamp });
            }
            NodeClass::Hardware { .. } => {
                // Hardware nodes have no producers; nothing arrives here.
            }
        }
    }

    /// Handles a flush notification on the worker thread.
    ///
    /// If it targets this node and data has already passed the request
    /// timestamp the completion is emitted now; if data has not caught
    /// up it is deferred; flushes for other targets fan out to the push
    /// list.
    pub fn handle_flush_event(
        &self,
        arena: &NodeArena,
        target: SensorHandle,
        timestamp: Timestamp,
    ) {
        if target == self.handle {
            let caught_up = self.lock_state().last_emitted >= timestamp;
            if caught_up {
                self.emit_flush_complete();
            } else {
                self.deferred_flush.park(target, timestamp);
            }
        } else {
            self.fan_out_flush(arena, target, timestamp);
        }
    }

    /// Forwards a flush notification to every push target.
    pub fn fan_out_flush(&self, arena: &NodeArena, target: SensorHandle, timestamp: Timestamp) {
        let targets = self.push_targets();
        for consumer in targets {
            if let Ok(node) = arena.get(consumer) {
                node.process_flush(target, timestamp);
            }
        }
    }

    /// Emits a flush-complete marker on the framework stream.
    pub fn emit_flush_complete(&self) {
        let event = SensorEvent {
            sensor: self.handle,
            payload: EventPayload::FlushComplete,
            timestamp: self.services.clock.now(),
            channels: SmallVec::from_slice(&[FRAMEWORK_CHANNEL]),
        };
        if self.services.events_tx.try_send(event).is_err() {
            error!(node = %self.handle, "event queue full; flush complete dropped");
        }
    }

    // ---- data path ----

    /// Accepts a sample pushed from a dependency.
    ///
    /// The sample lands in the matching slot ring when inside the enable
    /// window; samples from the trigger dependency are additionally
    /// forwarded (decimated) into the node's pipe to drive computation.
    pub fn receive_from_dependency(&self, sample: &Sample) {
        let mut st = self.lock_state();
        if !Self::window_accepts(&st, sample.hw_timestamp) {
            return;
        }

        let Some(slot) = st.deps.iter().find(|slot| slot.handle == sample.sensor) else {
            return;
        };
        slot.ring.push(sample.hw_timestamp, sample.clone());

        if st.trigger != Some(sample.sensor) {
            return;
        }

        // Decimate trigger data: emit every Nth producer sample, where N
        // is the rounded ratio of this node's period to the producer's.
        if sample.pollrate != st.last_producer_pollrate {
            st.decimator = st.current_pollrate.decimation_factor(sample.pollrate);
            st.last_producer_pollrate = sample.pollrate;
            st.decim_count = st.decimator.saturating_sub(1);
        }
        st.decim_count += 1;
        if st.decim_count >= st.decimator.max(1) {
            st.decim_count = 0;
            let _ = self.pipe_tx.send(PipeEvent::Data(Box::new(sample.clone())));
        }
    }

    /// Resets the decimation counter so the next trigger sample passes.
    pub fn reprime_decimation(&self) {
        let mut st = self.lock_state();
        st.decimator = st.current_pollrate.decimation_factor(st.last_producer_pollrate);
        st.decim_count = st.decimator.saturating_sub(1);
    }

    /// Runs the processor over one input and emits the result.
    ///
    /// Emits to the framework stream (unless the kind is internal),
    /// fans the sample out to push targets, releases any deferred
    /// flushes the sample satisfies, and auto-disables one-shot kinds
    /// after their single event.
    pub fn process_and_emit(&self, arena: &NodeArena, input: ProcessInput) {
        let flush_handles = input.sample.flush_handles.clone();
        let ts = input.sample.hw_timestamp;

        let produced = self.lock_processor().process(input);

        if let Some(mut sample) = produced {
            sample.sensor = self.handle;
            sample.flush_handles = flush_handles.clone();
            self.emit_sample(&sample);
            self.fan_out(arena, &sample);

            if self.descriptor.kind.is_one_shot() {
                self.disable_all(arena);
                return;
            }
        }

        // Flush completions ride behind the data they waited for,
        // whether or not the processor produced an output event.
        for target in flush_handles {
            if target == self.handle {
                self.emit_flush_complete();
            } else {
                self.fan_out_flush(arena, target, ts);
            }
        }
        for _req in self.deferred_flush.take_ready(ts) {
            self.emit_flush_complete();
        }
    }

    /// Emits a data sample on the framework stream.
    pub fn emit_sample(&self, sample: &Sample) {
        {
            let mut st = self.lock_state();
            st.last_emitted = sample.hw_timestamp;
        }

        if self.descriptor.kind.is_internal() {
            return;
        }

        let channels = self.services.proxy.valid_push_channels(
            sample.hw_timestamp,
            self.handle,
            sample.pollrate,
        );
        if channels.is_empty() {
            return;
        }

        let event = SensorEvent {
            sensor: self.handle,
            payload: EventPayload::Data {
                values: sample.processed,
                bias: sample.offset,
                accuracy: sample.accuracy,
            },
            timestamp: sample.ap_timestamp,
            channels,
        };
        if self.services.events_tx.try_send(event).is_err() {
            error!(node = %self.handle, "event queue full; sample dropped");
        }
    }

    /// Pushes a sample to every dependent node.
    pub fn fan_out(&self, arena: &NodeArena, sample: &Sample) {
        let targets = self.push_targets();
        for consumer in targets {
            if let Ok(node) = arena.get(consumer) {
                node.receive_from_dependency(sample);
            }
        }
    }

    fn push_targets(&self) -> Vec<SensorHandle> {
        self.lock_state().push_targets.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, NodeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_processor(&self) -> MutexGuard<'_, Box<dyn SampleProcessor>> {
        match self.processor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_pipe_rx(&self) -> MutexGuard<'_, Option<PipeReceiver>> {
        match self.pipe_rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for SensorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorNode")
            .field("handle", &self.handle)
            .field("kind", &self.descriptor.kind)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    use hal_types::{SensorDescriptor, SensorKind};

    use crate::clock::ManualClock;
    use crate::iio::MockIioDevice;
    use crate::processors::PassthroughProcessor;

    struct Fixture {
        arena: NodeArena,
        clock: Arc<ManualClock>,
        events_rx: crossbeam_channel::Receiver<SensorEvent>,
        device: Arc<MockIioDevice>,
    }

    fn services(
        clock: &Arc<ManualClock>,
        events_tx: Sender<SensorEvent>,
        proxy: &Arc<ProxyManager>,
    ) -> NodeServices {
        NodeServices {
            clock: Arc::clone(clock) as Arc<dyn Clock>,
            proxy: Arc::clone(proxy),
            events_tx,
        }
    }

    fn hw_descriptor(kind: SensorKind, name: &str) -> SensorDescriptor {
        SensorDescriptor::builder(kind, name)
            .max_range(156.9)
            .rate_bounds(13.0, 416.0)
            .fifo(32, 128)
            .build()
    }

    /// accel (hw) -> virt (sw), virt triggered by accel.
    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let proxy = Arc::new(ProxyManager::new());
        let (events_tx, events_rx) = unbounded();
        let device = Arc::new(MockIioDevice::three_axis(
            SensorKind::Accelerometer,
            "accel",
            0,
            0.01,
        ));

        let accel = Arc::new(SensorNode::new(
            SensorHandle::from_raw(1),
            hw_descriptor(SensorKind::Accelerometer, "accel"),
            NodeClass::Hardware {
                device: Arc::clone(&device) as Arc<dyn IioDevice>,
            },
            Box::new(PassthroughProcessor::new()),
            services(&clock, events_tx.clone(), &proxy),
            64,
        ));

        let virt = Arc::new(SensorNode::new(
            SensorHandle::from_raw(2),
            hw_descriptor(SensorKind::Gravity, "gravity"),
            NodeClass::Software,
            Box::new(PassthroughProcessor::new()),
            services(&clock, events_tx, &proxy),
            64,
        ));

        virt.add_dependency(&accel).unwrap();
        virt.set_trigger(accel.handle());
        accel.add_push_target(virt.handle());

        proxy.register(SensorHandle::from_raw(1), FRAMEWORK_CHANNEL);
        proxy.register(SensorHandle::from_raw(2), FRAMEWORK_CHANNEL);

        let mut arena = NodeArena::new();
        arena.insert(accel);
        arena.insert(virt);

        Fixture {
            arena,
            clock,
            events_rx,
            device,
        }
    }

    fn fw() -> SensorHandle {
        SensorHandle::from_raw(0)
    }

    #[test]
    fn enable_reference_counting() {
        let fx = fixture();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();

        let h1 = SensorHandle::from_raw(10);
        let h2 = SensorHandle::from_raw(11);

        accel.enable(&fx.arena, h1, true).unwrap();
        assert!(accel.is_enabled());
        assert!(fx.device.is_enabled());

        accel.enable(&fx.arena, h2, true).unwrap();
        accel.enable(&fx.arena, h1, false).unwrap();
        // Still held by h2.
        assert!(accel.is_enabled());
        assert!(fx.device.is_enabled());

        accel.enable(&fx.arena, h2, false).unwrap();
        assert!(!accel.is_enabled());
        assert!(!fx.device.is_enabled());
    }

    #[test]
    fn enable_is_idempotent_per_requester() {
        let fx = fixture();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();
        accel.enable(&fx.arena, fw(), true).unwrap();
        accel.enable(&fx.arena, fw(), true).unwrap();
        accel.enable(&fx.arena, fw(), false).unwrap();
        assert!(!accel.is_enabled());
    }

    #[test]
    fn virtual_enable_propagates_to_dependency() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();

        virt.enable(&fx.arena, fw(), true).unwrap();
        assert!(accel.is_enabled());
        assert!(fx.device.is_enabled());

        virt.enable(&fx.arena, fw(), false).unwrap();
        assert!(!accel.is_enabled());
        assert!(!fx.device.is_enabled());
    }

    #[test]
    fn enable_window_gates_samples() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();

        fx.clock.set(Timestamp::from_nanos(1_000));
        virt.enable(&fx.arena, fw(), true).unwrap();

        // Before the window opened.
        assert!(!virt.in_enable_window(Timestamp::from_nanos(500)));
        // Inside.
        assert!(virt.in_enable_window(Timestamp::from_nanos(2_000)));

        fx.clock.set(Timestamp::from_nanos(3_000));
        virt.enable(&fx.arena, fw(), false).unwrap();
        // In-flight sample produced before the disable still valid.
        assert!(virt.in_enable_window(Timestamp::from_nanos(2_500)));
        // Produced after the disable: rejected.
        assert!(!virt.in_enable_window(Timestamp::from_nanos(3_500)));
    }

    #[test]
    fn set_rate_negotiates_minimum() {
        let fx = fixture();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();
        accel.enable(&fx.arena, fw(), true).unwrap();

        let h1 = SensorHandle::from_raw(10);
        accel
            .set_rate(&fx.arena, h1, Duration::from_hz(52.0), Duration::zero())
            .unwrap();
        assert_eq!(accel.current_pollrate(), Duration::from_hz(52.0));

        // A faster requester wins.
        accel
            .set_rate(&fx.arena, fw(), Duration::from_hz(208.0), Duration::zero())
            .unwrap();
        assert_eq!(accel.current_pollrate(), Duration::from_hz(208.0));

        let writes = fx.device.rate_writes();
        assert_eq!(writes.len(), 2);
        assert!((writes[1] - 208.0).abs() < 1e-3);
    }

    #[test]
    fn set_rate_clamps_to_bounds() {
        let fx = fixture();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();

        // 1000Hz request clamps to the 416Hz bound.
        accel
            .set_rate(&fx.arena, fw(), Duration::from_hz(1000.0), Duration::zero())
            .unwrap();
        assert_eq!(accel.current_pollrate(), Duration::from_hz(416.0));

        // 1Hz request clamps to the 13Hz bound.
        accel
            .set_rate(&fx.arena, fw(), Duration::from_hz(1.0), Duration::zero())
            .unwrap();
        assert_eq!(accel.current_pollrate(), Duration::from_hz(13.0));
    }

    #[test]
    fn timeout_without_fifo_rejected() {
        let clock = Arc::new(ManualClock::new());
        let proxy = Arc::new(ProxyManager::new());
        let (events_tx, _events_rx) = unbounded();
        let desc = SensorDescriptor::builder(SensorKind::Accelerometer, "nofifo")
            .max_range(10.0)
            .rate_bounds(1.0, 100.0)
            .build();
        let node = SensorNode::new(
            SensorHandle::from_raw(1),
            desc,
            NodeClass::Software,
            Box::new(PassthroughProcessor::new()),
            services(&clock, events_tx, &proxy),
            8,
        );
        let arena = NodeArena::new();

        let err = node
            .set_rate(
                &arena,
                fw(),
                Duration::from_hz(50.0),
                Duration::from_millis(100),
            )
            .unwrap_err();
        assert!(matches!(err, HalError::InvalidParameter(_)));
    }

    #[test]
    fn rate_propagates_to_dependency() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();

        virt.set_rate(&fx.arena, fw(), Duration::from_hz(104.0), Duration::zero())
            .unwrap();
        assert_eq!(accel.current_pollrate(), Duration::from_hz(104.0));
    }

    #[test]
    fn receive_gates_and_forwards_trigger_data() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let rx = virt.take_pipe_receiver().unwrap();

        fx.clock.set(Timestamp::from_nanos(100));
        virt.enable(&fx.arena, fw(), true).unwrap();

        // Sample before the enable window: dropped.
        let mut early = Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(50));
        early.pollrate = Duration::from_hz(100.0);
        virt.receive_from_dependency(&early);
        assert!(rx.try_recv().is_none());

        // Sample inside the window: buffered and forwarded.
        let mut ok = Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(200));
        ok.pollrate = Duration::from_hz(100.0);
        virt.receive_from_dependency(&ok);
        assert!(matches!(rx.try_recv(), Some(PipeEvent::Data(_))));
    }

    #[test]
    fn decimation_forwards_every_nth_trigger_sample() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let rx = virt.take_pipe_receiver().unwrap();

        fx.clock.set(Timestamp::from_nanos(1));
        virt.enable(&fx.arena, fw(), true).unwrap();
        // Node at 100Hz, producer at 400Hz: every 4th sample passes.
        virt.set_rate(&fx.arena, fw(), Duration::from_hz(100.0), Duration::zero())
            .unwrap();
        // Drain the rate-change wakeup queued by set_rate.
        while rx.try_recv().is_some() {}

        let mut forwarded = 0;
        for i in 0..12u64 {
            let mut s =
                Sample::new(SensorHandle::from_raw(1), Timestamp::from_nanos(10 + i));
            s.pollrate = Duration::from_hz(400.0);
            virt.receive_from_dependency(&s);
            if rx.try_recv().is_some() {
                forwarded += 1;
            }
        }
        assert_eq!(forwarded, 3);
    }

    #[test]
    fn flush_disabled_sensor_fails() {
        let fx = fixture();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();
        assert!(matches!(
            accel.request_flush(&fx.arena, Timestamp::from_nanos(1)),
            Err(HalError::InvalidState(_))
        ));
    }

    #[test]
    fn hardware_flush_parks_request() {
        let fx = fixture();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();
        accel.enable(&fx.arena, fw(), true).unwrap();

        accel
            .request_flush(&fx.arena, Timestamp::from_nanos(500))
            .unwrap();
        assert_eq!(fx.device.flushes(), 1);
        assert_eq!(accel.flush_stack().pending(), 1);

        // Data at 600 releases the request.
        let expired = accel.flush_stack().pop_expired(Timestamp::from_nanos(600));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].target, accel.handle());
    }

    #[test]
    fn software_flush_rides_trigger_chain() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();
        virt.enable(&fx.arena, fw(), true).unwrap();

        virt.request_flush(&fx.arena, Timestamp::from_nanos(700))
            .unwrap();
        // Parked on the hardware node, targeting the software node.
        let expired = accel.flush_stack().pop_expired(Timestamp::from_nanos(800));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].target, virt.handle());
    }

    #[test]
    fn flush_event_defers_until_data_catches_up() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let _rx = virt.take_pipe_receiver().unwrap();

        fx.clock.set(Timestamp::from_nanos(1));
        virt.enable(&fx.arena, fw(), true).unwrap();

        // No data emitted yet: the flush defers.
        virt.handle_flush_event(&fx.arena, virt.handle(), Timestamp::from_nanos(100));
        assert!(fx.events_rx.try_recv().is_err());

        // Emit a data sample past the request; process_and_emit releases it.
        let mut s = Sample::new(virt.handle(), Timestamp::from_nanos(150));
        s.pollrate = Duration::from_hz(100.0);
        virt.process_and_emit(&fx.arena, ProcessInput::trigger_only(s));

        let events: Vec<SensorEvent> = fx.events_rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].payload, EventPayload::Data { .. }));
        assert!(matches!(events[1].payload, EventPayload::FlushComplete));
    }

    #[test]
    fn one_shot_auto_disables() {
        let clock = Arc::new(ManualClock::new());
        let proxy = Arc::new(ProxyManager::new());
        let (events_tx, events_rx) = unbounded();
        let desc = SensorDescriptor::builder(SensorKind::SignificantMotion, "sigmo")
            .max_range(1.0)
            .rate_bounds(0.0, 1.0)
            .build();
        let node = Arc::new(SensorNode::new(
            SensorHandle::from_raw(1),
            desc,
            NodeClass::Software,
            Box::new(PassthroughProcessor::new()),
            services(&clock, events_tx, &proxy),
            8,
        ));
        proxy.register(node.handle(), FRAMEWORK_CHANNEL);
        let mut arena = NodeArena::new();
        arena.insert(Arc::clone(&node));

        clock.set(Timestamp::from_nanos(10));
        node.enable(&arena, fw(), true).unwrap();
        assert!(node.is_enabled());

        let mut s = Sample::new(node.handle(), Timestamp::from_nanos(20));
        s.processed[0] = 1.0;
        s.pollrate = Duration::from_hz(1.0);
        node.process_and_emit(&arena, ProcessInput::trigger_only(s));

        // Event delivered, sensor disabled itself.
        assert!(events_rx.try_recv().is_ok());
        assert!(!node.is_enabled());
    }

    #[test]
    fn dependency_limit_enforced() {
        let fx = fixture();
        let virt = fx.arena.get(SensorHandle::from_raw(2)).unwrap();
        let accel = fx.arena.get(SensorHandle::from_raw(1)).unwrap();

        // One already wired by the fixture.
        for _ in 0..(MAX_DEPENDENCIES - 1) {
            virt.add_dependency(&accel).unwrap();
        }
        assert!(matches!(
            virt.add_dependency(&accel),
            Err(HalError::TooManyDependencies { .. })
        ));
    }
}
