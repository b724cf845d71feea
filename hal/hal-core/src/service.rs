//! HAL composition root.
//!
//! [`SensorHal::open`] discovers hardware sensors from the supplied
//! devices, registers the virtual sensors whose dependencies resolve,
//! builds and prunes the dependency graph, wires dependency rings and
//! push targets in topological order, and finally starts one worker
//! thread per node. Everything structural is built before the first
//! thread runs; afterward the list, graph, and arena are read-only.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use hashbrown::HashMap;
use tracing::{info, warn};

use hal_graph::DependencyGraph;
use hal_types::{
    Duration, SensorDescriptor, SensorHandle, SensorKind, SensorsList, Timestamp,
};

use crate::clock::{Clock, MonotonicClock};
use crate::config::HalConfig;
use crate::error::HalError;
use crate::iio::{IioDevice, SelfTestOutcome};
use crate::node::{NodeArena, NodeClass, NodeServices, SensorEvent, SensorNode};
use crate::persist::{BiasStore, MemoryBiasStore};
use crate::placement::PlacementManager;
use crate::processors::{
    FusionCoreProcessor, FusionOutput, FusionOutputProcessor, MotionProcessor,
    OnChangeProcessor, PassthroughProcessor, SampleProcessor, SharedFusion,
    SignificantMotionProcessor, StepCounterProcessor, StepDetectorProcessor,
    UncalibratedProcessor,
};
use crate::proxy::{ProxyManager, FRAMEWORK_CHANNEL};
use crate::vendor::{
    Calibration, ComplementaryFusion, Fusion, LinearTimesync, NoCalibration, Timesync,
};
use crate::{hw, sw, Result};

/// Requester identity of the upper framework.
pub const FRAMEWORK_REQUESTER: SensorHandle = SensorHandle::from_raw(0);

const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Collaborator services injected into the engine.
///
/// Singletons are deliberately absent: anything with process-global
/// state (the vendor algorithm libraries) is constructed by the caller
/// and passed in here.
pub struct HalServices {
    /// AP time source.
    pub clock: Arc<dyn Clock>,
    /// Hardware/AP clock reconciliation.
    pub timesync: Arc<dyn Timesync>,
    /// Calibration persistence backend.
    pub bias_store: Arc<dyn BiasStore>,
    /// Factory for per-sensor calibration instances.
    pub make_calibration: Box<dyn Fn(SensorKind) -> Box<dyn Calibration> + Send + Sync>,
    /// Factory for per-core fusion instances.
    pub make_fusion: Box<dyn Fn() -> Box<dyn Fusion> + Send + Sync>,
}

impl Default for HalServices {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            timesync: Arc::new(LinearTimesync::new()),
            bias_store: Arc::new(MemoryBiasStore::new()),
            make_calibration: Box::new(|_| Box::new(NoCalibration)),
            make_fusion: Box::new(|| Box::new(ComplementaryFusion::new())),
        }
    }
}

/// The open HAL instance.
pub struct SensorHal {
    list: SensorsList,
    arena: Arc<NodeArena>,
    proxy: Arc<ProxyManager>,
    placement: PlacementManager,
    clock: Arc<dyn Clock>,
    events_rx: Receiver<SensorEvent>,
    threads: Vec<JoinHandle<()>>,
    exposed: Vec<SensorHandle>,
    open: bool,
}

impl std::fmt::Debug for SensorHal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHal")
            .field("exposed", &self.exposed)
            .field("threads", &self.threads.len())
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl SensorHal {
    /// Opens the HAL over the given devices.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::NoSensors`] when no device yields a valid
    /// descriptor - the one fatal discovery condition. Individual device
    /// failures are logged and skipped.
    pub fn open(
        config: HalConfig,
        devices: Vec<Arc<dyn IioDevice>>,
        services: HalServices,
    ) -> Result<Self> {
        let mut list = SensorsList::new();
        let mut device_by_handle: HashMap<u32, Arc<dyn IioDevice>> = HashMap::new();

        // 1. Hardware discovery.
        for device in devices {
            let descriptor = hw_descriptor_from(device.as_ref(), &config);
            match list.add(descriptor) {
                Ok(handle) => {
                    info!(
                        sensor = %handle,
                        kind = %device.kind(),
                        name = device.name(),
                        "hardware sensor registered"
                    );
                    device_by_handle.insert(handle.as_raw(), device);
                }
                Err(err) => {
                    warn!(name = device.name(), %err, "device skipped");
                }
            }
        }
        if list.is_empty() {
            return Err(HalError::NoSensors);
        }

        // 2. Virtual sensors, fusion cores first so consumers resolve.
        let mut modules: Vec<u16> = list.iter().map(|(_, d)| d.module_id).collect();
        modules.sort_unstable();
        modules.dedup();

        for module in &modules {
            for kind in SensorKind::virtual_kinds() {
                let descriptor = virtual_descriptor(*kind, *module, &list);
                if let Err(err) = list.add(descriptor) {
                    warn!(kind = %kind, module, %err, "virtual sensor skipped");
                }
            }
        }

        // 3. Graph over every listed sensor; dependency edges where the
        // kinds resolve within the module.
        let mut graph: DependencyGraph<SensorHandle> = DependencyGraph::new();
        for (handle, _) in list.iter() {
            graph.add_node(handle.as_raw(), handle);
        }

        let mut unresolved: Vec<SensorHandle> = Vec::new();
        for (handle, descriptor) in list.iter() {
            for dep_kind in descriptor.kind.dependencies() {
                match list.find(*dep_kind, descriptor.module_id) {
                    Some(dep) => {
                        graph.add_edge(dep.as_raw(), handle.as_raw())?;
                    }
                    None => {
                        unresolved.push(handle);
                        break;
                    }
                }
            }
        }

        // 4. Prune unsatisfiable sensors and their transitive dependents.
        for handle in unresolved {
            let removed = graph.remove_node_and_dependents(handle.as_raw());
            if !removed.is_empty() {
                info!(?removed, "pruned sensors with unresolved dependencies");
            }
        }

        // 5. Placement resolution.
        let placement = PlacementManager::from_config(&config, &list);

        // 6. Node construction in topological order, producers first.
        let order = graph.topological_sort()?;
        let proxy = Arc::new(ProxyManager::new());
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let mut arena = NodeArena::new();
        let mut fusion_by_core: HashMap<u32, SharedFusion> = HashMap::new();

        for id in &order {
            let handle = SensorHandle::from_raw(*id);
            let descriptor = list.get(handle)?.clone();
            let class = match device_by_handle.get(id) {
                Some(device) => NodeClass::Hardware {
                    device: Arc::clone(device),
                },
                None => NodeClass::Software,
            };
            let processor = build_processor(
                &descriptor,
                handle,
                &list,
                &placement,
                &services,
                &mut fusion_by_core,
            );
            let node = Arc::new(SensorNode::new(
                handle,
                descriptor,
                class,
                processor,
                NodeServices {
                    clock: Arc::clone(&services.clock),
                    proxy: Arc::clone(&proxy),
                    events_tx: events_tx.clone(),
                },
                config.pipe_capacity,
            ));
            arena.insert(node);
        }

        // 7. Dependency wiring in the same producers-first order: every
        // node's producers are fully wired before anything consuming it.
        for id in &order {
            let handle = SensorHandle::from_raw(*id);
            let node = arena.get(handle)?;
            let mut producers = graph.producers_of(*id);
            producers.sort_unstable();
            for producer_id in producers {
                let producer = arena.get(SensorHandle::from_raw(producer_id))?;
                node.add_dependency(&producer)?;
                producer.add_push_target(handle);
            }
            if let Some(trigger_kind) = node.descriptor().kind.trigger_dependency() {
                if let Some(trigger) = list.find(trigger_kind, node.descriptor().module_id) {
                    node.set_trigger(trigger);
                }
            }
        }

        // 8. Worker threads, only now that the topology is frozen.
        let arena = Arc::new(arena);
        let mut threads = Vec::new();
        for id in &order {
            let node = arena.get(SensorHandle::from_raw(*id))?;
            node.set_running(true);
            let thread = if node.is_hardware() {
                hw::spawn_hardware_worker(
                    Arc::clone(&node),
                    Arc::clone(&arena),
                    Arc::clone(&services.timesync),
                )
            } else {
                sw::spawn_software_worker(Arc::clone(&node), Arc::clone(&arena), config.retry)
            };
            threads.push(thread);
        }

        let exposed: Vec<SensorHandle> = list
            .exposed()
            .filter(|(h, _)| graph.contains(h.as_raw()))
            .map(|(h, _)| h)
            .collect();
        info!(
            sensors = exposed.len(),
            nodes = arena.len(),
            "sensor hal open"
        );

        Ok(Self {
            list,
            arena,
            proxy,
            placement,
            clock: services.clock,
            events_rx,
            threads,
            exposed,
            open: true,
        })
    }

    /// Returns the sensors exposed to the framework.
    #[must_use]
    pub fn sensors(&self) -> Vec<(SensorHandle, SensorDescriptor)> {
        self.exposed
            .iter()
            .filter_map(|h| self.list.get(*h).ok().map(|d| (*h, d.clone())))
            .collect()
    }

    /// Returns a sensor descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Sensor`] for unknown handles.
    pub fn descriptor(&self, handle: SensorHandle) -> Result<&SensorDescriptor> {
        Ok(self.list.get(handle)?)
    }

    /// Enables or disables a sensor for the framework.
    ///
    /// Enabling registers the sensor to the framework channel so its
    /// events route there; the last disable unregisters it.
    ///
    /// # Errors
    ///
    /// Propagates dependency and device failures.
    pub fn enable(&self, handle: SensorHandle, on: bool) -> Result<()> {
        let node = self.arena.get(handle)?;
        if on {
            self.proxy.register(handle, FRAMEWORK_CHANNEL);
            if let Err(err) = node.enable(&self.arena, FRAMEWORK_REQUESTER, true) {
                self.proxy.unregister(handle, FRAMEWORK_CHANNEL);
                return Err(err);
            }
            Ok(())
        } else {
            node.enable(&self.arena, FRAMEWORK_REQUESTER, false)?;
            if !node.is_enabled() {
                self.proxy.unregister(handle, FRAMEWORK_CHANNEL);
            }
            Ok(())
        }
    }

    /// Sets the framework's sampling period and batching timeout.
    ///
    /// The period becomes the framework channel's requested rate; the
    /// physical sensor runs at the fastest rate requested across all
    /// channels, with the proxy decimating each channel independently.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidParameter`] for a timeout without a
    /// FIFO; propagates device failures.
    pub fn set_rate(
        &self,
        handle: SensorHandle,
        period: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let node = self.arena.get(handle)?;
        self.proxy
            .configure(handle, FRAMEWORK_CHANNEL, self.clock.now(), period);
        let target = self.proxy.max_pollrate(handle).min_nonzero(period);
        node.set_rate(&self.arena, FRAMEWORK_REQUESTER, target, timeout)
    }

    /// Requests a flush; completion arrives on the event stream.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidState`] for disabled sensors and
    /// [`HalError::InvalidParameter`] for one-shot sensors.
    pub fn flush(&self, handle: SensorHandle) -> Result<()> {
        let node = self.arena.get(handle)?;
        node.request_flush(&self.arena, self.clock.now())
    }

    /// Registers a sensor to a direct-report channel.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Sensor`] for unknown handles.
    pub fn register_direct_channel(&self, handle: SensorHandle, channel: u32) -> Result<()> {
        let _ = self.arena.get(handle)?;
        self.proxy.register(handle, channel);
        Ok(())
    }

    /// Configures a direct-report channel's rate and re-negotiates the
    /// physical rate.
    ///
    /// # Errors
    ///
    /// Propagates device failures from the rate change.
    pub fn configure_direct_channel(
        &self,
        handle: SensorHandle,
        channel: u32,
        period: Duration,
    ) -> Result<()> {
        let node = self.arena.get(handle)?;
        self.proxy
            .configure(handle, channel, self.clock.now(), period);
        let target = self.proxy.max_pollrate(handle);
        if target.is_zero() {
            return Ok(());
        }
        node.set_rate(&self.arena, FRAMEWORK_REQUESTER, target, Duration::zero())
    }

    /// Unregisters a sensor from a direct-report channel.
    pub fn unregister_direct_channel(&self, handle: SensorHandle, channel: u32) {
        self.proxy.unregister(handle, channel);
    }

    /// Runs a hardware sensor's self-test.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidParameter`] for software sensors and
    /// propagates device failures.
    pub fn self_test(&self, handle: SensorHandle) -> Result<SelfTestOutcome> {
        let node = self.arena.get(handle)?;
        match node.device() {
            Some(device) => device.self_test(),
            None => Err(HalError::invalid_parameter(
                "self-test on a software sensor",
            )),
        }
    }

    /// The framework-facing event stream.
    #[must_use]
    pub fn events(&self) -> &Receiver<SensorEvent> {
        &self.events_rx
    }

    /// The placement registry resolved at open time.
    #[must_use]
    pub fn placements(&self) -> &PlacementManager {
        &self.placement
    }

    /// Current AP timestamp from the engine clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Stops every worker thread and disables every sensor.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        for handle in self.exposed.clone() {
            let _ = self.enable(handle, false);
        }
        for node in self.arena.iter() {
            node.set_running(false);
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        info!("sensor hal closed");
    }
}

impl Drop for SensorHal {
    fn drop(&mut self) {
        self.close();
    }
}

fn hw_descriptor_from(device: &dyn IioDevice, config: &HalConfig) -> SensorDescriptor {
    let rates = device.available_rates_hz();
    let min_rate = rates.first().copied().unwrap_or(0.0);
    let mut max_rate = rates.last().copied().unwrap_or(0.0);
    let mut max_range = device.max_range();

    for o in &config.overrides {
        if o.kind == device.kind() {
            if let Some(range) = o.max_range {
                max_range = max_range.min(range);
            }
            if let Some(rate) = o.max_rate_hz {
                max_rate = max_rate.min(rate);
            }
        }
    }

    SensorDescriptor::builder(device.kind(), device.name())
        .vendor("STMicroelectronics")
        .resolution(device.resolution())
        .max_range(max_range)
        .power(device.power_ma())
        .rate_bounds(min_rate, max_rate)
        .fifo(device.fifo_reserved(), device.fifo_max())
        .module(device.module_id())
        .build()
}

fn virtual_descriptor(kind: SensorKind, module: u16, list: &SensorsList) -> SensorDescriptor {
    // Inherit declared capabilities from the trigger dependency where it
    // exists; a missing trigger yields a placeholder that graph pruning
    // removes before exposure.
    let base = kind
        .trigger_dependency()
        .and_then(|k| list.find(k, module))
        .and_then(|h| list.get(h).ok());

    let mut builder = SensorDescriptor::builder(kind, kind.to_string())
        .vendor("STMicroelectronics")
        .module(module);

    builder = match base {
        Some(base) => builder
            .resolution(base.resolution)
            .max_range(base.max_range)
            .power(base.power_ma)
            .rate_bounds(base.min_rate_hz, base.max_rate_hz),
        None => builder.max_range(1.0).rate_bounds(0.0, 1.0),
    };
    builder.build()
}

fn build_processor(
    descriptor: &SensorDescriptor,
    handle: SensorHandle,
    list: &SensorsList,
    placement: &PlacementManager,
    services: &HalServices,
    fusion_by_core: &mut HashMap<u32, SharedFusion>,
) -> Box<dyn SampleProcessor> {
    let kind = descriptor.kind;
    let module = descriptor.module_id;
    let rate_hz = f64::from(descriptor.max_rate_hz);

    match kind {
        SensorKind::Accelerometer | SensorKind::Gyroscope | SensorKind::Magnetometer => {
            Box::new(MotionProcessor::new(
                placement.placement_for(handle),
                (services.make_calibration)(kind),
                Arc::clone(&services.bias_store),
                format!("{kind}_bias_module{module}"),
                rate_hz,
            ))
        }
        SensorKind::AccelerometerUncalibrated
        | SensorKind::GyroscopeUncalibrated
        | SensorKind::MagnetometerUncalibrated => Box::new(UncalibratedProcessor::new()),
        SensorKind::Fusion6Axis | SensorKind::Fusion9Axis | SensorKind::GeomagFusion => {
            let fusion: SharedFusion =
                Arc::new(std::sync::Mutex::new((services.make_fusion)()));
            fusion_by_core.insert(handle.as_raw(), Arc::clone(&fusion));
            let gyro = matches!(kind, SensorKind::Fusion6Axis | SensorKind::Fusion9Axis)
                .then(|| list.find(SensorKind::Gyroscope, module))
                .flatten();
            let mag = matches!(kind, SensorKind::Fusion9Axis | SensorKind::GeomagFusion)
                .then(|| list.find(SensorKind::Magnetometer, module))
                .flatten();
            Box::new(FusionCoreProcessor::new(fusion, gyro, mag, rate_hz))
        }
        SensorKind::Gravity
        | SensorKind::LinearAcceleration
        | SensorKind::GameRotationVector
        | SensorKind::RotationVector
        | SensorKind::GeomagneticRotationVector => {
            let select = match kind {
                SensorKind::Gravity => FusionOutput::Gravity,
                SensorKind::LinearAcceleration => FusionOutput::LinearAcceleration,
                _ => FusionOutput::Quaternion,
            };
            let core = kind
                .trigger_dependency()
                .and_then(|k| list.find(k, module))
                .and_then(|h| fusion_by_core.get(&h.as_raw()).cloned());
            match core {
                Some(fusion) => Box::new(FusionOutputProcessor::new(fusion, select)),
                // Core pruned: this node is pruned too, but the arena
                // builder still wants a processor.
                None => Box::new(PassthroughProcessor::new()),
            }
        }
        SensorKind::StepCounter => Box::new(StepCounterProcessor::new()),
        SensorKind::StepDetector => Box::new(StepDetectorProcessor),
        SensorKind::SignificantMotion => Box::new(SignificantMotionProcessor),
        SensorKind::AmbientTemperature => Box::new(OnChangeProcessor::new()),
        _ => Box::new(PassthroughProcessor::new()),
    }
}
