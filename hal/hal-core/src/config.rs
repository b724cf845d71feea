//! Engine configuration.
//!
//! Structured replacement for the platform's property strings: placement
//! layers, per-kind overrides, and pipeline tunables, deserialized from
//! JSON at HAL-open time.

use serde::{Deserialize, Serialize};

use hal_types::SensorKind;

use crate::Result;

/// One configuration layer for a sensor's mounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Row-major 3x3 rotation matrix.
    pub rotation: [[f32; 3]; 3],
    /// Placement vector in meters.
    #[serde(default)]
    pub location: [f32; 3],
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            location: [0.0; 3],
        }
    }
}

/// Placement configuration for one sensor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementEntry {
    /// Sensor kind the entry applies to.
    pub kind: SensorKind,
    /// Module id the entry applies to.
    #[serde(default)]
    pub module: u16,
    /// Board-level mounting layer.
    pub primary: LayerConfig,
    /// Optional device-level correction applied on top.
    #[serde(default)]
    pub secondary: Option<LayerConfig>,
}

/// Per-kind capability overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindOverride {
    /// Sensor kind the override applies to.
    pub kind: SensorKind,
    /// Overridden maximum range, when set.
    #[serde(default)]
    pub max_range: Option<f32>,
    /// Overridden maximum rate in Hz, when set.
    #[serde(default)]
    pub max_rate_hz: Option<f32>,
}

/// Retry policy for dependency data lookups in software sensors.
///
/// The lookup races the producer thread at enable time; the consumer
/// retries with a short sleep instead of blocking on a condition. Both
/// knobs are tunables, not constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwRetryPolicy {
    /// Number of lookup attempts before giving up on the cycle.
    pub attempts: u32,
    /// Sleep between attempts, in microseconds.
    pub backoff_us: u64,
}

impl Default for SwRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff_us: 10,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalConfig {
    /// Placement layers per sensor instance.
    #[serde(default)]
    pub placements: Vec<PlacementEntry>,
    /// Capability overrides per kind.
    #[serde(default)]
    pub overrides: Vec<KindOverride>,
    /// Software dependency lookup retries.
    #[serde(default)]
    pub retry: SwRetryPolicy,
    /// Capacity of each node's event pipe.
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
}

const fn default_pipe_capacity() -> usize {
    256
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            placements: Vec::new(),
            overrides: Vec::new(),
            retry: SwRetryPolicy::default(),
            pipe_capacity: default_pipe_capacity(),
        }
    }
}

impl HalConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HalError::Config`] on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
