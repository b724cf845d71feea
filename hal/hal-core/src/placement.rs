//! Sensor mounting correction.
//!
//! Each physical sensor carries an effective rotation matrix and
//! placement vector composed from two configuration layers: the primary
//! layer describes the board-level mounting, the secondary an optional
//! device-level correction applied on top. Both default to
//! identity/zero. Computed once after the sensor list is built and
//! read-only afterward.

use glam::{Mat3, Vec3};
use hashbrown::HashMap;
use tracing::{debug, warn};

use hal_types::{SensorHandle, SensorKind, SensorsList};

use crate::config::{HalConfig, LayerConfig};
use crate::error::HalError;
use crate::Result;

/// Determinant magnitude below which a rotation matrix is rejected.
pub const SINGULARITY_EPSILON: f32 = 1e-6;

/// One configuration layer: a rotation and a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementLayer {
    /// Rotation applied to sensor axes.
    pub rotation: Mat3,
    /// Sensor position relative to the device origin, in meters.
    pub location: Vec3,
}

impl Default for PlacementLayer {
    fn default() -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            location: Vec3::ZERO,
        }
    }
}

impl From<&LayerConfig> for PlacementLayer {
    fn from(cfg: &LayerConfig) -> Self {
        Self {
            rotation: Mat3::from_cols_array_2d(&cfg.rotation).transpose(),
            location: Vec3::from_array(cfg.location),
        }
    }
}

/// Effective mounting correction for one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Final rotation applied to every raw sample.
    pub rotation: Mat3,
    /// Final placement vector.
    pub location: Vec3,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            location: Vec3::ZERO,
        }
    }
}

impl Placement {
    /// Rotates a raw axis triple into the device frame.
    #[must_use]
    pub fn apply(&self, v: [f32; 3]) -> [f32; 3] {
        (self.rotation * Vec3::from_array(v)).to_array()
    }
}

/// Composes the two layers into an effective placement.
///
/// The secondary layer is pre-multiplied: `R = R2 * R1` and
/// `p = R2 * p1 + t2`, i.e. an additional rotation applied after
/// mounting. Without a secondary layer the primary passes through.
#[must_use]
pub fn compose(primary: &PlacementLayer, secondary: Option<&PlacementLayer>) -> Placement {
    match secondary {
        Some(second) => Placement {
            rotation: second.rotation * primary.rotation,
            location: second.rotation * primary.location + second.location,
        },
        None => Placement {
            rotation: primary.rotation,
            location: primary.location,
        },
    }
}

/// Inverts a 3x3 rotation matrix by cofactor expansion.
///
/// Symmetric inputs (within [`SINGULARITY_EPSILON`]) have symmetric
/// inverses, so the lower cofactors are mirrored instead of recomputed.
///
/// # Errors
///
/// Returns [`HalError::SingularMatrix`] when the determinant magnitude
/// is below [`SINGULARITY_EPSILON`]; the caller keeps its previous value.
pub fn invert_rotation(m: &Mat3) -> Result<Mat3> {
    let c = m.to_cols_array_2d();
    // glam is column-major: c[col][row]. Work in row-major terms.
    let a = |row: usize, col: usize| c[col][row];

    let symmetric = (a(0, 1) - a(1, 0)).abs() < SINGULARITY_EPSILON
        && (a(0, 2) - a(2, 0)).abs() < SINGULARITY_EPSILON
        && (a(1, 2) - a(2, 1)).abs() < SINGULARITY_EPSILON;

    // Cofactors of the first row and the upper triangle.
    let c00 = a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1);
    let c01 = -(a(1, 0) * a(2, 2) - a(1, 2) * a(2, 0));
    let c02 = a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0);

    let det = a(0, 0) * c00 + a(0, 1) * c01 + a(0, 2) * c02;
    if det.abs() < SINGULARITY_EPSILON {
        return Err(HalError::SingularMatrix { det: det.abs() });
    }

    let c11 = a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0);
    let c12 = -(a(0, 0) * a(2, 1) - a(0, 1) * a(2, 0));
    let c22 = a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0);

    let (c10, c20, c21) = if symmetric {
        // inv(A) = inv(A)^T for symmetric A: mirror the computed half.
        (c01, c02, c12)
    } else {
        (
            -(a(0, 1) * a(2, 2) - a(0, 2) * a(2, 1)),
            a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1),
            -(a(0, 0) * a(1, 2) - a(0, 2) * a(1, 0)),
        )
    };

    // inverse = adjugate / det; adjugate is the transposed cofactor
    // matrix, so inverse[row][col] = cofactor[col][row] / det.
    let inv = [
        [c00 / det, c10 / det, c20 / det],
        [c01 / det, c11 / det, c21 / det],
        [c02 / det, c12 / det, c22 / det],
    ];
    // Rows above become columns for glam's column-major constructor.
    Ok(Mat3::from_cols_array_2d(&inv).transpose())
}

/// Per-sensor placement registry plus configured overrides.
#[derive(Debug, Default)]
pub struct PlacementManager {
    placements: HashMap<u32, Placement>,
    range_overrides: HashMap<SensorKind, f32>,
    rate_overrides: HashMap<SensorKind, f32>,
}

impl PlacementManager {
    /// Resolves placements for every listed sensor from the config.
    ///
    /// Sensors without a matching config entry get the identity
    /// placement. Virtual sensors inherit nothing here; only hardware
    /// kinds are mounted on a board.
    #[must_use]
    pub fn from_config(config: &HalConfig, list: &SensorsList) -> Self {
        let mut placements = HashMap::new();

        for (handle, descriptor) in list.iter() {
            let entry = config
                .placements
                .iter()
                .find(|p| p.kind == descriptor.kind && p.module == descriptor.module_id);
            let Some(entry) = entry else {
                continue;
            };

            let primary = PlacementLayer::from(&entry.primary);
            let secondary = entry.secondary.as_ref().map(PlacementLayer::from);
            let placement = compose(&primary, secondary.as_ref());
            debug!(
                sensor = %handle,
                kind = %descriptor.kind,
                "placement resolved"
            );
            placements.insert(handle.as_raw(), placement);
        }

        let mut range_overrides = HashMap::new();
        let mut rate_overrides = HashMap::new();
        for o in &config.overrides {
            if let Some(range) = o.max_range {
                range_overrides.insert(o.kind, range);
            }
            if let Some(rate) = o.max_rate_hz {
                rate_overrides.insert(o.kind, rate);
            }
        }

        Self {
            placements,
            range_overrides,
            rate_overrides,
        }
    }

    /// Returns the placement for a sensor, identity when unconfigured.
    #[must_use]
    pub fn placement_for(&self, handle: SensorHandle) -> Placement {
        self.placements
            .get(&handle.as_raw())
            .copied()
            .unwrap_or_default()
    }

    /// Returns the configured max-range override for a kind, if any.
    #[must_use]
    pub fn max_range_override(&self, kind: SensorKind) -> Option<f32> {
        self.range_overrides.get(&kind).copied()
    }

    /// Returns the configured max-rate override for a kind, if any.
    #[must_use]
    pub fn max_rate_override(&self, kind: SensorKind) -> Option<f32> {
        self.rate_overrides.get(&kind).copied()
    }

    /// Legacy 4x3 placement payload: inverse rotation rows then location.
    ///
    /// Returns `None` (and logs) when the rotation cannot be inverted;
    /// the caller keeps whatever payload it had before.
    #[must_use]
    pub fn placement_payload(&self, handle: SensorHandle) -> Option<[[f32; 3]; 4]> {
        let placement = self.placement_for(handle);
        match invert_rotation(&placement.rotation) {
            Ok(inv) => {
                let cols = inv.to_cols_array_2d();
                // Emit row-major rows from the column-major storage.
                Some([
                    [cols[0][0], cols[1][0], cols[2][0]],
                    [cols[0][1], cols[1][1], cols[2][1]],
                    [cols[0][2], cols[1][2], cols[2][2]],
                    placement.location.to_array(),
                ])
            }
            Err(err) => {
                warn!(sensor = %handle, %err, "placement payload kept previous value");
                None
            }
        }
    }
}
