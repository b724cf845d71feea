//! Generic sensor dependency graph.
//!
//! A directed graph over shared node ownership, built once at HAL-open
//! time to wire virtual sensors to their data producers:
//!
//! - [`DependencyGraph`] - arena of `Arc` nodes keyed by integer id with
//!   O(1) edge add/remove
//! - transitive dependent removal for pruning unsatisfiable sensors
//! - cycle-safe topological ordering, producers first
//!
//! # Example
//!
//! ```
//! use hal_graph::DependencyGraph;
//!
//! let mut graph: DependencyGraph<&str> = DependencyGraph::new();
//! graph.add_node(1, "accel");
//! graph.add_node(2, "gyro");
//! graph.add_node(3, "fusion");
//! graph.add_edge(1, 3).unwrap(); // fusion consumes accel
//! graph.add_edge(2, 3).unwrap(); // fusion consumes gyro
//!
//! let order = graph.topological_sort().unwrap();
//! let fusion_pos = order.iter().position(|id| *id == 3).unwrap();
//! let accel_pos = order.iter().position(|id| *id == 1).unwrap();
//! assert!(accel_pos < fusion_pos);
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod graph;

pub use error::GraphError;
pub use graph::DependencyGraph;

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
