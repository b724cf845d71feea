//! Error types for the hal-graph crate.

use thiserror::Error;

/// Errors raised by graph construction and ordering.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An edge endpoint is not in the graph.
    #[error("node {0} not found")]
    NodeNotFound(u32),

    /// The graph contains a cycle; no topological order exists.
    #[error("cycle detected through node {0}")]
    Cycle(u32),
}
