//! Error types for the hal-plumbing crate.

use thiserror::Error;

/// Errors from bounded plumbing structures.
///
/// Everything here maps to the "drop rather than block" policy: a full
/// structure rejects the new entry so the producing thread keeps running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlumbingError {
    /// A bounded stack is at capacity; the entry was dropped.
    #[error("stack full at depth {depth}; entry dropped")]
    StackFull {
        /// Configured stack depth.
        depth: usize,
    },

    /// The pipe's bounded channel is at capacity; the event was dropped.
    #[error("pipe full; event dropped")]
    PipeFull,

    /// The consumer end of the pipe is gone.
    #[error("pipe disconnected")]
    PipeDisconnected,
}

impl PlumbingError {
    /// Creates a stack-full error.
    #[must_use]
    pub const fn stack_full(depth: usize) -> Self {
        Self::StackFull { depth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_full_message() {
        let err = PlumbingError::stack_full(20);
        assert!(err.to_string().contains("20"));
    }
}
