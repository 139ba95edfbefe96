//! Domain errors raised by the task graph and the response parsers.

use thiserror::Error;

use crate::core::types::NodeId;

/// Errors raised synchronously by [`crate::core::graph::TaskGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Adding `from -> to` would close a dependency cycle, or ordering found one.
    #[error("dependency cycle: {from} -> {to}")]
    Cycle { from: NodeId, to: NodeId },

    #[error("task graph already has a root")]
    RootExists,

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node title must be non-empty")]
    EmptyTitle,
}

/// Structured response did not match the expected shape.
///
/// Never fatal: every caller has a degenerate fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing section {0}")]
    MissingSection(&'static str),

    #[error("no well-formed records")]
    NoRecords,
}
