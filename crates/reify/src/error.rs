use thiserror::Error;

use crate::ir::NodeRef;

/// Failure conditions surfaced by the cost analysis and the stats pass. None are retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReifyError {
    /// The program or profile holds data the cost model cannot price.
    #[error("invalid input: {detail}")]
    InvalidInput { detail: String },
    /// Nested-computation references or operand lists do not form a traversable graph.
    #[error("malformed graph: {detail}")]
    MalformedGraph { detail: String },
    /// The backend-config store rejected a write.
    #[error("backend config write failed for {node}: {reason}")]
    ConfigWriteFailure { node: NodeRef, reason: String },
}

impl ReifyError {
    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            detail: detail.into(),
        }
    }

    pub fn malformed_graph(detail: impl Into<String>) -> Self {
        Self::MalformedGraph {
            detail: detail.into(),
        }
    }

    pub fn config_write(node: NodeRef, reason: impl Into<String>) -> Self {
        Self::ConfigWriteFailure {
            node,
            reason: reason.into(),
        }
    }

    /// Stable short name of the condition.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::MalformedGraph { .. } => "malformed_graph",
            Self::ConfigWriteFailure { .. } => "config_write_failure",
        }
    }
}

pub type Result<T, E = ReifyError> = std::result::Result<T, E>;
