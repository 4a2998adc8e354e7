//! Error types for circuit assembly and analysis.
//!
//! Every fallible operation in the crate returns [`CircuitError`]. Solve
//! failures carry the underlying [`LinearSolveError`] so the caller can see
//! why the matrix was rejected.

use std::fmt;

use thiserror::Error;

use crate::circuit::NodeId;
use crate::solver::LinearSolveError;

/// Result type alias using [`CircuitError`].
pub type Result<T> = std::result::Result<T, CircuitError>;

#[derive(Error, Debug)]
pub enum CircuitError {
    // ============ Construction Errors ============
    /// Non-physical element value
    #[error("Invalid parameter '{parameter}' for element '{element}': {value}")]
    InvalidParameter {
        element: String,
        parameter: &'static str,
        value: f64,
    },

    /// Element names must be unique within a circuit
    #[error("Duplicate element name '{name}'")]
    DuplicateElement { name: String },

    // ============ Assembly Errors ============
    #[error("Element '{name}' has no branch index in the current layout")]
    UnindexedElement { name: String },

    #[error("Node {node} has no index in the current layout")]
    UnindexedNode { node: NodeId },

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    // ============ Solve Errors ============
    /// DC system has no unique solution
    #[error(
        "Singular {size}x{size} system - check the circuit for floating nodes \
         or voltage source loops: {source}"
    )]
    SingularSystem {
        size: usize,
        #[source]
        source: LinearSolveError,
    },

    /// The algebraic-constraint system used for initial conditions is singular
    #[error(
        "Cannot compute consistent initial state for {size} unknowns - check for \
         capacitors across voltage sources or nodes without a DC path: {source}"
    )]
    InconsistentInitialState {
        size: usize,
        #[source]
        source: LinearSolveError,
    },

    // ============ Transient Errors ============
    #[error("Invalid time span: t0={t0}, tf={tf}")]
    InvalidTimeSpan { t0: f64, tf: f64 },

    #[error("Integration failed at t = {time:.6e}: {message}")]
    IntegrationFailed { time: f64, message: String },
}

impl CircuitError {
    pub fn invalid_parameter(
        element: impl Into<String>,
        parameter: &'static str,
        value: f64,
    ) -> Self {
        Self::InvalidParameter {
            element: element.into(),
            parameter,
            value,
        }
    }

    pub fn integration_failed(time: f64, message: impl Into<String>) -> Self {
        Self::IntegrationFailed {
            time,
            message: message.into(),
        }
    }
}

/// Advisory raised for a node touched by fewer than two element terminals.
///
/// Never aborts a solve: a single branch to ground is a legal topology that
/// still trips this check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingNodeWarning {
    pub node: NodeId,
    pub connections: usize,
}

impl fmt::Display for FloatingNodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node {} might be floating ({} connection{})",
            self.node,
            self.connections,
            if self.connections == 1 { "" } else { "s" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_element() {
        let err = CircuitError::invalid_parameter("R1", "resistance", -5.0);
        assert_eq!(err.to_string(), "Invalid parameter 'resistance' for element 'R1': -5");
    }

    #[test]
    fn test_floating_node_warning_display() {
        let warning = FloatingNodeWarning { node: 3, connections: 1 };
        assert_eq!(warning.to_string(), "Node 3 might be floating (1 connection)");
    }
}
