//! Error types for controller operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.
//!
//! - [`ControllerError::ParseDiagnostic`] / [`ControllerError::Graph`] are
//!   produced during [`Loader::apply`](crate::loader::Loader::apply) and are
//!   collected rather than failing fast; the caller sees them aggregated in
//!   a `LoadReport`.
//! - [`ControllerError::Evaluation`] marks a single node `Unhealthy`; it
//!   never aborts evaluation of the rest of the graph.
//! - [`ControllerError::Runtime`] marks a node `Exited`; neighbours keep
//!   their last-known-good exports.
//! - [`ControllerError::Scheduler`] is aggregated into
//!   `Scheduler::synchronize`'s return value.
//! - [`ControllerError::Fatal`] indicates a broken controller invariant and
//!   is not expected to be recovered from.

use crate::graph::GraphError;
use crate::id::NodeId;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// All error kinds a controller operation can surface.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A position-bearing diagnostic from the configuration parser.
    ///
    /// Propagated unchanged — the controller neither interprets nor retries
    /// parser diagnostics.
    #[error("parse error: {0}")]
    ParseDiagnostic(String),

    /// A graph-structure error: cycle, duplicate id, or dangling reference.
    ///
    /// Reported as a diagnostic; the previous graph is preserved by the
    /// caller.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A component's `update` rejected its arguments, or a reference
    /// resolved to a value incompatible with the component's schema.
    ///
    /// The offending node becomes `Unhealthy`; evaluation of the rest of
    /// the graph continues.
    #[error("node '{node}' failed to evaluate: {message}")]
    Evaluation { node: NodeId, message: String },

    /// A component's `run` returned or panicked.
    ///
    /// The node becomes `Exited`; downstream neighbours keep their last
    /// valid exports.
    #[error("node '{node}' exited: {message}")]
    Runtime { node: NodeId, message: String },

    /// A worker failed to start.
    ///
    /// Aggregated into `Scheduler::synchronize`'s return value; the
    /// individual node is marked `Exited`.
    #[error("failed to start worker for node '{node}': {message}")]
    Scheduler { node: NodeId, message: String },

    /// `Controller::close` was called twice, or a controller invariant
    /// broke. Not expected to be recovered from.
    #[error("fatal controller error: {0}")]
    Fatal(String),

    /// A document could not be deserialized.
    #[error("document parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Reading a configuration document from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    pub fn evaluation(node: NodeId, message: impl Into<String>) -> Self {
        Self::Evaluation { node, message: message.into() }
    }

    pub fn runtime(node: NodeId, message: impl Into<String>) -> Self {
        Self::Runtime { node, message: message.into() }
    }

    pub fn scheduler(node: NodeId, message: impl Into<String>) -> Self {
        Self::Scheduler { node, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_wraps_transparently() {
        let err: ControllerError = GraphError::CycleDetected { cycle: vec!["a.b".into()] }.into();
        assert!(matches!(err, ControllerError::Graph(_)));
        assert!(err.to_string().contains("a.b"));
    }

    #[test]
    fn evaluation_error_names_node() {
        let node = NodeId::parse("prometheus.scrape").unwrap();
        let err = ControllerError::evaluation(node.clone(), "missing field 'url'");
        assert_eq!(
            err.to_string(),
            "node 'prometheus.scrape' failed to evaluate: missing field 'url'"
        );
    }
}
