//! Node identifiers.
//!
//! See [`graph`](crate::graph) for how `NodeId`s are wired into edges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a component, formed as `<component_type>.<label>`.
///
/// Unique per controller, immutable for the life of a node. Both segments
/// must be non-empty and restricted to `[a-zA-Z_][a-zA-Z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    component_type: String,
    label: String,
}

/// A `NodeId` failed to validate.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("node id '{0}' is not of the form '<type>.<label>'")]
    NotDotted(String),
    #[error("node id segment '{0}' is empty or contains invalid characters")]
    InvalidSegment(String),
}

fn is_valid_segment(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl NodeId {
    /// Construct a `NodeId` from its two segments directly, without
    /// re-parsing a dotted string.
    pub fn new(component_type: impl Into<String>, label: impl Into<String>) -> Result<Self, NodeIdError> {
        let component_type = component_type.into();
        let label = label.into();
        if !is_valid_segment(&component_type) {
            return Err(NodeIdError::InvalidSegment(component_type));
        }
        if !is_valid_segment(&label) {
            return Err(NodeIdError::InvalidSegment(label));
        }
        Ok(Self { component_type, label })
    }

    /// Parse a dotted `"type.label"` string.
    pub fn parse(s: &str) -> Result<Self, NodeIdError> {
        let (component_type, label) = s
            .split_once('.')
            .ok_or_else(|| NodeIdError::NotDotted(s.to_string()))?;
        Self::new(component_type, label)
    }

    /// The component type segment (e.g. `"prometheus.scrape"`).
    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    /// The user-chosen label segment.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component_type, self.label)
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> String {
        id.to_string()
    }
}
