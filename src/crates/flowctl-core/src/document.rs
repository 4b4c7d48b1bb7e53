//! The parsed-configuration document type.
//!
//! The configuration language's lexer and parser are external collaborators:
//! this crate never sees agent-config source text, only the already-parsed
//! tree of [`Block`]s an upstream parser produced. `serde_yaml` stands in
//! for that tree's concrete syntax here the same way it stands in for the
//! graph-definition format elsewhere in this workspace — a document is
//! "a well-formed AST of blocks and expressions" regardless of what the
//! surface syntax looks like.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// One configuration block: a typed, labeled component declaration plus its
/// arguments.
///
/// `arguments` may itself contain [`Expr::Reference`] values that the loader
/// resolves against other blocks' exports before handing the result to a
/// component's `update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Dotted component type, e.g. `"prometheus.scrape"`.
    #[serde(rename = "type")]
    pub component_type: String,
    pub label: String,
    #[serde(default)]
    pub arguments: std::collections::BTreeMap<String, Expr>,
}

/// One argument value: either a literal already in its final form, or a
/// reference to be resolved against another block's exports.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Expr {
    /// A literal value, already fully resolved.
    Literal(serde_json::Value),
    /// A reference of the form `"<type>.<label>.<export_path>"`.
    Reference(String),
}

/// A plain `#[serde(untagged)]` derive can never produce `Reference`: any
/// string also deserializes successfully as `Literal(Value::String(..))`,
/// and untagged picks the first variant that matches. Deserialize to a
/// `Value` first instead, and classify strings by whether they parse as a
/// reference.
impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        if let serde_json::Value::String(s) = &value {
            if reference_target(s).is_some() {
                return Ok(Expr::Reference(s.clone()));
            }
        }
        Ok(Expr::Literal(value))
    }
}

/// A full document: an ordered list of blocks.
///
/// Order in the document has no semantic meaning for evaluation — the
/// loader derives its own order from the dependency graph — but is
/// preserved for diagnostics and `dot` rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn from_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, crate::error::ControllerError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_str(&text)?)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Scan `expr` for a reference and split it into the `NodeId` it targets and
/// the export path under it (e.g. `"prometheus.scrape.targets"` splits into
/// `prometheus.scrape` and `"targets"`).
pub fn reference_target(expr: &str) -> Option<(crate::id::NodeId, String)> {
    let mut parts = expr.splitn(3, '.');
    let component_type = parts.next()?;
    let label = parts.next()?;
    let path = parts.next().unwrap_or("").to_string();
    let id = crate::id::NodeId::new(component_type, label).ok()?;
    Some((id, path))
}
