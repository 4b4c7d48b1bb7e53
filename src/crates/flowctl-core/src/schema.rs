//! Component argument/export schemas.
//!
//! A component declares the shape of its `Arguments` and `Exports` as a
//! [`ComponentSchema`] rather than a Rust type the loader would need to know
//! about at compile time — the controller treats configuration values as
//! `serde_json::Value` end to end, since it never parses the configuration
//! language itself (see [`document`](crate::document)). [`bind`] checks a raw
//! value against a schema and fills in defaults; with the `json-validation`
//! feature enabled, it additionally runs a generated JSON Schema through
//! `jsonschema` for depth the hand-rolled walk doesn't cover (e.g. numeric
//! bounds, pattern constraints).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The shape of one field in an `Arguments` or `Exports` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// The accepted shape of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    List,
    Block,
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::List => value.is_array(),
            FieldKind::Block => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

/// The schema a component's factory publishes for its `Arguments` and
/// `Exports` types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSchema {
    pub arguments: BTreeMap<String, FieldSchema>,
    pub exports: BTreeMap<String, FieldSchema>,
}

/// A field failed to bind against its schema.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' expects {expected:?}, got {actual}")]
    WrongKind { field: String, expected: FieldKind, actual: String },
    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Validate `raw` against `schema.arguments`, filling in declared defaults
/// for any field the caller omitted. Returns the bound object on success.
///
/// Unknown top-level fields are rejected: a typo'd argument name should
/// surface as a diagnostic, not silently vanish.
pub fn bind(schema: &ComponentSchema, raw: &Value) -> Result<Value, SchemaError> {
    let obj = raw.as_object().cloned().unwrap_or_default();

    for key in obj.keys() {
        if !schema.arguments.contains_key(key) {
            return Err(SchemaError::UnknownField(key.clone()));
        }
    }

    let mut bound = serde_json::Map::new();
    for (name, field) in &schema.arguments {
        match obj.get(name) {
            Some(value) => {
                if !field.kind.accepts(value) {
                    return Err(SchemaError::WrongKind {
                        field: name.clone(),
                        expected: field.kind,
                        actual: kind_name(value),
                    });
                }
                bound.insert(name.clone(), value.clone());
            }
            None => {
                if let Some(default) = &field.default {
                    bound.insert(name.clone(), default.clone());
                } else if field.required {
                    return Err(SchemaError::MissingField(name.clone()));
                }
            }
        }
    }
    Ok(Value::Object(bound))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "block",
    }
}

#[cfg(feature = "json-validation")]
mod strict {
    use super::*;
    use jsonschema::JSONSchema;

    /// Convert a [`ComponentSchema`]'s arguments into a draft-07 JSON Schema
    /// document. Used only in strict mode, where the hand-rolled [`bind`]
    /// pass is followed by a full schema validation for constraints it
    /// doesn't express (numeric ranges, string patterns, nested block shape).
    pub fn to_json_schema(schema: &ComponentSchema) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, field) in &schema.arguments {
            let ty = match field.kind {
                FieldKind::String => "string",
                FieldKind::Int => "integer",
                FieldKind::Float => "number",
                FieldKind::Bool => "boolean",
                FieldKind::List => "array",
                FieldKind::Block => "object",
                FieldKind::Any => "object",
            };
            properties.insert(name.clone(), serde_json::json!({ "type": ty }));
            if field.required {
                required.push(name.clone());
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate `raw` against the schema's derived JSON Schema document.
    pub fn validate_strict(schema: &ComponentSchema, raw: &Value) -> Result<(), String> {
        let doc = to_json_schema(schema);
        let compiled = JSONSchema::compile(&doc).map_err(|e| e.to_string())?;
        compiled.validate(raw).map_err(|errors| {
            errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
        })
    }
}

#[cfg(feature = "json-validation")]
pub use strict::{to_json_schema, validate_strict};
