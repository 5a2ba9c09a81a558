//! Payload schemas — structural validation over canonical CBOR.
//!
//! The engine treats schemas as opaque handles; this module is the one
//! deterministic, version-pinned format the fabric ships. A schema is a
//! flat record: named fields with primitive types, required by default.
//! Validation decodes a copy of the payload and never mutates the bytes.

use indexmap::IndexMap;
use serde_cbor::Value;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Bool,
    Bytes,
    TextList,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Integer, Value::Integer(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Float, Value::Integer(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Bytes, Value::Bytes(_)) => true,
            (FieldType::TextList, Value::Array(items)) => {
                items.iter().all(|v| matches!(v, Value::Text(_)))
            }
            _ => false,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Bytes => "bytes",
            FieldType::TextList => "text list",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    ty: FieldType,
    required: bool,
}

/// A flat record schema.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: IndexMap<String, FieldSpec>,
    allow_unknown: bool,
}

impl Schema {
    pub fn record(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: IndexMap::new(),
            allow_unknown: false,
        }
    }

    pub fn field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields
            .insert(name.to_string(), FieldSpec { ty, required: true });
        self
    }

    pub fn optional_field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields
            .insert(name.to_string(), FieldSpec { ty, required: false });
        self
    }

    /// Accept fields beyond the declared set.
    pub fn open(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate payload bytes. Returns the violation path and reason on
    /// failure; the bytes themselves are untouched.
    pub fn validate(&self, bytes: &[u8]) -> PipelineResult<()> {
        let violation = |path: &str, reason: String| PipelineError::SchemaViolation {
            path: path.to_string(),
            reason,
        };

        let value: Value = serde_cbor::from_slice(bytes)
            .map_err(|e| violation("", format!("payload is not valid CBOR: {e}")))?;
        let map = match value {
            Value::Map(map) => map,
            other => {
                return Err(violation("", format!("expected a record, got {}", kind_of(&other))))
            }
        };

        let mut seen = Vec::with_capacity(map.len());
        for (key, field_value) in &map {
            let key = match key {
                Value::Text(k) => k.as_str(),
                other => {
                    return Err(violation("", format!("non-text field key: {}", kind_of(other))))
                }
            };
            match self.fields.get(key) {
                Some(spec) => {
                    if !spec.ty.matches(field_value) {
                        return Err(violation(
                            key,
                            format!(
                                "expected {}, got {}",
                                spec.ty.name(),
                                kind_of(field_value)
                            ),
                        ));
                    }
                }
                None if self.allow_unknown => {}
                None => return Err(violation(key, "unknown field".into())),
            }
            seen.push(key.to_string());
        }

        for (name, spec) in &self.fields {
            if spec.required && !seen.iter().any(|s| s == name) {
                return Err(violation(name, "missing required field".into()));
            }
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::Bytes(_) => "bytes",
        Value::Text(_) => "text",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unsupported",
    }
}

/// Frozen name → schema registry.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn validate(&self, name: &str, bytes: &[u8]) -> PipelineResult<()> {
        let schema = self
            .schemas
            .get(name)
            .ok_or_else(|| PipelineError::UnknownSchema(name.to_string()))?;
        schema.validate(bytes)
    }
}

/// Encode a record payload for tests and tools: field name → value pairs
/// as canonical CBOR.
pub fn encode_record<I, K>(fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let map: std::collections::BTreeMap<Value, Value> = fields
        .into_iter()
        .map(|(k, v)| (Value::Text(k.into()), v))
        .collect();
    weft_cbor::to_canonical_cbor(&Value::Map(map)).expect("record encoding")
}
