//! Mechanical translation between model tool calls and fabric payloads.
//!
//! The mapping is format-only, no interpretation. A tool call's JSON
//! input becomes a CBOR record with the same field names plus the
//! correlating `call_id`; tool responses come back as records with
//! `call_id`, `content` and `is_error`.

use std::collections::BTreeMap;

use serde_cbor::Value;

use crate::state::ToolResultBlock;

pub const CALL_ID_FIELD: &str = "call_id";

/// Encode a tool-call payload: the JSON object's fields plus `call_id`.
pub fn tool_call_payload(call_id: &str, input: &serde_json::Value) -> Vec<u8> {
    let mut map: BTreeMap<Value, Value> = BTreeMap::new();
    if let Some(object) = input.as_object() {
        for (key, value) in object {
            map.insert(Value::Text(key.clone()), json_to_cbor(value));
        }
    }
    map.insert(
        Value::Text(CALL_ID_FIELD.into()),
        Value::Text(call_id.to_string()),
    );
    weft_cbor::to_canonical_cbor(&Value::Map(map)).unwrap_or_default()
}

/// Decode a `ToolResponse` record. `None` when the shape is off; the
/// schema gate should have caught that long before this point.
pub fn decode_tool_response(bytes: &[u8]) -> Option<ToolResultBlock> {
    let map = decode_map(bytes)?;
    Some(ToolResultBlock {
        call_id: text_field(&map, CALL_ID_FIELD)?,
        content: text_field(&map, "content").unwrap_or_default(),
        is_error: bool_field(&map, "is_error").unwrap_or(false),
    })
}

/// Decode an `AgentTask` record's `task` field.
pub fn decode_task(bytes: &[u8]) -> Option<String> {
    let map = decode_map(bytes)?;
    text_field(&map, "task")
}

/// Encode the final `AgentResponse` record.
pub fn agent_response_payload(text: &str) -> Vec<u8> {
    let mut map: BTreeMap<Value, Value> = BTreeMap::new();
    map.insert(Value::Text("text".into()), Value::Text(text.to_string()));
    weft_cbor::to_canonical_cbor(&Value::Map(map)).unwrap_or_default()
}

fn json_to_cbor(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i as i128)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        // Nested structures stay JSON text: the mapping is mechanical.
        other => Value::Text(other.to_string()),
    }
}

fn decode_map(bytes: &[u8]) -> Option<BTreeMap<Value, Value>> {
    match serde_cbor::from_slice(bytes) {
        Ok(Value::Map(map)) => Some(map),
        _ => None,
    }
}

fn text_field(map: &BTreeMap<Value, Value>, field: &str) -> Option<String> {
    match map.get(&Value::Text(field.into())) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn bool_field(map: &BTreeMap<Value, Value>, field: &str) -> Option<bool> {
    match map.get(&Value::Text(field.into())) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}
