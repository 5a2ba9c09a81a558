//! Shared fixtures for the weft test suites.
//!
//! A standard tool-calling organism, scripted handlers, a scripted
//! inference client and a recording form filler: enough to exercise the
//! dispatch fabric end to end without any network collaborator.

pub mod fillers;
pub mod handlers;
pub mod inference;
pub mod organisms;

use std::path::Path;

use weft_kernel::{Kernel, KernelConfig, MemBlobStore};

/// Open a kernel in `dir` with an in-memory blob store.
pub fn mem_kernel(dir: &Path) -> Kernel {
    Kernel::open_with_blobs(dir, KernelConfig::default(), Box::new(MemBlobStore::new()))
        .expect("kernel open")
}

/// Open a fully filesystem-backed kernel in `dir`.
pub fn fs_kernel(dir: &Path) -> Kernel {
    Kernel::open(dir, KernelConfig::default()).expect("kernel open")
}

/// A pipeline builder over the standard organism with every standard
/// schema already registered. Callers attach handlers and build.
pub fn schemas_builder(organism: weft_organism::Organism) -> weft_pipeline::PipelineBuilder {
    organisms::standard_schemas()
        .into_iter()
        .fold(weft_pipeline::PipelineBuilder::new(organism), |b, s| {
            b.schema(s)
        })
}

/// Encode a `{"task": …}` AgentTask payload.
pub fn task_payload(task: &str) -> Vec<u8> {
    weft_pipeline::encode_record([("task", serde_cbor::Value::Text(task.into()))])
}

/// Encode a `ToolResponse` payload.
pub fn tool_response_payload(call_id: &str, content: &str, is_error: bool) -> Vec<u8> {
    weft_pipeline::encode_record([
        ("call_id", serde_cbor::Value::Text(call_id.into())),
        ("content", serde_cbor::Value::Text(content.into())),
        ("is_error", serde_cbor::Value::Bool(is_error)),
    ])
}

/// Decode the `text` field of an `AgentResponse` payload.
pub fn agent_response_text(payload: &[u8]) -> Option<String> {
    match serde_cbor::from_slice(payload) {
        Ok(serde_cbor::Value::Map(map)) => match map.get(&serde_cbor::Value::Text("text".into())) {
            Some(serde_cbor::Value::Text(text)) => Some(text.clone()),
            _ => None,
        },
        _ => None,
    }
}
