//! Standard organism fixtures.

use indexmap::IndexMap;
use weft_organism::{
    AgentSpec, ListenerSpec, Organism, OrganismSpec, ProfileSpec, RetentionPolicy,
};
use weft_pipeline::{FieldType, Schema};

fn listener(name: &str, tag: &str, description: &str) -> ListenerSpec {
    ListenerSpec {
        name: name.into(),
        payload_tags: vec![tag.into()],
        description: description.into(),
        semantic_description: None,
        request_schema: Some(tag.into()),
        response_schema: Some("ToolResponse".into()),
        peers: vec![],
        spawn_tags: vec![],
        agent: None,
    }
}

/// The standard tool-calling organism: a coding agent with file tools, a
/// response sink, and two profiles (`coding` sees everything,
/// `researcher` reads only).
pub fn tool_calling_spec() -> OrganismSpec {
    let mut prompts = IndexMap::new();
    prompts.insert(
        "role".to_string(),
        "You are a coding agent inside the ${organism} organism.".to_string(),
    );
    prompts.insert("tools".to_string(), "Tools:\n${tools}".to_string());

    let mut file_read = listener("file-read", "FileReadRequest", "Read a file from disk");
    file_read.semantic_description =
        Some("Read, open, show or display the contents of a file".into());
    let mut file_write = listener("file-write", "FileWriteRequest", "Write a file to disk");
    file_write.semantic_description =
        Some("Write, create or save file contents to disk".into());
    let mut file_erase = listener("file-erase", "FileEraseRequest", "Delete files from disk");
    file_erase.semantic_description =
        Some("Delete, remove or erase files and temporary data from disk".into());
    let mut command_exec = listener("command-exec", "CommandExecRequest", "Run a shell command");
    command_exec.semantic_description = Some("Execute or run a shell command".into());

    let agent = ListenerSpec {
        name: "coding-agent".into(),
        payload_tags: vec!["AgentTask".into(), "ToolResponse".into()],
        description: "The coding agent".into(),
        semantic_description: None,
        request_schema: Some("AgentTask".into()),
        response_schema: None,
        peers: vec![
            "file-read".into(),
            "file-write".into(),
            "file-erase".into(),
            "command-exec".into(),
        ],
        spawn_tags: vec!["AgentTask".into()],
        agent: Some(AgentSpec {
            prompt: vec!["role".into(), "tools".into()],
            model: "scripted".into(),
            max_tokens: 1024,
            max_iterations: 8,
        }),
    };

    let sink = ListenerSpec {
        name: "response-sink".into(),
        payload_tags: vec!["AgentResponse".into()],
        description: "Collects final agent responses".into(),
        semantic_description: None,
        request_schema: Some("AgentResponse".into()),
        response_schema: None,
        peers: vec![],
        spawn_tags: vec![],
        agent: None,
    };

    OrganismSpec {
        name: "testkit".into(),
        prompts,
        listeners: vec![file_read, file_write, file_erase, command_exec, agent, sink],
        profiles: vec![
            ProfileSpec {
                name: "coding".into(),
                listeners: vec![
                    "coding-agent".into(),
                    "response-sink".into(),
                    "file-read".into(),
                    "file-write".into(),
                    "file-erase".into(),
                    "command-exec".into(),
                ],
                allow_all: false,
                network: vec![],
                journal: RetentionPolicy::RetainForever,
                identity: "weft-coding".into(),
            },
            ProfileSpec {
                name: "researcher".into(),
                listeners: vec![
                    "coding-agent".into(),
                    "response-sink".into(),
                    "file-read".into(),
                ],
                allow_all: false,
                network: vec![],
                journal: RetentionPolicy::RetainForever,
                identity: "weft-researcher".into(),
            },
            ProfileSpec {
                name: "ephemeral".into(),
                listeners: vec![
                    "coding-agent".into(),
                    "response-sink".into(),
                    "file-read".into(),
                    "file-write".into(),
                    "file-erase".into(),
                    "command-exec".into(),
                ],
                allow_all: false,
                network: vec![],
                journal: RetentionPolicy::PruneOnDelivery,
                identity: "weft-ephemeral".into(),
            },
        ],
    }
}

pub fn tool_calling() -> Organism {
    Organism::build(tool_calling_spec()).expect("fixture organism")
}

/// The schemas every fixture pipeline registers, named by the payload
/// tags they govern.
pub fn standard_schemas() -> Vec<Schema> {
    vec![
        Schema::record("AgentTask").field("task", FieldType::Text),
        Schema::record("AgentResponse").field("text", FieldType::Text),
        Schema::record("ToolResponse")
            .field("call_id", FieldType::Text)
            .field("content", FieldType::Text)
            .field("is_error", FieldType::Bool),
        Schema::record("FileReadRequest")
            .field("path", FieldType::Text)
            .optional_field("call_id", FieldType::Text),
        Schema::record("FileWriteRequest")
            .field("path", FieldType::Text)
            .field("content", FieldType::Text)
            .optional_field("call_id", FieldType::Text),
        Schema::record("FileEraseRequest")
            .field("path", FieldType::Text)
            .optional_field("call_id", FieldType::Text),
        Schema::record("CommandExecRequest")
            .field("command", FieldType::Text)
            .optional_field("call_id", FieldType::Text),
    ]
}
