//! The organism definition is plain `serde` data: whatever format the
//! host parses, the same structure arrives here. This exercises the full
//! shape through JSON.

use weft_organism::{Organism, OrganismSpec, RetentionPolicy};

const DEFINITION: &str = r#"
{
  "name": "demo-org",
  "prompts": {
    "role": "You are the ${organism} assistant.",
    "tools": "Tools available:\n${tools}"
  },
  "listeners": [
    {
      "name": "coding-agent",
      "payload_tags": ["AgentTask", "ToolResponse"],
      "description": "The coding agent",
      "request_schema": "AgentTask",
      "peers": ["file-read"],
      "spawn_tags": ["AgentTask"],
      "agent": {
        "prompt": ["role", "tools"],
        "model": "opus",
        "max_iterations": 12
      }
    },
    {
      "name": "file-read",
      "payload_tags": ["FileReadRequest"],
      "description": "Read a file",
      "semantic_description": "Read, open or display file contents",
      "request_schema": "FileReadRequest",
      "response_schema": "ToolResponse"
    }
  ],
  "profiles": [
    {
      "name": "coding",
      "listeners": ["coding-agent", "file-read"],
      "network": [{ "host": "api.anthropic.com", "port": 443 }],
      "journal": { "retain_days": 90 },
      "identity": "weft-coding"
    },
    {
      "name": "everything",
      "allow_all": true,
      "journal": "retain_forever",
      "identity": "weft-root"
    }
  ]
}
"#;

#[test]
fn full_definition_deserializes_and_builds() {
    let spec: OrganismSpec = serde_json::from_str(DEFINITION).unwrap();
    let organism = Organism::build(spec).unwrap();
    assert_eq!(organism.name(), "demo-org");

    let agent = organism.listener("coding-agent").unwrap();
    assert_eq!(agent.spawn_tags, vec!["AgentTask"]);
    let config = agent.agent.as_ref().unwrap();
    assert_eq!(config.model, "opus");
    assert_eq!(config.max_iterations, 12);
    // Defaulted field.
    assert_eq!(config.max_tokens, 4096);

    let coding = organism.profile("coding").unwrap();
    assert_eq!(coding.retention(), RetentionPolicy::RetainDays(90));
    assert!(coding.network_permitted("api.anthropic.com", 443));
    assert_eq!(
        coding.dispatch_table().resolve("FileReadRequest"),
        Some("file-read")
    );

    // allow_all materializes every listener's tags.
    let everything = organism.profile("everything").unwrap();
    assert_eq!(everything.dispatch_table().len(), 3);
    assert_eq!(everything.retention(), RetentionPolicy::RetainForever);
}

#[test]
fn prompt_blocks_survive_the_trip() {
    let spec: OrganismSpec = serde_json::from_str(DEFINITION).unwrap();
    let organism = Organism::build(spec).unwrap();
    assert!(organism
        .prompts()
        .block("role")
        .unwrap()
        .contains("${organism}"));
}
