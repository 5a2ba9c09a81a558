//! Agent prompt assembly.
//!
//! The system prompt is composed from the organism's named blocks; the
//! `${tools}` variable expands to the agent's peer tool descriptions.

use indexmap::IndexMap;
use weft_organism::{AgentSpec, Organism, OrganismError};

pub fn assemble(
    organism: &Organism,
    spec: &AgentSpec,
    tools: &[(String, String)],
) -> Result<String, OrganismError> {
    let tool_lines = tools
        .iter()
        .map(|(name, description)| format!("- {name}: {description}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut vars = IndexMap::new();
    vars.insert("tools".to_string(), tool_lines);
    vars.insert("organism".to_string(), organism.name().to_string());
    organism.prompts().compose(&spec.prompt, &vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_organism::{ListenerSpec, OrganismSpec, ProfileSpec, RetentionPolicy};

    fn organism() -> Organism {
        let mut prompts = IndexMap::new();
        prompts.insert(
            "role".to_string(),
            "You are the ${organism} coding agent.".to_string(),
        );
        prompts.insert("tools".to_string(), "Available tools:\n${tools}".to_string());
        Organism::build(OrganismSpec {
            name: "demo".into(),
            prompts,
            listeners: vec![ListenerSpec {
                name: "echo".into(),
                payload_tags: vec!["EchoRequest".into()],
                description: "echo".into(),
                semantic_description: None,
                request_schema: None,
                response_schema: None,
                peers: vec![],
                spawn_tags: vec![],
                agent: None,
            }],
            profiles: vec![ProfileSpec {
                name: "default".into(),
                listeners: vec!["echo".into()],
                allow_all: false,
                network: vec![],
                journal: RetentionPolicy::RetainForever,
                identity: "weft".into(),
            }],
        })
        .unwrap()
    }

    #[test]
    fn assembles_blocks_and_substitutes_tools() {
        let spec = AgentSpec {
            prompt: vec!["role".into(), "tools".into()],
            model: "opus".into(),
            max_tokens: 1024,
            max_iterations: 8,
        };
        let prompt = assemble(
            &organism(),
            &spec,
            &[("file-read".into(), "Read a file".into())],
        )
        .unwrap();
        assert_eq!(
            prompt,
            "You are the demo coding agent.\nAvailable tools:\n- file-read: Read a file"
        );
    }

    #[test]
    fn unknown_block_surfaces() {
        let spec = AgentSpec {
            prompt: vec!["missing".into()],
            model: "opus".into(),
            max_tokens: 1024,
            max_iterations: 8,
        };
        assert!(assemble(&organism(), &spec, &[]).is_err());
    }
}
