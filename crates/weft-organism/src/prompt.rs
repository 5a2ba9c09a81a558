//! Prompt block composition.
//!
//! Agent prompts are assembled from named blocks joined with newline
//! separators. `${var}` placeholders are substituted at assembly time;
//! the conventional `${tools}` variable expands to the agent's peer tool
//! descriptions.

use indexmap::IndexMap;

use crate::OrganismError;

/// The organism's named prompt blocks.
#[derive(Debug, Default)]
pub struct PromptLibrary {
    blocks: IndexMap<String, String>,
}

impl PromptLibrary {
    pub fn new(blocks: IndexMap<String, String>) -> Self {
        Self { blocks }
    }

    pub fn block(&self, name: &str) -> Option<&str> {
        self.blocks.get(name).map(|s| s.as_str())
    }

    /// Concatenate the named blocks in order, then substitute variables.
    pub fn compose(
        &self,
        block_names: &[String],
        vars: &IndexMap<String, String>,
    ) -> Result<String, OrganismError> {
        let mut parts = Vec::with_capacity(block_names.len());
        for name in block_names {
            let block = self
                .blocks
                .get(name)
                .ok_or_else(|| OrganismError::UnknownPromptBlock(name.clone()))?;
            parts.push(block.as_str());
        }
        Ok(substitute(&parts.join("\n"), vars))
    }
}

/// Replace every `${name}` occurrence with its value. Unknown variables
/// are left in place so a missing substitution is visible in the prompt
/// rather than silently blanked.
pub fn substitute(template: &str, vars: &IndexMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> PromptLibrary {
        let mut blocks = IndexMap::new();
        blocks.insert("role".to_string(), "You are ${name}.".to_string());
        blocks.insert("tools".to_string(), "Tools:\n${tools}".to_string());
        PromptLibrary::new(blocks)
    }

    #[test]
    fn compose_joins_blocks_with_newlines() {
        let lib = library();
        let mut vars = IndexMap::new();
        vars.insert("name".to_string(), "weft".to_string());
        vars.insert("tools".to_string(), "- echo".to_string());

        let prompt = lib
            .compose(&["role".to_string(), "tools".to_string()], &vars)
            .unwrap();
        assert_eq!(prompt, "You are weft.\nTools:\n- echo");
    }

    #[test]
    fn unknown_block_is_an_error() {
        let lib = library();
        let err = lib.compose(&["ghost".to_string()], &IndexMap::new()).unwrap_err();
        assert!(matches!(err, OrganismError::UnknownPromptBlock(_)));
    }

    #[test]
    fn unknown_variable_left_visible() {
        let out = substitute("hello ${missing}", &IndexMap::new());
        assert_eq!(out, "hello ${missing}");
    }
}
