//! Organism definition — the startup configuration the fabric consumes.
//!
//! An organism enumerates prompt blocks, listener registrations and
//! security profiles. The host deserializes it from wherever it likes
//! (the types only require `serde::Deserialize`); this crate owns the
//! semantics: validation at build time and the materialized per-profile
//! dispatch tables that make unrouted tags structurally unreachable.

pub mod profile;
pub mod prompt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use profile::{DispatchTable, HostPort, Profile, ProfileSpec, RetentionPolicy};
pub use prompt::PromptLibrary;

/// Declarative organism definition as supplied by the host at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganismSpec {
    pub name: String,
    /// Named prompt blocks referenced by agent configs.
    #[serde(default)]
    pub prompts: IndexMap<String, String>,
    pub listeners: Vec<ListenerSpec>,
    pub profiles: Vec<ProfileSpec>,
}

/// One listener registration. A listener may accept several payload tags;
/// the handler value itself is attached later, when the pipeline is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub name: String,
    pub payload_tags: Vec<String>,
    pub description: String,
    /// Richer description used by the semantic router; falls back to
    /// `description` when absent.
    #[serde(default)]
    pub semantic_description: Option<String>,
    /// Schema names resolved against the pipeline's schema registry.
    #[serde(default)]
    pub request_schema: Option<String>,
    #[serde(default)]
    pub response_schema: Option<String>,
    /// Advisory set of handlers this listener may Send to.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Spawn-bearing tags: dispatching one of these opens a child thread
    /// for the handler instead of running on the caller's thread.
    #[serde(default)]
    pub spawn_tags: Vec<String>,
    #[serde(default)]
    pub agent: Option<AgentSpec>,
}

/// Agent configuration for listeners that run the thinking loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Ordered prompt block names, concatenated with newline separators.
    pub prompt: Vec<String>,
    pub model: String,
    #[serde(default = "AgentSpec::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "AgentSpec::default_max_iterations")]
    pub max_iterations: u32,
}

impl AgentSpec {
    fn default_max_tokens() -> u32 {
        4096
    }

    fn default_max_iterations() -> u32 {
        16
    }
}

/// A validated, frozen organism. Profiles and listeners never change for
/// the lifetime of a pipeline generation; a reload builds a new value.
#[derive(Debug)]
pub struct Organism {
    name: String,
    prompts: PromptLibrary,
    listeners: IndexMap<String, ListenerSpec>,
    profiles: IndexMap<String, Profile>,
}

impl Organism {
    /// Validate a spec and materialize the per-profile dispatch tables.
    pub fn build(spec: OrganismSpec) -> Result<Self, OrganismError> {
        let mut listeners: IndexMap<String, ListenerSpec> = IndexMap::new();
        for listener in spec.listeners {
            if listener.payload_tags.is_empty() {
                return Err(OrganismError::ListenerWithoutTags(listener.name));
            }
            if listeners.insert(listener.name.clone(), listener.clone()).is_some() {
                return Err(OrganismError::DuplicateListener(listener.name));
            }
        }

        let mut profiles = IndexMap::new();
        for profile_spec in spec.profiles {
            let profile = Profile::materialize(profile_spec, &listeners)?;
            let name = profile.name().to_string();
            if profiles.insert(name.clone(), profile).is_some() {
                return Err(OrganismError::DuplicateProfile(name));
            }
        }
        if profiles.is_empty() {
            return Err(OrganismError::NoProfiles);
        }

        Ok(Self {
            name: spec.name,
            prompts: PromptLibrary::new(spec.prompts),
            listeners,
            profiles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerSpec> {
        self.listeners.get(name)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &ListenerSpec> {
        self.listeners.values()
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// Listener names reachable under a profile, in registration order.
    /// Used by the router to pre-filter ranking candidates.
    pub fn reachable_listeners(&self, profile: &str) -> Vec<&str> {
        self.profiles
            .get(profile)
            .map(|p| p.dispatch_table().handler_names())
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum OrganismError {
    #[error("listener '{0}' is defined twice")]
    DuplicateListener(String),
    #[error("listener '{0}' declares no payload tags")]
    ListenerWithoutTags(String),
    #[error("profile '{0}' is defined twice")]
    DuplicateProfile(String),
    #[error("profile '{profile}' references unknown listener '{listener}'")]
    UnknownListener { profile: String, listener: String },
    #[error(
        "profile '{profile}' routes tag '{tag}' to both '{first}' and '{second}'"
    )]
    AmbiguousRoute {
        profile: String,
        tag: String,
        first: String,
        second: String,
    },
    #[error("organism defines no profiles")]
    NoProfiles,
    #[error("prompt block '{0}' is not defined")]
    UnknownPromptBlock(String),
}
