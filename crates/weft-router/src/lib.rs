//! Semantic router — dispatch by intent without widening the security
//! surface.
//!
//! Rank, mask, select, fill, emit, in that order. Masking happens
//! before any form filler runs, so no LLM call is ever made on behalf of
//! a handler the active profile cannot reach, and the emitted plan still
//! passes full schema validation inside the dispatch engine.

pub mod embedding;
pub mod filler;
pub mod tfidf;

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use weft_organism::Organism;
use weft_pipeline::{ProfileResolver, SchemaRegistry};

pub use embedding::{cosine, EmbeddingIndex, EmbeddingProvider, Ranked};
pub use filler::FormFiller;
pub use tfidf::TfIdfProvider;

/// The router's output: everything a caller needs to submit an envelope
/// through the ordinary dispatch path.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub handler: String,
    pub payload_tag: String,
    pub payload_bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RouterError {
    /// No permitted handler matches the intent. Structured and
    /// non-retryable: the profile simply lacks the capability.
    #[error("profile '{profile}' has no capability matching the request")]
    NoCapability { profile: String },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("form fill failed for handler '{handler}': {reason}")]
    FormFillFailed { handler: String, reason: String },

    /// The selected handler has no request schema to fill against.
    #[error("handler '{0}' is not form-fillable")]
    NotFillable(String),
}

#[derive(Debug, Clone)]
struct ToolEntry {
    payload_tag: String,
    request_schema: Option<String>,
}

/// The semantic router. Construction embeds every routable handler's
/// semantic description (falling back to its plain description).
pub struct SemanticRouter {
    provider: Box<dyn EmbeddingProvider>,
    index: EmbeddingIndex,
    ladder: Vec<Arc<dyn FormFiller>>,
    tools: IndexMap<String, ToolEntry>,
}

impl SemanticRouter {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        ladder: Vec<Arc<dyn FormFiller>>,
        organism: &Organism,
        score_threshold: f32,
    ) -> Self {
        let mut index = EmbeddingIndex::new(score_threshold);
        let mut tools = IndexMap::new();
        for listener in organism.listeners() {
            let description = listener
                .semantic_description
                .as_deref()
                .unwrap_or(&listener.description);
            index.register(&listener.name, provider.embed(description));
            tools.insert(
                listener.name.clone(),
                ToolEntry {
                    payload_tag: listener.payload_tags[0].clone(),
                    request_schema: listener.request_schema.clone(),
                },
            );
        }
        Self {
            provider,
            index,
            ladder,
            tools,
        }
    }

    /// Route a natural-language request under a profile.
    pub async fn route_by_intent(
        &self,
        natural_language: &str,
        profile: &str,
        resolver: &ProfileResolver,
        schemas: &SchemaRegistry,
    ) -> Result<DispatchPlan, RouterError> {
        if !resolver.knows(profile) {
            return Err(RouterError::UnknownProfile(profile.to_string()));
        }

        // Rank everything, then mask. The mask runs before selection and
        // long before any filler: a masked candidate costs nothing.
        let query = self.provider.embed(natural_language);
        let ranked = self.index.rank(&query);
        let allowed = resolver.permitted_handlers(profile);
        let selected = ranked
            .into_iter()
            .find(|candidate| allowed.contains(&candidate.name.as_str()));

        let Some(candidate) = selected else {
            return Err(RouterError::NoCapability {
                profile: profile.to_string(),
            });
        };
        log::debug!(
            "intent routed to '{}' (score {:.3}) under profile '{profile}'",
            candidate.name,
            candidate.score
        );

        let entry = self
            .tools
            .get(&candidate.name)
            .ok_or_else(|| RouterError::NotFillable(candidate.name.clone()))?;
        let schema_name = entry
            .request_schema
            .as_deref()
            .ok_or_else(|| RouterError::NotFillable(candidate.name.clone()))?;
        let schema = schemas
            .get(schema_name)
            .ok_or_else(|| RouterError::NotFillable(candidate.name.clone()))?;

        // Fill: walk the ladder until a rung produces bytes that satisfy
        // the schema. The engine re-validates at dispatch regardless.
        let mut last_reason = "empty fill ladder".to_string();
        for rung in &self.ladder {
            match rung.fill(schema, natural_language).await {
                Ok(bytes) => match schema.validate(&bytes) {
                    Ok(()) => {
                        return Ok(DispatchPlan {
                            handler: candidate.name,
                            payload_tag: entry.payload_tag.clone(),
                            payload_bytes: bytes,
                        });
                    }
                    Err(err) => last_reason = err.to_string(),
                },
                Err(reason) => last_reason = reason,
            }
        }

        Err(RouterError::FormFillFailed {
            handler: candidate.name,
            reason: last_reason,
        })
    }
}
