//! Form filler seam.
//!
//! The filler turns a natural-language request into candidate payload
//! bytes for a schema, typically a cheap LLM on the other side of this
//! trait. The router owns the escalation ladder; each rung is one filler
//! tried in order.

use async_trait::async_trait;
use weft_pipeline::Schema;

/// One rung of the fill ladder.
#[async_trait]
pub trait FormFiller: Send + Sync {
    /// Produce candidate payload bytes for `schema` from the request.
    /// Returning `Err` passes the request to the next rung.
    async fn fill(&self, schema: &Schema, natural_language: &str) -> Result<Vec<u8>, String>;
}
