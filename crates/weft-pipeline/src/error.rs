//! Pipeline error types.
//!
//! Every user-visible failure is a structured kind plus message; the
//! engine never rejects with an ad-hoc string. `RejectKind` is the wire
//! form carried in events, journal notes and synthesized error envelopes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a rejected envelope or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    MalformedEnvelope,
    SchemaViolation,
    RouteNotFound,
    UnknownThread,
    UnknownProfile,
    ResponseSchemaViolation,
    PrivilegeEscalation,
    PayloadTooLarge,
    Timeout,
    HandlerError,
}

impl RejectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectKind::MalformedEnvelope => "malformed_envelope",
            RejectKind::SchemaViolation => "schema_violation",
            RejectKind::RouteNotFound => "route_not_found",
            RejectKind::UnknownThread => "unknown_thread",
            RejectKind::UnknownProfile => "unknown_profile",
            RejectKind::ResponseSchemaViolation => "response_schema_violation",
            RejectKind::PrivilegeEscalation => "privilege_escalation",
            RejectKind::PayloadTooLarge => "payload_too_large",
            RejectKind::Timeout => "timeout",
            RejectKind::HandlerError => "handler_error",
        }
    }
}

impl std::fmt::Display for RejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("schema violation at {path}: {reason}")]
    SchemaViolation { path: String, reason: String },

    #[error("unknown schema '{0}'")]
    UnknownSchema(String),

    #[error("handler '{handler}' registered for tag '{tag}' already claimed by '{existing}'")]
    DuplicateTag {
        handler: String,
        tag: String,
        existing: String,
    },

    #[error("organism listener '{0}' has no registered handler")]
    MissingHandler(String),

    #[error("handler '{0}' is not declared as an organism listener")]
    UnknownListener(String),

    #[error("organism error: {0}")]
    Organism(#[from] weft_organism::OrganismError),

    #[error("kernel error: {0}")]
    Kernel(#[from] weft_kernel::error::KernelError),

    #[error("pipeline is shut down")]
    Shutdown,

    #[error("deadline expired waiting for a response")]
    WaitTimeout,
}

pub type PipelineResult<T> = Result<T, PipelineError>;
