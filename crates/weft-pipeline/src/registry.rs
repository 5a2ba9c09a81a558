//! Handler abstraction and the frozen handler registry.
//!
//! Handlers are registered values keyed by name, not subtypes: the engine
//! interacts with them only through `handle`. A handler never holds the
//! pipeline; it gets a scoped submit capability through its context.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use uuid::Uuid;
use weft_kernel::threads::ThreadId;

use crate::envelope::Envelope;
use crate::error::{PipelineError, PipelineResult};

/// What a handler hands back to the engine. Every output re-enters the
/// pipeline as untrusted bytes; none of these variants short-circuit
/// validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Answer the original sender.
    Reply { tag: String, payload: Vec<u8> },
    /// One message toward another handler.
    Send {
        target: String,
        tag: String,
        payload: Vec<u8>,
    },
    /// Several messages at once (a tool-call fan-out).
    Broadcast(Vec<Outgoing>),
    /// Nothing to say. The engine acknowledges on the handler's behalf.
    Silence,
    /// Structured failure surfaced to the sender.
    Error { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: String,
    pub tag: String,
    pub payload: Vec<u8>,
}

/// Scoped capability to push envelopes into the fabric. Cloneable, but
/// its lifetime is tied to the engine's intake channel. Handlers cannot
/// reach the pipeline any other way.
#[derive(Clone)]
pub struct Submitter {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Submitter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    pub fn submit(&self, envelope: Envelope) -> PipelineResult<()> {
        self.tx.send(envelope).map_err(|_| PipelineError::Shutdown)
    }
}

/// Per-invocation context. Exposes identity and the submit capability,
/// nothing else.
#[derive(Clone)]
pub struct HandlerContext {
    pub thread_id: ThreadId,
    pub sender: String,
    pub self_name: String,
    pub payload_tag: String,
    pub message_id: Uuid,
    pub reply_to: Option<Uuid>,
    pub submitter: Submitter,
}

/// The capability set the engine requires of a handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, payload: &[u8], ctx: HandlerContext) -> Response;
}

/// Closure adapter, mirroring the registry's needs in tests and small
/// hosts.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&[u8], HandlerContext) -> Response + Send + Sync + 'static,
{
    async fn handle(&self, payload: &[u8], ctx: HandlerContext) -> Response {
        (self.0)(payload, ctx)
    }
}

/// One frozen registration.
pub struct Registration {
    pub name: String,
    pub payload_tags: Vec<String>,
    pub description: String,
    pub semantic_description: Option<String>,
    pub request_schema: Option<String>,
    pub response_schema: Option<String>,
    pub peers: Vec<String>,
    pub spawn_tags: Vec<String>,
    pub handler: Arc<dyn Handler>,
}

/// Name-keyed handler registry, frozen once the pipeline is built.
#[derive(Default)]
pub struct HandlerRegistry {
    by_name: IndexMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registration: Registration) {
        self.by_name
            .insert(registration.name.clone(), registration);
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
