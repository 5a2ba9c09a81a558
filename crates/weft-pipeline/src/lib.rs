//! The weft pipeline — envelopes, schemas, profiles and the zero-trust
//! dispatch engine.
//!
//! A pipeline is built once from a frozen organism plus handler values,
//! then shared as a value. Handlers reach the fabric only through the
//! submit capability in their invocation context.

pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
pub mod registry;
pub mod resolver;
pub mod schema;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use weft_kernel::threads::ThreadId;
use weft_kernel::Kernel;
use weft_organism::Organism;

pub use engine::{Delivery, PipelineConfig};
pub use envelope::{
    AckPayload, Acknowledgement, Envelope, ErrorPayload, ACK_TAG, ENGINE_SENDER, ERROR_TAG,
    INTERNAL_NAMESPACE,
};
pub use error::{PipelineError, PipelineResult, RejectKind};
pub use events::{PipelineEvent, ResponseOutcome};
pub use registry::{
    FnHandler, Handler, HandlerContext, HandlerRegistry, Outgoing, Registration, Response,
    Submitter,
};
pub use resolver::ProfileResolver;
pub use schema::{encode_record, FieldType, Schema, SchemaRegistry};

use engine::EngineHandle;

/// Builder: register schemas and handlers against the organism's
/// listeners, then freeze everything into a running pipeline.
pub struct PipelineBuilder {
    organism: Organism,
    schemas: SchemaRegistry,
    registry: HandlerRegistry,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(organism: Organism) -> Self {
        Self {
            organism,
            schemas: SchemaRegistry::new(),
            registry: HandlerRegistry::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas.register(schema);
        self
    }

    /// Attach a handler value to a listener declared in the organism.
    /// Tags, schemas and peers all come from the listener definition.
    pub fn register<H: Handler>(mut self, listener_name: &str, handler: H) -> PipelineResult<Self> {
        let spec = self
            .organism
            .listener(listener_name)
            .ok_or_else(|| PipelineError::UnknownListener(listener_name.to_string()))?;
        self.registry.insert(Registration {
            name: spec.name.clone(),
            payload_tags: spec.payload_tags.clone(),
            description: spec.description.clone(),
            semantic_description: spec.semantic_description.clone(),
            request_schema: spec.request_schema.clone(),
            response_schema: spec.response_schema.clone(),
            peers: spec.peers.clone(),
            spawn_tags: spec.spawn_tags.clone(),
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Freeze the registries and start the engine over an opened kernel.
    pub fn build(self, kernel: Kernel) -> PipelineResult<Pipeline> {
        self.build_shared(Arc::new(Mutex::new(kernel)))
    }

    /// Like `build`, for hosts whose handlers also hold the kernel (the
    /// agent terminates its own threads through it).
    ///
    /// Every listener reachable from any profile must have a handler, and
    /// every schema referenced by a registration must exist; both are
    /// startup errors, not runtime surprises.
    pub fn build_shared(self, kernel: Arc<Mutex<Kernel>>) -> PipelineResult<Pipeline> {
        for profile in self.organism.profiles() {
            for handler_name in profile.dispatch_table().handler_names() {
                if !self.registry.contains(handler_name) {
                    return Err(PipelineError::MissingHandler(handler_name.to_string()));
                }
            }
        }
        for registration in self.registry.iter() {
            for schema_name in registration
                .request_schema
                .iter()
                .chain(registration.response_schema.iter())
            {
                if self.schemas.get(schema_name).is_none() {
                    return Err(PipelineError::UnknownSchema(schema_name.clone()));
                }
            }
        }

        let resolver = ProfileResolver::from_organism(&self.organism);
        let engine = EngineHandle::start(
            self.registry,
            self.schemas,
            resolver,
            self.organism,
            kernel,
            self.config,
        );
        Ok(Pipeline { engine })
    }
}

/// A running pipeline instance. Cheap to clone by reference; the value
/// is passed explicitly; there is no global.
pub struct Pipeline {
    engine: EngineHandle,
}

impl Pipeline {
    /// Submit an envelope. Returns once the envelope has passed
    /// structural validation and joined its thread's FIFO queue.
    pub fn submit(&self, envelope: Envelope) -> PipelineResult<Acknowledgement> {
        self.engine.accept(envelope)
    }

    /// Submit and wait for the terminal outcome of this message: a
    /// validated reply, a synthesized ack, or a structured error.
    pub async fn submit_and_wait(
        &self,
        envelope: Envelope,
        deadline: Duration,
    ) -> PipelineResult<Delivery> {
        let message_id = envelope.message_id;
        let waiter = self.engine.register_waiter(message_id);
        if let Err(err) = self.engine.accept(envelope) {
            self.engine.forget_waiter(message_id);
            return Err(err);
        }
        match tokio::time::timeout(deadline, waiter).await {
            Ok(Ok(delivery)) => Ok(delivery),
            Ok(Err(_closed)) => Err(PipelineError::Shutdown),
            Err(_elapsed) => {
                self.engine.forget_waiter(message_id);
                Err(PipelineError::WaitTimeout)
            }
        }
    }

    /// Create the root thread (idempotent).
    pub async fn init_root(&self, profile: &str) -> PipelineResult<ThreadId> {
        let mut kernel = self.engine.kernel.lock().await;
        Ok(kernel.init_root(profile)?)
    }

    /// Explicitly spawn a child thread under a (possibly narrower)
    /// profile. Fails with `PrivilegeEscalation` when the requested
    /// profile is not a subset of the parent's.
    pub async fn spawn_thread(
        &self,
        parent: &ThreadId,
        component: &str,
        profile: &str,
    ) -> PipelineResult<ThreadId> {
        let mut kernel = self.engine.kernel.lock().await;
        let child = kernel.spawn_thread(parent, component, profile, &self.engine.organism)?;
        Ok(child)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.engine.events.subscribe()
    }

    pub fn organism(&self) -> &Organism {
        &self.engine.organism
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.engine.resolver
    }

    pub fn kernel(&self) -> Arc<Mutex<Kernel>> {
        Arc::clone(&self.engine.kernel)
    }

    /// A submit capability detached from any handler invocation, for
    /// hosts that feed the pipeline from their own event sources.
    pub fn submitter(&self) -> Submitter {
        self.engine.submitter()
    }

    /// Stop accepting work and tear down the worker tasks.
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}
