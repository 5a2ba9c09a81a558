//! The dispatch engine.
//!
//! Drives every envelope through the stage sequence: structural
//! validation, request schema validation, security resolution, dispatch,
//! response classification, response schema validation, re-entry. Handler
//! output never reaches another handler as trusted data; it re-enters at
//! stage one as bytes.
//!
//! Concurrency shape: one worker task per thread id consuming an
//! unbounded FIFO queue, so dispatch order within a thread is submission
//! order while threads proceed independently. The kernel lock is taken in
//! short scopes to record intent and outcome; it is never held across a
//! handler await.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use uuid::Uuid;
use weft_cbor::Hash;
use weft_kernel::journal::Direction;
use weft_kernel::threads::{ThreadId, ThreadState};
use weft_kernel::{JournalDraft, Kernel};
use weft_organism::{Organism, RetentionPolicy};

use crate::envelope::{
    AckPayload, Acknowledgement, Envelope, ErrorPayload, ACK_TAG, ENGINE_SENDER, ERROR_TAG,
    INTERNAL_NAMESPACE,
};
use crate::error::{PipelineError, PipelineResult, RejectKind};
use crate::events::{PipelineEvent, ResponseOutcome};
use crate::registry::{HandlerContext, HandlerRegistry, Outgoing, Response, Submitter};
use crate::resolver::ProfileResolver;
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Hard cap on payload bytes, inbound and outbound alike.
    pub max_payload_bytes: usize,
    /// Deadline for a single handler invocation.
    pub handler_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1 << 20,
            handler_deadline: Duration::from_secs(60),
        }
    }
}

/// Terminal outcome delivered to a `submit_and_wait` caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The handler had nothing to say; the engine acknowledged for it.
    Ack,
    /// A validated reply from the handler that owned the tag.
    Reply { tag: String, payload: Vec<u8> },
    /// The envelope or the handler failed.
    Error { kind: RejectKind, message: String },
}

pub(crate) struct Engine {
    pub registry: HandlerRegistry,
    pub schemas: SchemaRegistry,
    pub resolver: ProfileResolver,
    pub organism: Organism,
    pub kernel: Arc<Mutex<Kernel>>,
    pub events: broadcast::Sender<PipelineEvent>,
    pub config: PipelineConfig,
    intake_tx: mpsc::UnboundedSender<Envelope>,
    queues: StdMutex<HashMap<ThreadId, mpsc::UnboundedSender<Envelope>>>,
    workers: StdMutex<Vec<tokio::task::JoinHandle<()>>>,
    waiters: StdMutex<HashMap<Uuid, oneshot::Sender<Delivery>>>,
}

/// Cheaply cloneable handle; worker tasks and boxed futures all hold one.
#[derive(Clone)]
pub(crate) struct EngineHandle(Arc<Engine>);

impl Deref for EngineHandle {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.0
    }
}

impl Engine {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    fn retention_for(&self, profile: &str) -> RetentionPolicy {
        self.resolver
            .retention(profile)
            .unwrap_or(RetentionPolicy::RetainForever)
    }

    pub(crate) fn submitter(&self) -> Submitter {
        Submitter::new(self.intake_tx.clone())
    }

    /// Register a waiter for the terminal outcome of a message.
    pub(crate) fn register_waiter(&self, message_id: Uuid) -> oneshot::Receiver<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("waiter lock")
            .insert(message_id, tx);
        rx
    }

    fn fulfill(&self, message_id: Uuid, delivery: Delivery) {
        if let Some(tx) = self.waiters.lock().expect("waiter lock").remove(&message_id) {
            let _ = tx.send(delivery);
        }
    }

    /// Forget a waiter whose caller gave up.
    pub(crate) fn forget_waiter(&self, message_id: Uuid) {
        self.waiters.lock().expect("waiter lock").remove(&message_id);
    }
}

impl EngineHandle {
    pub(crate) fn start(
        registry: HandlerRegistry,
        schemas: SchemaRegistry,
        resolver: ProfileResolver,
        organism: Organism,
        kernel: Arc<Mutex<Kernel>>,
        config: PipelineConfig,
    ) -> EngineHandle {
        let (events, _) = broadcast::channel(256);
        let (intake_tx, mut intake_rx) = mpsc::unbounded_channel::<Envelope>();
        let handle = EngineHandle(Arc::new(Engine {
            registry,
            schemas,
            resolver,
            organism,
            kernel,
            events,
            config,
            intake_tx,
            queues: StdMutex::new(HashMap::new()),
            workers: StdMutex::new(Vec::new()),
            waiters: StdMutex::new(HashMap::new()),
        }));

        // Intake pump: handler-submitted envelopes join the same queues
        // as external submissions.
        let pump_handle = handle.clone();
        let pump = tokio::spawn(async move {
            while let Some(envelope) = intake_rx.recv().await {
                if let Err(err) = pump_handle.accept(envelope) {
                    log::debug!("intake rejected handler-submitted envelope: {err}");
                }
            }
        });
        handle.workers.lock().expect("worker lock").push(pump);
        handle
    }

    /// Stage 1 plus the cheap immutable-state checks, then enqueue on the
    /// envelope's thread FIFO. Synchronous: all state it touches is
    /// either immutable or behind its own lock.
    pub(crate) fn accept(&self, envelope: Envelope) -> PipelineResult<Acknowledgement> {
        envelope.validate_structure()?;
        if envelope.payload.len() > self.config.max_payload_bytes {
            return Err(PipelineError::PayloadTooLarge {
                size: envelope.payload.len(),
                max: self.config.max_payload_bytes,
            });
        }
        if !self.resolver.knows(&envelope.profile) {
            return Err(PipelineError::UnknownProfile(envelope.profile.clone()));
        }

        let message_id = envelope.message_id;
        self.emit(PipelineEvent::Accepted {
            message_id,
            thread_id: envelope.thread_id.clone(),
            payload_tag: envelope.payload_tag.clone(),
        });

        let mut queues = self.queues.lock().expect("queue lock");
        let tx = queues.entry(envelope.thread_id.clone()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
            let worker_handle = self.clone();
            let worker = tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    worker_handle.process(envelope, None).await;
                }
            });
            self.workers.lock().expect("worker lock").push(worker);
            tx
        });
        tx.send(envelope).map_err(|_| PipelineError::Shutdown)?;
        Ok(Acknowledgement { message_id })
    }

    /// Drop all queue senders and stop the worker tasks.
    pub(crate) async fn shutdown(&self) {
        self.queues.lock().expect("queue lock").clear();
        let workers = std::mem::take(&mut *self.workers.lock().expect("worker lock"));
        for worker in workers {
            worker.abort();
        }
    }

    /// Drive one envelope through stages 2–7. With `deliver_to` set the
    /// envelope is an engine-synthesized ack/error addressed directly to
    /// its original sender; schema and security stages do not apply.
    fn process(
        &self,
        envelope: Envelope,
        deliver_to: Option<String>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let engine = self.clone();
        Box::pin(async move {
            let handler_name = match deliver_to {
                Some(target) => target,
                None => match engine.run_gate_stages(&envelope).await {
                    Some(handler) => handler,
                    None => return,
                },
            };
            engine.dispatch(envelope, &handler_name).await;
        })
    }

    /// Stages 2 and 3: thread existence, request schema, security.
    /// Returns the resolved handler name, or rejects and returns None.
    async fn run_gate_stages(&self, envelope: &Envelope) -> Option<String> {
        let thread_known = {
            let kernel = self.kernel.lock().await;
            kernel.threads().contains(&envelope.thread_id)
        };
        if !thread_known {
            self.reject(
                envelope,
                RejectKind::UnknownThread,
                format!("thread '{}' is not registered", envelope.thread_id),
                false,
            )
            .await;
            return None;
        }

        // Stage 2: request schema, when one is registered for the tag.
        // Schemas are named by the payload tag they govern.
        if let Some(schema) = self.schemas.get(&envelope.payload_tag) {
            if let Err(err) = schema.validate(&envelope.payload) {
                self.reject(envelope, RejectKind::SchemaViolation, err.to_string(), true)
                    .await;
                return None;
            }
        }

        // Stage 3: the security check. A missing route is structural:
        // from here there is no code path to any handler.
        match self
            .resolver
            .resolve(&envelope.profile, &envelope.payload_tag)
        {
            Some(handler) if self.registry.contains(handler) => Some(handler.to_string()),
            _ => {
                log::warn!(
                    "audit: profile '{}' has no route for tag '{}'",
                    envelope.profile,
                    envelope.payload_tag
                );
                self.emit(PipelineEvent::SecurityDenied {
                    profile: envelope.profile.clone(),
                    payload_tag: envelope.payload_tag.clone(),
                    thread_id: envelope.thread_id.clone(),
                });
                self.reject(
                    envelope,
                    RejectKind::RouteNotFound,
                    format!(
                        "no route for tag '{}' under profile '{}'",
                        envelope.payload_tag, envelope.profile
                    ),
                    true,
                )
                .await;
                None
            }
        }
    }

    /// Stages 4–7 for one resolved handler.
    async fn dispatch(&self, envelope: Envelope, handler_name: &str) {
        let Some(registration) = self.registry.get(handler_name) else {
            self.reject(
                &envelope,
                RejectKind::RouteNotFound,
                format!("handler '{handler_name}' is not registered"),
                false,
            )
            .await;
            return;
        };
        let handler = Arc::clone(&registration.handler);
        let response_schema = registration.response_schema.clone();
        let spawns_thread = registration
            .spawn_tags
            .iter()
            .any(|t| t == &envelope.payload_tag);
        let retention = self.retention_for(&envelope.profile);

        // Record intent: spawn the child thread when the tag calls for
        // one, journal the inbound hop, then release the kernel.
        let dispatch_thread = {
            let mut kernel = self.kernel.lock().await;
            let dispatch_thread = if spawns_thread {
                match kernel.spawn_thread(
                    &envelope.thread_id,
                    handler_name,
                    &envelope.profile,
                    &self.organism,
                ) {
                    Ok(child) => {
                        self.emit(PipelineEvent::ThreadSpawned {
                            thread_id: child.clone(),
                            profile: envelope.profile.clone(),
                        });
                        child
                    }
                    Err(weft_kernel::error::KernelError::PrivilegeEscalation {
                        requested,
                        parent,
                    }) => {
                        drop(kernel);
                        self.reject(
                            &envelope,
                            RejectKind::PrivilegeEscalation,
                            format!("profile '{requested}' escapes parent profile '{parent}'"),
                            true,
                        )
                        .await;
                        return;
                    }
                    Err(err) => {
                        drop(kernel);
                        self.reject(&envelope, RejectKind::UnknownThread, err.to_string(), false)
                            .await;
                        return;
                    }
                }
            } else {
                envelope.thread_id.clone()
            };

            let journaled = kernel.append_journal(JournalDraft {
                thread_id: dispatch_thread.clone(),
                direction: Direction::Inbound,
                handler: handler_name.to_string(),
                counterpart: None,
                payload_tag: envelope.payload_tag.clone(),
                payload_hash: Hash::of_bytes(&envelope.payload),
                retention,
                broadcast_group: None,
                note: None,
            });
            if let Err(err) = journaled {
                log::warn!("journal append failed for inbound dispatch: {err}");
            }
            dispatch_thread
        };

        self.emit(PipelineEvent::Dispatched {
            message_id: envelope.message_id,
            handler: handler_name.to_string(),
            thread_id: dispatch_thread.clone(),
        });

        let ctx = HandlerContext {
            thread_id: dispatch_thread.clone(),
            sender: envelope.sender.clone(),
            self_name: handler_name.to_string(),
            payload_tag: envelope.payload_tag.clone(),
            message_id: envelope.message_id,
            reply_to: envelope.reply_to,
            submitter: self.submitter(),
        };

        // Stage 4 proper: exactly one handler sees the envelope. No
        // kernel lock is held across this await.
        let outcome = tokio::time::timeout(
            self.config.handler_deadline,
            handler.handle(&envelope.payload, ctx),
        )
        .await;

        let response = match outcome {
            Ok(response) => response,
            Err(_elapsed) => {
                self.emit(PipelineEvent::TimedOut {
                    message_id: envelope.message_id,
                    handler: handler_name.to_string(),
                });
                self.reject(
                    &envelope,
                    RejectKind::Timeout,
                    format!("handler '{handler_name}' exceeded its deadline"),
                    true,
                )
                .await;
                return;
            }
        };

        self.classify(
            envelope,
            handler_name,
            dispatch_thread,
            spawns_thread,
            response_schema,
            response,
        )
        .await;
    }

    /// Stages 5–7: classification, response schema validation, re-entry.
    async fn classify(
        &self,
        envelope: Envelope,
        producer: &str,
        dispatch_thread: ThreadId,
        spawned: bool,
        response_schema: Option<String>,
        response: Response,
    ) {
        let outcome = match &response {
            Response::Reply { .. } => ResponseOutcome::Replied,
            Response::Send { .. } => ResponseOutcome::Sent,
            Response::Broadcast(outputs) => ResponseOutcome::Broadcast(outputs.len()),
            Response::Silence => ResponseOutcome::Silence,
            Response::Error { .. } => ResponseOutcome::Error,
        };
        self.emit(PipelineEvent::Responded {
            message_id: envelope.message_id,
            handler: producer.to_string(),
            outcome,
        });

        match response {
            Response::Silence => {
                // Acknowledged Silence: exactly one synthesized ack so
                // any awaiter unblocks.
                self.fulfill(envelope.message_id, Delivery::Ack);
                self.notify_sender(
                    &envelope,
                    ACK_TAG,
                    weft_cbor::to_canonical_cbor(&AckPayload {
                        acknowledged_tag: envelope.payload_tag.clone(),
                    })
                    .unwrap_or_default(),
                )
                .await;
            }
            Response::Error { kind, message } => {
                if spawned {
                    self.fail_thread(&dispatch_thread, &message).await;
                }
                let message = format!("{kind}: {message}");
                self.fulfill(
                    envelope.message_id,
                    Delivery::Error {
                        kind: RejectKind::HandlerError,
                        message: message.clone(),
                    },
                );
                self.notify_sender(
                    &envelope,
                    ERROR_TAG,
                    weft_cbor::to_canonical_cbor(&ErrorPayload {
                        kind: RejectKind::HandlerError,
                        message,
                        original_tag: envelope.payload_tag.clone(),
                    })
                    .unwrap_or_default(),
                )
                .await;
            }
            Response::Reply { tag, payload } => {
                let accepted = self
                    .emit_output(
                        &envelope,
                        producer,
                        &dispatch_thread,
                        &response_schema,
                        Outgoing {
                            target: envelope.sender.clone(),
                            tag,
                            payload,
                        },
                        true,
                        None,
                    )
                    .await;
                if spawned && accepted {
                    self.complete_thread(&dispatch_thread).await;
                }
            }
            Response::Send {
                target,
                tag,
                payload,
            } => {
                self.emit_output(
                    &envelope,
                    producer,
                    &dispatch_thread,
                    &response_schema,
                    Outgoing {
                        target,
                        tag,
                        payload,
                    },
                    false,
                    None,
                )
                .await;
            }
            Response::Broadcast(outputs) => {
                // Sibling outputs share a journal group so retention
                // treats the fan-out as one unit: nothing is prunable
                // until every target has consumed its message.
                let group = envelope.message_id.to_string();
                for outgoing in outputs {
                    self.emit_output(
                        &envelope,
                        producer,
                        &dispatch_thread,
                        &response_schema,
                        outgoing,
                        false,
                        Some(group.as_str()),
                    )
                    .await;
                }
            }
        }
    }

    /// Stage 6 and 7 for one output. Returns true when the output was
    /// accepted for re-entry.
    #[allow(clippy::too_many_arguments)]
    async fn emit_output(
        &self,
        incoming: &Envelope,
        producer: &str,
        dispatch_thread: &ThreadId,
        response_schema: &Option<String>,
        outgoing: Outgoing,
        is_reply: bool,
        broadcast_group: Option<&str>,
    ) -> bool {
        let retention = self.retention_for(&incoming.profile);

        // A failed (or reaped) thread discards its in-flight responses:
        // they are journaled as discards, never as successes.
        let thread_failed = {
            let kernel = self.kernel.lock().await;
            kernel
                .threads()
                .get(dispatch_thread)
                .map(|r| r.state == ThreadState::Failed)
                .unwrap_or(true)
        };
        if thread_failed {
            self.journal_output(
                dispatch_thread,
                producer,
                None,
                &outgoing.tag,
                &outgoing.payload,
                retention,
                broadcast_group,
                Some("discarded: thread failed".into()),
            )
            .await;
            return false;
        }

        if outgoing.payload.len() > self.config.max_payload_bytes {
            self.journal_output(
                dispatch_thread,
                producer,
                None,
                &outgoing.tag,
                &outgoing.payload,
                retention,
                broadcast_group,
                Some("payload too large".into()),
            )
            .await;
            self.reject(
                incoming,
                RejectKind::PayloadTooLarge,
                format!(
                    "output from '{producer}' is {} bytes (max {})",
                    outgoing.payload.len(),
                    self.config.max_payload_bytes
                ),
                false,
            )
            .await;
            return false;
        }

        // Zero-trust re-entry enforcement: the producing handler's
        // declared response schema gates every output it emits.
        if let Some(schema_name) = response_schema {
            if let Err(err) = self.schemas.validate(schema_name, &outgoing.payload) {
                let detail = err.to_string();
                self.emit(PipelineEvent::ResponseRejected {
                    producing_handler: producer.to_string(),
                    tag: outgoing.tag.clone(),
                    detail: detail.clone(),
                });
                self.journal_output(
                    dispatch_thread,
                    producer,
                    None,
                    &outgoing.tag,
                    &outgoing.payload,
                    retention,
                    broadcast_group,
                    Some(format!("response schema violation: {detail}")),
                )
                .await;
                self.reject(
                    incoming,
                    RejectKind::ResponseSchemaViolation,
                    format!("output from '{producer}' violated its response schema: {detail}"),
                    false,
                )
                .await;
                return false;
            }
        }

        let counterpart = self
            .resolver
            .resolve(&incoming.profile, &outgoing.tag)
            .map(|s| s.to_string());
        self.journal_output(
            dispatch_thread,
            producer,
            counterpart.as_deref(),
            &outgoing.tag,
            &outgoing.payload,
            retention,
            broadcast_group,
            None,
        )
        .await;

        if is_reply {
            self.fulfill(
                incoming.message_id,
                Delivery::Reply {
                    tag: outgoing.tag.clone(),
                    payload: outgoing.payload.clone(),
                },
            );
        }

        // Stage 7: the validated output becomes a brand-new envelope and
        // re-enters at stage 1. Profile inherited, never widened.
        let reentrant = Envelope {
            message_id: Uuid::new_v4(),
            reply_to: is_reply.then_some(incoming.message_id),
            namespace: incoming.namespace.clone(),
            payload_tag: outgoing.tag,
            payload: outgoing.payload,
            sender: producer.to_string(),
            thread_id: dispatch_thread.clone(),
            profile: incoming.profile.clone(),
        };
        if let Err(err) = self.accept(reentrant) {
            self.reject(incoming, reject_kind_of(&err), err.to_string(), false)
                .await;
            return false;
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    async fn journal_output(
        &self,
        thread_id: &ThreadId,
        producer: &str,
        counterpart: Option<&str>,
        tag: &str,
        payload: &[u8],
        retention: RetentionPolicy,
        broadcast_group: Option<&str>,
        note: Option<String>,
    ) {
        let mut kernel = self.kernel.lock().await;
        let result = kernel.append_journal(JournalDraft {
            thread_id: thread_id.clone(),
            direction: Direction::Outbound,
            handler: producer.to_string(),
            counterpart: counterpart.map(String::from),
            payload_tag: tag.to_string(),
            payload_hash: Hash::of_bytes(payload),
            retention,
            broadcast_group: broadcast_group.map(String::from),
            note,
        });
        if let Err(err) = result {
            log::warn!("journal append failed for outbound entry: {err}");
        }
    }

    /// Reject an envelope: event, optional journal note, waiter delivery
    /// and a synthesized error back to the sender.
    async fn reject(&self, envelope: &Envelope, kind: RejectKind, detail: String, journal: bool) {
        self.emit(PipelineEvent::Rejected {
            message_id: envelope.message_id,
            kind,
            detail: detail.clone(),
        });

        if journal {
            let retention = self.retention_for(&envelope.profile);
            let mut kernel = self.kernel.lock().await;
            let result = kernel.append_journal(JournalDraft {
                thread_id: envelope.thread_id.clone(),
                direction: Direction::Inbound,
                handler: ENGINE_SENDER.to_string(),
                counterpart: None,
                payload_tag: envelope.payload_tag.clone(),
                payload_hash: Hash::of_bytes(&envelope.payload),
                retention,
                broadcast_group: None,
                note: Some(format!("{kind}: {detail}")),
            });
            if let Err(err) = result {
                log::warn!("journal append failed for rejection: {err}");
            }
        }

        self.fulfill(
            envelope.message_id,
            Delivery::Error {
                kind,
                message: detail.clone(),
            },
        );

        self.notify_sender(
            envelope,
            ERROR_TAG,
            weft_cbor::to_canonical_cbor(&ErrorPayload {
                kind,
                message: detail,
                original_tag: envelope.payload_tag.clone(),
            })
            .unwrap_or_default(),
        )
        .await;
    }

    /// Deliver a synthesized ack/error envelope straight to the original
    /// sender when the sender is a registered handler. The engine is the
    /// originator, so a failure while handling this delivery terminates
    /// (the engine is not a handler).
    async fn notify_sender(&self, original: &Envelope, tag: &str, payload: Vec<u8>) {
        // Never notify about the fate of an already-synthesized delivery
        // or of outputs produced while handling one: acks about acks
        // would bounce between handlers forever.
        if original.sender == ENGINE_SENDER
            || original.namespace == INTERNAL_NAMESPACE
            || !self.registry.contains(&original.sender)
        {
            return;
        }
        let synthesized = Envelope {
            message_id: Uuid::new_v4(),
            reply_to: Some(original.message_id),
            namespace: INTERNAL_NAMESPACE.to_string(),
            payload_tag: tag.to_string(),
            payload,
            sender: ENGINE_SENDER.to_string(),
            thread_id: original.thread_id.clone(),
            profile: original.profile.clone(),
        };
        let target = original.sender.clone();
        self.process(synthesized, Some(target)).await;
    }

    async fn complete_thread(&self, thread_id: &ThreadId) {
        let mut kernel = self.kernel.lock().await;
        if kernel.return_thread(thread_id).is_ok() {
            self.emit(PipelineEvent::ThreadCompleted {
                thread_id: thread_id.clone(),
            });
        }
    }

    async fn fail_thread(&self, thread_id: &ThreadId, reason: &str) {
        let mut kernel = self.kernel.lock().await;
        if kernel.fail_thread(thread_id, reason).is_ok() {
            self.emit(PipelineEvent::ThreadFailed {
                thread_id: thread_id.clone(),
                reason: reason.to_string(),
            });
        }
    }
}

fn reject_kind_of(err: &PipelineError) -> RejectKind {
    match err {
        PipelineError::Malformed(_) => RejectKind::MalformedEnvelope,
        PipelineError::UnknownProfile(_) => RejectKind::UnknownProfile,
        PipelineError::PayloadTooLarge { .. } => RejectKind::PayloadTooLarge,
        PipelineError::SchemaViolation { .. } => RejectKind::SchemaViolation,
        _ => RejectKind::HandlerError,
    }
}
