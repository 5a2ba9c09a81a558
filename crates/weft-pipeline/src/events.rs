//! Pipeline event stream for observers (hosts, tests, dashboards).
//!
//! Events are advisory: the engine never blocks on a receiver and drops
//! events when nobody is listening.

use uuid::Uuid;
use weft_kernel::threads::ThreadId;

use crate::error::RejectKind;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// An envelope passed structural validation and entered its queue.
    Accepted {
        message_id: Uuid,
        thread_id: ThreadId,
        payload_tag: String,
    },
    /// An envelope or handler output was rejected.
    Rejected {
        message_id: Uuid,
        kind: RejectKind,
        detail: String,
    },
    /// Stage-3 structural denial. Audit, not a recoverable error.
    SecurityDenied {
        profile: String,
        payload_tag: String,
        thread_id: ThreadId,
    },
    /// Exactly one handler received the envelope.
    Dispatched {
        message_id: Uuid,
        handler: String,
        thread_id: ThreadId,
    },
    /// The handler's response was classified.
    Responded {
        message_id: Uuid,
        handler: String,
        outcome: ResponseOutcome,
    },
    /// A handler output failed its producer's response schema.
    ResponseRejected {
        producing_handler: String,
        tag: String,
        detail: String,
    },
    /// The deadline watchdog fired for an in-flight handler.
    TimedOut { message_id: Uuid, handler: String },
    ThreadSpawned { thread_id: ThreadId, profile: String },
    ThreadCompleted { thread_id: ThreadId },
    ThreadFailed { thread_id: ThreadId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Replied,
    Sent,
    Broadcast(usize),
    Silence,
    Error,
}
