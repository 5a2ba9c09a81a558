//! Kernel error types.

use thiserror::Error;

use crate::threads::ThreadId;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("WAL corrupted at offset {offset}: {reason}")]
    CorruptedWal { offset: u64, reason: String },

    #[error("checkpoint inconsistent: {0}")]
    CheckpointInconsistent(String),

    #[error("unknown thread '{0}'")]
    UnknownThread(ThreadId),

    #[error("thread '{0}' is terminal")]
    ThreadTerminal(ThreadId),

    #[error("thread '{0}' is still active")]
    ThreadStillActive(ThreadId),

    #[error("invalid thread id '{id}': {reason}")]
    InvalidThreadId { id: String, reason: String },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error(
        "privilege escalation: profile '{requested}' is not a subset of parent profile '{parent}'"
    )]
    PrivilegeEscalation { requested: String, parent: String },

    #[error("unknown segment {0}")]
    UnknownSegment(u64),

    #[error("segment {segment} content corrupted: expected {expected}, got {actual}")]
    SegmentCorrupted {
        segment: u64,
        expected: String,
        actual: String,
    },

    #[error("blob for segment {0} is missing")]
    BlobMissing(u64),
}

pub type KernelResult<T> = Result<T, KernelError>;
