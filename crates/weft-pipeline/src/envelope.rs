//! The envelope — the fabric's atomic message unit.
//!
//! Envelopes are immutable after construction. Payload bytes are opaque
//! to every core component; only the schema validator for the payload's
//! tag and the handler that owns the tag ever decode them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use weft_kernel::threads::ThreadId;

use crate::error::{PipelineError, PipelineResult};

/// Namespace used for engine-synthesized envelopes (acks, errors).
pub const INTERNAL_NAMESPACE: &str = "weft:internal";

/// Tags of engine-synthesized envelopes.
pub const ACK_TAG: &str = "Ack";
pub const ERROR_TAG: &str = "DispatchError";

/// Sender name the engine uses for synthesized envelopes.
pub const ENGINE_SENDER: &str = "engine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id, assigned at construction.
    pub message_id: Uuid,
    /// Set on replies and synthesized ack/error envelopes.
    pub reply_to: Option<Uuid>,
    /// Schema family URI.
    pub namespace: String,
    pub payload_tag: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub sender: String,
    pub thread_id: ThreadId,
    pub profile: String,
}

impl Envelope {
    /// Construct and structurally validate an envelope.
    pub fn build(
        namespace: &str,
        payload_tag: &str,
        payload: Vec<u8>,
        sender: &str,
        thread_id: ThreadId,
        profile: &str,
    ) -> PipelineResult<Self> {
        let envelope = Self {
            message_id: Uuid::new_v4(),
            reply_to: None,
            namespace: namespace.to_string(),
            payload_tag: payload_tag.to_string(),
            payload,
            sender: sender.to_string(),
            thread_id,
            profile: profile.to_string(),
        };
        envelope.validate_structure()?;
        Ok(envelope)
    }

    /// Stage-1 structural validation. Applied to external submissions and
    /// to every re-entering handler output alike.
    pub fn validate_structure(&self) -> PipelineResult<()> {
        let malformed = |reason: &str| PipelineError::Malformed(reason.to_string());
        if self.namespace.is_empty() {
            return Err(malformed("empty namespace"));
        }
        if self.payload_tag.is_empty() {
            return Err(malformed("empty payload tag"));
        }
        if !self
            .payload_tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(malformed("payload tag contains invalid characters"));
        }
        if self.sender.is_empty() {
            return Err(malformed("empty sender"));
        }
        if self.profile.is_empty() {
            return Err(malformed("empty profile"));
        }
        // The thread id type enforces the wire format at parse time; check
        // again here because envelopes can be deserialized from raw bytes.
        ThreadId::parse(self.thread_id.as_str()).map_err(|e| malformed(&e.to_string()))?;
        Ok(())
    }
}

/// Acknowledgement returned by `submit`: the envelope passed structural
/// validation and entered its thread's FIFO queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub message_id: Uuid,
}

/// Payload of an engine-synthesized `DispatchError` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: crate::error::RejectKind,
    pub message: String,
    /// Tag of the envelope that failed.
    pub original_tag: String,
}

/// Payload of an engine-synthesized `Ack` envelope (acknowledged Silence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub acknowledged_tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::build(
            "weft:demo",
            "EchoRequest",
            b"payload".to_vec(),
            "console",
            ThreadId::root(),
            "admin",
        )
        .unwrap()
    }

    #[test]
    fn build_assigns_fresh_message_ids() {
        let a = envelope();
        let b = envelope();
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.reply_to, None);
    }

    #[test]
    fn structural_validation_rejects_empty_fields() {
        let mut bad = envelope();
        bad.sender.clear();
        assert!(bad.validate_structure().is_err());

        let mut bad = envelope();
        bad.payload_tag.clear();
        assert!(bad.validate_structure().is_err());

        let mut bad = envelope();
        bad.namespace.clear();
        assert!(bad.validate_structure().is_err());
    }

    #[test]
    fn structural_validation_rejects_bad_tag_characters() {
        let mut bad = envelope();
        bad.payload_tag = "Echo Request".into();
        assert!(matches!(
            bad.validate_structure(),
            Err(PipelineError::Malformed(_))
        ));
    }

    #[test]
    fn envelope_round_trips_through_cbor() {
        let env = envelope();
        let bytes = weft_cbor::to_canonical_cbor(&env).unwrap();
        let back: Envelope = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(env, back);
    }
}
