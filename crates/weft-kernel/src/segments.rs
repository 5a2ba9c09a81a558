//! Context segment store — the three-tier attention ledger.
//!
//! A segment's full content lives in the blob store for the life of its
//! thread. Status transitions (Expanded / Folded / Evicted) only change
//! which slot feeds the live view; nothing here ever deletes content.
//! Fold is reversible by construction: unfold re-reads the original bytes
//! and the discarded summary is kept as metadata.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use weft_cbor::Hash;

use crate::error::{KernelError, KernelResult};
use crate::threads::ThreadId;

pub type SegmentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Message,
    Code,
    ToolResult,
    Summary,
    Other,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Message => "message",
            ContentType::Code => "code",
            ContentType::ToolResult => "tool_result",
            ContentType::Summary => "summary",
            ContentType::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Expanded,
    Folded,
    Evicted,
}

mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_bytes::{ByteBuf, Bytes};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(Bytes::new(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<ByteBuf>::deserialize(deserializer).map(|opt| opt.map(|buf| buf.into_vec()))
    }
}

/// Segment metadata. The full content is addressed by `id` in the blob
/// store and pinned by `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub thread_id: ThreadId,
    pub content_type: ContentType,
    pub status: SegmentStatus,
    pub relevance: f32,
    pub byte_size: u64,
    pub token_estimate: u64,
    pub content_hash: Hash,
    pub created_at: u64,
    /// Present while Folded; retained after unfold.
    #[serde(default, with = "serde_bytes_opt")]
    pub summary: Option<Vec<u8>>,
}

/// The live view of one segment as assembled for the thinker.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentView {
    pub id: SegmentId,
    pub content_type: ContentType,
    pub status: SegmentStatus,
    pub body: Vec<u8>,
}

/// Rough token estimate used for budget accounting.
pub fn estimate_tokens(bytes: usize) -> u64 {
    (bytes as u64).div_ceil(4)
}

/// What a curator should fold and evict, per the store's advisory
/// ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurationAdvice {
    pub fold: Vec<SegmentId>,
    pub evict: Vec<SegmentId>,
}

/// In-memory segment metadata, ordered per thread. Durable through the
/// WAL; full content durable through the blob store.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ContextStore {
    segments: HashMap<SegmentId, SegmentMeta>,
    by_thread: HashMap<ThreadId, Vec<SegmentId>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SegmentId) -> Option<&SegmentMeta> {
        self.segments.get(&id)
    }

    pub fn segments_of(&self, thread_id: &ThreadId) -> Vec<&SegmentMeta> {
        self.by_thread
            .get(thread_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.segments.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tokens currently feeding the live view: full estimate for Expanded
    /// segments, summary estimate for Folded, nothing for Evicted.
    pub fn live_tokens(&self, thread_id: &ThreadId) -> u64 {
        self.segments_of(thread_id)
            .iter()
            .map(|meta| match meta.status {
                SegmentStatus::Expanded => meta.token_estimate,
                SegmentStatus::Folded => meta
                    .summary
                    .as_ref()
                    .map(|s| estimate_tokens(s.len()))
                    .unwrap_or(0),
                SegmentStatus::Evicted => 0,
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    // ── Apply path (live after WAL append, and during replay) ──

    pub fn apply_append(&mut self, meta: SegmentMeta) {
        if self.segments.contains_key(&meta.id) {
            return; // idempotent replay
        }
        self.by_thread
            .entry(meta.thread_id.clone())
            .or_default()
            .push(meta.id);
        self.segments.insert(meta.id, meta);
    }

    pub fn apply_fold(&mut self, id: SegmentId, summary: Vec<u8>) {
        if let Some(meta) = self.segments.get_mut(&id) {
            meta.status = SegmentStatus::Folded;
            meta.summary = Some(summary);
        }
    }

    pub fn apply_unfold(&mut self, id: SegmentId) {
        if let Some(meta) = self.segments.get_mut(&id) {
            meta.status = SegmentStatus::Expanded;
            // The summary stays behind as metadata.
        }
    }

    pub fn apply_evict(&mut self, id: SegmentId) {
        if let Some(meta) = self.segments.get_mut(&id) {
            meta.status = SegmentStatus::Evicted;
        }
    }

    pub fn apply_relevance(&mut self, id: SegmentId, relevance: f32) {
        if let Some(meta) = self.segments.get_mut(&id) {
            meta.relevance = relevance.clamp(0.0, 1.0);
        }
    }

    /// Drop all segment metadata for a reaped thread, returning the ids so
    /// the kernel can release the blobs.
    pub fn apply_release_thread(&mut self, thread_id: &ThreadId) -> Vec<SegmentId> {
        let ids = self.by_thread.remove(thread_id).unwrap_or_default();
        for id in &ids {
            self.segments.remove(id);
        }
        ids
    }

    /// Advisory curation ordering: lowest relevance first, oldest id as
    /// the tie-break. The store exposes the mechanism; the curator owns
    /// the policy.
    pub fn eviction_candidates(&self, thread_id: &ThreadId) -> Vec<SegmentId> {
        let mut metas: Vec<&SegmentMeta> = self
            .segments_of(thread_id)
            .into_iter()
            .filter(|m| m.status != SegmentStatus::Evicted)
            .collect();
        metas.sort_by(|a, b| {
            a.relevance
                .partial_cmp(&b.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        metas.into_iter().map(|m| m.id).collect()
    }

    /// Recommend curation moves for a curator: fold Expanded segments
    /// whose relevance is below `fold_threshold`, and once the live view
    /// still exceeds `budget_tokens`, evict lowest-relevance segments
    /// first (oldest id breaks ties). Advisory only; nothing here changes
    /// state.
    pub fn advise(
        &self,
        thread_id: &ThreadId,
        fold_threshold: f32,
        budget_tokens: u64,
    ) -> CurationAdvice {
        let fold: Vec<SegmentId> = self
            .segments_of(thread_id)
            .into_iter()
            .filter(|m| m.status == SegmentStatus::Expanded && m.relevance < fold_threshold)
            .map(|m| m.id)
            .collect();

        let mut remaining = self.live_tokens(thread_id);
        let mut evict = Vec::new();
        if remaining > budget_tokens {
            for id in self.eviction_candidates(thread_id) {
                if remaining <= budget_tokens {
                    break;
                }
                let Some(meta) = self.segments.get(&id) else {
                    continue;
                };
                let live = match meta.status {
                    SegmentStatus::Expanded => meta.token_estimate,
                    SegmentStatus::Folded => meta
                        .summary
                        .as_ref()
                        .map(|s| estimate_tokens(s.len()))
                        .unwrap_or(0),
                    SegmentStatus::Evicted => 0,
                };
                remaining = remaining.saturating_sub(live);
                evict.push(id);
            }
        }

        CurationAdvice { fold, evict }
    }

    pub(crate) fn expect(&self, id: SegmentId) -> KernelResult<&SegmentMeta> {
        self.segments.get(&id).ok_or(KernelError::UnknownSegment(id))
    }
}
