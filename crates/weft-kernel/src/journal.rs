//! Append-only message journal.
//!
//! Entries are immutable once appended; retention policies delete whole
//! entries, never edit them. Consumption is derived, not stored: an
//! Outbound entry counts as delivered once a later Inbound entry with the
//! same payload hash exists on its counterpart handler. Sibling outputs
//! of one Broadcast share a `broadcast_group`, and none of them counts as
//! consumed until every sibling has been delivered.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use weft_cbor::Hash;
use weft_organism::RetentionPolicy;

use crate::threads::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// An envelope delivered to a handler.
    Inbound,
    /// A handler output accepted for re-entry (or rejected; see `note`).
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic per-pipeline sequence, assigned by the kernel.
    pub id: u64,
    pub timestamp: u64,
    pub thread_id: ThreadId,
    pub direction: Direction,
    /// Inbound: the receiving handler. Outbound: the producing handler.
    pub handler: String,
    /// Outbound: the handler expected to consume this output, when routed.
    pub counterpart: Option<String>,
    pub payload_tag: String,
    pub payload_hash: Hash,
    /// Policy in force at write time.
    pub retention: RetentionPolicy,
    /// Shared key linking the sibling outputs of one Broadcast. Pruning
    /// treats the group as a unit: no sibling is consumed until all are.
    #[serde(default)]
    pub broadcast_group: Option<String>,
    /// Audit annotation (schema violations, oversized fold summaries).
    pub note: Option<String>,
}

/// Filter for `scan`. Empty filter matches everything.
#[derive(Debug, Default, Clone)]
pub struct JournalFilter {
    pub thread_id: Option<ThreadId>,
    pub handler: Option<String>,
    pub direction: Option<Direction>,
    pub payload_tag: Option<String>,
}

impl JournalFilter {
    fn matches(&self, entry: &JournalEntry) -> bool {
        self.thread_id
            .as_ref()
            .map_or(true, |t| &entry.thread_id == t)
            && self.handler.as_ref().map_or(true, |h| &entry.handler == h)
            && self.direction.map_or(true, |d| entry.direction == d)
            && self
                .payload_tag
                .as_ref()
                .map_or(true, |t| &entry.payload_tag == t)
    }
}

/// The journal. Entries are held in id order; `index` maps id → position.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    #[serde(skip)]
    index: HashMap<u64, usize>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the id index after deserialization.
    pub fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.id, pos))
            .collect();
    }

    pub fn get(&self, id: u64) -> Option<&JournalEntry> {
        self.index.get(&id).map(|&pos| &self.entries[pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with ids in `range`, matching `filter`, in id order.
    pub fn scan(&self, range: Range<u64>, filter: &JournalFilter) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| range.contains(&e.id) && filter.matches(e))
            .collect()
    }

    /// Outbound entries whose counterpart never produced a matching
    /// Inbound entry. Surfaced to the host after recovery.
    pub fn undelivered(&self) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.direction == Direction::Outbound && !self.is_consumed(e))
            .collect()
    }

    /// One entry, considered alone: has its counterpart produced a
    /// matching later Inbound entry?
    fn delivered(&self, outbound: &JournalEntry) -> bool {
        let Some(target) = outbound.counterpart.as_deref() else {
            // Nothing downstream was ever expected (terminal reply, or an
            // output rejected before it could be routed).
            return true;
        };
        self.entries.iter().any(|e| {
            e.id > outbound.id
                && e.direction == Direction::Inbound
                && e.handler == target
                && e.payload_hash == outbound.payload_hash
        })
    }

    /// Broadcast siblings are consumed together: every Outbound entry in
    /// the group must have been delivered before any of them counts.
    fn is_consumed(&self, outbound: &JournalEntry) -> bool {
        match outbound.broadcast_group.as_deref() {
            None => self.delivered(outbound),
            Some(group) => self
                .entries
                .iter()
                .filter(|e| {
                    e.direction == Direction::Outbound
                        && e.broadcast_group.as_deref() == Some(group)
                })
                .all(|sibling| self.delivered(sibling)),
        }
    }

    /// Ids deletable under each entry's own retention policy at `now`.
    ///
    /// `prune_on_delivery` deletes an Outbound entry once its counterpart
    /// has consumed it (for broadcast siblings: once the whole group has
    /// been consumed), and an Inbound entry once the thread has moved
    /// past it (any later entry on the same thread exists).
    pub fn prunable(&self, now: u64) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|e| match e.retention {
                RetentionPolicy::RetainForever => false,
                RetentionPolicy::RetainDays(days) => {
                    let age = now.saturating_sub(e.timestamp);
                    age > days as u64 * 24 * 60 * 60 * 1000
                }
                RetentionPolicy::PruneOnDelivery => match e.direction {
                    Direction::Outbound => self.is_consumed(e),
                    Direction::Inbound => self
                        .entries
                        .iter()
                        .any(|later| later.id > e.id && later.thread_id == e.thread_id),
                },
            })
            .map(|e| e.id)
            .collect()
    }

    // ── Apply path (live after WAL append, and during replay) ──

    pub fn apply_append(&mut self, entry: JournalEntry) {
        if self.index.contains_key(&entry.id) {
            return; // idempotent replay
        }
        self.index.insert(entry.id, self.entries.len());
        self.entries.push(entry);
    }

    pub fn apply_prune(&mut self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        self.entries.retain(|e| !ids.contains(&e.id));
        self.reindex();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, direction: Direction, handler: &str, hash_of: &[u8]) -> JournalEntry {
        JournalEntry {
            id,
            timestamp: 1_000,
            thread_id: ThreadId::root(),
            direction,
            handler: handler.into(),
            counterpart: None,
            payload_tag: "Demo".into(),
            payload_hash: Hash::of_bytes(hash_of),
            retention: RetentionPolicy::RetainForever,
            broadcast_group: None,
            note: None,
        }
    }

    #[test]
    fn scan_is_ordered_and_filtered() {
        let mut journal = Journal::new();
        journal.apply_append(entry(0, Direction::Inbound, "a", b"x"));
        journal.apply_append(entry(1, Direction::Outbound, "a", b"y"));
        journal.apply_append(entry(2, Direction::Inbound, "b", b"z"));

        let filter = JournalFilter {
            direction: Some(Direction::Inbound),
            ..Default::default()
        };
        let hits = journal.scan(0..10, &filter);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 0);
        assert_eq!(hits[1].id, 2);

        let narrow = journal.scan(1..2, &JournalFilter::default());
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0].id, 1);
    }

    #[test]
    fn entries_observed_at_stable_ids() {
        let mut journal = Journal::new();
        journal.apply_append(entry(0, Direction::Inbound, "a", b"x"));
        journal.apply_append(entry(1, Direction::Inbound, "b", b"y"));
        journal.apply_prune(&[0]);

        assert!(journal.get(0).is_none());
        assert_eq!(journal.get(1).unwrap().handler, "b");
    }

    #[test]
    fn outbound_consumed_by_matching_inbound() {
        let mut journal = Journal::new();
        let mut out = entry(0, Direction::Outbound, "producer", b"payload");
        out.counterpart = Some("tool".into());
        out.retention = RetentionPolicy::PruneOnDelivery;
        journal.apply_append(out);
        assert_eq!(journal.undelivered().len(), 1);
        assert!(journal.prunable(2_000).is_empty());

        let mut inbound = entry(1, Direction::Inbound, "tool", b"payload");
        inbound.retention = RetentionPolicy::PruneOnDelivery;
        journal.apply_append(inbound);
        assert!(journal.undelivered().is_empty());
        assert!(journal.prunable(2_000).contains(&0));
    }

    #[test]
    fn broadcast_group_consumes_only_when_every_sibling_delivers() {
        let mut journal = Journal::new();
        let sibling = |id: u64, target: &str, payload: &[u8]| {
            let mut e = entry(id, Direction::Outbound, "agent", payload);
            e.counterpart = Some(target.into());
            e.broadcast_group = Some("fanout-1".into());
            e.retention = RetentionPolicy::PruneOnDelivery;
            e
        };
        journal.apply_append(sibling(0, "file-read", b"read"));
        journal.apply_append(sibling(1, "file-write", b"write"));

        // Only one target answers: neither sibling is prunable.
        let mut inbound = entry(2, Direction::Inbound, "file-read", b"read");
        inbound.retention = RetentionPolicy::PruneOnDelivery;
        journal.apply_append(inbound);
        assert!(!journal.prunable(u64::MAX).contains(&0));
        assert!(!journal.prunable(u64::MAX).contains(&1));
        assert_eq!(journal.undelivered().len(), 2);

        // The second target answers: the whole group becomes prunable.
        let mut inbound = entry(3, Direction::Inbound, "file-write", b"write");
        inbound.retention = RetentionPolicy::PruneOnDelivery;
        journal.apply_append(inbound);
        let prunable = journal.prunable(u64::MAX);
        assert!(prunable.contains(&0));
        assert!(prunable.contains(&1));
        assert!(journal.undelivered().is_empty());
    }

    #[test]
    fn consumption_requires_the_counterpart_handler() {
        let mut journal = Journal::new();
        let mut out = entry(0, Direction::Outbound, "producer", b"payload");
        out.counterpart = Some("tool".into());
        journal.apply_append(out);
        // Same hash, wrong handler: not consumed.
        journal.apply_append(entry(1, Direction::Inbound, "other", b"payload"));
        assert_eq!(journal.undelivered().len(), 1);
    }

    #[test]
    fn retain_days_prunes_by_age() {
        let mut journal = Journal::new();
        let mut old = entry(0, Direction::Inbound, "a", b"x");
        old.retention = RetentionPolicy::RetainDays(1);
        old.timestamp = 0;
        journal.apply_append(old);

        let day_millis = 24 * 60 * 60 * 1000;
        assert!(journal.prunable(day_millis).is_empty());
        assert_eq!(journal.prunable(day_millis + 1), vec![0]);
    }

    #[test]
    fn retain_forever_never_prunes() {
        let mut journal = Journal::new();
        journal.apply_append(entry(0, Direction::Inbound, "a", b"x"));
        assert!(journal.prunable(u64::MAX).is_empty());
    }

    #[test]
    fn reindex_restores_lookup() {
        let mut journal = Journal::new();
        journal.apply_append(entry(0, Direction::Inbound, "a", b"x"));
        journal.apply_append(entry(1, Direction::Inbound, "b", b"y"));

        let bytes = weft_cbor::to_canonical_cbor(&journal).unwrap();
        let mut restored: Journal = serde_cbor::from_slice(&bytes).unwrap();
        assert!(restored.get(1).is_none());
        restored.reindex();
        assert_eq!(restored.get(1).unwrap().handler, "b");
    }
}
