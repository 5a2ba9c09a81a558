//! Durable kernel — the single writer behind threads, context and journal.
//!
//! Every mutation is packaged as a WAL record, fsynced, and only then
//! applied to the in-memory structures. Recovery replays the snapshot plus
//! the surviving WAL suffix through the same apply path, so applying the
//! log twice yields the same state. Reads never touch the WAL.

pub mod blob;
pub mod error;
pub mod journal;
pub mod segments;
pub mod snapshot;
pub mod threads;
pub mod wal;

use std::path::{Path, PathBuf};

use weft_cbor::Hash;
use weft_organism::{Organism, RetentionPolicy};

use blob::{BlobStore, FsBlobStore};
use error::{KernelError, KernelResult};
use journal::{Direction, Journal, JournalEntry, JournalFilter};
use segments::{ContentType, ContextStore, SegmentId, SegmentMeta, SegmentStatus, SegmentView};
use threads::{ThreadId, ThreadTable};
use wal::{
    BatchRecord, JournalAppendRecord, JournalPruneRecord, SegmentAppendRecord, SegmentFoldRecord,
    SegmentRelevanceRecord, SegmentStatusRecord, ThreadFailRecord, ThreadIterationRecord,
    ThreadReapRecord, ThreadSpawnRecord, ThreadTerminalRecord, Wal, WalOp,
};

pub use blob::MemBlobStore;
pub use error::KernelError as Error;
pub use journal::{Direction as JournalDirection, JournalFilter as Filter};
pub use segments::estimate_tokens;

const WAL_FILE: &str = "kernel.wal";
const SNAPSHOT_FILE: &str = "snapshot.bin";
const BLOB_DIR: &str = "blobs";

#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Live-view token limit per thread, reported by `budget`.
    pub token_budget: u64,
    /// Checkpoint after this many WAL records. Zero disables the cadence;
    /// `checkpoint()` stays available.
    pub checkpoint_every: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            token_budget: 32_000,
            checkpoint_every: 0,
        }
    }
}

/// Everything the engine journals about one message hop.
#[derive(Debug, Clone)]
pub struct JournalDraft {
    pub thread_id: ThreadId,
    pub direction: Direction,
    pub handler: String,
    pub counterpart: Option<String>,
    pub payload_tag: String,
    pub payload_hash: Hash,
    pub retention: RetentionPolicy,
    /// Shared key linking the sibling outputs of one Broadcast.
    pub broadcast_group: Option<String>,
    pub note: Option<String>,
}

pub struct Kernel {
    wal: Wal,
    threads: ThreadTable,
    contexts: ContextStore,
    journal: Journal,
    blobs: Box<dyn BlobStore>,
    config: KernelConfig,
    snapshot_path: PathBuf,
    next_segment_id: SegmentId,
    next_journal_id: u64,
    records_since_checkpoint: u64,
}

impl Kernel {
    /// Open or recover the kernel at `data_dir`.
    pub fn open(data_dir: &Path, config: KernelConfig) -> KernelResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let blobs = Box::new(FsBlobStore::open(data_dir.join(BLOB_DIR))?);
        Self::open_with_blobs(data_dir, config, blobs)
    }

    /// Open with a caller-supplied blob store (in-memory in tests).
    pub fn open_with_blobs(
        data_dir: &Path,
        config: KernelConfig,
        blobs: Box<dyn BlobStore>,
    ) -> KernelResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);

        let (threads, contexts, journal, next_segment_id, next_journal_id, at_lsn) =
            match snapshot::load(&snapshot_path)? {
                Some(snap) => (
                    snap.threads,
                    snap.contexts,
                    snap.journal,
                    snap.next_segment_id,
                    snap.next_journal_id,
                    snap.at_lsn,
                ),
                None => (
                    ThreadTable::new(),
                    ContextStore::new(),
                    Journal::new(),
                    0,
                    0,
                    0,
                ),
            };

        let (mut wal, records) = Wal::open(&data_dir.join(WAL_FILE))?;
        wal.ensure_lsn_at_least(at_lsn);
        let mut kernel = Self {
            wal,
            threads,
            contexts,
            journal,
            blobs,
            config,
            snapshot_path,
            next_segment_id,
            next_journal_id,
            records_since_checkpoint: 0,
        };
        for (_lsn, op) in &records {
            kernel.apply(op);
        }
        Ok(kernel)
    }

    // ── Read side ──

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scan_journal(
        &self,
        range: std::ops::Range<u64>,
        filter: &JournalFilter,
    ) -> Vec<&JournalEntry> {
        self.journal.scan(range, filter)
    }

    /// Live view of a thread's context, in append order. Expanded segments
    /// are read back from the blob store and hash-verified; a mismatch is
    /// a corruption event, not a recoverable error.
    pub fn get_view(&self, thread_id: &ThreadId) -> KernelResult<Vec<SegmentView>> {
        let mut views = Vec::new();
        for meta in self.contexts.segments_of(thread_id) {
            let body = match meta.status {
                SegmentStatus::Expanded => {
                    let bytes = self
                        .blobs
                        .get(meta.id)?
                        .ok_or(KernelError::BlobMissing(meta.id))?;
                    let actual = Hash::of_bytes(&bytes);
                    if actual != meta.content_hash {
                        return Err(KernelError::SegmentCorrupted {
                            segment: meta.id,
                            expected: meta.content_hash.to_hex(),
                            actual: actual.to_hex(),
                        });
                    }
                    bytes
                }
                SegmentStatus::Folded => meta.summary.clone().unwrap_or_default(),
                SegmentStatus::Evicted => continue,
            };
            views.push(SegmentView {
                id: meta.id,
                content_type: meta.content_type,
                status: meta.status,
                body,
            });
        }
        Ok(views)
    }

    /// `(current live tokens, configured limit)` for a thread.
    pub fn budget(&self, thread_id: &ThreadId) -> (u64, u64) {
        (self.contexts.live_tokens(thread_id), self.config.token_budget)
    }

    // ── Thread lifecycle ──

    /// Create the root thread if it does not exist yet.
    pub fn init_root(&mut self, profile: &str) -> KernelResult<ThreadId> {
        let root = ThreadId::root();
        if self.threads.contains(&root) {
            return Ok(root);
        }
        self.log_and_apply(WalOp::ThreadSpawn(ThreadSpawnRecord {
            id: root.clone(),
            parent: None,
            profile: profile.to_string(),
            created_at: now_millis(),
        }))?;
        Ok(root)
    }

    /// Spawn a child thread. The requested profile must be a subset of the
    /// parent's, checked against the organism's materialized dispatch
    /// tables before anything touches the WAL.
    pub fn spawn_thread(
        &mut self,
        parent: &ThreadId,
        component: &str,
        requested_profile: &str,
        organism: &Organism,
    ) -> KernelResult<ThreadId> {
        let parent_record = self
            .threads
            .get(parent)
            .ok_or_else(|| KernelError::UnknownThread(parent.clone()))?;
        if parent_record.state.is_terminal() {
            return Err(KernelError::ThreadTerminal(parent.clone()));
        }

        let parent_profile = organism
            .profile(&parent_record.profile)
            .ok_or_else(|| KernelError::UnknownProfile(parent_record.profile.clone()))?;
        let child_profile = organism
            .profile(requested_profile)
            .ok_or_else(|| KernelError::UnknownProfile(requested_profile.to_string()))?;
        if !child_profile
            .dispatch_table()
            .is_subset_of(parent_profile.dispatch_table())
        {
            return Err(KernelError::PrivilegeEscalation {
                requested: requested_profile.to_string(),
                parent: parent_record.profile.clone(),
            });
        }

        let id = self.threads.unique_child_id(parent, component)?;
        self.log_and_apply(WalOp::ThreadSpawn(ThreadSpawnRecord {
            id: id.clone(),
            parent: Some(parent.clone()),
            profile: requested_profile.to_string(),
            created_at: now_millis(),
        }))?;
        Ok(id)
    }

    /// Mark a thread Completed. Terminal threads absorb the call.
    pub fn return_thread(&mut self, id: &ThreadId) -> KernelResult<()> {
        let record = self
            .threads
            .get(id)
            .ok_or_else(|| KernelError::UnknownThread(id.clone()))?;
        if record.state.is_terminal() {
            return Ok(());
        }
        self.log_and_apply(WalOp::ThreadReturn(ThreadTerminalRecord {
            id: id.clone(),
            at: now_millis(),
        }))
    }

    /// Mark a thread Failed. Terminal threads absorb the call.
    pub fn fail_thread(&mut self, id: &ThreadId, reason: &str) -> KernelResult<()> {
        let record = self
            .threads
            .get(id)
            .ok_or_else(|| KernelError::UnknownThread(id.clone()))?;
        if record.state.is_terminal() {
            return Ok(());
        }
        self.log_and_apply(WalOp::ThreadFail(ThreadFailRecord {
            id: id.clone(),
            reason: reason.to_string(),
            at: now_millis(),
        }))
    }

    /// Durable iteration bump for agent threads. Returns the new count.
    pub fn bump_iteration(&mut self, id: &ThreadId) -> KernelResult<u32> {
        if !self.threads.contains(id) {
            return Err(KernelError::UnknownThread(id.clone()));
        }
        self.log_and_apply(WalOp::ThreadIteration(ThreadIterationRecord {
            id: id.clone(),
        }))?;
        Ok(self
            .threads
            .get(id)
            .map(|r| r.iteration_count)
            .unwrap_or_default())
    }

    /// Permanently reap a terminal thread: drops its record, its segment
    /// metadata and the segment blobs. The only operation that deletes
    /// segment content.
    pub fn reap_thread(&mut self, id: &ThreadId) -> KernelResult<()> {
        let record = self
            .threads
            .get(id)
            .ok_or_else(|| KernelError::UnknownThread(id.clone()))?;
        if !record.state.is_terminal() {
            return Err(KernelError::ThreadStillActive(id.clone()));
        }
        self.log_and_apply(WalOp::ThreadReap(ThreadReapRecord { id: id.clone() }))
    }

    // ── Context store ──

    /// Append a segment: content to the blob store first, then the WAL
    /// record, then the in-memory metadata. A crash in between leaves at
    /// worst an orphan blob.
    pub fn append_segment(
        &mut self,
        thread_id: &ThreadId,
        content: &[u8],
        content_type: ContentType,
    ) -> KernelResult<SegmentId> {
        let record = self
            .threads
            .get(thread_id)
            .ok_or_else(|| KernelError::UnknownThread(thread_id.clone()))?;
        if record.state.is_terminal() {
            return Err(KernelError::ThreadTerminal(thread_id.clone()));
        }

        let id = self.next_segment_id;
        self.blobs.put(id, content)?;
        let meta = SegmentMeta {
            id,
            thread_id: thread_id.clone(),
            content_type,
            status: SegmentStatus::Expanded,
            relevance: 0.5,
            byte_size: content.len() as u64,
            token_estimate: segments::estimate_tokens(content.len()),
            content_hash: Hash::of_bytes(content),
            created_at: now_millis(),
            summary: None,
        };
        self.log_and_apply(WalOp::SegmentAppend(SegmentAppendRecord { meta }))?;
        Ok(id)
    }

    /// Fold a segment behind a summary. A summary no smaller than the
    /// original is accepted but flagged in the journal; content quality
    /// is the curator's problem, not the store's.
    pub fn fold_segment(&mut self, id: SegmentId, summary: &[u8]) -> KernelResult<()> {
        let meta = self.contexts.expect(id)?;
        let oversized = summary.len() as u64 >= meta.byte_size;
        let fold = WalOp::SegmentFold(SegmentFoldRecord {
            id,
            summary: summary.to_vec(),
        });
        if oversized {
            let thread_id = meta.thread_id.clone();
            log::warn!("fold summary for segment {id} is not smaller than the original");
            let flag = WalOp::JournalAppend(JournalAppendRecord {
                entry: JournalEntry {
                    id: self.next_journal_id,
                    timestamp: now_millis(),
                    thread_id,
                    direction: Direction::Outbound,
                    handler: "context-store".into(),
                    counterpart: None,
                    payload_tag: "SegmentFoldOversized".into(),
                    payload_hash: Hash::of_bytes(summary),
                    retention: RetentionPolicy::RetainForever,
                    broadcast_group: None,
                    note: Some(format!("summary for segment {id} exceeds original size")),
                },
            });
            self.log_and_apply(WalOp::Batch(BatchRecord {
                ops: vec![fold, flag],
            }))
        } else {
            self.log_and_apply(fold)
        }
    }

    /// Restore a segment's full content to the live view. Also the path
    /// that un-evicts: eviction is reversible by a subsequent unfold.
    pub fn unfold_segment(&mut self, id: SegmentId) -> KernelResult<()> {
        self.contexts.expect(id)?;
        self.log_and_apply(WalOp::SegmentUnfold(SegmentStatusRecord { id }))
    }

    /// Remove a segment from the live view. Content stays on disk.
    pub fn evict_segment(&mut self, id: SegmentId) -> KernelResult<()> {
        self.contexts.expect(id)?;
        self.log_and_apply(WalOp::SegmentEvict(SegmentStatusRecord { id }))
    }

    pub fn set_relevance(&mut self, id: SegmentId, relevance: f32) -> KernelResult<()> {
        self.contexts.expect(id)?;
        self.log_and_apply(WalOp::SegmentRelevance(SegmentRelevanceRecord {
            id,
            relevance,
        }))
    }

    // ── Journal ──

    pub fn append_journal(&mut self, draft: JournalDraft) -> KernelResult<u64> {
        let id = self.next_journal_id;
        let entry = JournalEntry {
            id,
            timestamp: now_millis(),
            thread_id: draft.thread_id,
            direction: draft.direction,
            handler: draft.handler,
            counterpart: draft.counterpart,
            payload_tag: draft.payload_tag,
            payload_hash: draft.payload_hash,
            retention: draft.retention,
            broadcast_group: draft.broadcast_group,
            note: draft.note,
        };
        self.log_and_apply(WalOp::JournalAppend(JournalAppendRecord { entry }))?;
        Ok(id)
    }

    /// Apply retention policies. Returns the number of entries removed.
    pub fn sweep_journal(&mut self, now: u64) -> KernelResult<usize> {
        let ids = self.journal.prunable(now);
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();
        log::debug!("retention sweep pruning {count} journal entries");
        self.log_and_apply(WalOp::JournalPrune(JournalPruneRecord { ids }))?;
        Ok(count)
    }

    // ── Checkpointing ──

    /// Snapshot the in-memory state and truncate the WAL prefix.
    pub fn checkpoint(&mut self) -> KernelResult<()> {
        let snap = snapshot::KernelSnapshot {
            at_lsn: self.wal.next_lsn(),
            next_segment_id: self.next_segment_id,
            next_journal_id: self.next_journal_id,
            threads: std::mem::take(&mut self.threads),
            contexts: std::mem::take(&mut self.contexts),
            journal: std::mem::take(&mut self.journal),
        };
        let result = snapshot::save(&self.snapshot_path, &snap);
        // Put the state back regardless of how the save went.
        self.threads = snap.threads;
        self.contexts = snap.contexts;
        self.journal = snap.journal;
        self.journal.reindex();
        result?;
        self.wal.truncate()?;
        self.records_since_checkpoint = 0;
        Ok(())
    }

    // ── Internal ──

    fn log_and_apply(&mut self, op: WalOp) -> KernelResult<()> {
        self.wal.append(&op)?;
        self.apply(&op);
        self.records_since_checkpoint += 1;
        if self.config.checkpoint_every > 0
            && self.records_since_checkpoint >= self.config.checkpoint_every
        {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn apply(&mut self, op: &WalOp) {
        match op {
            WalOp::ThreadSpawn(r) => {
                self.threads
                    .apply_spawn(&r.id, r.parent.as_ref(), &r.profile, r.created_at);
            }
            WalOp::ThreadReturn(r) => self.threads.apply_return(&r.id, r.at),
            WalOp::ThreadFail(r) => self.threads.apply_fail(&r.id, &r.reason, r.at),
            WalOp::ThreadIteration(r) => self.threads.apply_iteration(&r.id),
            WalOp::ThreadReap(r) => {
                let released = self.contexts.apply_release_thread(&r.id);
                for segment in released {
                    if let Err(err) = self.blobs.delete(segment) {
                        log::warn!("failed to delete blob for segment {segment}: {err}");
                    }
                }
                self.threads.apply_reap(&r.id);
            }
            WalOp::SegmentAppend(r) => {
                self.next_segment_id = self.next_segment_id.max(r.meta.id + 1);
                self.contexts.apply_append(r.meta.clone());
            }
            WalOp::SegmentFold(r) => self.contexts.apply_fold(r.id, r.summary.clone()),
            WalOp::SegmentUnfold(r) => self.contexts.apply_unfold(r.id),
            WalOp::SegmentEvict(r) => self.contexts.apply_evict(r.id),
            WalOp::SegmentRelevance(r) => self.contexts.apply_relevance(r.id, r.relevance),
            WalOp::JournalAppend(r) => {
                self.next_journal_id = self.next_journal_id.max(r.entry.id + 1);
                self.journal.apply_append(r.entry.clone());
            }
            WalOp::JournalPrune(r) => self.journal.apply_prune(&r.ids),
            WalOp::Batch(batch) => {
                for inner in &batch.ops {
                    self.apply(inner);
                }
            }
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::ThreadState;
    use indexmap::IndexMap;
    use tempfile::TempDir;
    use weft_organism::{ListenerSpec, OrganismSpec, ProfileSpec};

    fn organism() -> Organism {
        let listener = |name: &str, tag: &str| ListenerSpec {
            name: name.into(),
            payload_tags: vec![tag.into()],
            description: name.into(),
            semantic_description: None,
            request_schema: None,
            response_schema: None,
            peers: vec![],
            spawn_tags: vec![],
            agent: None,
        };
        let profile = |name: &str, listeners: Vec<&str>| ProfileSpec {
            name: name.into(),
            listeners: listeners.into_iter().map(String::from).collect(),
            allow_all: false,
            network: vec![],
            journal: RetentionPolicy::RetainForever,
            identity: format!("weft-{name}"),
        };
        Organism::build(OrganismSpec {
            name: "kernel-test".into(),
            prompts: IndexMap::new(),
            listeners: vec![
                listener("file-read", "FileReadRequest"),
                listener("file-write", "FileWriteRequest"),
            ],
            profiles: vec![
                profile("coding", vec!["file-read", "file-write"]),
                profile("researcher", vec!["file-read"]),
                profile("rogue", vec!["file-write"]),
            ],
        })
        .unwrap()
    }

    fn open(dir: &Path) -> Kernel {
        Kernel::open(dir, KernelConfig::default()).unwrap()
    }

    #[test]
    fn spawn_requires_profile_subset() {
        let dir = TempDir::new().unwrap();
        let org = organism();
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();

        // Narrower profile: fine.
        let child = kernel
            .spawn_thread(&root, "reader", "researcher", &org)
            .unwrap();
        assert_eq!(kernel.threads().get(&child).unwrap().profile, "researcher");

        // Disjoint route set: escalation.
        let err = kernel
            .spawn_thread(&child, "writer", "rogue", &org)
            .unwrap_err();
        assert!(matches!(err, KernelError::PrivilegeEscalation { .. }));
    }

    #[test]
    fn spawn_unknown_profile_rejected() {
        let dir = TempDir::new().unwrap();
        let org = organism();
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        let err = kernel.spawn_thread(&root, "x", "ghost", &org).unwrap_err();
        assert!(matches!(err, KernelError::UnknownProfile(_)));
    }

    #[test]
    fn segment_lifecycle_preserves_content() {
        let dir = TempDir::new().unwrap();
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();

        let id = kernel
            .append_segment(&root, b"the original bytes", ContentType::Message)
            .unwrap();
        kernel.fold_segment(id, b"summary").unwrap();
        kernel.evict_segment(id).unwrap();

        // Evicted: not in the live view.
        assert!(kernel.get_view(&root).unwrap().is_empty());

        // Unfold restores the original byte-for-byte.
        kernel.unfold_segment(id).unwrap();
        let view = kernel.get_view(&root).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].body, b"the original bytes");
    }

    #[test]
    fn oversized_fold_summary_is_flagged_in_journal() {
        let dir = TempDir::new().unwrap();
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();

        let id = kernel
            .append_segment(&root, b"tiny", ContentType::Message)
            .unwrap();
        kernel
            .fold_segment(id, b"a summary longer than the original")
            .unwrap();

        // The fold is applied anyway.
        assert_eq!(
            kernel.contexts().get(id).unwrap().status,
            SegmentStatus::Folded
        );
        let flags = kernel.scan_journal(
            0..u64::MAX,
            &JournalFilter {
                payload_tag: Some("SegmentFoldOversized".into()),
                ..Default::default()
            },
        );
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn recovery_replays_wal() {
        let dir = TempDir::new().unwrap();
        let (root, segment) = {
            let mut kernel = open(dir.path());
            let root = kernel.init_root("coding").unwrap();
            let segment = kernel
                .append_segment(&root, b"durable", ContentType::Code)
                .unwrap();
            (root, segment)
        };

        let kernel = open(dir.path());
        assert!(kernel.threads().contains(&root));
        let view = kernel.get_view(&root).unwrap();
        assert_eq!(view[0].id, segment);
        assert_eq!(view[0].body, b"durable");
    }

    #[test]
    fn checkpoint_then_recover_matches_wal_only_recovery() {
        let dir = TempDir::new().unwrap();
        {
            let mut kernel = open(dir.path());
            let root = kernel.init_root("coding").unwrap();
            kernel
                .append_segment(&root, b"before checkpoint", ContentType::Message)
                .unwrap();
            kernel.checkpoint().unwrap();
            kernel
                .append_segment(&root, b"after checkpoint", ContentType::Message)
                .unwrap();
        }

        let kernel = open(dir.path());
        let view = kernel.get_view(&ThreadId::root()).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].body, b"before checkpoint");
        assert_eq!(view[1].body, b"after checkpoint");

        // Opening again (replaying an already-applied log) changes nothing.
        drop(kernel);
        let kernel = open(dir.path());
        assert_eq!(kernel.get_view(&ThreadId::root()).unwrap().len(), 2);
    }

    #[test]
    fn terminal_threads_absorb_transitions() {
        let dir = TempDir::new().unwrap();
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        kernel.return_thread(&root).unwrap();
        kernel.fail_thread(&root, "too late").unwrap();
        assert_eq!(
            kernel.threads().get(&root).unwrap().state,
            ThreadState::Completed
        );
    }

    #[test]
    fn reap_requires_terminal_state() {
        let dir = TempDir::new().unwrap();
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        assert!(kernel.reap_thread(&root).is_err());

        kernel
            .append_segment(&root, b"will be reaped", ContentType::Other)
            .unwrap();
        kernel.return_thread(&root).unwrap();
        kernel.reap_thread(&root).unwrap();
        assert!(kernel.threads().is_empty());
        assert!(kernel.contexts().is_empty());
    }

    #[test]
    fn journal_ids_are_monotonic_across_restart() {
        let dir = TempDir::new().unwrap();
        let draft = |thread: &ThreadId| JournalDraft {
            thread_id: thread.clone(),
            direction: Direction::Inbound,
            handler: "echo".into(),
            counterpart: None,
            payload_tag: "Demo".into(),
            payload_hash: Hash::of_bytes(b"x"),
            retention: RetentionPolicy::RetainForever,
            broadcast_group: None,
            note: None,
        };
        {
            let mut kernel = open(dir.path());
            let root = kernel.init_root("coding").unwrap();
            assert_eq!(kernel.append_journal(draft(&root)).unwrap(), 0);
            assert_eq!(kernel.append_journal(draft(&root)).unwrap(), 1);
        }
        let mut kernel = open(dir.path());
        let root = ThreadId::root();
        assert_eq!(kernel.append_journal(draft(&root)).unwrap(), 2);
    }

    #[test]
    fn checkpoint_cadence_truncates_wal() {
        let dir = TempDir::new().unwrap();
        let config = KernelConfig {
            checkpoint_every: 2,
            ..Default::default()
        };
        let mut kernel = Kernel::open(dir.path(), config).unwrap();
        let root = kernel.init_root("coding").unwrap();
        kernel
            .append_segment(&root, b"one", ContentType::Message)
            .unwrap();
        // Two records hit the cadence; state must survive the truncation.
        drop(kernel);
        let kernel = Kernel::open(dir.path(), config).unwrap();
        assert!(kernel.threads().contains(&root));
        assert_eq!(kernel.get_view(&root).unwrap().len(), 1);
    }
}
