//! Crash-recovery and context-reversibility scenarios against the
//! filesystem-backed kernel.

use std::fs::OpenOptions;
use std::path::Path;

use tempfile::TempDir;
use weft_kernel::segments::{ContentType, SegmentStatus};
use weft_kernel::threads::{ThreadId, ThreadState};
use weft_kernel::{Kernel, KernelConfig};

fn open(dir: &Path) -> Kernel {
    Kernel::open(dir, KernelConfig::default()).unwrap()
}

#[test]
fn fold_evict_unfold_returns_original_bytes() {
    let dir = TempDir::new().unwrap();
    let mut kernel = open(dir.path());
    let root = kernel.init_root("coding").unwrap();

    // Ten segments with distinct contents.
    let contents: Vec<Vec<u8>> = (0..10)
        .map(|i| format!("segment body number {i}, long enough to matter").into_bytes())
        .collect();
    let ids: Vec<u64> = contents
        .iter()
        .map(|c| kernel.append_segment(&root, c, ContentType::Message).unwrap())
        .collect();

    // Fold the first five behind summaries, then evict the first three.
    for &id in &ids[..5] {
        kernel.fold_segment(id, b"tl;dr").unwrap();
    }
    for &id in &ids[..3] {
        kernel.evict_segment(id).unwrap();
    }

    // Unfold the second segment; its original content must come back
    // byte-for-byte.
    kernel.unfold_segment(ids[1]).unwrap();
    let view = kernel.get_view(&root).unwrap();
    let restored = view.iter().find(|v| v.id == ids[1]).unwrap();
    assert_eq!(restored.status, SegmentStatus::Expanded);
    assert_eq!(restored.body, contents[1]);

    // Evicted segments stay out of the live view; folded ones show their
    // summaries.
    assert!(!view.iter().any(|v| v.id == ids[0]));
    assert_eq!(
        view.iter().find(|v| v.id == ids[3]).unwrap().body,
        b"tl;dr"
    );
}

#[test]
fn reversibility_survives_restart() {
    let dir = TempDir::new().unwrap();
    let (root, id, original) = {
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        let original = b"pre-crash content".to_vec();
        let id = kernel
            .append_segment(&root, &original, ContentType::Code)
            .unwrap();
        kernel.fold_segment(id, b"short").unwrap();
        kernel.evict_segment(id).unwrap();
        (root, id, original)
    };

    let mut kernel = open(dir.path());
    kernel.unfold_segment(id).unwrap();
    let view = kernel.get_view(&root).unwrap();
    assert_eq!(view[0].body, original);
}

#[test]
fn torn_second_append_recovers_first() {
    let dir = TempDir::new().unwrap();
    let root = {
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        kernel
            .append_segment(&root, b"first append", ContentType::Message)
            .unwrap();
        kernel
            .append_segment(&root, b"second append", ContentType::Message)
            .unwrap();
        root
    };

    // Simulate the crash: the last WAL record loses its tail, as if the
    // process died between write and a completed flush of the second
    // append.
    let wal_path = dir.path().join("kernel.wal");
    let len = std::fs::metadata(&wal_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(len - 5).unwrap();

    let kernel = open(dir.path());
    assert_eq!(
        kernel.threads().get(&root).unwrap().state,
        ThreadState::Active
    );
    let view = kernel.get_view(&root).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].body, b"first append");
}

#[test]
fn replaying_the_wal_repeatedly_is_idempotent() {
    let dir = TempDir::new().unwrap();
    {
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        let id = kernel
            .append_segment(&root, b"stable content", ContentType::Message)
            .unwrap();
        kernel.fold_segment(id, b"s").unwrap();
        kernel.set_relevance(id, 0.9).unwrap();
        kernel.return_thread(&root).unwrap();
    }

    let fingerprint = |kernel: &Kernel| {
        let root = ThreadId::root();
        let threads: Vec<_> = kernel
            .threads()
            .iter()
            .map(|r| (r.id.clone(), r.state, r.iteration_count))
            .collect();
        let segments: Vec<_> = kernel
            .contexts()
            .segments_of(&root)
            .iter()
            .map(|m| (m.id, m.status, m.relevance.to_bits()))
            .collect();
        (threads, segments, kernel.journal().len())
    };

    // Three recoveries off the same log must agree exactly.
    let first = fingerprint(&open(dir.path()));
    let second = fingerprint(&open(dir.path()));
    let third = fingerprint(&open(dir.path()));
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn checkpoint_plus_wal_suffix_recovers() {
    let dir = TempDir::new().unwrap();
    {
        let mut kernel = open(dir.path());
        let root = kernel.init_root("coding").unwrap();
        kernel
            .append_segment(&root, b"snapshotted", ContentType::Message)
            .unwrap();
        kernel.checkpoint().unwrap();
        kernel
            .append_segment(&root, b"post-snapshot", ContentType::Message)
            .unwrap();
    }

    let kernel = open(dir.path());
    let view = kernel.get_view(&ThreadId::root()).unwrap();
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].body, b"snapshotted");
    assert_eq!(view[1].body, b"post-snapshot");
}
