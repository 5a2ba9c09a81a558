//! Checkpoint snapshots.
//!
//! A checkpoint serializes the whole in-memory kernel state as canonical
//! CBOR, CRC-framed, written to a temp file and renamed into place; only
//! then is the WAL truncated. Recovery loads the snapshot (if any) and
//! replays whatever the WAL still holds. Applying the log twice lands on
//! the same state, so a crash between snapshot and truncate is harmless.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use weft_cbor::to_canonical_cbor;

use crate::error::{KernelError, KernelResult};
use crate::journal::Journal;
use crate::segments::{ContextStore, SegmentId};
use crate::threads::ThreadTable;
use crate::wal::Lsn;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub at_lsn: Lsn,
    pub next_segment_id: SegmentId,
    pub next_journal_id: u64,
    pub threads: ThreadTable,
    pub contexts: ContextStore,
    pub journal: Journal,
}

pub fn save(path: &Path, snapshot: &KernelSnapshot) -> KernelResult<()> {
    let body = to_canonical_cbor(snapshot)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&crc.to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load(path: &Path) -> KernelResult<Option<KernelSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file = File::open(path)?;
    let mut crc_buf = [0u8; 4];
    file.read_exact(&mut crc_buf)
        .map_err(|e| KernelError::CheckpointInconsistent(format!("short header: {e}")))?;
    let stored_crc = u32::from_le_bytes(crc_buf);

    let mut body = Vec::new();
    file.read_to_end(&mut body)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    if hasher.finalize() != stored_crc {
        return Err(KernelError::CheckpointInconsistent(
            "checksum mismatch".into(),
        ));
    }

    let mut snapshot: KernelSnapshot = serde_cbor::from_slice(&body)
        .map_err(|e| KernelError::CheckpointInconsistent(format!("undecodable: {e}")))?;
    snapshot.journal.reindex();
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::ThreadId;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.bin");

        let mut snapshot = KernelSnapshot::default();
        snapshot.at_lsn = 9;
        snapshot.threads.apply_spawn(&ThreadId::root(), None, "root", 1);
        save(&path, &snapshot).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.at_lsn, 9);
        assert!(loaded.threads.contains(&ThreadId::root()));
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(&dir.path().join("snapshot.bin")).unwrap().is_none());
    }

    #[test]
    fn tampered_snapshot_refuses_to_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.bin");
        save(&path, &KernelSnapshot::default()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, KernelError::CheckpointInconsistent(_)));
    }
}
