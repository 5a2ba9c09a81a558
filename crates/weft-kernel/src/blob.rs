//! Durable full-content storage for context segments.
//!
//! Segment content is written before the segment's WAL record, so a crash
//! between the two leaves at worst an orphan blob that the next owner of
//! the id overwrites. Reads verify the content hash recorded in the
//! segment metadata.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::KernelResult;
use crate::segments::SegmentId;

/// Blob storage keyed by segment id.
pub trait BlobStore: Send {
    fn put(&self, id: SegmentId, bytes: &[u8]) -> KernelResult<()>;
    fn get(&self, id: SegmentId) -> KernelResult<Option<Vec<u8>>>;
    fn delete(&self, id: SegmentId) -> KernelResult<()>;
}

/// Filesystem-backed blob store, one write-once file per segment.
#[derive(Debug)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub fn open(dir: impl AsRef<Path>) -> KernelResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: SegmentId) -> PathBuf {
        self.dir.join(format!("seg-{id:016x}"))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, id: SegmentId, bytes: &[u8]) -> KernelResult<()> {
        // Overwrite semantics: a torn WAL tail can orphan a blob whose id
        // the kernel then reassigns, so the newest write must win.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path(id))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn get(&self, id: SegmentId) -> KernelResult<Option<Vec<u8>>> {
        match fs::read(self.path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, id: SegmentId) -> KernelResult<()> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory blob store for tests and ephemeral pipelines.
#[derive(Debug, Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<SegmentId, Vec<u8>>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemBlobStore {
    fn put(&self, id: SegmentId, bytes: &[u8]) -> KernelResult<()> {
        self.blobs
            .lock()
            .expect("blob lock poisoned")
            .insert(id, bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: SegmentId) -> KernelResult<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .expect("blob lock poisoned")
            .get(&id)
            .cloned())
    }

    fn delete(&self, id: SegmentId) -> KernelResult<()> {
        self.blobs.lock().expect("blob lock poisoned").remove(&id);
        Ok(())
    }
}
