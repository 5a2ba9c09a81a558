//! Write-ahead log — append-only, CRC-checked, lsn-stamped.
//!
//! On-disk record format:
//! ```text
//! [length: u32][crc32: u32][lsn: u64][op: canonical CBOR]
//! ```
//! `length` covers the lsn and the op bytes; the CRC covers the same span.
//!
//! Replay applies records in lsn order. A record that is cut short at the
//! end of the file is a crash artifact: it is discarded and the file is
//! truncated back to the last good offset. A checksum failure anywhere
//! before the tail is corruption and the kernel refuses to start.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use weft_cbor::to_canonical_cbor;

use crate::error::{KernelError, KernelResult};
use crate::journal::JournalEntry;
use crate::segments::{SegmentId, SegmentMeta};
use crate::threads::ThreadId;

/// Log sequence number. Monotonic, assigned by the single writer.
pub type Lsn = u64;

/// One logical mutation. Every change to the thread table, context store
/// or journal is expressed as exactly one of these, written to the WAL
/// before the in-memory structures reflect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOp {
    ThreadSpawn(ThreadSpawnRecord),
    ThreadReturn(ThreadTerminalRecord),
    ThreadFail(ThreadFailRecord),
    ThreadIteration(ThreadIterationRecord),
    ThreadReap(ThreadReapRecord),
    SegmentAppend(SegmentAppendRecord),
    SegmentFold(SegmentFoldRecord),
    SegmentUnfold(SegmentStatusRecord),
    SegmentEvict(SegmentStatusRecord),
    SegmentRelevance(SegmentRelevanceRecord),
    JournalAppend(JournalAppendRecord),
    JournalPrune(JournalPruneRecord),
    /// Cross-store mutations that must land together. A batch is one WAL
    /// record, so recovery sees either all of its ops or none.
    Batch(BatchRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub ops: Vec<WalOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSpawnRecord {
    pub id: ThreadId,
    pub parent: Option<ThreadId>,
    pub profile: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadTerminalRecord {
    pub id: ThreadId,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadFailRecord {
    pub id: ThreadId,
    pub reason: String,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadIterationRecord {
    pub id: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadReapRecord {
    pub id: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAppendRecord {
    pub meta: SegmentMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFoldRecord {
    pub id: SegmentId,
    #[serde(with = "serde_bytes")]
    pub summary: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatusRecord {
    pub id: SegmentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRelevanceRecord {
    pub id: SegmentId,
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalAppendRecord {
    pub entry: JournalEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalPruneRecord {
    pub ids: Vec<u64>,
}

/// Append-only write-ahead log.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    next_lsn: Lsn,
}

const HEADER_LEN: usize = 8; // length + crc
const LSN_LEN: usize = 8;

impl Wal {
    /// Open the WAL, replaying existing records to establish the next lsn.
    /// Returns the log handle plus every surviving record in lsn order.
    pub fn open(path: &Path) -> KernelResult<(Self, Vec<(Lsn, WalOp)>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let records = if path.exists() {
            replay_and_trim(path)?
        } else {
            File::create(path)?;
            Vec::new()
        };
        let next_lsn = records.last().map(|(lsn, _)| lsn + 1).unwrap_or(0);
        let file = OpenOptions::new().append(true).open(path)?;
        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                next_lsn,
            },
            records,
        ))
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    /// Raise the next lsn to at least `floor`. Called after a snapshot
    /// load so lsn assignment stays monotonic across checkpoints.
    pub fn ensure_lsn_at_least(&mut self, floor: Lsn) {
        if self.next_lsn < floor {
            self.next_lsn = floor;
        }
    }

    /// Append one op. The record is fsynced before this returns.
    pub fn append(&mut self, op: &WalOp) -> KernelResult<Lsn> {
        let lsn = self.next_lsn;
        let frame = encode_frame(lsn, op)?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Truncate after a checkpoint. The caller must have persisted a
    /// snapshot of the in-memory state first.
    pub fn truncate(&mut self) -> KernelResult<()> {
        self.file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file.sync_data()?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    pub fn size(&self) -> KernelResult<u64> {
        Ok(self.file.metadata()?.len())
    }
}

fn encode_frame(lsn: Lsn, op: &WalOp) -> KernelResult<Vec<u8>> {
    let body = to_canonical_cbor(op)?;
    let content_len = LSN_LEN + body.len();
    let mut frame = Vec::with_capacity(HEADER_LEN + content_len);
    frame.extend_from_slice(&(content_len as u32).to_le_bytes());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&body);
    frame.extend_from_slice(&hasher.finalize().to_le_bytes());

    frame.extend_from_slice(&lsn.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read every record, verifying checksums. A short read at the tail is a
/// crash artifact: the file is truncated to the last good offset. A bad
/// checksum followed by more data is corruption and recovery fails.
fn replay_and_trim(path: &Path) -> KernelResult<Vec<(Lsn, WalOp)>> {
    let file_len = std::fs::metadata(path)?.len();
    let mut file = File::open(path)?;
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let mut header = [0u8; HEADER_LEN];
        match read_exact_or_eof(&mut file, &mut header) {
            ReadOutcome::Done => break,
            ReadOutcome::Partial => {
                trim_tail(path, offset, file_len)?;
                break;
            }
            ReadOutcome::Full => {}
        }

        let content_len =
            u32::from_le_bytes(header[0..4].try_into().expect("4-byte slice")) as usize;
        let stored_crc = u32::from_le_bytes(header[4..8].try_into().expect("4-byte slice"));
        if content_len < LSN_LEN {
            return Err(KernelError::CorruptedWal {
                offset,
                reason: format!("record length {content_len} below minimum"),
            });
        }

        let record_end = offset + (HEADER_LEN + content_len) as u64;
        if record_end > file_len {
            // Length header points past the end of the file: torn final write.
            trim_tail(path, offset, file_len)?;
            break;
        }

        let mut content = vec![0u8; content_len];
        file.read_exact(&mut content)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&content);
        if hasher.finalize() != stored_crc {
            if record_end == file_len {
                // Damaged final record: treat like a torn write.
                log::warn!("discarding damaged trailing WAL record at offset {offset}");
                trim_tail(path, offset, file_len)?;
                break;
            }
            return Err(KernelError::CorruptedWal {
                offset,
                reason: "checksum mismatch".into(),
            });
        }

        let lsn = Lsn::from_le_bytes(content[0..LSN_LEN].try_into().expect("8-byte slice"));
        let op: WalOp =
            serde_cbor::from_slice(&content[LSN_LEN..]).map_err(|e| KernelError::CorruptedWal {
                offset,
                reason: format!("undecodable op: {e}"),
            })?;

        if let Some((last_lsn, _)) = records.last() {
            if lsn <= *last_lsn {
                return Err(KernelError::CorruptedWal {
                    offset,
                    reason: format!("lsn {lsn} not monotonic after {last_lsn}"),
                });
            }
        }

        records.push((lsn, op));
        offset = record_end;
    }

    Ok(records)
}

enum ReadOutcome {
    Full,
    Partial,
    Done,
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> ReadOutcome {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    ReadOutcome::Done
                } else {
                    ReadOutcome::Partial
                };
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return ReadOutcome::Partial,
        }
    }
    ReadOutcome::Full
}

fn trim_tail(path: &Path, good_offset: u64, file_len: u64) -> KernelResult<()> {
    if good_offset < file_len {
        log::warn!(
            "trimming {} bytes of torn WAL tail at offset {good_offset}",
            file_len - good_offset
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(good_offset)?;
        file.sync_data()?;
    }
    Ok(())
}
