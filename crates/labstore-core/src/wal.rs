//! Write-Ahead Log implementation for LabStore
//!
//! A write transaction reaches the log as one batch: its mutation records
//! followed by a `Commit` marker, written with a single `write_all`. The
//! ordering contract:
//! 1. Serialize every record of the batch into one buffer
//! 2. Append the buffer to the WAL file
//! 3. `durable_sync()` when the store runs with `Durability::Durable`
//! 4. Return success (the caller publishes the new tree AFTER this returns)
//!
//! Recovery hands back only batches closed by a `Commit` marker, so a crash
//! in the middle of step 2 loses the whole transaction and nothing else.
//! Whatever follows the last commit marker of the newest file is cut off
//! before the writer appends again; a failed append is rolled back the same
//! way.

use crate::error::{LabError, LabResult};
use crate::format::{
    deserialize_record, serialize_record, Operation, WalRecord, HEADER_SIZE, MAGIC_ARRAY,
};
use crate::platform_durability::durable_sync;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const WAL_PREFIX: &str = "wal-";
const WAL_SUFFIX: &str = ".labs";

/// File name for a WAL sequence number.
pub(crate) fn wal_file_name(sequence: u64) -> String {
    format!("{WAL_PREFIX}{sequence:016x}{WAL_SUFFIX}")
}

/// Parse a WAL file name back into its sequence number.
pub(crate) fn parse_wal_file_name(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(WAL_PREFIX)?.strip_suffix(WAL_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// All WAL files in `wal_dir`, sorted by sequence number.
pub(crate) fn list_wal_files(wal_dir: &Path) -> LabResult<Vec<(u64, PathBuf)>> {
    let entries = std::fs::read_dir(wal_dir)
        .map_err(|e| LabError::io_at(wal_dir, &e, "Failed to read WAL directory"))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| LabError::io_at(wal_dir, &e, "Failed to read directory entry"))?;
        let path = entry.path();
        if let Some(seq) = path.file_name().and_then(|n| n.to_str()).and_then(parse_wal_file_name) {
            files.push((seq, path));
        }
    }
    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

/// Serialize a batch of mutations plus its commit marker into one buffer.
pub(crate) fn encode_batch(records: &[WalRecord], txid: u64) -> LabResult<Vec<u8>> {
    let mut buffer = Vec::new();
    for record in records {
        buffer.extend_from_slice(&serialize_record(record)?);
    }
    buffer.extend_from_slice(&serialize_record(&WalRecord::commit(txid))?);
    Ok(buffer)
}

/// WAL writer: appends committed batches, rotating files by size.
///
/// The engine owns it behind a Mutex; holding that Mutex is what makes a
/// transaction the single writer.
pub struct WalWriter {
    /// Current WAL file handle
    file: File,
    /// Path to current WAL file (for error context)
    path: PathBuf,
    /// Current file size in bytes (tracked to avoid stat calls)
    size: u64,
    /// WAL directory for file rotation
    wal_dir: PathBuf,
    /// Monotonic sequence number for WAL file naming
    sequence: u64,
    /// Rotate once the current file would grow past this
    rotation_size: u64,
    /// Bytes past `size` may be on disk from a failed append
    dirty: bool,
}

impl WalWriter {
    /// Create a WAL writer in `wal_dir`, resuming the highest-numbered file.
    pub fn new<P: AsRef<Path>>(wal_dir: P, rotation_size: u64) -> LabResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| LabError::io_at(&wal_dir, &e, "Failed to create WAL directory"))?;

        let sequence = list_wal_files(&wal_dir)?.last().map_or(0, |(seq, _)| *seq);
        Self::open_sequence(wal_dir, sequence, rotation_size)
    }

    fn open_sequence(wal_dir: PathBuf, sequence: u64, rotation_size: u64) -> LabResult<Self> {
        let path = wal_dir.join(wal_file_name(sequence));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LabError::io_at(&path, &e, "Failed to open WAL file"))?;
        let size = file
            .metadata()
            .map_err(|e| LabError::io_at(&path, &e, "Failed to stat WAL file"))?
            .len();

        Ok(Self {
            file,
            path,
            size,
            wal_dir,
            sequence,
            rotation_size,
            dirty: false,
        })
    }

    /// Append one transaction: `records` then a commit marker for `txid`.
    ///
    /// With `sync` the call returns only after `durable_sync` succeeded. A
    /// batch is never split across files. On failure the file is cut back
    /// to its previous length, so a rejected batch never reaches recovery.
    pub fn append_batch(&mut self, records: &[WalRecord], txid: u64, sync: bool) -> LabResult<()> {
        let bytes = encode_batch(records, txid)?;
        self.restore_tail()?;

        if self.size > 0 && self.size + bytes.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        let written = self
            .file
            .write_all(&bytes)
            .map_err(|e| LabError::io_at(&self.path, &e, "WAL write failed"));
        let result = match written {
            Ok(()) if sync => self.sync(),
            other => other,
        };

        match result {
            Ok(()) => {
                self.size += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                if let Err(rollback) = self.restore_tail() {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %rollback,
                        "WAL rollback failed, retrying before the next append"
                    );
                }
                Err(e)
            }
        }
    }

    /// Drop bytes a failed append left past the last good batch.
    fn restore_tail(&mut self) -> LabResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.file
            .set_len(self.size)
            .map_err(|e| LabError::io_at(&self.path, &e, "Failed to roll back WAL append"))?;
        self.dirty = false;
        Ok(())
    }

    /// Rotate to a new WAL file. Syncs current file before switching.
    fn rotate(&mut self) -> LabResult<()> {
        self.sync()?;
        let next =
            Self::open_sequence(self.wal_dir.clone(), self.sequence + 1, self.rotation_size)?;
        tracing::debug!(from = %self.path.display(), to = %next.path.display(), "rotating WAL");
        *self = next;
        Ok(())
    }

    /// Switch to an already-written file with a higher sequence number.
    /// Used after a checkpoint has renamed its snapshot into place.
    pub(crate) fn reopen_at(&mut self, sequence: u64) -> LabResult<()> {
        *self = Self::open_sequence(self.wal_dir.clone(), sequence, self.rotation_size)?;
        Ok(())
    }

    /// Sync the current WAL file to persistent storage.
    pub fn sync(&self) -> LabResult<()> {
        durable_sync(&self.file).map_err(|e| LabError::io_at(&self.path, &e, "WAL sync failed"))
    }

    /// Get the current WAL file path (for diagnostics)
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Get the current WAL file size in bytes
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Sequence number of the file being appended to.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }
}

/// A transaction recovered from the log.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    pub txid: u64,
    pub records: Vec<WalRecord>,
}

/// Where the committed part of the newest WAL file ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalTail {
    pub path: PathBuf,
    /// Offset just past the last commit marker (0 if there is none)
    pub committed_len: u64,
    pub file_len: u64,
}

impl WalTail {
    /// Nothing follows the last commit marker.
    pub fn is_clean(&self) -> bool {
        self.committed_len == self.file_len
    }

    /// Cut the file back to its committed length and make that durable.
    ///
    /// Must run before a writer appends to the file: records left behind by
    /// a crashed transaction would otherwise be replayed as part of the
    /// next committed batch.
    pub fn truncate(&self) -> LabResult<()> {
        let file = OpenOptions::new().write(true).open(&self.path).map_err(|e| {
            LabError::io_at(&self.path, &e, "Failed to open WAL file for truncation")
        })?;
        file.set_len(self.committed_len)
            .map_err(|e| LabError::io_at(&self.path, &e, "Failed to truncate WAL file"))?;
        durable_sync(&file).map_err(|e| LabError::io_at(&self.path, &e, "WAL sync failed"))?;

        tracing::warn!(
            path = %self.path.display(),
            committed_len = self.committed_len,
            discarded = self.file_len - self.committed_len,
            "truncated uncommitted WAL tail"
        );
        Ok(())
    }
}

/// Everything recovery learned from the WAL directory.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// Committed transactions in log order
    pub batches: Vec<CommittedBatch>,
    /// State of the newest file; `None` when there are no WAL files
    pub tail: Option<WalTail>,
}

/// WAL reader: replays committed batches from every WAL file.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(wal_dir: P) -> Self {
        Self {
            wal_dir: wal_dir.as_ref().to_path_buf(),
        }
    }

    /// Recover all committed batches in log order.
    pub fn recover_batches(&self) -> LabResult<Vec<CommittedBatch>> {
        Ok(self.recover()?.batches)
    }

    /// Recover all committed batches plus the committed length of the
    /// newest file.
    ///
    /// Per file:
    /// 1. Read the 32-byte header and check the magic bytes
    /// 2. Check the payload length against the remaining file size
    /// 3. Verify CRC32C and decode the record
    /// 4. On bad magic or CRC: resync to the next magic and drop the batch
    ///    the damaged record belonged to
    /// 5. On a length that runs past the end: resync if another record
    ///    follows, otherwise it is a torn tail and the open batch is dropped
    pub fn recover(&self) -> LabResult<Recovery> {
        let mut recovery = Recovery::default();
        for (_, path) in list_wal_files(&self.wal_dir)? {
            let tail = self.recover_from_file(&path, &mut recovery.batches)?;
            recovery.tail = Some(tail);
        }
        Ok(recovery)
    }

    fn recover_from_file(
        &self,
        path: &Path,
        batches: &mut Vec<CommittedBatch>,
    ) -> LabResult<WalTail> {
        let mut file = File::open(path)
            .map_err(|e| LabError::io_at(path, &e, "Failed to open WAL file for recovery"))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|e| LabError::io_at(path, &e, "Failed to read WAL file"))?;

        let mut pending: Vec<WalRecord> = Vec::new();
        // Set after a damaged record; the batch it belonged to is dropped at its commit.
        let mut poisoned = false;
        let mut offset = 0;
        let mut committed_len = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            if buffer[offset..offset + 4] != MAGIC_ARRAY {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    "bad magic in WAL, scanning for next record"
                );
                poisoned = true;
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            let length = u32::from_le_bytes([
                buffer[offset + 4],
                buffer[offset + 5],
                buffer[offset + 6],
                buffer[offset + 7],
            ]) as usize;
            let total = HEADER_SIZE + length;

            if offset + total > buffer.len() {
                if let Some(next) = find_next_magic(&buffer, offset + 1) {
                    // A damaged length field, not the end of the log.
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        "WAL record length overruns a later record"
                    );
                    poisoned = true;
                    offset = next;
                    continue;
                }
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    needed = total,
                    available = buffer.len() - offset,
                    "torn write at WAL tail"
                );
                break;
            }

            match deserialize_record(&buffer[offset..offset + total]) {
                Ok(record) if record.operation == Operation::Commit => {
                    let records = std::mem::take(&mut pending);
                    if poisoned {
                        tracing::warn!(
                            path = %path.display(),
                            txid = ?record.txid(),
                            "dropping damaged transaction"
                        );
                        poisoned = false;
                    } else {
                        let txid = record.txid().unwrap_or(0);
                        batches.push(CommittedBatch { txid, records });
                    }
                    offset += total;
                    committed_len = offset;
                }
                Ok(record) => {
                    pending.push(record);
                    offset += total;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "corrupt WAL record"
                    );
                    poisoned = true;
                    match find_next_magic(&buffer, offset + 1) {
                        Some(next) => {
                            offset = next;
                            continue;
                        }
                        None => break,
                    }
                }
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                path = %path.display(),
                records = pending.len(),
                "discarding uncommitted WAL tail"
            );
        }
        Ok(WalTail {
            path: path.to_path_buf(),
            committed_len: committed_len as u64,
            file_len: buffer.len() as u64,
        })
    }
}

/// Scan forward for the next occurrence of the magic bytes.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    (start..buffer.len().saturating_sub(3)).find(|&i| buffer[i..i + 4] == MAGIC_ARRAY)
}
