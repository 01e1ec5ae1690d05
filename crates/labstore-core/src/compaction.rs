//! Checkpoint: collapse the WAL into a single snapshot of the live tree
//!
//! Every committed transaction stays in the log until a checkpoint rewrites
//! the tree as one batch that opens with a `Checkpoint` record (replay
//! resets the tree there) and then recreates every bucket and field.
//!
//! The new log file is installed with the atomic rename pattern:
//! 1. Write the snapshot batch to `wal-{seq}.labs.compact`
//! 2. durable_sync the temp file
//! 3. Rename it to `wal-{seq}.labs`, one above every existing WAL file
//! 4. sync the WAL directory
//! 5. Point the writer at the new file and delete the older ones
//!
//! If the process crashes at any point:
//! - Before rename: the old files are intact, the temp file is ignored
//! - After rename: replay reaches the snapshot last, and its `Checkpoint`
//!   record discards whatever the older files rebuilt

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::bucket::Node;
use crate::error::{LabError, LabResult};
use crate::format::WalRecord;
use crate::platform_durability::{durable_sync, sync_dir};
use crate::wal::{encode_batch, list_wal_files, wal_file_name, WalWriter};

/// Result of a checkpoint.
#[derive(Debug)]
pub struct CheckpointResult {
    /// WAL file now holding the snapshot
    pub file_path: PathBuf,
    /// Records in the snapshot batch, checkpoint marker included
    pub records_written: usize,
    /// Number of older WAL files deleted
    pub removed_files: usize,
    /// Combined size of the WAL files before the checkpoint
    pub original_bytes: u64,
    /// Size of the snapshot batch
    pub compacted_bytes: u64,
}

impl CheckpointResult {
    /// Space saved in bytes.
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Records that rebuild `root` from nothing, parents before children.
pub(crate) fn snapshot_records(root: &Node) -> Vec<WalRecord> {
    let mut records = vec![WalRecord::checkpoint()];
    let mut path = Vec::new();
    push_node(root, &mut path, &mut records);
    records
}

fn push_node(node: &Node, path: &mut Vec<Vec<u8>>, records: &mut Vec<WalRecord>) {
    for (key, value) in &node.fields {
        records.push(WalRecord::put(path.clone(), key, value));
    }
    for (key, child) in &node.children {
        records.push(WalRecord::create_bucket(path.clone(), key));
        path.push(key.clone());
        push_node(child, path, records);
        path.pop();
    }
}

fn file_len(path: &Path) -> LabResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| LabError::io_at(path, &e, "Failed to stat WAL file"))
}

/// Write `root` as a snapshot batch committed under `txid`, switch `wal` to
/// it and delete the WAL files it supersedes.
pub(crate) fn write_checkpoint(
    wal: &mut WalWriter,
    root: &Node,
    txid: u64,
) -> LabResult<CheckpointResult> {
    let wal_dir = wal.wal_dir().to_path_buf();
    let existing = list_wal_files(&wal_dir)?;
    let mut original_bytes = 0;
    for (_, path) in &existing {
        original_bytes += file_len(path)?;
    }

    let records = snapshot_records(root);
    let bytes = encode_batch(&records, txid)?;

    let sequence = existing.last().map_or(0, |(seq, _)| *seq).max(wal.sequence()) + 1;
    let file_path = wal_dir.join(wal_file_name(sequence));
    let compact_path = file_path.with_extension("labs.compact");

    {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&compact_path)
            .map_err(|e| LabError::io_at(&compact_path, &e, "Failed to create checkpoint file"))?;
        file.write_all(&bytes)
            .map_err(|e| LabError::io_at(&compact_path, &e, "Failed to write checkpoint"))?;
        durable_sync(&file)
            .map_err(|e| LabError::io_at(&compact_path, &e, "Failed to sync checkpoint file"))?;
    }

    fs::rename(&compact_path, &file_path)
        .map_err(|e| LabError::io_at(&file_path, &e, "Failed to rename checkpoint file"))?;
    sync_dir(&wal_dir).map_err(|e| LabError::io_at(&wal_dir, &e, "Failed to sync WAL directory"))?;

    wal.reopen_at(sequence)?;

    let mut removed_files = 0;
    for (seq, path) in existing {
        if seq >= sequence {
            continue;
        }
        fs::remove_file(&path)
            .map_err(|e| LabError::io_at(&path, &e, "Failed to remove WAL file"))?;
        removed_files += 1;
    }
    sync_dir(&wal_dir).map_err(|e| LabError::io_at(&wal_dir, &e, "Failed to sync WAL directory"))?;

    Ok(CheckpointResult {
        file_path,
        records_written: records.len(),
        removed_files,
        original_bytes,
        compacted_bytes: bytes.len() as u64,
    })
}
