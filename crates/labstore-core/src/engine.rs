//! Core storage engine for LabStore.
//!
//! LabStore keeps the whole bucket tree in RAM behind an `Arc` snapshot and
//! makes every committed transaction durable through the write-ahead log.
//!
//! **Read path**: clone the published root `Arc`; the snapshot never changes
//! **Write path**: writer lock, private copy-on-write root, WAL batch, publish
//! **Recovery**: replay committed WAL batches into an empty tree on open,
//! then cut the newest WAL file back to its last commit marker

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::bucket::{Limits, Node};
use crate::compaction::{write_checkpoint, CheckpointResult};
use crate::config::Config;
use crate::context::Context;
use crate::error::{LabError, LabResult};
use crate::tx::{ReadTx, Snapshot, WriteTx, WriterState};
use crate::wal::{WalReader, WalWriter};

/// Transactional hierarchical key-value store.
///
/// All public methods take `&self`; share it behind an `Arc`.
/// Any number of readers run concurrently with at most one writer.
pub struct LabStore {
    /// Last committed tree; readers clone the `Arc`
    published: RwLock<Snapshot>,
    /// WAL + txid counter; whoever holds this is the writer
    writer: Mutex<WriterState>,
    /// Data directory path
    path: PathBuf,
    /// Engine configuration
    config: Config,
}

impl LabStore {
    /// Open or create a LabStore at the given path.
    ///
    /// Creates the WAL directory and replays every committed transaction
    /// found there (crash recovery).
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> LabResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let wal_dir = path.join("wal");
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| LabError::io_at(&wal_dir, &e, "Failed to create WAL directory"))?;

        let mut root = Node::default();
        let mut last_txid = 0;
        let recovery = WalReader::new(&wal_dir).recover()?;
        let batches = &recovery.batches;
        for batch in batches {
            for record in &batch.records {
                root.apply(record).map_err(|e| LabError::WalCorrupted {
                    path: wal_dir.clone(),
                    offset: 0,
                    reason: format!("transaction {} does not replay: {e}", batch.txid),
                })?;
            }
            last_txid = last_txid.max(batch.txid);
        }

        if !batches.is_empty() {
            tracing::info!(
                transactions = batches.len(),
                last_txid,
                wal = %wal_dir.display(),
                "recovered LabStore from WAL"
            );
        }

        // The writer appends to the newest file; nothing uncommitted may precede it.
        if let Some(tail) = recovery.tail.as_ref().filter(|tail| !tail.is_clean()) {
            tail.truncate()?;
        }
        let wal = WalWriter::new(&wal_dir, config.wal_rotation_size_bytes)?;

        Ok(Self {
            published: RwLock::new(Snapshot {
                root: Arc::new(root),
                txid: last_txid,
            }),
            writer: Mutex::new(WriterState {
                wal,
                next_txid: last_txid + 1,
            }),
            path,
            config,
        })
    }

    /// Start a read transaction on the current snapshot.
    pub fn begin_read(&self) -> ReadTx {
        ReadTx::new(self.published.read().clone())
    }

    /// Start a write transaction, waiting for the current writer to finish.
    pub fn begin_write(&self) -> WriteTx<'_> {
        WriteTx::new(
            self.writer.lock(),
            &self.published,
            self.config.durability,
            Limits::from_config(&self.config),
        )
    }

    /// Run `f` in a read transaction. Checks `ctx` before starting.
    pub fn view<T, E, F>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        E: From<LabError>,
        F: FnOnce(&ReadTx) -> Result<T, E>,
    {
        ctx.check()?;
        let tx = self.begin_read();
        f(&tx)
    }

    /// Run `f` in a write transaction: commit when it returns `Ok`, abort
    /// when it returns `Err`. Checks `ctx` before starting.
    pub fn update<T, E, F>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        E: From<LabError>,
        F: FnOnce(&mut WriteTx<'_>) -> Result<T, E>,
    {
        ctx.check()?;
        let mut tx = self.begin_write();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.abort();
                Err(e)
            }
        }
    }

    /// Force committed-but-unsynced records (`Durability::Relaxed`) to media.
    pub fn sync(&self) -> LabResult<()> {
        self.writer.lock().wal.sync()
    }

    /// Rewrite the live tree as a single WAL file and drop the older ones.
    ///
    /// Runs as a writer: waits for the current write transaction and blocks
    /// new ones until done. Readers are not affected.
    pub fn checkpoint(&self) -> LabResult<CheckpointResult> {
        let mut writer = self.writer.lock();
        let root = Arc::clone(&self.published.read().root);
        let txid = writer.next_txid;
        let result = write_checkpoint(&mut writer.wal, &root, txid)?;
        writer.next_txid += 1;
        self.published.write().txid = txid;

        tracing::info!(
            file = %result.file_path.display(),
            records = result.records_written,
            removed_files = result.removed_files,
            bytes_saved = result.bytes_saved(),
            "checkpoint written"
        );
        Ok(result)
    }

    /// Id of the last committed transaction (0 for a fresh store).
    pub fn last_txid(&self) -> u64 {
        self.published.read().txid
    }

    /// Data directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for LabStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabStore")
            .field("path", &self.path)
            .field("last_txid", &self.last_txid())
            .finish()
    }
}
