//! Transactions: `ReadTx` (snapshot) and `WriteTx` (single writer).
//!
//! A read transaction pins the root published at the moment it began and
//! never sees later commits. A write transaction holds the writer lock for
//! its whole life, works on a private copy-on-write root, and records its
//! mutations as one WAL batch. Commit logs the batch, then publishes the
//! private root; abort (or drop) throws both away.

use std::sync::Arc;

use parking_lot::{MutexGuard, RwLock};

use crate::bucket::{Bucket, BucketMut, Limits, Node};
use crate::config::Durability;
use crate::cursor::Cursor;
use crate::error::LabResult;
use crate::format::WalRecord;
use crate::wal::WalWriter;

/// What readers see: the last committed tree and the id that produced it.
#[derive(Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) root: Arc<Node>,
    pub(crate) txid: u64,
}

// ---------------------------------------------------------------------------
// Read-only transaction
// ---------------------------------------------------------------------------

/// Read-only transaction over a consistent snapshot.
pub struct ReadTx {
    root: Arc<Node>,
    txid: u64,
}

impl ReadTx {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        Self {
            root: snapshot.root,
            txid: snapshot.txid,
        }
    }

    /// Root-level bucket `name`.
    pub fn bucket(&self, name: &[u8]) -> Option<Bucket<'_>> {
        Bucket::new(&self.root).bucket(name)
    }

    /// Cursor over root-level bucket names (values are always `None`).
    pub fn cursor(&self) -> Cursor<'_> {
        Bucket::new(&self.root).cursor()
    }

    /// Id of the last transaction committed before this snapshot was taken.
    pub fn txid(&self) -> u64 {
        self.txid
    }
}

impl std::fmt::Debug for ReadTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTx")
            .field("txid", &self.txid)
            .field("buckets", &self.root.children.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Read-write transaction
// ---------------------------------------------------------------------------

/// State guarded by the writer lock.
pub(crate) struct WriterState {
    pub(crate) wal: WalWriter,
    /// Id the next committed transaction will get
    pub(crate) next_txid: u64,
}

/// Read-write transaction. Holding one blocks every other writer, never a reader.
pub struct WriteTx<'db> {
    writer: MutexGuard<'db, WriterState>,
    published: &'db RwLock<Snapshot>,
    durability: Durability,
    limits: Limits,
    root: Node,
    log: Vec<WalRecord>,
}

impl<'db> WriteTx<'db> {
    pub(crate) fn new(
        writer: MutexGuard<'db, WriterState>,
        published: &'db RwLock<Snapshot>,
        durability: Durability,
        limits: Limits,
    ) -> Self {
        // Shallow copy: top-level maps are cloned, subtrees stay shared until touched.
        let root = Node::clone(&published.read().root);
        Self {
            writer,
            published,
            durability,
            limits,
            root,
            log: Vec::new(),
        }
    }

    fn root_mut(&mut self) -> BucketMut<'_> {
        BucketMut::root(&mut self.root, &mut self.log, self.limits)
    }

    /// Root-level bucket `name`, including this transaction's own changes.
    pub fn bucket(&self, name: &[u8]) -> Option<Bucket<'_>> {
        Bucket::new(&self.root).bucket(name)
    }

    /// Writable handle on root-level bucket `name`.
    pub fn bucket_mut(&mut self, name: &[u8]) -> Option<BucketMut<'_>> {
        self.root_mut().into_bucket_mut(name)
    }

    /// Create root-level bucket `name`; `BucketExists` if it is already there.
    pub fn create_bucket(&mut self, name: &[u8]) -> LabResult<BucketMut<'_>> {
        self.root_mut().into_create_bucket(name)
    }

    pub fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> LabResult<BucketMut<'_>> {
        self.root_mut().into_create_bucket_if_not_exists(name)
    }

    /// Remove root-level bucket `name` and everything under it.
    pub fn delete_bucket(&mut self, name: &[u8]) -> LabResult<()> {
        self.root_mut().delete_bucket(name)
    }

    /// Cursor over root-level bucket names.
    pub fn cursor(&self) -> Cursor<'_> {
        Bucket::new(&self.root).cursor()
    }

    /// Number of mutations recorded so far.
    pub fn pending_records(&self) -> usize {
        self.log.len()
    }

    /// Log the batch, then make it visible to new readers.
    ///
    /// If the WAL write fails nothing is published and the error is returned;
    /// the transaction is gone either way. A transaction with no mutations
    /// publishes nothing and consumes no id.
    pub fn commit(mut self) -> LabResult<()> {
        if self.log.is_empty() {
            return Ok(());
        }

        let txid = self.writer.next_txid;
        let sync = self.durability == Durability::Durable;
        self.writer.wal.append_batch(&self.log, txid, sync)?;
        self.writer.next_txid += 1;

        let records = self.log.len();
        *self.published.write() = Snapshot {
            root: Arc::new(std::mem::take(&mut self.root)),
            txid,
        };
        tracing::debug!(txid, records, "transaction committed");
        Ok(())
    }

    /// Discard every change made in this transaction.
    pub fn abort(self) {
        tracing::debug!(records = self.log.len(), "transaction aborted");
    }
}

impl std::fmt::Debug for WriteTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTx")
            .field("next_txid", &self.writer.next_txid)
            .field("pending_records", &self.log.len())
            .finish()
    }
}
