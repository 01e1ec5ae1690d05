//! LabStore Core: transactional hierarchical key-value store
//!
//! Data lives in nested *buckets*. A bucket holds byte-string fields and
//! further buckets, keyed by byte strings and iterated in byte order. The
//! whole tree sits in RAM; a write-ahead log makes it crash safe.
//!
//! # Architecture
//!
//! - **Read transactions**: pin an immutable snapshot, never block
//! - **Write transactions**: one at a time, copy-on-write, all-or-nothing
//! - **WAL**: one batch plus commit marker per transaction, replayed on open
//! - **Checkpoint**: rewrite the live tree as a single log file
//!
//! ```no_run
//! use labstore_core::{Config, Context, LabError, LabStore};
//!
//! let store = LabStore::open("/tmp/lab", Config::default())?;
//! let ctx = Context::background();
//! store.update(&ctx, |tx| {
//!     let mut peers = tx.create_bucket_if_not_exists(b"peers")?;
//!     peers.put(b"alpha", b"online")
//! })?;
//! let state = store.view(&ctx, |tx| {
//!     Ok::<_, LabError>(tx.bucket(b"peers").and_then(|b| b.get(b"alpha")).map(<[u8]>::to_vec))
//! })?;
//! assert_eq!(state.as_deref(), Some(&b"online"[..]));
//! # Ok::<(), LabError>(())
//! ```

pub mod bucket;
pub mod compaction;
pub mod config;
pub mod context;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod format;
pub mod platform_durability;
pub mod tx;
pub mod wal;

// Re-export key types for convenience
pub use bucket::{Bucket, BucketMut};
pub use compaction::CheckpointResult;
pub use config::{Config, Durability};
pub use context::Context;
pub use cursor::{Cursor, Entry};
pub use engine::LabStore;
pub use error::{LabError, LabResult};
pub use format::{Operation, WalRecord};
pub use tx::{ReadTx, WriteTx};
pub use wal::{CommittedBatch, Recovery, WalReader, WalTail, WalWriter};
