//! Configuration management for LabStore
//!
//! Provides durability presets and the size limits enforced on every
//! bucket key and field value.

use crate::error::{LabError, LabResult};

/// Upper bound accepted for `max_key_size`.
const KEY_SIZE_CEILING: usize = 32 * 1024;

/// Upper bound accepted for `max_value_size`.
const VALUE_SIZE_CEILING: usize = 128 * 1024 * 1024;

/// When a committed transaction is forced to persistent media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// `durable_sync` after every commit. A commit that returned Ok survives power loss.
    Durable,
    /// Commit records are written to the OS page cache only. Survives a process
    /// crash, not a power cut. Call `LabStore::sync` to flush explicitly.
    Relaxed,
}

/// LabStore configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WAL file rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Maximum bucket or field key size in bytes
    pub max_key_size: usize,
    /// Maximum field value size in bytes
    pub max_value_size: usize,
    /// Sync policy applied at commit
    pub durability: Durability,
}

impl Config {
    /// Every commit is fsynced before it becomes visible.
    pub fn durable() -> Self {
        Self {
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            max_key_size: 1024,
            max_value_size: 16 * 1024 * 1024,
            durability: Durability::Durable,
        }
    }

    /// Commits skip the fsync. Meant for tests and bulk imports.
    pub fn relaxed() -> Self {
        Self {
            durability: Durability::Relaxed,
            ..Self::durable()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> LabResult<()> {
        if self.wal_rotation_size_bytes < 64 * 1024 {
            return Err(LabError::InvalidConfig("wal_rotation_size_bytes must be >= 64KB".into()));
        }
        if self.max_key_size == 0 || self.max_key_size > KEY_SIZE_CEILING {
            return Err(LabError::InvalidConfig("max_key_size must be in [1, 32KB]".into()));
        }
        if self.max_value_size == 0 || self.max_value_size > VALUE_SIZE_CEILING {
            return Err(LabError::InvalidConfig("max_value_size must be in [1, 128MB]".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::durable() }
}
