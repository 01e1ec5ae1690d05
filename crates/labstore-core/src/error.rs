//! Error types for LabStore operations
//!
//! All LabStore errors are represented by the LabError enum, which carries
//! enough context (paths, offsets, bucket keys) to debug a failed write or a
//! damaged log.

use std::path::PathBuf;

/// LabStore error types with detailed context
#[derive(Debug, Clone, thiserror::Error)]
pub enum LabError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", display_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// WAL file is corrupted and cannot be recovered
    #[error("WAL corrupted in {} at offset {offset}: {reason}", .path.display())]
    WalCorrupted {
        /// Path to the corrupted WAL file
        path: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}", .path.display())]
    ChecksumMismatch {
        /// File where checksum failed
        path: PathBuf,
        /// Expected checksum value
        expected: u32,
        /// Actual checksum computed
        actual: u32,
        /// Byte offset of the corrupted data
        offset: u64,
    },

    /// Torn write detected (partial write at end of file)
    #[error("Torn write in {} at offset {offset}: expected {expected_size} bytes, only {available_bytes} available", .path.display())]
    TornWrite {
        /// File with torn write
        path: PathBuf,
        /// Expected entry size
        expected_size: u32,
        /// Actual bytes available
        available_bytes: u64,
        /// Offset where torn write begins
        offset: u64,
    },

    /// Magic bytes not found at expected location
    #[error("Magic bytes not found in {} at offset {offset}: found {}", .path.display(), hex4(.found_bytes))]
    NoMagicFound {
        /// File being read
        path: PathBuf,
        /// Offset where magic was expected
        offset: u64,
        /// Bytes actually found
        found_bytes: [u8; 4],
    },

    /// Key or value size outside the configured bounds
    #[error("Entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        /// Size of the oversized entry
        entry_size: u64,
        /// Maximum allowed size
        max_size: u64,
        /// Whether it's the key or value that's oversized
        component: String,
    },

    /// Keys must contain at least one byte
    #[error("bucket and field keys must not be empty")]
    EmptyKey,

    /// `create_bucket` found a bucket already stored under the key
    #[error("bucket {} already exists", display_key(.key))]
    BucketExists {
        /// Key of the existing bucket
        key: Vec<u8>,
    },

    /// `delete_bucket` (or a lookup that requires one) found nothing under the key
    #[error("bucket {} not found", display_key(.key))]
    BucketNotFound {
        /// Key that was looked up
        key: Vec<u8>,
    },

    /// A field write hit a bucket key, or a bucket create hit a field key
    #[error("key {} is already used by a value of another kind", display_key(.key))]
    IncompatibleValue {
        /// Conflicting key
        key: Vec<u8>,
    },

    /// Values can only live inside buckets, not at the root of a transaction
    #[error("values cannot be stored at the root level")]
    RootValue,

    /// Transaction boundary refused to start because the context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// Transaction boundary refused to start because the context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

fn hex4(bytes: &[u8; 4]) -> String {
    format!("{:02x}{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2], bytes[3])
}

/// Render a key for messages: UTF-8 when possible, quoted; hex otherwise.
pub(crate) fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) => format!("{s:?}"),
        Err(_) => key.iter().fold(String::from("0x"), |mut out, b| {
            out.push_str(&format!("{b:02x}"));
            out
        }),
    }
}

/// Convert std::io::Error to LabError::Io
impl From<std::io::Error> for LabError {
    fn from(err: std::io::Error) -> Self {
        LabError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl LabError {
    /// Build an `Io` error annotated with the file it happened on.
    pub(crate) fn io_at(path: impl Into<PathBuf>, err: &std::io::Error, what: &str) -> Self {
        LabError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{what}: {err}"),
        }
    }
}

/// Result type alias for LabStore operations
pub type LabResult<T> = Result<T, LabError>;
