//! Error types for cluster metadata operations
//!
//! Every failure maps onto one [`ErrorKind`]. Errors pick up context
//! (`cluster "c1"`, the field being decoded) as they unwind through
//! [`ResultExt::context`]; [`MetadataError::kind`] looks through any
//! number of such layers.

use labstore_core::LabError;

/// Broad classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested entity or collection does not exist
    NotFound,
    /// Create hit an identifier that is already taken
    AlreadyExists,
    /// Caller input rejected before touching the store
    InvalidArgument,
    /// Persisted data could not be decoded
    Format,
    /// Context cancelled or past its deadline before the transaction started
    Cancelled,
    /// Storage engine failure (I/O, WAL, limits)
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("{0}: not found")]
    NotFound(String),

    #[error("{0}: already exists")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored bytes do not decode into the expected shape
    #[error("malformed record: {0}")]
    Format(String),

    #[error(transparent)]
    Store(#[from] LabError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<MetadataError>,
    },
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::NotFound(_) => ErrorKind::NotFound,
            MetadataError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            MetadataError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MetadataError::Format(_) => ErrorKind::Format,
            MetadataError::Store(LabError::Cancelled | LabError::DeadlineExceeded) => {
                ErrorKind::Cancelled
            }
            MetadataError::Store(_) => ErrorKind::Storage,
            MetadataError::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Wrap `self` with a description of what was being done.
    pub fn context(self, context: impl Into<String>) -> Self {
        MetadataError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Attach context to any error convertible into [`MetadataError`].
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> MetadataResult<T>;

    fn with_context<C, F>(self, f: F) -> MetadataResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: Into<MetadataError>> ResultExt<T> for Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> MetadataResult<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C, F>(self, f: F) -> MetadataResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
