//! Cancellation context checked at transaction boundaries.
//!
//! A `Context` is cheap to clone; clones share one cancel flag, so a caller
//! can hand a clone to a worker and cancel it from elsewhere. The store
//! checks the context before a transaction starts. A transaction already
//! running is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{LabError, LabResult};

#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that also expires `timeout` from now. Shares the
    /// cancel flag with `self`; keeps the earlier of the two deadlines.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Ok` while the context is live; the reason it is done otherwise.
    pub fn check(&self) -> LabResult<()> {
        if self.is_cancelled() {
            return Err(LabError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(LabError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
