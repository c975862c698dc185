//! Error-reporting sinks for commit failures.
//!
//! Commit-time errors are never raised to callers; the commit coordinator
//! routes each one to an [`ErrorSink`] exactly once. Recovery policy belongs
//! to the sink implementation, not the coordinator.

use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::store::CommitError;

/// Abstraction over a destination for commit failures.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &CommitError);
}

/// Default sink: log via `tracing` and continue.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &CommitError) {
        warn!(%error, "commit failed");
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<CommitError>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured errors.
    pub fn snapshot(&self) -> Vec<CommitError> {
        self.entries.lock().expect("sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all captured errors.
    pub fn clear(&self) {
        self.entries.lock().expect("sink poisoned").clear();
    }
}

impl ErrorSink for MemorySink {
    fn report(&self, error: &CommitError) {
        self.entries.lock().expect("sink poisoned").push(error.clone());
    }
}
