//! The store collaborator: the durable backing for every session.
//!
//! The core never performs I/O itself. Sessions are bound to an
//! `Arc<dyn StoreHandle>` supplied once at startup, and the commit
//! coordinator hands the store a [`ChangeSet`] to persist. The store answers
//! with a [`PersistReceipt`] rather than raising faults: commit failures are
//! structured data, and the error field of the receipt is authoritative over
//! its boolean (a receipt that says "accepted" but still carries an error is
//! treated as a failure).
//!
//! [`InMemoryStore`] is the reference implementation used by tests and
//! development setups.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::entity::{ChangeSet, Entity, EntityId};
use crate::session::SessionId;

/// Commit failure taxonomy.
///
/// Every variant is caught locally by the commit coordinator and forwarded to
/// the configured [`ErrorSink`](crate::sink::ErrorSink); none are raised to
/// callers of the commit operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum CommitError {
    #[error("validation failed: {message}")]
    #[diagnostic(
        code(relaystore::commit::validation),
        help("Fix the offending attribute values and retry the commit.")
    )]
    Validation { message: String },

    #[error("store unavailable: {message}")]
    #[diagnostic(
        code(relaystore::commit::store_unavailable),
        help("The session keeps its pending changes; retry once the store is reachable.")
    )]
    StoreUnavailable { message: String },

    #[error("conflicting commit: {message}")]
    #[diagnostic(code(relaystore::commit::conflict))]
    Conflict { message: String },

    #[error("uncaught fault during commit: {message}")]
    #[diagnostic(code(relaystore::commit::uncaught))]
    Uncaught { message: String },
}

impl CommitError {
    /// Build an [`Uncaught`](Self::Uncaught) fault from a caught panic
    /// payload.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "panicked with a non-string payload".to_string()
        };
        Self::Uncaught { message }
    }
}

/// Outcome of a persist attempt.
///
/// Success requires `accepted == true` AND `error == None`; the commit
/// coordinator treats any other combination as a failure, with the error
/// object winning over the boolean.
#[derive(Debug, Clone, Default)]
pub struct PersistReceipt {
    pub accepted: bool,
    pub error: Option<CommitError>,
}

impl PersistReceipt {
    pub fn ok() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(error: CommitError) -> Self {
        Self {
            accepted: false,
            error: Some(error),
        }
    }

    /// A receipt that claims acceptance while still surfacing an error.
    /// The commit coordinator counts this as a failure.
    pub fn accepted_with_error(error: CommitError) -> Self {
        Self {
            accepted: true,
            error: Some(error),
        }
    }
}

/// Opaque handle to the durable backing store.
///
/// Shared (`Arc`), read-mostly from the core's perspective, and fixed for the
/// lifetime of each session bound to it.
pub trait StoreHandle: Send + Sync {
    /// Persist one session's pending changes. Must not panic for ordinary
    /// failures; report them through the receipt instead.
    fn persist(&self, session: &SessionId, changes: &ChangeSet) -> PersistReceipt;

    /// Load a single entity by id, if the store knows it. Sessions use this
    /// to fault entities back in lazily after a reset.
    fn load(&self, id: &EntityId) -> Option<Entity>;
}

/// Volatile store for tests and development.
#[derive(Default)]
pub struct InMemoryStore {
    entities: Mutex<FxHashMap<EntityId, Entity>>,
}

impl InMemoryStore {
    pub fn open_or_create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of entities currently persisted.
    pub fn entity_count(&self) -> usize {
        self.entities.lock().expect("store poisoned").len()
    }
}

impl StoreHandle for InMemoryStore {
    fn persist(&self, session: &SessionId, changes: &ChangeSet) -> PersistReceipt {
        let mut entities = self.entities.lock().expect("store poisoned");
        for entity in changes.inserted.iter().chain(changes.updated.iter()) {
            entities.insert(entity.id.clone(), entity.clone());
        }
        for id in &changes.deleted {
            entities.remove(id);
        }
        debug!(
            session = %session,
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "persisted change-set"
        );
        PersistReceipt::ok()
    }

    fn load(&self, id: &EntityId) -> Option<Entity> {
        self.entities.lock().expect("store poisoned").get(id).cloned()
    }
}
