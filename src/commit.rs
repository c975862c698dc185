//! The commit coordinator: persist, normalize, report, propagate.
//!
//! Commit-time faults are never raised to callers. Every failure (a store
//! receipt carrying an error, a rejection without one, or a panic inside the
//! persist path) is converted into a [`CommitError`] and handed to the
//! configured [`ErrorSink`] exactly once; callers observe only a boolean.
//!
//! The boolean means different things per operation, deliberately:
//!
//! - [`commit`](CommitCoordinator::commit): true iff the store accepted the
//!   change-set AND produced no error object (the error is authoritative).
//! - [`commit_async`](CommitCoordinator::commit_async): always true, meaning
//!   the request was *submitted*, nothing more. Callers that need the outcome use
//!   [`commit_async_with_outcome`](CommitCoordinator::commit_async_with_outcome).
//! - [`commit_on_coordinating_thread`](CommitCoordinator::commit_on_coordinating_thread):
//!   always true; the commit was dispatched and ran to completion on the
//!   coordinating thread; its success or failure went to the sink.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info_span, warn};

use crate::dispatch::Coordinator;
use crate::entity::ChangeSet;
use crate::propagation::SubscriptionRegistry;
use crate::session::Session;
use crate::sink::{ErrorSink, TracingSink};
use crate::store::CommitError;

/// Performs session commits and routes their outcomes.
///
/// Cheap to clone; all state is shared. Usually obtained from
/// [`SessionRegistry::commit_coordinator`](crate::registry::SessionRegistry::commit_coordinator)
/// so it shares the registry's coordinating thread and subscriptions.
#[derive(Clone)]
pub struct CommitCoordinator {
    coordinator: Arc<Coordinator>,
    subscriptions: Arc<SubscriptionRegistry>,
    sink: Arc<dyn ErrorSink>,
}

impl CommitCoordinator {
    pub fn new(coordinator: Arc<Coordinator>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self {
            coordinator,
            subscriptions,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the error-reporting sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Persist the session's pending changes to its store handle.
    ///
    /// Returns true only when the store reported acceptance and produced no
    /// error object; any other combination reports once to the sink and
    /// returns false, leaving the session's pending state intact for retry.
    /// A session with nothing pending commits trivially (no store call, no
    /// notification). On success, subscribed observers merge the change-set
    /// before this call returns.
    pub fn commit(&self, session: &Session) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.persist(session))) {
            Ok(Ok(None)) => true,
            Ok(Ok(Some(changes))) => {
                session.mark_committed(&changes);
                debug!(
                    session = %session.id(),
                    inserted = changes.inserted.len(),
                    updated = changes.updated.len(),
                    deleted = changes.deleted.len(),
                    "commit succeeded"
                );
                self.subscriptions
                    .notify(session.id(), &changes, &self.coordinator, &self.sink);
                true
            }
            Ok(Err(error)) => {
                self.sink.report(&error);
                false
            }
            Err(payload) => {
                let error = CommitError::from_panic(payload.as_ref());
                self.sink.report(&error);
                false
            }
        }
    }

    /// Submit the commit to run on a fresh, independent thread.
    ///
    /// Fire-and-forget: always returns true immediately, meaning only that
    /// the request was submitted. The outcome goes to the sink.
    pub fn commit_async(&self, session: Arc<Session>) -> bool {
        let this = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("relaystore-commit-{}", session.id()))
            .spawn(move || {
                let span = info_span!("commit_async", session = %session.id());
                let _guard = span.enter();
                let _ = this.commit(&session);
            });
        if let Err(err) = spawned {
            warn!(%err, "failed to spawn commit thread");
            self.sink.report(&CommitError::Uncaught {
                message: format!("failed to spawn commit thread: {err}"),
            });
        }
        true
    }

    /// Like [`commit_async`](Self::commit_async), but hands back a channel
    /// carrying the commit's real outcome. The receiver disconnects without a
    /// value if the commit thread could not be spawned.
    pub fn commit_async_with_outcome(&self, session: Arc<Session>) -> flume::Receiver<bool> {
        let (tx, rx) = flume::bounded(1);
        let this = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("relaystore-commit-{}", session.id()))
            .spawn(move || {
                let span = info_span!("commit_async", session = %session.id());
                let _guard = span.enter();
                let _ = tx.send(this.commit(&session));
            });
        if let Err(err) = spawned {
            warn!(%err, "failed to spawn commit thread");
            self.sink.report(&CommitError::Uncaught {
                message: format!("failed to spawn commit thread: {err}"),
            });
        }
        rx
    }

    /// Run the commit on the coordinating thread, blocking the caller until
    /// it completes there.
    ///
    /// Concurrent invocations on the *same* session are serialized through
    /// the session's commit gate; commits on different sessions stay
    /// unordered relative to each other. Always returns true once the
    /// dispatched commit has run; failures went to the sink.
    pub fn commit_on_coordinating_thread(&self, session: &Arc<Session>) -> bool {
        let _gate = session
            .commit_gate()
            .lock()
            .expect("commit gate poisoned");
        let this = self.clone();
        let session = Arc::clone(session);
        self.coordinator.run(move || {
            let _ = this.commit(&session);
        });
        true
    }

    fn persist(&self, session: &Session) -> Result<Option<ChangeSet>, CommitError> {
        let Some(changes) = session.pending_changeset() else {
            return Ok(None);
        };
        let receipt = session.store().persist(session.id(), &changes);
        // The error object wins over the raw boolean.
        if let Some(error) = receipt.error {
            return Err(error);
        }
        if !receipt.accepted {
            return Err(CommitError::Uncaught {
                message: "store rejected the commit without an error".into(),
            });
        }
        Ok(Some(changes))
    }
}
