//! Change propagation: merge-on-commit subscriptions between sessions.
//!
//! An explicit subscription registry maps observed-session identity to the
//! observers interested in its commits. The commit coordinator invokes
//! [`SubscriptionRegistry::notify`] synchronously right after a successful
//! commit, so per (observed, observer) pair delivery follows the observed
//! session's commit order. Concurrent commits from unrelated sessions may
//! interleave arbitrarily; no global order is promised.
//!
//! Two delivery modes exist per subscription:
//!
//! - plain: the merge runs on whatever thread the commit completed on,
//! - coordinating-thread: the merge is dispatched to the coordinating thread
//!   and the commit blocks until it finishes, so the merge happens-before the
//!   triggering commit call returns when invoked off the coordinating thread.
//!
//! Duplicate registrations of the same (observer, observed) pair are kept and
//! deliver duplicate merges; [`unsubscribe`](SubscriptionRegistry::unsubscribe)
//! removes every matching registration. Observers are held weakly and pruned
//! once dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

use crate::dispatch::Coordinator;
use crate::entity::ChangeSet;
use crate::session::{Session, SessionId};
use crate::sink::ErrorSink;
use crate::store::CommitError;

struct Subscription {
    observer: Weak<Session>,
    observed: SessionId,
    on_coordinating_thread: bool,
}

/// Directed (observer, observed) subscription edges.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `observer` to merge `observed`'s committed change-sets on
    /// whatever thread the commit completes on.
    pub fn subscribe(&self, observer: &Arc<Session>, observed: &Arc<Session>) {
        self.record(observer, observed, false);
    }

    /// Same registration, but merges are forced onto the coordinating thread.
    pub fn subscribe_on_coordinating_thread(
        &self,
        observer: &Arc<Session>,
        observed: &Arc<Session>,
    ) {
        self.record(observer, observed, true);
    }

    fn record(&self, observer: &Arc<Session>, observed: &Arc<Session>, on_coordinating_thread: bool) {
        self.entries
            .lock()
            .expect("subscriptions poisoned")
            .push(Subscription {
                observer: Arc::downgrade(observer),
                observed: observed.id().clone(),
                on_coordinating_thread,
            });
        debug!(
            observer = %observer.id(),
            observed = %observed.id(),
            on_coordinating_thread,
            "subscription recorded"
        );
    }

    /// Remove every registration of this (observer, observed) pair. No-op if
    /// absent.
    pub fn unsubscribe(&self, observer: &Arc<Session>, observed: &Arc<Session>) {
        let target = Arc::downgrade(observer);
        self.entries
            .lock()
            .expect("subscriptions poisoned")
            .retain(|sub| {
                !(sub.observed == *observed.id() && Weak::ptr_eq(&sub.observer, &target))
            });
    }

    /// Number of live registrations observing the given session. Duplicates
    /// count separately.
    pub fn observer_count(&self, observed: &SessionId) -> usize {
        self.entries
            .lock()
            .expect("subscriptions poisoned")
            .iter()
            .filter(|sub| sub.observed == *observed && sub.observer.strong_count() > 0)
            .count()
    }

    /// Deliver a committed change-set to every observer of `observed`.
    /// Invoked by the commit coordinator after a successful commit; the
    /// registry lock is released before any merge runs.
    ///
    /// A panic inside one observer's merge (or its interest policy) is caught
    /// per observer, reported to the sink as an uncaught fault, and does not
    /// stop delivery to the remaining observers or reach the committing
    /// caller.
    pub(crate) fn notify(
        &self,
        observed: &SessionId,
        changes: &ChangeSet,
        coordinator: &Arc<Coordinator>,
        sink: &Arc<dyn ErrorSink>,
    ) {
        let targets: Vec<(Arc<Session>, bool)> = {
            let mut entries = self.entries.lock().expect("subscriptions poisoned");
            entries.retain(|sub| sub.observer.strong_count() > 0);
            entries
                .iter()
                .filter(|sub| sub.observed == *observed)
                .filter_map(|sub| {
                    sub.observer
                        .upgrade()
                        .map(|observer| (observer, sub.on_coordinating_thread))
                })
                .collect()
        };

        for (observer, on_coordinating_thread) in targets {
            let outcome = if on_coordinating_thread {
                let changes = changes.clone();
                let target = Arc::clone(&observer);
                coordinator.run(move || {
                    catch_unwind(AssertUnwindSafe(move || target.apply_remote(&changes)))
                        .map_err(|payload| CommitError::from_panic(payload.as_ref()))
                })
            } else {
                catch_unwind(AssertUnwindSafe(|| observer.apply_remote(changes)))
                    .map_err(|payload| CommitError::from_panic(payload.as_ref()))
            };
            if let Err(error) = outcome {
                warn!(observer = %observer.id(), %error, "observer merge panicked");
                sink.report(&error);
            }
        }
        trace!(observed = %observed, deltas = changes.len(), "change-set delivered");
    }
}
