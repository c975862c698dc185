//! Commit coordinator behavior: outcome normalization, sink routing, the
//! submission-only async contract, and coordinating-thread serialization.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use common::*;
use relaystore::registry::SessionRegistry;
use relaystore::sink::MemorySink;
use relaystore::store::{CommitError, InMemoryStore, PersistReceipt};

#[test]
fn successful_commit_persists_and_clears_pending() {
    let store = InMemoryStore::open_or_create();
    let registry = SessionRegistry::with_store(store.clone());
    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    assert!(registry.commit_coordinator().commit(&session));
    assert!(!session.has_pending_changes());
    assert_eq!(store.entity_count(), 1);
}

#[test]
fn empty_commit_is_trivially_true_without_touching_the_store() {
    let store = ScriptedStore::new(vec![]);
    let registry = SessionRegistry::with_store(store.clone());
    let session = registry.new_session().unwrap();

    assert!(registry.commit_coordinator().commit(&session));
    assert_eq!(store.calls(), 0);
}

#[test]
fn rejected_commit_reports_sink_once_and_keeps_pending() {
    let store = ScriptedStore::new(vec![PersistReceipt::rejected(CommitError::Validation {
        message: "missing required attribute".into(),
    })]);
    let registry = SessionRegistry::with_store(store.clone());
    let sink = MemorySink::new();
    let commits = registry.commit_coordinator().with_sink(sink.clone());

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    assert!(!commits.commit(&session));
    assert_eq!(sink.len(), 1);
    assert!(matches!(
        sink.snapshot()[0],
        CommitError::Validation { .. }
    ));
    assert!(session.has_pending_changes());

    // The scripted failure is drained; the retry succeeds and reports nothing.
    assert!(commits.commit(&session));
    assert!(!session.has_pending_changes());
    assert_eq!(sink.len(), 1);
    assert_eq!(store.calls(), 2);
}

#[test]
fn error_object_wins_over_accepted_receipt() {
    let store = ScriptedStore::new(vec![PersistReceipt::accepted_with_error(
        CommitError::Conflict {
            message: "stale revision".into(),
        },
    )]);
    let registry = SessionRegistry::with_store(store);
    let sink = MemorySink::new();
    let commits = registry.commit_coordinator().with_sink(sink.clone());

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    assert!(!commits.commit(&session));
    assert_eq!(sink.len(), 1);
    assert!(matches!(sink.snapshot()[0], CommitError::Conflict { .. }));
}

#[test]
fn rejection_without_error_synthesizes_uncaught_fault() {
    let store = ScriptedStore::new(vec![PersistReceipt::default()]);
    let registry = SessionRegistry::with_store(store);
    let sink = MemorySink::new();
    let commits = registry.commit_coordinator().with_sink(sink.clone());

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    assert!(!commits.commit(&session));
    assert_eq!(sink.len(), 1);
    assert!(matches!(sink.snapshot()[0], CommitError::Uncaught { .. }));
}

#[test]
fn panicking_store_is_caught_and_routed_to_the_sink() {
    let registry = SessionRegistry::with_store(Arc::new(PanickingStore));
    let sink = MemorySink::new();
    let commits = registry.commit_coordinator().with_sink(sink.clone());

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    assert!(!commits.commit(&session));
    assert_eq!(sink.len(), 1);
    match &sink.snapshot()[0] {
        CommitError::Uncaught { message } => assert!(message.contains("boom")),
        other => panic!("expected uncaught fault, got {other:?}"),
    }
    // The pending state survives the fault for retry or discard.
    assert!(session.has_pending_changes());
}

#[test]
fn commit_async_reports_submission_not_success() {
    let store = ScriptedStore::new(vec![PersistReceipt::rejected(
        CommitError::StoreUnavailable {
            message: "disk gone".into(),
        },
    )]);
    let registry = SessionRegistry::with_store(store);
    let sink = MemorySink::new();
    let commits = registry.commit_coordinator().with_sink(sink.clone());

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    // True even though the commit itself will fail on the worker thread.
    assert!(commits.commit_async(Arc::clone(&session)));

    assert!(wait_for(Duration::from_secs(5), || sink.len() == 1));
    assert!(matches!(
        sink.snapshot()[0],
        CommitError::StoreUnavailable { .. }
    ));
    assert!(session.has_pending_changes());
}

#[test]
fn commit_async_with_outcome_carries_the_real_result() {
    let registry = SessionRegistry::with_store(InMemoryStore::open_or_create());
    let commits = registry.commit_coordinator();

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    let outcome = commits.commit_async_with_outcome(Arc::clone(&session));
    assert!(outcome.recv().expect("commit thread reports"));
    assert!(!session.has_pending_changes());

    // A failing commit reports false out-of-band.
    let failing = SessionRegistry::with_store(ScriptedStore::new(vec![
        PersistReceipt::rejected(CommitError::Validation {
            message: "nope".into(),
        }),
    ]));
    let sink = MemorySink::new();
    let commits = failing.commit_coordinator().with_sink(sink.clone());
    let session = failing.new_session().unwrap();
    session.insert(entity("e2", "v", json!(2)));

    let outcome = commits.commit_async_with_outcome(Arc::clone(&session));
    assert!(!outcome.recv().expect("commit thread reports"));
    assert_eq!(sink.len(), 1);
}

#[test]
fn commit_on_coordinating_thread_runs_on_the_coordinator() {
    let store = InMemoryStore::open_or_create();
    let registry = SessionRegistry::with_store(store.clone());
    let commits = registry.commit_coordinator();

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    assert!(commits.commit_on_coordinating_thread(&session));
    assert!(!session.has_pending_changes());
    assert_eq!(store.entity_count(), 1);
}

#[test]
fn concurrent_coordinating_commits_on_one_session_are_serialized() {
    // Both commits fail, so both actually reach the store, and the probe
    // checks they never overlap in time. Two distinct failures must produce
    // exactly two sink reports, never one.
    let store = OverlapProbe::failing(Duration::from_millis(50));
    let registry = SessionRegistry::with_store(store.clone());
    let sink = MemorySink::new();
    let commits = registry.commit_coordinator().with_sink(sink.clone());

    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let commits = commits.clone();
        let session = Arc::clone(&session);
        handles.push(thread::spawn(move || {
            commits.commit_on_coordinating_thread(&session)
        }));
    }
    for handle in handles {
        assert!(handle.join().expect("commit thread"));
    }

    assert!(!store.overlapped());
    assert_eq!(store.calls(), 2);
    assert_eq!(sink.len(), 2);
    assert!(session.has_pending_changes());
}

#[test]
fn coordinating_commit_from_the_coordinating_thread_does_not_deadlock() {
    let registry = SessionRegistry::with_store(InMemoryStore::open_or_create());
    let commits = registry.commit_coordinator();
    let session = registry.new_session().unwrap();
    session.insert(entity("e1", "v", json!(1)));

    let inner_session = Arc::clone(&session);
    let dispatched = registry
        .coordinator()
        .run(move || commits.commit_on_coordinating_thread(&inner_session));
    assert!(dispatched);
    assert!(!session.has_pending_changes());
}
