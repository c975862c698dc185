//! Shared fixtures for the integration suite.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use relaystore::entity::{ChangeSet, Entity, EntityId};
use relaystore::session::SessionId;
use relaystore::store::{CommitError, PersistReceipt, StoreHandle};

pub fn entity(id: &str, key: &str, value: Value) -> Entity {
    Entity::new(id).with_attr(key, value)
}

/// Spin until `predicate` holds or the timeout elapses. Returns whether the
/// predicate held.
pub fn wait_for(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// Store whose receipts are scripted per persist call, drained front-first;
/// once the script runs out every persist succeeds.
pub struct ScriptedStore {
    receipts: Mutex<Vec<PersistReceipt>>,
    pub persist_calls: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(receipts: Vec<PersistReceipt>) -> Arc<Self> {
        Arc::new(Self {
            receipts: Mutex::new(receipts),
            persist_calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

impl StoreHandle for ScriptedStore {
    fn persist(&self, _session: &SessionId, _changes: &ChangeSet) -> PersistReceipt {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let mut receipts = self.receipts.lock().unwrap();
        if receipts.is_empty() {
            PersistReceipt::ok()
        } else {
            receipts.remove(0)
        }
    }

    fn load(&self, _id: &EntityId) -> Option<Entity> {
        None
    }
}

/// Store that sleeps inside persist and records whether two persists ever
/// overlapped in time. Optionally fails every persist so pending changes
/// survive for the next attempt.
pub struct OverlapProbe {
    in_flight: AtomicBool,
    overlapped: AtomicBool,
    persist_calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl OverlapProbe {
    pub fn succeeding(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(delay, false))
    }

    pub fn failing(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(delay, true))
    }

    fn build(delay: Duration, fail: bool) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            persist_calls: AtomicUsize::new(0),
            delay,
            fail,
        }
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

impl StoreHandle for OverlapProbe {
    fn persist(&self, _session: &SessionId, _changes: &ChangeSet) -> PersistReceipt {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        std::thread::sleep(self.delay);
        self.in_flight.store(false, Ordering::SeqCst);
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            PersistReceipt::rejected(CommitError::StoreUnavailable {
                message: "probe store always fails".into(),
            })
        } else {
            PersistReceipt::ok()
        }
    }

    fn load(&self, _id: &EntityId) -> Option<Entity> {
        None
    }
}

/// Store whose persist panics, for exercising uncaught-fault capture.
pub struct PanickingStore;

impl StoreHandle for PanickingStore {
    fn persist(&self, _session: &SessionId, _changes: &ChangeSet) -> PersistReceipt {
        panic!("boom: store exploded mid-commit");
    }

    fn load(&self, _id: &EntityId) -> Option<Entity> {
        None
    }
}
