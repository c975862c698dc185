//! Persistence sessions: in-memory graphs of tracked entities.
//!
//! A [`Session`] owns a mutable graph of tracked entities plus a
//! back-reference to its store handle, fixed at creation via
//! [`Session::bind`] and never reassigned. Sessions are not safe for
//! concurrent mutation by more than one application thread at a time (the
//! registry's one-session-per-thread invariant is the mechanism that
//! prevents that) but they use interior mutability so the commit
//! coordinator and change propagation can touch them from the coordinating
//! thread while the owning thread blocks.
//!
//! Pending-change bookkeeping is simple three-way marking: entities inserted,
//! updated, or deleted since the last commit. The commit coordinator drains
//! these marks into a [`ChangeSet`]; a failed commit leaves them untouched so
//! the caller can retry or discard.
//!
//! # Merge semantics
//!
//! [`Session::apply_remote`] folds another session's committed change-set
//! into this session's graph:
//!
//! - updated entities already tracked locally are replaced wholesale with the
//!   committed values (last-committer-wins; local pending edits on those
//!   entities are silently overwritten and their pending marks dropped),
//! - inserted entities absent locally are added only when the session's
//!   [`InterestPolicy`] wants them,
//! - deleted ids are removed when present.

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::entity::{ChangeSet, Entity, EntityId};
use crate::store::StoreHandle;

/// Unique identifier for a session. Used as the subscription key in change
/// propagation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decides whether a session adopts entities inserted by another session's
/// commit. The policy for "is this session interested?" belongs to the
/// external entity layer; the default tracks everything.
pub trait InterestPolicy: Send + Sync {
    fn wants(&self, entity: &Entity) -> bool;
}

/// Adopts every remotely inserted entity.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrackAll;

impl InterestPolicy for TrackAll {
    fn wants(&self, _entity: &Entity) -> bool {
        true
    }
}

#[derive(Default)]
struct SessionInner {
    graph: FxHashMap<EntityId, Entity>,
    inserted: FxHashSet<EntityId>,
    updated: FxHashSet<EntityId>,
    deleted: FxHashSet<EntityId>,
}

/// An in-memory graph of tracked entities bound to one store handle.
pub struct Session {
    id: SessionId,
    store: Arc<dyn StoreHandle>,
    inner: Mutex<SessionInner>,
    commit_gate: Mutex<()>,
    interest: Box<dyn InterestPolicy>,
}

impl Session {
    /// Bind a fresh session to a store handle. The binding is fixed for the
    /// session's lifetime.
    pub fn bind(store: Arc<dyn StoreHandle>) -> Arc<Self> {
        Self::bind_with_interest(store, TrackAll)
    }

    /// Bind a fresh session with a custom interest policy for remotely
    /// inserted entities.
    pub fn bind_with_interest(
        store: Arc<dyn StoreHandle>,
        interest: impl InterestPolicy + 'static,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id: SessionId::random(),
            store,
            inner: Mutex::new(SessionInner::default()),
            commit_gate: Mutex::new(()),
            interest: Box::new(interest),
        });
        debug!(session = %session.id, "session bound to store");
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub(crate) fn store(&self) -> &Arc<dyn StoreHandle> {
        &self.store
    }

    /// Mutual-exclusion guard serializing coordinating-thread commits on this
    /// session.
    pub(crate) fn commit_gate(&self) -> &Mutex<()> {
        &self.commit_gate
    }

    /// Start tracking a new entity, pending insertion at the next commit.
    pub fn insert(&self, entity: Entity) {
        let mut inner = self.lock();
        inner.deleted.remove(&entity.id);
        inner.updated.remove(&entity.id);
        inner.inserted.insert(entity.id.clone());
        inner.graph.insert(entity.id.clone(), entity);
    }

    /// Set one attribute on a tracked entity, marking it pending update.
    /// Returns false when the entity is not tracked.
    pub fn set_attr(&self, id: &EntityId, key: impl Into<String>, value: Value) -> bool {
        let mut inner = self.lock();
        if !inner.graph.contains_key(id) {
            return false;
        }
        if let Some(entity) = inner.graph.get_mut(id) {
            entity.set(key, value);
        }
        // Freshly inserted entities stay in the insert bucket until committed.
        if !inner.inserted.contains(id) {
            inner.updated.insert(id.clone());
        }
        true
    }

    /// Stop tracking an entity, pending deletion at the next commit. Deleting
    /// a never-committed insert simply discards it. Returns false when the
    /// entity is not tracked.
    pub fn delete(&self, id: &EntityId) -> bool {
        let mut inner = self.lock();
        if inner.graph.remove(id).is_none() {
            return false;
        }
        inner.updated.remove(id);
        if !inner.inserted.remove(id) {
            inner.deleted.insert(id.clone());
        }
        true
    }

    /// Fetch an entity by id. Untracked ids fall through to the store and are
    /// faulted into the graph on a hit, which is how a reset session reloads
    /// lazily on next access.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        {
            let inner = self.lock();
            if let Some(entity) = inner.graph.get(id) {
                return Some(entity.clone());
            }
        }
        let loaded = self.store.load(id)?;
        trace!(session = %self.id, entity = %id, "faulted entity in from store");
        let mut inner = self.lock();
        Some(
            inner
                .graph
                .entry(id.clone())
                .or_insert(loaded)
                .clone(),
        )
    }

    /// True when the entity is currently tracked in this session's graph.
    /// Unlike [`get`](Self::get) this never touches the store.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.lock().graph.contains_key(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().graph.len()
    }

    pub fn has_pending_changes(&self) -> bool {
        let inner = self.lock();
        !(inner.inserted.is_empty() && inner.updated.is_empty() && inner.deleted.is_empty())
    }

    /// Drop all tracked entities and pending marks. Entities reload lazily on
    /// the next [`get`](Self::get).
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.graph.clear();
        inner.inserted.clear();
        inner.updated.clear();
        inner.deleted.clear();
        debug!(session = %self.id, "session reset");
    }

    /// Snapshot the pending changes as a change-set, or `None` when there is
    /// nothing to commit. Pending marks stay in place until
    /// [`mark_committed`](Self::mark_committed) confirms persistence.
    pub(crate) fn pending_changeset(&self) -> Option<ChangeSet> {
        let inner = self.lock();
        if inner.inserted.is_empty() && inner.updated.is_empty() && inner.deleted.is_empty() {
            return None;
        }
        let mut changes = ChangeSet::new();
        for id in &inner.inserted {
            if let Some(entity) = inner.graph.get(id) {
                changes.inserted.push(entity.clone());
            }
        }
        for id in &inner.updated {
            if let Some(entity) = inner.graph.get(id) {
                changes.updated.push(entity.clone());
            }
        }
        changes.deleted.extend(inner.deleted.iter().cloned());
        Some(changes)
    }

    /// Clear the pending marks covered by a successfully persisted
    /// change-set. Marks added after the snapshot (possible with async
    /// commits) survive for the next commit.
    pub(crate) fn mark_committed(&self, changes: &ChangeSet) {
        let mut inner = self.lock();
        for entity in &changes.inserted {
            inner.inserted.remove(&entity.id);
        }
        for entity in &changes.updated {
            inner.updated.remove(&entity.id);
        }
        inner.deleted.retain(|id| !changes.deleted.contains(id));
    }

    /// Merge another session's committed change-set into this graph. See the
    /// module docs for the exact semantics.
    pub fn apply_remote(&self, changes: &ChangeSet) {
        let mut inner = self.lock();
        let mut adopted = 0usize;
        for entity in &changes.updated {
            if inner.graph.contains_key(&entity.id) {
                inner.graph.insert(entity.id.clone(), entity.clone());
                // An overwrite clears every local pending mark on the entity,
                // including a not-yet-committed insert.
                inner.inserted.remove(&entity.id);
                inner.updated.remove(&entity.id);
                adopted += 1;
            }
        }
        for entity in &changes.inserted {
            if inner.graph.contains_key(&entity.id) {
                inner.graph.insert(entity.id.clone(), entity.clone());
                inner.inserted.remove(&entity.id);
                inner.updated.remove(&entity.id);
                adopted += 1;
            } else if self.interest.wants(entity) {
                inner.graph.insert(entity.id.clone(), entity.clone());
                adopted += 1;
            }
        }
        for id in &changes.deleted {
            if inner.graph.remove(id).is_some() {
                adopted += 1;
            }
            inner.inserted.remove(id);
            inner.updated.remove(id);
            inner.deleted.remove(id);
        }
        trace!(
            session = %self.id,
            delivered = changes.len(),
            adopted,
            "merged remote change-set"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session graph poisoned")
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
