//! Tracked entities and the change-sets commits produce.
//!
//! An [`Entity`] is the unit of tracked state: an opaque [`EntityId`] plus a
//! JSON attribute map. A [`ChangeSet`] is the delta a successful commit
//! produces: inserted and updated entities with their committed attribute
//! values, and the ids of deleted entities. Change-sets are what change
//! propagation delivers to observing sessions.
//!
//! # Examples
//!
//! ```rust
//! use relaystore::entity::{ChangeSet, Entity, EntityId};
//! use serde_json::json;
//!
//! let entity = Entity::new("order-17")
//!     .with_attr("status", json!("open"))
//!     .with_attr("total", json!(42.5));
//!
//! assert_eq!(entity.get("status"), Some(&json!("open")));
//!
//! let mut changes = ChangeSet::new();
//! changes.inserted.push(entity);
//! changes.deleted.push(EntityId::new("order-12"));
//! assert_eq!(changes.len(), 2);
//! ```

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for a tracked entity.
///
/// Ids are plain strings so callers can use natural keys in fixtures and
/// tests; [`EntityId::random`] mints a UUID-backed id for new entities.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh UUID v4 backed id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A tracked entity: an id plus a JSON attribute map.
///
/// The entity layer that defines schemas lives outside this crate; from the
/// session core's perspective an entity is just its identity and its current
/// attribute values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub attributes: FxHashMap<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            attributes: FxHashMap::default(),
        }
    }

    /// Builder-style attribute assignment.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// The delta produced by one successful commit.
///
/// `inserted` and `updated` carry full entities with their committed
/// attribute values; `deleted` carries ids only. Observing sessions merge
/// change-sets via [`Session::apply_remote`](crate::session::Session::apply_remote).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub committed_at: DateTime<Utc>,
    #[serde(default)]
    pub inserted: Vec<Entity>,
    #[serde(default)]
    pub updated: Vec<Entity>,
    #[serde(default)]
    pub deleted: Vec<EntityId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            committed_at: Utc::now(),
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Total number of entity deltas carried by this change-set.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}
