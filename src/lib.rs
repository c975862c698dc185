//! # Relaystore: thread-scoped persistence sessions
//!
//! Relaystore manages cooperating **persistence sessions**, in-memory graphs
//! of tracked entities backed by one shared durable store, used concurrently
//! from multiple threads. The hard problems it owns are not persistence
//! itself (that is the store collaborator's job) but:
//!
//! - handing each execution thread exactly one session,
//! - serializing and reporting commit attempts without losing or duplicating
//!   errors,
//! - propagating committed change-sets into other live sessions so in-memory
//!   state stays consistent after concurrent commits.
//!
//! ## Core Concepts
//!
//! - **Session**: an in-memory graph of tracked entities bound to one store
//!   handle ([`session`])
//! - **Registry**: maps execution threads to sessions and owns the default
//!   session on the coordinating thread ([`registry`])
//! - **Commit coordinator**: persists a session's pending changes, normalizes
//!   the outcome, and never raises faults to callers ([`commit`])
//! - **Change propagation**: subscriptions that merge one session's commits
//!   into another session's graph ([`propagation`])
//! - **Coordinating thread**: the single distinguished thread that owns the
//!   default session and runs serialized work ([`dispatch`])
//!
//! ## Quick Start
//!
//! ```rust
//! use relaystore::entity::Entity;
//! use relaystore::registry::SessionRegistry;
//! use relaystore::store::InMemoryStore;
//! use serde_json::json;
//!
//! let registry = SessionRegistry::new();
//! registry.install_store(InMemoryStore::open_or_create()).unwrap();
//! registry.set_default_session(registry.new_session().unwrap());
//!
//! let session = registry.new_session().unwrap();
//! session.insert(Entity::new("greeting").with_attr("text", json!("hello")));
//!
//! let commits = registry.commit_coordinator();
//! assert!(commits.commit(&session));
//! assert!(!session.has_pending_changes());
//! ```
//!
//! ## Propagating commits between sessions
//!
//! Subscribe one session to another; on every successful commit the observer
//! merges the committed change-set into its own graph before the commit call
//! returns:
//!
//! ```rust
//! use relaystore::entity::{Entity, EntityId};
//! use relaystore::registry::SessionRegistry;
//! use relaystore::store::InMemoryStore;
//! use serde_json::json;
//!
//! let registry = SessionRegistry::with_store(InMemoryStore::open_or_create());
//! let observer = registry.new_session().unwrap();
//! let observed = registry.new_session().unwrap();
//! registry.subscriptions().subscribe(&observer, &observed);
//!
//! observed.insert(Entity::new("e1").with_attr("n", json!(1)));
//! assert!(registry.commit_coordinator().commit(&observed));
//!
//! // Merged without touching the store: `contains` checks tracked state only.
//! assert!(observer.contains(&EntityId::new("e1")));
//! ```
//!
//! ## Error Handling
//!
//! Commit failures are structured [`CommitError`](store::CommitError) values
//! routed to an [`ErrorSink`](sink::ErrorSink), never raised to the caller,
//! who observes only the boolean result. A failed commit leaves the session's
//! pending changes intact for retry or discard.
//!
//! ## Module Guide
//!
//! - [`entity`] - Tracked entities, ids, and commit change-sets
//! - [`store`] - The store-handle collaborator trait and in-memory reference
//! - [`session`] - Session graphs, pending-change bookkeeping, merge semantics
//! - [`registry`] - Thread→session mapping and the default session
//! - [`dispatch`] - The coordinating thread
//! - [`commit`] - Commit execution and outcome normalization
//! - [`propagation`] - Merge-on-commit subscriptions
//! - [`sink`] - Error-reporting sinks
//! - [`telemetry`] - Tracing bootstrap

pub mod commit;
pub mod dispatch;
pub mod entity;
pub mod propagation;
pub mod registry;
pub mod session;
pub mod sink;
pub mod store;
pub mod telemetry;
