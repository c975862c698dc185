//! The session registry: one session per execution thread.
//!
//! [`SessionRegistry`] is an explicitly constructed context object; the
//! composition root owns it and passes it down; there is no process-wide
//! global. It owns the coordinating thread, the shared store handle
//! (installed exactly once), the mutex-guarded default-session slot, the
//! scope→session map, and the subscription registry.
//!
//! The one-session-per-thread invariant lives here: the coordinating thread
//! always resolves to the default session, and every other thread gets a
//! lazily-created session cached under its [`ScopeId`]. Sessions created for
//! different scopes are never shared, which is what makes the sessions' own
//! single-threaded graphs safe.
//!
//! # Examples
//!
//! ```rust
//! use relaystore::registry::SessionRegistry;
//! use relaystore::store::InMemoryStore;
//!
//! let registry = SessionRegistry::new();
//! registry.install_store(InMemoryStore::open_or_create()).unwrap();
//! registry.set_default_session(registry.new_session().unwrap());
//!
//! assert!(registry.default_session().is_some());
//! let worker = registry.new_session().unwrap();
//! assert_ne!(worker.id(), registry.default_session().unwrap().id());
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tracing::debug;

use crate::commit::CommitCoordinator;
use crate::dispatch::Coordinator;
use crate::propagation::SubscriptionRegistry;
use crate::session::Session;
use crate::store::StoreHandle;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("no store handle configured")]
    #[diagnostic(
        code(relaystore::registry::no_store),
        help("Call SessionRegistry::install_store before creating sessions.")
    )]
    NoStoreConfigured,

    #[error("store handle already configured")]
    #[diagnostic(
        code(relaystore::registry::store_already_configured),
        help("The store handle is supplied exactly once at startup.")
    )]
    StoreAlreadyConfigured,

    #[error("no default session set")]
    #[diagnostic(
        code(relaystore::registry::no_default_session),
        help("Call SessionRegistry::set_default_session from the composition root.")
    )]
    NoDefaultSession,
}

/// Identifies the execution scope a session is cached under.
///
/// The per-thread map is an explicit provider keyed by a caller-suppliable
/// identifier; [`ScopeId::current_thread`] derives one from ambient thread
/// identity for the convenience entry point.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Scope id for the calling thread. Thread ids are unique for the life
    /// of the process, so a cached session outlives reuse concerns.
    pub fn current_thread() -> Self {
        Self(format!("{:?}", std::thread::current().id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps execution threads to sessions and owns the default session.
pub struct SessionRegistry {
    store: OnceLock<Arc<dyn StoreHandle>>,
    coordinator: Arc<Coordinator>,
    default_session: Mutex<Option<Arc<Session>>>,
    scoped: Mutex<FxHashMap<ScopeId, Arc<Session>>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl SessionRegistry {
    /// Create a registry with a fresh coordinating thread and no store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: OnceLock::new(),
            coordinator: Coordinator::spawn(),
            default_session: Mutex::new(None),
            scoped: Mutex::new(FxHashMap::default()),
            subscriptions: SubscriptionRegistry::new(),
        })
    }

    /// Convenience constructor for the common startup sequence.
    pub fn with_store(store: Arc<dyn StoreHandle>) -> Arc<Self> {
        let registry = Self::new();
        registry
            .store
            .set(store)
            .unwrap_or_else(|_| unreachable!("fresh registry has no store"));
        registry
    }

    /// Install the shared store handle. Supplied exactly once; a second call
    /// errors.
    pub fn install_store(&self, store: Arc<dyn StoreHandle>) -> Result<(), RegistryError> {
        self.store
            .set(store)
            .map_err(|_| RegistryError::StoreAlreadyConfigured)
    }

    fn store(&self) -> Result<Arc<dyn StoreHandle>, RegistryError> {
        self.store
            .get()
            .cloned()
            .ok_or(RegistryError::NoStoreConfigured)
    }

    /// The default session, if one has been set. Never creates one.
    pub fn default_session(&self) -> Option<Arc<Session>> {
        self.default_session
            .lock()
            .expect("default session slot poisoned")
            .clone()
    }

    /// Replace the default session. The previous one is released; callers
    /// are expected to do this from the coordinating thread's composition
    /// root, but the slot itself is guarded and safe from any thread.
    pub fn set_default_session(&self, session: Arc<Session>) {
        let mut slot = self
            .default_session
            .lock()
            .expect("default session slot poisoned");
        debug!(session = %session.id(), "default session replaced");
        *slot = Some(session);
    }

    /// Drop all tracked entities from the default session, always executing
    /// on the coordinating thread and blocking the caller until done. This
    /// keeps resets from racing with in-flight coordinating-thread work.
    pub fn reset_default_session(&self) {
        if let Some(session) = self.default_session() {
            self.coordinator.run(move || session.reset());
        }
    }

    /// The session for the calling thread.
    ///
    /// On the coordinating thread this resolves to the current default
    /// session (erroring if none is set). Any other thread gets a session
    /// created on first access and cached for the thread's lifetime.
    pub fn session_for_current_thread(&self) -> Result<Arc<Session>, RegistryError> {
        if self.coordinator.is_coordinating_thread() {
            return self.default_session().ok_or(RegistryError::NoDefaultSession);
        }
        self.session_for_scope(&ScopeId::current_thread())
    }

    /// Explicit-identifier variant of the per-thread lookup: repeated calls
    /// with the same scope return the same session instance.
    pub fn session_for_scope(&self, scope: &ScopeId) -> Result<Arc<Session>, RegistryError> {
        let mut scoped = self.scoped.lock().expect("scope map poisoned");
        if let Some(existing) = scoped.get(scope) {
            return Ok(Arc::clone(existing));
        }
        let session = Session::bind(self.store()?);
        scoped.insert(scope.clone(), Arc::clone(&session));
        debug!(%scope, session = %session.id(), "scoped session created");
        Ok(session)
    }

    /// Construct a fresh session bound to the shared store handle. No scope
    /// caching, no undo tracking.
    pub fn new_session(&self) -> Result<Arc<Session>, RegistryError> {
        Ok(Session::bind(self.store()?))
    }

    /// Construct a fresh session whose commits merge into the default
    /// session on the coordinating thread.
    pub fn session_propagating_to_default(&self) -> Result<Arc<Session>, RegistryError> {
        let default = self.default_session().ok_or(RegistryError::NoDefaultSession)?;
        let session = self.new_session()?;
        self.subscriptions
            .subscribe_on_coordinating_thread(&default, &session);
        Ok(session)
    }

    /// A commit coordinator sharing this registry's coordinating thread and
    /// subscriptions, with the default tracing sink.
    pub fn commit_coordinator(&self) -> CommitCoordinator {
        CommitCoordinator::new(Arc::clone(&self.coordinator), Arc::clone(&self.subscriptions))
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }
}
