//! Tracing bootstrap for binaries and tests.
//!
//! The core logs through `tracing` at the seams (session creation, commit
//! outcomes, dispatch, merge delivery); this module wires a formatted
//! subscriber with an environment-driven filter. Initialization is
//! idempotent so tests can call it freely.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber with `RUST_LOG`-style filtering, defaulting
/// to `info`.
pub fn init() {
    init_with_filter("info");
}

/// Install the global subscriber with an explicit fallback filter used when
/// the environment provides none. Subsequent calls are no-ops.
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
