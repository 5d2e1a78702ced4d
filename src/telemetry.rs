//! Tracing setup, following the same `tracing_subscriber::fmt` +
//! `EnvFilter::from_default_env()` pattern the corpus's call-center demo
//! binary uses (`examples/call-center/src/server.rs`): a crate-scoped
//! default directive that `RUST_LOG` can still override.

use tracing_subscriber::EnvFilter;

/// Install a process-wide `tracing` subscriber. Call once at startup, before
/// spawning the orchestrator.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callflow_orchestrator=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
