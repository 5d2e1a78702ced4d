//! Crate-wide error type.
//!
//! Every adapter failure (STT/LLM/TTS/SMS/chat/database) is mapped to one of
//! these variants before it reaches a [`crate::orchestrator`] state machine —
//! nothing from this crate ever panics or propagates an untyped error into
//! the call path. See spec §7 for the recovery policy attached to each kind.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the orchestrator and its subsystems.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The STT/LLM/TTS/SMS/chat adapter call failed transiently; the caller
    /// decides whether to retry based on the state machine's failure model.
    #[error("{adapter} adapter error: {message}")]
    Adapter { adapter: &'static str, message: String },

    /// Timed out waiting on an adapter or internal timer.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    /// A profile id is not present in the registry (§4.1).
    #[error("unknown digit profile: {0}")]
    UnknownProfile(String),

    /// Digit expectation parameters failed to normalize into a valid shape.
    #[error("invalid digit expectation: {0}")]
    InvalidExpectation(String),

    /// An operation was attempted against a call with no active session.
    #[error("no active session for call {0}")]
    NoSuchSession(String),

    /// The digit engine's circuit breaker is open (§4.2 Circuit breaker).
    #[error("digit collection circuit breaker is open")]
    CircuitOpen,

    /// The call ended or is ending; further work of this kind is refused.
    #[error("session {0} is closing or ended")]
    SessionClosing(String),

    /// Persistence layer failure (migrations, pool, query).
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Catch-all for conditions that don't warrant a dedicated variant.
    #[error("{0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn adapter(adapter: &'static str, message: impl Into<String>) -> Self {
        Self::Adapter { adapter, message: message.into() }
    }
}
