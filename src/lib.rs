//! # Call Session Orchestrator
//!
//! This crate provides a real-time voice-AI call orchestrator: a per-call
//! state machine binding a telephony provider's media stream to STT/LLM/TTS
//! adapters, a DTMF/spoken/SMS digit-collection engine, and a live operator
//! console rendered as a single debounced chat bubble per call.
//!
//! ## Architecture
//!
//! The orchestrator is organized around one state machine per call
//! ([`orchestrator::Orchestrator`]) that wires together a set of otherwise
//! independent subsystems:
//!
//! - [`orchestrator`]: per-call state machine (Connecting -> Initial-Greeting
//!   -> Conversing -> Digit-Capture <-> Conversing -> Closing -> Ended).
//! - [`digit`]: profile-driven digit expectations, outcome classification,
//!   multi-step plans, the process-global circuit breaker, and SMS fallback.
//! - [`profile`]: the compile-time digit-profile registry and validators.
//! - [`tools`]: the fixed telephony tool table an LLM turn may invoke
//!   (`confirm_identity`, `route_to_agent`, `collect_digits`,
//!   `collect_multiple_digits`, `play_disclosure`), dispatched by name.
//! - [`console`]: the debounced, idempotent single-bubble live console.
//! - [`audio`]: level/waveform extraction and speech-gate hysteresis.
//! - [`transcript`]: partial/final STT correlation and digit redaction.
//! - [`llm_queue`]: per-call FIFO single-worker LLM task queue.
//! - [`timers`]: named per-call cancellable timers.
//! - [`status`]: provider status normalization and deferred-terminal logic.
//! - [`notify`]: durable, retried operator notification dispatch.
//! - [`persistence`]: the `CallStore` seam and its SQLite/in-memory impls.
//! - [`adapters`]: trait boundaries for every external vendor collaborator.
//! - [`server`]: thin axum transport surface (webhook, media stream, gather).
//!
//! ## Quick start
//!
//! ```no_run
//! use callflow_orchestrator::adapters::fakes::*;
//! use callflow_orchestrator::orchestrator::{Dependencies, Orchestrator};
//! use callflow_orchestrator::persistence::InMemoryCallStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let deps = Dependencies {
//!     store: Arc::new(InMemoryCallStore::new()),
//!     stt: Arc::new(FakeSttAdapter::default()),
//!     llm: Arc::new(FakeLlmAdapter::default()),
//!     tts: Arc::new(FakeTtsAdapter::default()),
//!     sms: Arc::new(FakeSmsAdapter::default()),
//!     chat: Arc::new(FakeChatAdapter::default()),
//!     telephony: Arc::new(FakeTelephonyAdapter::default()),
//!     config: Default::default(),
//! };
//! let orchestrator = Orchestrator::spawn(deps);
//! orchestrator.shutdown();
//! # }
//! ```

// Core modules
pub mod error;
pub mod config;
pub mod types;
pub mod telemetry;

// Call orchestration
pub mod orchestrator;
pub mod digit;
pub mod profile;
pub mod tools;

// Media / transcript pipeline
pub mod audio;
pub mod transcript;
pub mod llm_queue;
pub mod timers;

// Operator-facing surfaces
pub mod console;
pub mod status;
pub mod notify;

// External seams
pub mod adapters;
pub mod persistence;
pub mod server;

pub use error::{OrchestratorError, Result};

/// Convenience re-exports for applications embedding the orchestrator.
pub mod prelude {
    pub use crate::adapters::{ChatAdapter, LlmAdapter, SmsAdapter, SttAdapter, TelephonyAdapter, TtsAdapter};
    pub use crate::config::OrchestratorConfig;
    pub use crate::error::{OrchestratorError, Result};
    pub use crate::orchestrator::{Dependencies, Orchestrator};
    pub use crate::persistence::{CallStore, InMemoryCallStore};
    pub use crate::types::{CallId, ChatId, Phase, ProviderKind};
}
