//! # Digit Collection Engine
//!
//! Everything involved in turning caller DTMF/spoken/SMS digits into a
//! validated value: the profile-driven expectation (spec §3 Digit
//! Expectation), outcome classification and confidence scoring, multi-step
//! plans, the process-global circuit breaker, adaptive reprompting, and SMS
//! fallback correlation. [`engine::DigitEngine`] is the component the
//! orchestrator actually drives; the rest of this module is its supporting
//! machinery, kept as separate files the way the corpus splits a single
//! subsystem into per-concern modules.

pub mod circuit_breaker;
pub mod engine;
pub mod expectation;
pub mod outcome;
pub mod plan;
pub mod reprompt;
pub mod sms;

pub use engine::{CollectionRequest, DigitEngine, HandleOptions, HandleOutcome, InputSource};
pub use expectation::{Channel, ConfirmationStyle, DigitExpectation, ExpectationParams, HealthStatus};
pub use outcome::{Collection, ConfidenceSignals, InputMeta, Reason};
pub use plan::{CaptureMode, DigitPlan, Group, PlanState, PlanStep};
