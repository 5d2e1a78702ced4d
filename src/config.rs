//! Tunable defaults for every subsystem.
//!
//! Every numeric bound named in spec §3/§4 lives here as a named constant so
//! that a single place documents "why 0.45" or "why 8s". Components accept a
//! `*Config` struct with a `Default` impl built from these constants; callers
//! override individual fields rather than hand-rolling the defaults.

use std::time::Duration;

// ---- Digit Collection Engine ------------------------------------------

pub const DIGIT_TIMEOUT_MIN_S: u64 = 3;
pub const DIGIT_TIMEOUT_MAX_S: u64 = 60;
pub const DIGIT_MAX_RETRIES_MAX: u8 = 5;
pub const DIGIT_MIN_COLLECT_DELAY_FLOOR_MS: u64 = 800;
/// Second, higher floor applied on top of the 800ms floor (spec §4.2
/// Normalization: `min_collect_delay_ms = max(800, prompt_estimate, 3000)`).
pub const DIGIT_MIN_COLLECT_DELAY_SECONDARY_FLOOR_MS: u64 = 3000;
pub const DIGIT_MAX_BUFFER_LEN: usize = 50;
pub const DIGIT_MIN_DTMF_GAP_MS: u64 = 200;
pub const DIGIT_CONFIDENCE_ACCEPT_THRESHOLD: f64 = 0.45;
pub const DIGIT_SPAM_REPEAT_RUN: usize = 6;
pub const SMS_FALLBACK_MIN_RETRIES: u8 = 2;
pub const PLAN_STEP_FINGERPRINT_DEDUP_S: u64 = 3;
pub const FINGERPRINT_DEDUP_WINDOW_S: u64 = 3;

pub const RISK_THRESHOLD_FORCE_CONFIRMATION: f64 = 0.55;
pub const RISK_THRESHOLD_DTMF_ONLY: f64 = 0.70;
pub const RISK_THRESHOLD_ROUTE_TO_AGENT: f64 = 0.90;

/// Speaking rate used to estimate how long a spoken prompt will take, for
/// the purposes of `min_collect_delay_ms` and the prompt-delay timer (spec
/// §4.2, §4.3). The spec's source material defines this estimate twice with
/// different constants (150 wpm vs. 420ms/word+1.2s); we keep exactly one,
/// the 150 wpm variant that spec.md spells out explicitly, and do not carry
/// the second formula anywhere in this crate (see DESIGN.md).
pub const PROMPT_SPEECH_WORDS_PER_MINUTE: f64 = 150.0;

/// Speaking rate used only for the closing-sequence speech-duration estimate
/// (spec §4.3 Closing sequence), which names its own words-per-minute figure
/// distinct from the prompt estimate above.
pub const CLOSING_SPEECH_WORDS_PER_MINUTE: f64 = 140.0;
pub const CLOSING_SPEECH_FLOOR_MS: u64 = 1600;
pub const CLOSING_SPEECH_CEIL_MS: u64 = 12_000;

// ---- Circuit breaker (process-global) ----------------------------------

pub const CIRCUIT_WINDOW_S: u64 = 60;
pub const CIRCUIT_MIN_SAMPLES: u32 = 8;
pub const CIRCUIT_ERROR_RATE_OPEN: f64 = 0.30;
pub const CIRCUIT_COOLDOWN_MS: u64 = 60_000;

// ---- Audio Meter --------------------------------------------------------

pub const AUDIO_STRIDE_TARGET_SAMPLES: usize = 800;
pub const AUDIO_MAX_WAVEFORM_FRAMES: usize = 48;
pub const USER_SPEECH_LEVEL_THRESHOLD: f64 = 0.08;
pub const USER_SPEECH_HOLD_MS: u64 = 450;
pub const LIVE_CONSOLE_AUDIO_TICK_MS: u64 = 160;

// ---- Orchestrator -------------------------------------------------------

pub const SILENCE_TIMEOUT_S: u64 = 30;
pub const LLM_DUPLICATE_UTTERANCE_WINDOW_S: u64 = 2;
pub const TERMINAL_QUIET_MS: u64 = 8_000;
pub const TRANSCRIPT_WAIT_MAX_MS: u64 = 10 * 60 * 1000;
pub const TRANSCRIPT_WAIT_RETRY_MS: u64 = 3_000;

// ---- Live Console Renderer ----------------------------------------------

pub const CONSOLE_EDIT_DEBOUNCE_MS: u64 = 700;
pub const CONSOLE_EVENTS_INBOUND: usize = 3;
pub const CONSOLE_EVENTS_OUTBOUND: usize = 4;
pub const CONSOLE_PREVIEW_MAX_CHARS: usize = 200;
pub const CONSOLE_SIGNAL_SMOOTHING: f64 = 0.35;
pub const CONSOLE_WORKING_BUTTON_MAX_MS: u64 = 1_500;

// ---- Notification Dispatcher --------------------------------------------

pub const NOTIFY_PROCESS_INTERVAL_MS: u64 = 3_000;
pub const NOTIFY_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const NOTIFY_RETRY_BASE_MS: u64 = 1_000;
pub const NOTIFY_RETRY_MAX_MS: u64 = 60_000;
pub const NOTIFY_RETRY_JITTER_MAX_MS: u64 = 1_000;

/// Compliance mode governing whether raw digits may ever be written to a
/// persisted row (spec §6, invariant 5 in §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComplianceMode {
    /// Raw digits never leave the short-lived in-memory buffer.
    #[default]
    Safe,
    /// Development-only relaxation; never the default.
    Permissive,
}

/// Policy knobs for the digit collection engine, threaded through from
/// session/template configuration (spec §4.2 Health policy / Risk policy).
#[derive(Debug, Clone)]
pub struct CollectionPolicyConfig {
    pub sms_fallback_min_retries: u8,
    pub risk_force_confirmation: f64,
    pub risk_dtmf_only: f64,
    pub risk_route_to_agent: f64,
    pub compliance_mode: ComplianceMode,
}

impl Default for CollectionPolicyConfig {
    fn default() -> Self {
        Self {
            sms_fallback_min_retries: SMS_FALLBACK_MIN_RETRIES,
            risk_force_confirmation: RISK_THRESHOLD_FORCE_CONFIRMATION,
            risk_dtmf_only: RISK_THRESHOLD_DTMF_ONLY,
            risk_route_to_agent: RISK_THRESHOLD_ROUTE_TO_AGENT,
            compliance_mode: ComplianceMode::Safe,
        }
    }
}

/// Behavioral knobs for the live console renderer (spec §4.7).
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub edit_debounce: Duration,
    pub max_events: usize,
    pub preview_max_chars: usize,
    pub redact_preview: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            edit_debounce: Duration::from_millis(CONSOLE_EDIT_DEBOUNCE_MS),
            max_events: CONSOLE_EVENTS_OUTBOUND,
            preview_max_chars: CONSOLE_PREVIEW_MAX_CHARS,
            redact_preview: true,
        }
    }
}

/// Top-level knobs for the call session orchestrator (spec §4.3).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub silence_timeout: Duration,
    pub llm_duplicate_window: Duration,
    pub terminal_quiet: Duration,
    pub collection_policy: CollectionPolicyConfig,
    pub console: ConsoleConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(SILENCE_TIMEOUT_S),
            llm_duplicate_window: Duration::from_secs(LLM_DUPLICATE_UTTERANCE_WINDOW_S),
            terminal_quiet: Duration::from_millis(TERMINAL_QUIET_MS),
            collection_policy: CollectionPolicyConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

/// Estimate spoken duration of `text` at `words_per_minute`, per spec's
/// `⌈words / wpm · 60000⌉` formula.
pub fn estimate_speech_ms(text: &str, words_per_minute: f64) -> u64 {
    let words = text.split_whitespace().count().max(1) as f64;
    (words / words_per_minute * 60_000.0).ceil() as u64
}
