//! Call Session data model (spec §3 Call Session).

use crate::console::Direction;
use crate::digit::CollectionRequest;
use crate::tools::ToolPolicy;
use crate::transcript::Correlator;
use crate::types::{CallId, ChatId, Phase, ProviderKind};
use chrono::{DateTime, Utc};

/// Coarse call-lifecycle state (spec §4.3: "`Connecting → Initial-Greeting →
/// Conversing → (Digit-Capture ↕ Conversing) → Closing → Ended`"). Distinct
/// from [`Phase`], which is fine-grained and display-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    InitialGreeting,
    Conversing,
    DigitCapture,
    Closing,
    Ended,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended)
    }
}

/// Why a session entered `Closing` (spec §4.3/§7/§8: `Closing(otp_verified)`,
/// `Closing(digits_sms_fallback)`, `Closing(error)`, `Closing(risk_escalation)`,
/// `Closing(service_unavailable)`, `Closing(failure)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingReason {
    OtpVerified,
    PlanCompleted,
    DigitsSmsFallback,
    UserGoodbye,
    NoResponse,
    Error,
    RiskEscalation,
    ServiceUnavailable,
    DigitFailure,
    OperatorEnd,
}

impl ClosingReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OtpVerified => "otp_verified",
            Self::PlanCompleted => "plan_completed",
            Self::DigitsSmsFallback => "digits_sms_fallback",
            Self::UserGoodbye => "user_goodbye",
            Self::NoResponse => "no_response",
            Self::Error => "error",
            Self::RiskEscalation => "risk_escalation",
            Self::ServiceUnavailable => "service_unavailable",
            Self::DigitFailure => "failure",
            Self::OperatorEnd => "operator_end",
        }
    }
}

/// Config snapshot taken at session creation (spec §3: "Config snapshot").
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub prompt: Option<String>,
    pub first_message: Option<String>,
    pub customer_name: Option<String>,
    pub purpose_template: Option<String>,
    pub voice_model: Option<String>,
    /// Resolved at session creation if the template named a digit intent
    /// (spec §4.3 Initial-Greeting: "the digit-expectation prompt if a digit
    /// intent was resolved at session creation").
    pub digit_intent: Option<CollectionRequest>,
    pub template_policy: Option<String>,
    /// Which optional tools (spec §9 REDESIGN FLAGS) this call's LLM turns
    /// may invoke.
    pub tool_policy: ToolPolicy,
}

/// Per-call session state (spec §3 Call Session).
pub struct CallSession {
    pub call_id: CallId,
    pub provider_kind: ProviderKind,
    pub chat_id: ChatId,
    pub direction: Direction,
    pub config: SessionConfig,

    pub state: SessionState,
    pub phase: Phase,
    pub interaction_count: u32,
    pub ending: bool,

    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    pub greeting_played: bool,
    pub initial_prompt_played: bool,
    /// Digit capture toggled on top of `Conversing` (spec §4.3: "Digit-Capture
    /// ↕ Conversing").
    pub digit_capture_active: bool,
    /// Whether the request that started the active digit capture asked for
    /// the call to end once its single (non-plan) expectation is satisfied;
    /// plan-driven captures carry their own `end_call_on_success` on the plan
    /// itself and don't need this.
    pub digit_end_call_on_success: bool,
    /// Set the first time any inbound media/DTMF/utterance is observed, used
    /// to reconcile a provider status callback against reality (spec §4.9
    /// `ObservedEvidence::media_observed`).
    pub media_observed: bool,

    /// Used for the 2 s duplicate-utterance filter (spec §4.3 Conversing).
    pub last_utterance: Option<(String, DateTime<Utc>)>,
    pub consecutive_llm_errors: u8,
    pub consecutive_tts_errors: u8,

    pub correlator: Correlator,
    pub phone: Option<String>,
    /// Recent highlight lines shown in the console bubble (spec §4.7
    /// Highlights), capped and de-duplicated by the console renderer.
    pub recent_events: std::collections::VecDeque<String>,
    pub last_agent_text: Option<String>,
}

impl CallSession {
    pub fn new(call_id: CallId, provider_kind: ProviderKind, chat_id: ChatId, direction: Direction, config: SessionConfig, now: DateTime<Utc>) -> Self {
        Self {
            call_id,
            provider_kind,
            chat_id,
            direction,
            config,
            state: SessionState::Connecting,
            phase: Phase::Waiting,
            interaction_count: 0,
            ending: false,
            created_at: now,
            answered_at: None,
            ended_at: None,
            greeting_played: false,
            initial_prompt_played: false,
            digit_capture_active: false,
            digit_end_call_on_success: false,
            media_observed: false,
            last_utterance: None,
            consecutive_llm_errors: 0,
            consecutive_tts_errors: 0,
            correlator: Correlator::new(),
            phone: None,
            recent_events: std::collections::VecDeque::new(),
            last_agent_text: None,
        }
    }
}
