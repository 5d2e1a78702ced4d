//! Digit-Capture (spec §4.3 / §4.2). Starts a collection request, feeds DTMF
//! and spoken-OTP candidates through the [`crate::digit::DigitEngine`], and
//! turns each [`HandleOutcome`] into the TTS/console/timer/closing side
//! effects the same way [`super::conversation`] turns an LLM turn into them.

use super::types::{ClosingReason, SessionState};
use super::Orchestrator;
use crate::digit::{CollectionRequest, HandleOptions, HandleOutcome, InputSource};
use crate::digit::outcome::{Collection, InputMeta};
use crate::digit::reprompt::CallerAffect;
use crate::persistence::schema::{CallStateRow, DigitEventRow};
use crate::timers::TimerKind;
use crate::transcript;
use crate::types::{CallId, Phase};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn source_str(source: InputSource) -> &'static str {
    match source {
        InputSource::Dtmf => "dtmf",
        InputSource::SpokenOtp => "spoken_otp",
        InputSource::Sms => "sms",
    }
}

impl Orchestrator {
    /// Install a digit expectation (or group/plan) and speak its prompt
    /// (spec §4.3 Initial-Greeting / Digit-Capture entry points).
    pub async fn start_digit_capture(self: &Arc<Self>, call: &CallId, mut request: CollectionRequest) {
        let Some(handle) = self.registry.get(call) else { return };
        let prompt = request.prompt_text.clone().or_else(|| request.first_message.clone());
        let end_call_on_success = request.end_call_on_success;
        if request.phone_for_sms.is_none() {
            request.phone_for_sms = handle.lock().phone.clone();
        }
        let phone_for_sms = request.phone_for_sms.clone();

        match self.digit_engine.request_digit_collection(call, request) {
            Ok(profile) => {
                {
                    let mut session = handle.lock();
                    session.state = SessionState::DigitCapture;
                    session.digit_capture_active = true;
                    session.digit_end_call_on_success = end_call_on_success;
                    session.phase = Phase::AgentSpeaking;
                }
                let text = prompt.unwrap_or_else(|| format!("Please enter your {profile}."));
                if !self.speak_digit_prompt(call, &text).await {
                    return;
                }
                self.arm_initial_digit_timeout(call);
                self.render_console(call, true).await;
            }
            // While the breaker is open, a new expectation falls straight back
            // to SMS (when a phone number is available) rather than prompting
            // the caller into a channel the breaker has already given up on
            // (spec §4.2 Circuit breaker: "every new expectation immediately
            // triggers the SMS-fallback path ... or a graceful end").
            Err(crate::error::OrchestratorError::CircuitOpen) => {
                warn!(call_id = %call, "digit_capture_start_failed reason=circuit_open");
                self.persist_digit_capture_aborted(call, "circuit_open").await;
                if let Some(phone) = phone_for_sms {
                    let correlation_id = crate::digit::sms::correlation_id(call.as_str());
                    let body = format!("Reply with the code we asked for on the call. Reference: {correlation_id}");
                    if let Err(err) = self.sms.send_sms(&phone, &body, None, &correlation_id).await {
                        warn!(call_id = %call, error = %err, "digit_sms_fallback_send_failed");
                    }
                    self.close_call(call, ClosingReason::DigitsSmsFallback, None).await;
                } else {
                    self.close_call(call, ClosingReason::ServiceUnavailable, None).await;
                }
            }
            Err(err) => {
                warn!(call_id = %call, error = %err, "digit_capture_start_failed");
                self.close_call(call, ClosingReason::ServiceUnavailable, None).await;
            }
        }
    }

    /// Install an explicit multi-step digit plan and speak its first step's
    /// prompt (spec §4.2 `request digit collection plan`; entry point for the
    /// `collect_multiple_digits` tool, spec §9 REDESIGN FLAGS).
    pub(crate) async fn start_digit_plan_capture(
        self: &Arc<Self>,
        call: &CallId,
        steps: Vec<crate::digit::PlanStep>,
        capture_mode: crate::digit::CaptureMode,
        end_call_on_success: bool,
    ) {
        let Some(handle) = self.registry.get(call) else { return };
        match self
            .digit_engine
            .request_digit_collection_plan(call, steps, capture_mode, end_call_on_success, None)
        {
            Ok(()) => {
                {
                    let mut session = handle.lock();
                    session.state = SessionState::DigitCapture;
                    session.digit_capture_active = true;
                    session.digit_end_call_on_success = end_call_on_success;
                    session.phase = Phase::AgentSpeaking;
                }
                let profile = self.digit_engine.active_profile(call).unwrap_or_default();
                if !self.speak_digit_prompt(call, &format!("Please enter your {profile}.")).await {
                    return;
                }
                self.arm_initial_digit_timeout(call);
                self.render_console(call, true).await;
            }
            Err(err) => {
                warn!(call_id = %call, error = %err, "digit_plan_start_failed");
                self.close_call(call, ClosingReason::ServiceUnavailable, None).await;
            }
        }
    }

    /// DTMF keypress entry point for the media-stream handler in `server.rs`.
    /// Digits arriving before any expectation exists are buffered rather than
    /// dropped (spec §4.2 `buffer digits`).
    pub async fn on_dtmf_key(self: &Arc<Self>, call: &CallId, digit: &str, gap_since_last_ms: Option<u64>) {
        self.note_media_activity(call);
        let meta = InputMeta { gap_since_last_ms, asr_confidence: None };
        match self.digit_engine.record_digits(call, digit, meta) {
            Ok(collection) => self.apply_collection(call, collection, InputSource::Dtmf).await,
            Err(crate::error::OrchestratorError::InvalidExpectation(_)) => {
                self.digit_engine.buffer_digits(call, InputSource::Dtmf, digit);
            }
            Err(err) => warn!(call_id = %call, error = %err, "dtmf_digit_dropped"),
        }
    }

    /// Route a spoken final utterance through OTP extraction while digit
    /// capture is active (spec §4.3: "every utterance is withheld from the
    /// LLM"; spec §4.5 extraction).
    pub async fn on_spoken_digits_candidate(self: &Arc<Self>, call: &CallId, text: &str) {
        if !self.digit_engine.spoken_input_allowed(call) {
            debug!(call_id = %call, "spoken_digits_not_allowed");
            return;
        }
        let bounds = self.digit_engine.expectation_bounds(call);
        let Some(code) = transcript::extract_otp(text, bounds) else { return };
        let meta = InputMeta::default();
        match self.digit_engine.record_digits(call, &code, meta) {
            Ok(collection) => self.apply_collection(call, collection, InputSource::SpokenOtp).await,
            Err(err) => warn!(call_id = %call, error = %err, "spoken_digit_dropped"),
        }
    }

    /// React to a fired digit-collection timer (spec §4.2 Failure semantics).
    pub async fn on_digit_timer_fired(self: &Arc<Self>, call: &CallId) {
        let Some(handle) = self.registry.get(call) else { return };
        if !handle.lock().digit_capture_active {
            return;
        }
        match self.digit_engine.handle_timeout(call, HandleOptions::default()) {
            Ok(outcome) => self.apply_outcome(call, outcome).await,
            Err(err) => warn!(call_id = %call, error = %err, "digit_timeout_handling_failed"),
        }
    }

    /// Feed digits arrived over an inbound SMS correlation back into the
    /// engine (spec §4.2 SMS fallback).
    pub async fn on_inbound_sms(self: &Arc<Self>, from_phone: &str, body: &str) {
        let Some((call, collection)) = self.digit_engine.handle_incoming_sms(from_phone, body) else {
            return;
        };
        self.apply_collection(&call, collection, InputSource::Sms).await;
    }

    async fn apply_collection(self: &Arc<Self>, call: &CallId, collection: Collection, source: InputSource) {
        let profile = self.digit_engine.active_profile(call).unwrap_or_default();
        self.persist_digit_event(call, &profile, &collection, source).await;

        let options = HandleOptions {
            caller_affect: Some(CallerAffect::Calm),
            allow_spoken_fallback: matches!(source, InputSource::SpokenOtp),
        };
        match self.digit_engine.handle_collection(call, &collection, source, options) {
            Ok(outcome) => self.apply_outcome(call, outcome).await,
            Err(err) => {
                warn!(call_id = %call, error = %err, "digit_collection_handling_failed");
                self.close_call(call, ClosingReason::ServiceUnavailable, None).await;
            }
        }
    }

    async fn apply_outcome(self: &Arc<Self>, call: &CallId, outcome: HandleOutcome) {
        match outcome {
            HandleOutcome::Reprompt(plan) => {
                if !plan.delay.is_zero() {
                    tokio::time::sleep(plan.delay).await;
                }
                if !self.speak_digit_prompt(call, &plan.text).await {
                    return;
                }
                self.arm_retry_digit_timeout(call);
                self.note_digit_event_line(call, "Reprompted caller for digits").await;
            }
            HandleOutcome::PlanAdvance { next_prompt, step_index, total_steps } => {
                if !self.speak_digit_prompt(call, &next_prompt).await {
                    return;
                }
                self.arm_retry_digit_timeout(call);
                self.note_digit_event_line(call, &format!("Step {step_index}/{total_steps}")).await;
            }
            HandleOutcome::PlanComplete { completion_message, end_call } => {
                self.timers.clear(call, TimerKind::DigitTimeout);
                if end_call {
                    self.close_call(call, ClosingReason::PlanCompleted, completion_message).await;
                } else {
                    if let Some(message) = &completion_message {
                        if !self.speak_digit_prompt(call, message).await {
                            return;
                        }
                    }
                    self.return_to_conversing(call).await;
                }
            }
            HandleOutcome::Accepted { speak_confirmation, masked } => {
                self.timers.clear(call, TimerKind::DigitTimeout);
                if speak_confirmation && !self.speak_digit_prompt(call, &format!("Got it, I have {masked}. Thank you.")).await {
                    return;
                }
                let end_call = self.registry.get(call).map(|h| h.lock().digit_end_call_on_success).unwrap_or(false);
                if end_call {
                    self.close_call(call, ClosingReason::OtpVerified, None).await;
                } else {
                    self.return_to_conversing(call).await;
                }
            }
            HandleOutcome::RouteToAgent => {
                self.timers.clear(call, TimerKind::DigitTimeout);
                self.close_call(call, ClosingReason::RiskEscalation, None).await;
            }
            HandleOutcome::SmsFallback { correlation_id } => {
                self.timers.clear(call, TimerKind::DigitTimeout);
                let phone = self.registry.get(call).and_then(|h| h.lock().phone.clone());
                if let Some(phone) = phone {
                    let body = format!("Reply with the code we asked for on the call. Reference: {correlation_id}");
                    if let Err(err) = self.sms.send_sms(&phone, &body, None, &correlation_id).await {
                        warn!(call_id = %call, error = %err, "digit_sms_fallback_send_failed");
                    }
                }
                self.close_call(call, ClosingReason::DigitsSmsFallback, None).await;
            }
            HandleOutcome::VoiceFallback => {
                self.timers.clear(call, TimerKind::DigitTimeout);
                if !self.speak_digit_prompt(call, "Let's try that a different way. Please tell me the code now.").await {
                    return;
                }
                self.return_to_conversing(call).await;
            }
            HandleOutcome::EndCall { message } => {
                self.timers.clear(call, TimerKind::DigitTimeout);
                self.close_call(call, ClosingReason::DigitFailure, Some(message)).await;
            }
            HandleOutcome::DuplicateIgnored => {
                debug!(call_id = %call, "duplicate_digit_input_ignored");
            }
        }
    }

    /// Clear `digit_capture_active`, drop back into `Conversing`, and re-arm
    /// the silence timer the same way `on_stream_connected` does when no
    /// digit intent is configured.
    async fn return_to_conversing(self: &Arc<Self>, call: &CallId) {
        let Some(handle) = self.registry.get(call) else { return };
        {
            let mut session = handle.lock();
            session.state = SessionState::Conversing;
            session.digit_capture_active = false;
            session.phase = Phase::Listening;
        }
        self.timers.set(call.clone(), TimerKind::Silence, self.config.silence_timeout);
        self.render_console(call, true).await;
    }

    /// Speak a digit-capture prompt, retrying once with a fallback line on a
    /// transient TTS error; closes the call on a second failure (spec §4.3
    /// Failure model / §7 "Transient TTS"), matching `on_stream_connected`'s
    /// greeting fallback. Returns `false` when the call was closed so the
    /// caller can skip any follow-up (timer arming, state transitions).
    pub(crate) async fn speak_digit_prompt(self: &Arc<Self>, call: &CallId, text: &str) -> bool {
        let Some(spoken) = self.speak_with_fallback(call, text, 0, "digit_prompt").await else {
            self.close_call(call, ClosingReason::Error, None).await;
            return false;
        };
        if let Some(handle) = self.registry.get(call) {
            handle.lock().last_agent_text = Some(spoken);
        }
        true
    }

    fn arm_initial_digit_timeout(&self, call: &CallId) {
        if let Some(ms) = self.digit_engine.expectation_timeout_ms(call) {
            self.timers.set(call.clone(), TimerKind::DigitTimeout, Duration::from_millis(ms));
        }
    }

    fn arm_retry_digit_timeout(&self, call: &CallId) {
        if let Some(ms) = self.digit_engine.retry_timeout_ms(call) {
            self.timers.set(call.clone(), TimerKind::DigitTimeout, Duration::from_millis(ms));
        }
    }

    async fn note_digit_event_line(&self, call: &CallId, line: &str) {
        let Some(handle) = self.registry.get(call) else { return };
        {
            let mut session = handle.lock();
            session.recent_events.push_back(line.to_string());
            if session.recent_events.len() > 8 {
                session.recent_events.pop_front();
            }
        }
        self.render_console(call, false).await;
    }

    /// Persist the `DigitCaptureAborted` audit event (spec §4.2 Circuit
    /// breaker: "an audit event `DigitCaptureAborted reason=circuit_open` is
    /// emitted"), the same `insert_call_state` row the closing sequence uses
    /// for `call_ending`.
    async fn persist_digit_capture_aborted(&self, call: &CallId, reason: &str) {
        let payload = serde_json::json!({ "reason": reason }).to_string();
        let _ = self
            .store
            .insert_call_state(&CallStateRow {
                call_id: call.to_string(),
                event_type: "DigitCaptureAborted".to_string(),
                payload_json: Some(payload),
                created_at: Utc::now(),
            })
            .await;
    }

    async fn persist_digit_event(&self, call: &CallId, profile: &str, collection: &Collection, source: InputSource) {
        let row = DigitEventRow {
            call_id: call.to_string(),
            source: source_str(source).to_string(),
            profile: profile.to_string(),
            digits_opaque: Some(collection.digits.clone()),
            length: collection.length as i64,
            accepted: collection.accepted,
            reason: collection.reason.map(|r| r.to_string()),
            metadata_json: Some(
                serde_json::json!({
                    "confidence": collection.confidence,
                    "attempt_count": collection.attempt_count,
                    "retries": collection.retries,
                })
                .to_string(),
            ),
            created_at: Utc::now(),
        };
        let _ = self.store.insert_digit_event(&row, self.config.collection_policy.compliance_mode).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fakes::*;
    use crate::config::OrchestratorConfig;
    use crate::console::Direction as ConsoleDirection;
    use crate::orchestrator::types::SessionConfig;
    use crate::orchestrator::Dependencies;
    use crate::persistence::InMemoryCallStore;
    use crate::types::{ChatId, ProviderKind};

    fn deps() -> Dependencies {
        Dependencies {
            store: Arc::new(InMemoryCallStore::new()),
            stt: Arc::new(FakeSttAdapter::default()),
            llm: Arc::new(FakeLlmAdapter::default()),
            tts: Arc::new(FakeTtsAdapter::default()),
            sms: Arc::new(FakeSmsAdapter::default()),
            chat: Arc::new(FakeChatAdapter::default()),
            telephony: Arc::new(FakeTelephonyAdapter::default()),
            config: OrchestratorConfig::default(),
        }
    }

    #[tokio::test]
    async fn accepted_single_expectation_ends_call_when_requested() {
        let orch = Orchestrator::spawn(deps());
        let call = CallId::new("call-dc-1");
        orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-1"), ConsoleDirection::Inbound, Some("+15551234567".into()), SessionConfig::default()).await;

        orch.start_digit_capture(
            &call,
            CollectionRequest {
                profile: Some("pin".into()),
                end_call_on_success: true,
                ..Default::default()
            },
        )
        .await;
        assert!(orch.digit_engine.has_expectation(&call));

        for d in ["1", "4", "7", "2"] {
            orch.on_dtmf_key(&call, d, Some(400)).await;
        }

        // Call should have been torn down by the Accepted+end_call path.
        assert!(orch.registry.get(&call).is_none());
    }

    #[tokio::test]
    async fn buffered_dtmf_before_capture_starts_does_not_panic() {
        let orch = Orchestrator::spawn(deps());
        let call = CallId::new("call-dc-2");
        orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-2"), ConsoleDirection::Inbound, None, SessionConfig::default()).await;
        orch.on_dtmf_key(&call, "4", None).await;
        orch.on_dtmf_key(&call, "8", None).await;
        orch.shutdown();
    }
}
