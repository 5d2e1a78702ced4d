//! # Digit Collection Engine
//!
//! Public operations of spec §4.2: normalize and store expectations, record
//! and classify digit input, drive the side effects of a collection result,
//! buffer early input, and run multi-step plans. Per-call state lives behind
//! a [`dashmap::DashMap`] keyed by call id; the circuit breaker
//! (spec §3 Circuit-breaker state) is process-global and shared across every
//! call, per spec §5's note that it "persists across session teardown."

use crate::config::{CollectionPolicyConfig, FINGERPRINT_DEDUP_WINDOW_S};
use crate::digit::circuit_breaker::CircuitBreaker;
use crate::digit::expectation::{self, DigitExpectation, ExpectationParams, HealthStatus, RiskAction};
use crate::digit::outcome::{self, Collection, InputMeta, Reason};
use crate::digit::plan::{self, CaptureMode, DigitPlan, Group, PlanState, PlanStep};
use crate::digit::reprompt::{self, CallerAffect, RepromptPlan};
use crate::digit::sms::SmsSession;
use crate::error::{OrchestratorError, Result};
use crate::types::CallId;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a digit input arrived from (spec §4.2/§4.3: DTMF keys, spoken OTP
/// extraction, or inbound SMS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Dtmf,
    SpokenOtp,
    Sms,
}

/// Options threaded into `handle_collection` (spec §4.2: "consume a
/// Collection and drive side effects").
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleOptions {
    pub caller_affect: Option<CallerAffect>,
    pub allow_spoken_fallback: bool,
}

/// What the orchestrator should do in response to a handled collection.
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// Reprompt the caller and keep the same expectation active.
    Reprompt(RepromptPlan),
    /// The step was accepted; more plan steps remain.
    PlanAdvance { next_prompt: String, step_index: u32, total_steps: u32 },
    /// The plan completed; optionally end the call.
    PlanComplete { completion_message: Option<String>, end_call: bool },
    /// A single (non-plan) expectation was satisfied.
    Accepted { speak_confirmation: bool, masked: String },
    /// Digits with a `route_to_agent` risk action were accepted.
    RouteToAgent,
    /// Retries exhausted; SMS fallback was started.
    SmsFallback { correlation_id: String },
    /// Retries exhausted and SMS isn't available; fall back to conversation.
    VoiceFallback,
    /// Retries/timeout exhausted with no fallback available; end the call.
    EndCall { message: String },
    /// A duplicate re-delivery of an already-accepted step; ignored.
    DuplicateIgnored,
}

struct BufferedInput {
    source: InputSource,
    digits: String,
}

/// Per-call digit engine state (spec §3: zero-or-one Expectation, zero-or-one
/// Plan per call).
#[derive(Default)]
struct CallDigitState {
    expectation: Option<DigitExpectation>,
    plan: Option<DigitPlan>,
    buffered: VecDeque<BufferedInput>,
    sms_session: Option<SmsSession>,
    sms_retry_count: u8,
    risk_score: Option<f64>,
    /// Phone number a caller's `CollectionRequest` offered for SMS fallback,
    /// carried until enough retries accumulate to actually use it (spec §4.2
    /// SMS fallback).
    phone_for_sms: Option<String>,
}

/// Parameters for `request_digit_collection` / `request_digit_collection_plan`
/// (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct CollectionRequest {
    pub profile: Option<String>,
    pub group: Option<Group>,
    pub prompt_text: Option<String>,
    pub first_message: Option<String>,
    pub end_call_on_success: bool,
    pub completion_message: Option<String>,
    pub phone_for_sms: Option<String>,
}

pub struct DigitEngine {
    calls: DashMap<CallId, CallDigitState>,
    circuit_breaker: Arc<CircuitBreaker>,
    policy: CollectionPolicyConfig,
}

impl DigitEngine {
    pub fn new(policy: CollectionPolicyConfig) -> Self {
        Self { calls: DashMap::new(), circuit_breaker: Arc::new(CircuitBreaker::new()), policy }
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        self.circuit_breaker.clone()
    }

    /// Normalize, apply health/risk policy, and store a digit expectation
    /// (spec §4.2 `set expectation`).
    pub fn set_expectation(
        &self,
        call: &CallId,
        params: ExpectationParams,
        health: HealthStatus,
        risk_score: Option<f64>,
    ) -> Result<()> {
        let mut expectation = expectation::normalize(params, health)?;
        if let Some(score) = risk_score {
            self.apply_risk_policy(&mut expectation, score);
        }
        expectation.prompted_at = Some(Utc::now());
        info!(call_id = %call, profile = %expectation.profile_id, "expectation_set");

        let mut state = self.calls.entry(call.clone()).or_default();
        state.risk_score = risk_score;
        state.expectation = Some(expectation);
        Ok(())
    }

    fn apply_risk_policy(&self, expectation: &mut DigitExpectation, score: f64) {
        expectation.risk_score = Some(score);
        if score >= self.policy.risk_force_confirmation {
            expectation.speak_confirmation = true;
        }
        if score >= self.policy.risk_dtmf_only {
            expectation.allow_spoken_fallback = false;
            expectation.force_dtmf_only = true;
        }
        if score >= self.policy.risk_route_to_agent {
            expectation.risk_action = Some(RiskAction::RouteToAgent);
        }
    }

    /// Append a digit input arriving before any expectation exists
    /// (spec §4.2 `buffer digits`).
    pub fn buffer_digits(&self, call: &CallId, source: InputSource, digits: impl Into<String>) {
        let mut state = self.calls.entry(call.clone()).or_default();
        state.buffered.push_back(BufferedInput { source, digits: digits.into() });
    }

    /// Drain buffered input into the now-installed expectation, stopping the
    /// moment the expectation disappears (spec §4.2 `flush buffered digits`).
    pub fn flush_buffered_digits(&self, call: &CallId) -> Result<Vec<Collection>> {
        let mut collections = Vec::new();
        loop {
            let mut state = self
                .calls
                .get_mut(call)
                .ok_or_else(|| OrchestratorError::NoSuchSession(call.to_string()))?;
            if state.expectation.is_none() {
                break;
            }
            let Some(item) = state.buffered.pop_front() else { break };
            let expectation = state.expectation.as_mut().expect("checked above");
            let collection = outcome::record(expectation, &item.digits, InputMeta::default());
            collections.push(collection);
        }
        Ok(collections)
    }

    /// Record a digit input against the active expectation (spec §4.2
    /// `record digits`).
    pub fn record_digits(&self, call: &CallId, digits: &str, meta: InputMeta) -> Result<Collection> {
        let mut state = self
            .calls
            .get_mut(call)
            .ok_or_else(|| OrchestratorError::NoSuchSession(call.to_string()))?;
        let expectation = state
            .expectation
            .as_mut()
            .ok_or_else(|| OrchestratorError::InvalidExpectation("no active expectation".into()))?;
        Ok(outcome::record(expectation, digits, meta))
    }

    /// Consume a collection and drive side effects: reprompt, plan advance,
    /// fallback, or call end (spec §4.2 `handle collection`).
    pub fn handle_collection(
        &self,
        call: &CallId,
        collection: &Collection,
        _source: InputSource,
        options: HandleOptions,
    ) -> Result<HandleOutcome> {
        self.circuit_breaker.record(!collection.accepted && collection.reason.is_some());

        if !collection.accepted {
            let reason = collection.reason.expect("rejected collection always has a reason");
            let mut state = self
                .calls
                .get_mut(call)
                .ok_or_else(|| OrchestratorError::NoSuchSession(call.to_string()))?;
            let expectation = state
                .expectation
                .as_ref()
                .ok_or_else(|| OrchestratorError::InvalidExpectation("no active expectation".into()))?;

            if crate::digit::sms::counts_toward_sms_fallback(reason) {
                state.sms_retry_count = state.sms_retry_count.saturating_add(1);
            }

            if collection.fallback {
                return self.handle_exhaustion(call, &mut state, reason, options);
            }

            let affect = options.caller_affect.unwrap_or(CallerAffect::Calm);
            let attempt_index = collection.retries.saturating_sub(1) as usize;
            return Ok(HandleOutcome::Reprompt(reprompt::build(expectation, reason, attempt_index, affect)));
        }

        // Accepted.
        let mut state = self
            .calls
            .get_mut(call)
            .ok_or_else(|| OrchestratorError::NoSuchSession(call.to_string()))?;

        if let Some(RiskAction::RouteToAgent) = state.expectation.as_ref().and_then(|e| e.risk_action) {
            state.expectation = None;
            return Ok(HandleOutcome::RouteToAgent);
        }

        if state.plan.is_some() {
            return self.handle_plan_acceptance(call, &mut state, collection);
        }

        let speak_confirmation = state.expectation.as_ref().map(|e| e.speak_confirmation).unwrap_or(false);
        let masked = collection.masked.clone();
        state.expectation = None;
        Ok(HandleOutcome::Accepted { speak_confirmation, masked })
    }

    /// Plan-step acceptance: fingerprint-dedupe, then advance or complete
    /// (spec §4.2 Plan execution).
    fn handle_plan_acceptance(
        &self,
        call: &CallId,
        state: &mut CallDigitState,
        collection: &Collection,
    ) -> Result<HandleOutcome> {
        let profile = state.expectation.as_ref().map(|e| e.profile_id.clone()).unwrap_or_default();
        let plan = state.plan.as_mut().expect("caller checked plan.is_some()");
        let fingerprint = compute_fingerprint(&collection.digits, &profile, plan.step_index_1based());

        let now = Utc::now();
        if let Some((last_fp, at)) = &plan.last_fingerprint {
            if *last_fp == fingerprint && (now - *at).num_seconds() < FINGERPRINT_DEDUP_WINDOW_S as i64 {
                debug!(call_id = %call, "duplicate plan-step fingerprint, dropping");
                return Ok(HandleOutcome::DuplicateIgnored);
            }
        }
        plan.last_fingerprint = Some((fingerprint, now));

        if plan.has_more_steps() {
            plan.advance();
            let next_step = plan.current_step().expect("has_more_steps checked").clone();
            plan.state = PlanState::CollectStep;
            let step_index = plan.step_index_1based();
            let total_steps = plan.total_steps();
            let plan_id = plan.plan_id.clone();

            let params = ExpectationParams {
                profile: Some(next_step.profile.clone()),
                plan: Some(expectation::PlanLinkage { plan_id, step_index, total_steps }),
                ..next_step.params
            };
            let mut next_expectation = expectation::normalize(params, HealthStatus::Healthy)?;
            next_expectation.prompted_at = Some(now);
            state.expectation = Some(next_expectation);

            Ok(HandleOutcome::PlanAdvance {
                next_prompt: format!("Now please enter your {}.", next_step.profile),
                step_index,
                total_steps,
            })
        } else {
            plan.state = PlanState::Complete;
            let end_call = plan.end_call_on_success;
            let message = plan.completion_message.clone();
            state.plan = None;
            state.expectation = None;
            Ok(HandleOutcome::PlanComplete { completion_message: message, end_call })
        }
    }

    fn handle_exhaustion(
        &self,
        call: &CallId,
        state: &mut CallDigitState,
        reason: Reason,
        options: HandleOptions,
    ) -> Result<HandleOutcome> {
        let allow_spoken_fallback =
            state.expectation.as_ref().map(|e| e.allow_spoken_fallback).unwrap_or(false) || options.allow_spoken_fallback;
        let timeout_failure_message = state
            .expectation
            .as_ref()
            .map(|e| e.reprompts.timeout_failure_message.clone())
            .unwrap_or_default();
        let failure_message =
            state.expectation.as_ref().map(|e| e.reprompts.failure_message.clone()).unwrap_or_default();

        let sms_eligible = crate::digit::sms::counts_toward_sms_fallback(reason)
            && state.sms_retry_count >= self.policy.sms_fallback_min_retries;

        if sms_eligible {
            let phone = state.sms_session.as_ref().map(|s| s.phone.clone()).or_else(|| state.phone_for_sms.clone());
            if let Some(phone) = phone {
                let correlation_id = SmsSession::new(call.as_str(), phone.clone()).correlation_id;
                state.sms_session = Some(SmsSession { correlation_id: correlation_id.clone(), phone, started_at: Utc::now() });
                state.expectation = None;
                return Ok(HandleOutcome::SmsFallback { correlation_id });
            }
        }

        if allow_spoken_fallback {
            state.expectation = None;
            return Ok(HandleOutcome::VoiceFallback);
        }

        state.expectation = None;
        let message = if reason == Reason::Incomplete || reason == Reason::Timeout { timeout_failure_message } else { failure_message };
        Ok(HandleOutcome::EndCall { message })
    }

    /// Create a single-step plan, or a grouped plan if `request.group` (or a
    /// keyword match against `prompt_text`) resolves to a known group
    /// (spec §4.2 `request digit collection`).
    pub fn request_digit_collection(&self, call: &CallId, request: CollectionRequest) -> Result<String> {
        if self.circuit_breaker.is_open() {
            warn!(call_id = %call, "DigitCaptureAborted reason=circuit_open");
            return Err(OrchestratorError::CircuitOpen);
        }

        let group = request.group.or_else(|| request.prompt_text.as_deref().and_then(plan::infer_group));
        if let Some(group) = group {
            let mut built_plan = DigitPlan::for_group(format!("plan-{call}"), group);
            built_plan.end_call_on_success = request.end_call_on_success;
            built_plan.completion_message = request.completion_message.clone();
            built_plan.state = PlanState::PlayFirstMessage;
            let first_step = built_plan.current_step().expect("group plan has steps").clone();
            built_plan.state = PlanState::CollectStep;

            let mut state = self.calls.entry(call.clone()).or_default();
            state.plan = Some(built_plan);
            state.phone_for_sms = request.phone_for_sms.clone();
            drop(state);

            let params = ExpectationParams {
                profile: Some(first_step.profile.clone()),
                prompt_text: request.prompt_text.clone(),
                plan: Some(expectation::PlanLinkage {
                    plan_id: format!("plan-{call}"),
                    step_index: 1,
                    total_steps: group.steps().len() as u32,
                }),
                ..Default::default()
            };
            self.set_expectation(call, params, HealthStatus::Healthy, None)?;
            return Ok(first_step.profile);
        }

        let profile = request.profile.clone().unwrap_or_else(|| "generic".to_string());
        {
            let mut state = self.calls.entry(call.clone()).or_default();
            state.phone_for_sms = request.phone_for_sms.clone();
        }
        let params = ExpectationParams {
            profile: Some(profile.clone()),
            prompt_text: request.prompt_text.clone(),
            ..Default::default()
        };
        self.set_expectation(call, params, HealthStatus::Healthy, None)?;
        Ok(profile)
    }

    /// Create an explicit multi-step plan from caller-supplied steps
    /// (spec §4.2 `request digit collection plan`).
    pub fn request_digit_collection_plan(
        &self,
        call: &CallId,
        steps: Vec<PlanStep>,
        capture_mode: CaptureMode,
        end_call_on_success: bool,
        completion_message: Option<String>,
    ) -> Result<()> {
        if self.circuit_breaker.is_open() {
            return Err(OrchestratorError::CircuitOpen);
        }
        let mut built = DigitPlan::new(format!("plan-{call}"), steps);
        built.capture_mode = capture_mode;
        built.end_call_on_success = end_call_on_success;
        built.completion_message = completion_message;
        built.state = PlanState::PlayFirstMessage;
        let first = built.current_step().expect("plan must have at least one step").clone();
        built.state = PlanState::CollectStep;
        let total_steps = built.total_steps();

        let mut state = self.calls.entry(call.clone()).or_default();
        state.plan = Some(built);
        drop(state);

        let params = ExpectationParams {
            profile: Some(first.profile.clone()),
            plan: Some(crate::digit::expectation::PlanLinkage {
                plan_id: format!("plan-{call}"),
                step_index: 1,
                total_steps,
            }),
            ..first.params
        };
        self.set_expectation(call, params, HealthStatus::Healthy, None)
    }

    /// React to the digit-collection timer firing (spec §4.3 Prompt-delay
    /// timer / §4.2 Failure semantics: "Timeout exhaustion is handled
    /// symmetrically using the timeout-failure message"). A timeout always
    /// counts as a retry, regardless of channel.
    pub fn handle_timeout(&self, call: &CallId, options: HandleOptions) -> Result<HandleOutcome> {
        self.circuit_breaker.record(true);
        let mut state = self
            .calls
            .get_mut(call)
            .ok_or_else(|| OrchestratorError::NoSuchSession(call.to_string()))?;
        state.sms_retry_count = state.sms_retry_count.saturating_add(1);
        let attempt_index = {
            let expectation = state
                .expectation
                .as_mut()
                .ok_or_else(|| OrchestratorError::InvalidExpectation("no active expectation".into()))?;
            expectation.retries += 1;
            expectation.retries.saturating_sub(1) as usize
        };
        if state.expectation.as_ref().map(|e| e.is_exhausted()).unwrap_or(true) {
            return self.handle_exhaustion(call, &mut state, crate::digit::outcome::Reason::Timeout, options);
        }
        let expectation = state.expectation.as_ref().expect("checked above");
        Ok(HandleOutcome::Reprompt(reprompt::timeout_reprompt(expectation, attempt_index)))
    }

    /// Bounds of the active expectation, if any, for callers that need to
    /// mask digit content against the expectation currently in force rather
    /// than the default OTP bounds (spec §4.5: "expectation bounds, if one is
    /// active").
    pub fn expectation_bounds(&self, call: &CallId) -> Option<(u8, u8)> {
        let state = self.calls.get(call)?;
        let expectation = state.expectation.as_ref()?;
        Some((expectation.min_digits, expectation.max_digits))
    }

    /// Whether a spoken (non-DTMF) digit input is acceptable against the
    /// active expectation right now (spec §4.2 Risk policy: a high risk score
    /// forces `force_dtmf_only`, overriding whatever the caller requested).
    pub fn spoken_input_allowed(&self, call: &CallId) -> bool {
        self.calls.get(call).and_then(|s| s.expectation.as_ref().map(|e| !e.force_dtmf_only)).unwrap_or(false)
    }

    /// Profile id of the active expectation, if any, for callers persisting a
    /// digit event row against it.
    pub fn active_profile(&self, call: &CallId) -> Option<String> {
        self.calls.get(call)?.expectation.as_ref().map(|e| e.profile_id.clone())
    }

    /// Bare `timeout_s` of the active expectation in milliseconds, for
    /// re-arming the digit timer after a reprompt or plan advance rather than
    /// the original prompt-inclusive delay in [`Self::expectation_timeout_ms`].
    pub fn retry_timeout_ms(&self, call: &CallId) -> Option<u64> {
        let state = self.calls.get(call)?;
        let expectation = state.expectation.as_ref()?;
        Some(expectation.timeout_s * 1000)
    }

    /// Total delay, from the prompt timestamp, after which an unanswered
    /// expectation's digit timer should fire (spec §5 Timeouts: `prompt_delay
    /// + timeout_s · 1000`).
    pub fn expectation_timeout_ms(&self, call: &CallId) -> Option<u64> {
        let state = self.calls.get(call)?;
        let expectation = state.expectation.as_ref()?;
        Some(expectation.effective_prompt_delay_ms + expectation.timeout_s * 1000)
    }

    /// Idempotent teardown of all digit state for a call (spec §4.2
    /// `clear call state`).
    pub fn clear_call_state(&self, call: &CallId) {
        self.calls.remove(call);
    }

    /// Match an inbound SMS to a call by phone number and feed its digits
    /// through the active expectation (spec §4.2 SMS fallback).
    pub fn handle_incoming_sms(&self, from_phone: &str, body: &str) -> Option<(CallId, Collection)> {
        let digits = crate::digit::sms::digits_from_sms_body(body);
        for mut entry in self.calls.iter_mut() {
            let matches = entry.sms_session.as_ref().map(|s| s.phone == from_phone).unwrap_or(false);
            if matches {
                if let Some(expectation) = entry.expectation.as_mut() {
                    let collection = outcome::record(expectation, &digits, InputMeta::default());
                    return Some((entry.key().clone(), collection));
                }
            }
        }
        None
    }

    #[cfg(test)]
    pub fn has_expectation(&self, call: &CallId) -> bool {
        self.calls.get(call).map(|s| s.expectation.is_some()).unwrap_or(false)
    }

    #[cfg(test)]
    pub fn plan_state(&self, call: &CallId) -> Option<PlanState> {
        self.calls.get(call).and_then(|s| s.plan.as_ref().map(|p| p.state))
    }
}

/// `fingerprint = SHA-256(digits) ⨁ profile ⨁ plan-step-index` (spec §4.2
/// Plan execution). We render as a hex digest over the concatenation rather
/// than a literal XOR of unrelated-width values, which the spec's notation
/// does not pin down bit-for-bit; any collision-resistant combination
/// satisfies the stated purpose (duplicate-redelivery suppression).
fn compute_fingerprint(digits: &str, profile: &str, step_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digits.as_bytes());
    hasher.update(profile.as_bytes());
    hasher.update(step_index.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digit::outcome::InputMeta;

    fn call() -> CallId {
        CallId::new("call-1")
    }

    #[test]
    fn happy_otp_flow_accepts_on_final_digit() {
        let engine = DigitEngine::new(CollectionPolicyConfig::default());
        let c = call();
        engine
            .set_expectation(
                &c,
                ExpectationParams {
                    profile: Some("verification".into()),
                    force_exact_length: Some(6),
                    ..Default::default()
                },
                HealthStatus::Healthy,
                None,
            )
            .unwrap();

        let meta = InputMeta { asr_confidence: Some(0.9), ..Default::default() };
        for d in ["4", "8", "2", "9", "1"] {
            let collection = engine.record_digits(&c, d, meta).unwrap();
            assert!(!collection.accepted);
        }
        let last = engine.record_digits(&c, "7", meta).unwrap();
        assert!(last.accepted);
        let outcome = engine.handle_collection(&c, &last, InputSource::Dtmf, HandleOptions::default()).unwrap();
        match outcome {
            HandleOutcome::Accepted { masked, .. } => assert_eq!(masked, "******"),
            other => panic!("expected Accepted, got {other:?}"),
        }
    }

    #[test]
    fn banking_group_plan_completes_after_both_steps() {
        let engine = DigitEngine::new(CollectionPolicyConfig::default());
        let c = call();
        engine
            .request_digit_collection(
                &c,
                CollectionRequest {
                    prompt_text: Some("Please enter your routing number and then your account number".into()),
                    end_call_on_success: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(engine.plan_state(&c), Some(PlanState::CollectStep));

        let meta = InputMeta { asr_confidence: Some(0.9), ..Default::default() };
        let routing = engine.record_digits(&c, "021000021", meta).unwrap();
        assert!(routing.accepted);
        let after_routing =
            engine.handle_collection(&c, &routing, InputSource::Dtmf, HandleOptions::default()).unwrap();
        assert!(matches!(after_routing, HandleOutcome::PlanAdvance { step_index: 2, total_steps: 2, .. }));

        let account = engine.record_digits(&c, "123456789012", meta).unwrap();
        assert!(account.accepted);
        let after_account =
            engine.handle_collection(&c, &account, InputSource::Dtmf, HandleOptions::default()).unwrap();
        match after_account {
            HandleOutcome::PlanComplete { end_call, .. } => assert!(end_call),
            other => panic!("expected PlanComplete, got {other:?}"),
        }
    }

    #[test]
    fn circuit_open_rejects_new_requests() {
        let engine = DigitEngine::new(CollectionPolicyConfig::default());
        engine.circuit_breaker.force_open_for_test();
        let result = engine.request_digit_collection(&call(), CollectionRequest::default());
        assert!(matches!(result, Err(OrchestratorError::CircuitOpen)));
    }

    #[test]
    fn buffered_digits_flush_once_expectation_installed() {
        let engine = DigitEngine::new(CollectionPolicyConfig::default());
        let c = call();
        engine.buffer_digits(&c, InputSource::Dtmf, "4");
        engine.buffer_digits(&c, InputSource::Dtmf, "8");
        engine
            .set_expectation(
                &c,
                ExpectationParams { profile: Some("pin".into()), force_exact_length: Some(4), ..Default::default() },
                HealthStatus::Healthy,
                None,
            )
            .unwrap();
        let collections = engine.flush_buffered_digits(&c).unwrap();
        assert_eq!(collections.len(), 2);
    }

    #[test]
    fn timeout_reprompts_until_retries_exhausted_then_falls_back() {
        let engine = DigitEngine::new(CollectionPolicyConfig::default());
        let c = call();
        engine
            .set_expectation(
                &c,
                ExpectationParams { profile: Some("pin".into()), max_retries: Some(1), ..Default::default() },
                HealthStatus::Healthy,
                None,
            )
            .unwrap();
        let first = engine.handle_timeout(&c, HandleOptions::default()).unwrap();
        assert!(matches!(first, HandleOutcome::Reprompt(_)));
        let second = engine.handle_timeout(&c, HandleOptions::default()).unwrap();
        assert!(matches!(second, HandleOutcome::EndCall { .. } | HandleOutcome::VoiceFallback | HandleOutcome::SmsFallback { .. }));
    }

    #[test]
    fn clear_call_state_is_idempotent() {
        let engine = DigitEngine::new(CollectionPolicyConfig::default());
        let c = call();
        engine.clear_call_state(&c);
        engine.clear_call_state(&c);
    }
}
