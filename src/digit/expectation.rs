//! Digit expectation: the configuration describing what digits a caller is
//! supposed to enter next (spec §3 Digit Expectation, §4.2 Normalization).

use crate::config::{
    self, DIGIT_MAX_RETRIES_MAX, DIGIT_MIN_COLLECT_DELAY_FLOOR_MS,
    DIGIT_MIN_COLLECT_DELAY_SECONDARY_FLOOR_MS, DIGIT_TIMEOUT_MAX_S, DIGIT_TIMEOUT_MIN_S,
};
use crate::error::{OrchestratorError, Result};
use crate::profile::{self, ProfileRow};
use chrono::{DateTime, Utc};

/// Channel a digit is entered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Dtmf,
    Sms,
}

/// Confirmation style spoken back once digits are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStyle {
    None,
    Last4,
    SpokenAmount,
}

/// Risk-driven action attached to an expectation (spec §4.2 Risk policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskAction {
    RouteToAgent,
}

/// Per-kind reprompt bag: which line to speak for a given failure class.
#[derive(Debug, Clone, Default)]
pub struct RepromptBag {
    pub invalid: Vec<String>,
    pub incomplete: Vec<String>,
    pub timeout: Vec<String>,
    pub failure_message: String,
    pub timeout_failure_message: String,
}

impl RepromptBag {
    /// Auto-generated defaults used when the caller supplies none (spec
    /// §4.2 Normalization: "auto-generated defaults if absent").
    pub fn defaults_for(profile_id: &str) -> Self {
        Self {
            invalid: vec![format!("Sorry, that doesn't look like a valid {profile_id}. Please try again.")],
            incomplete: vec!["I didn't get enough digits. Please continue.".to_string()],
            timeout: vec!["I didn't hear anything. Could you enter that again?".to_string()],
            failure_message: "I wasn't able to verify that. Let me connect you with someone who can help.".to_string(),
            timeout_failure_message: "I didn't receive a response in time. Let me connect you with someone who can help.".to_string(),
        }
    }

    /// Pick a line by attempt index, clamped to the bag's length (spec §4.2
    /// Normalization: "chosen by attempt index (clamped)").
    pub fn pick<'a>(bag: &'a [String], attempt_index: usize) -> Option<&'a str> {
        if bag.is_empty() {
            return None;
        }
        let idx = attempt_index.min(bag.len() - 1);
        Some(bag[idx].as_str())
    }
}

/// Linkage to a [`super::plan::DigitPlan`] step, when this expectation is
/// one step of a multi-step plan.
#[derive(Debug, Clone)]
pub struct PlanLinkage {
    pub plan_id: String,
    /// 1-based step index (spec §3: "step-index (1-based)").
    pub step_index: u32,
    pub total_steps: u32,
}

/// One attempt at satisfying an expectation, kept for history/consistency
/// scoring (spec §4.2 Confidence: "consistency is 0.9 if the last two
/// attempts match").
#[derive(Debug, Clone)]
pub struct Attempt {
    pub digits: String,
    pub accepted: bool,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// The live digit expectation for one call (spec §3 Digit Expectation).
#[derive(Debug, Clone)]
pub struct DigitExpectation {
    pub profile_id: String,
    pub min_digits: u8,
    pub max_digits: u8,
    pub timeout_s: u64,
    pub min_collect_delay_ms: u64,
    pub prompted_at: Option<DateTime<Utc>>,
    pub effective_prompt_delay_ms: u64,
    pub max_retries: u8,
    pub retries: u8,
    pub attempt_count: u32,
    pub mask_for_llm: bool,
    pub speak_confirmation: bool,
    pub confirmation_style: ConfirmationStyle,
    pub channel: Channel,
    pub terminator: Option<char>,
    pub allow_terminator: bool,
    pub buffer: String,
    pub history: Vec<Attempt>,
    pub last_masked_render: String,
    pub plan: Option<PlanLinkage>,
    pub risk_score: Option<f64>,
    pub risk_action: Option<RiskAction>,
    pub reprompts: RepromptBag,
    pub allow_spoken_fallback: bool,
    pub force_dtmf_only: bool,
}

/// Caller-supplied parameters before normalization (spec §4.2 Normalization).
#[derive(Debug, Clone, Default)]
pub struct ExpectationParams {
    pub profile: Option<String>,
    pub prompt_text: Option<String>,
    pub min_digits: Option<u8>,
    pub max_digits: Option<u8>,
    pub force_exact_length: Option<u8>,
    pub timeout_s: Option<u64>,
    pub max_retries: Option<u8>,
    pub mask_for_llm: Option<bool>,
    pub speak_confirmation: Option<bool>,
    pub confirmation_style: Option<ConfirmationStyle>,
    pub channel: Option<Channel>,
    pub terminator: Option<char>,
    pub allow_terminator: bool,
    pub reprompts: Option<RepromptBag>,
    pub plan: Option<PlanLinkage>,
    pub allow_spoken_fallback: bool,
}

/// Health-provider status, consulted before finalizing bounds (spec §4.2
/// Health policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Overloaded,
}

const OTP_KEYWORDS: &[&str] = &["code", "verification", "otp", "passcode"];
const ACTION_VERBS: &[&str] = &["press", "enter", "dial", "type", "say"];

/// Score-based profile inference from a prompt, used only when the caller
/// did not supply an explicit profile (spec §4.2 Normalization).
fn infer_profile(prompt: &str) -> Option<&'static str> {
    let lower = prompt.to_ascii_lowercase();
    let has_verb = ACTION_VERBS.iter().any(|v| lower.contains(v));
    let has_otp_keyword = OTP_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_explicit_length = lower.contains("digit");
    if has_verb && (has_otp_keyword || has_explicit_length) {
        return Some("verification");
    }
    if lower.contains("pin") {
        return Some("pin");
    }
    if lower.contains("routing") || lower.contains("aba") {
        return Some("routing_number");
    }
    if lower.contains("account number") {
        return Some("account_number");
    }
    if lower.contains("card number") {
        return Some("card_number");
    }
    if lower.contains("cvv") || lower.contains("security code") {
        return Some("cvv");
    }
    if lower.contains("zip") {
        return Some("zip");
    }
    if lower.contains("social security") || lower.contains("ssn") {
        return Some("ssn");
    }
    if lower.contains("date of birth") || lower.contains("birthdate") {
        return Some("dob");
    }
    None
}

/// Normalize caller-supplied parameters into a stored [`DigitExpectation`],
/// applying registry bounds, OTP-specific clamping, timeout/retry clamping,
/// and health-policy clamps. This is idempotent: normalizing an already
/// normalized expectation's params yields the same result (spec §8 round-trip
/// law "digit normalization is idempotent").
pub fn normalize(params: ExpectationParams, health: HealthStatus) -> Result<DigitExpectation> {
    let profile_id = match params.profile.as_deref() {
        Some(explicit) => profile::resolve(explicit)
            .ok_or_else(|| OrchestratorError::UnknownProfile(explicit.to_string()))?,
        None => {
            let inferred = params
                .prompt_text
                .as_deref()
                .and_then(infer_profile)
                .unwrap_or("generic");
            profile::resolve(inferred).expect("built-in profile id must resolve")
        }
    };

    let mut min_digits = params.min_digits.unwrap_or(profile_id.min_digits).max(profile_id.min_digits);
    let mut max_digits = params.max_digits.unwrap_or(profile_id.max_digits).min(profile_id.max_digits);

    if profile_id.id == "verification" {
        min_digits = min_digits.clamp(4, 8);
        max_digits = max_digits.clamp(min_digits, 8);
    }
    if let Some(exact) = params.force_exact_length {
        min_digits = exact;
        max_digits = exact;
    }
    if max_digits < min_digits {
        return Err(OrchestratorError::InvalidExpectation(format!(
            "max_digits {max_digits} < min_digits {min_digits}"
        )));
    }

    let mut timeout_s = params
        .timeout_s
        .unwrap_or(profile_id.default_timeout_s)
        .clamp(DIGIT_TIMEOUT_MIN_S, DIGIT_TIMEOUT_MAX_S);
    let mut max_retries = params
        .max_retries
        .unwrap_or(profile_id.default_retries)
        .min(DIGIT_MAX_RETRIES_MAX);

    let mut speak_confirmation = params.speak_confirmation.unwrap_or(true);
    match health {
        HealthStatus::Overloaded => {
            max_retries = max_retries.min(1);
            timeout_s = timeout_s.min(10);
            speak_confirmation = false;
        }
        HealthStatus::Degraded => {
            max_retries = max_retries.min(2);
            timeout_s = timeout_s.min(15);
        }
        HealthStatus::Healthy => {}
    }

    let prompt_estimate_ms = params
        .prompt_text
        .as_deref()
        .map(|t| config::estimate_speech_ms(t, config::PROMPT_SPEECH_WORDS_PER_MINUTE))
        .unwrap_or(0);
    let min_collect_delay_ms = DIGIT_MIN_COLLECT_DELAY_FLOOR_MS
        .max(prompt_estimate_ms)
        .max(DIGIT_MIN_COLLECT_DELAY_SECONDARY_FLOOR_MS);

    let reprompts = params
        .reprompts
        .unwrap_or_else(|| RepromptBag::defaults_for(profile_id.id));

    Ok(DigitExpectation {
        profile_id: profile_id.id.to_string(),
        min_digits,
        max_digits,
        timeout_s,
        min_collect_delay_ms,
        prompted_at: None,
        effective_prompt_delay_ms: min_collect_delay_ms,
        max_retries,
        retries: 0,
        attempt_count: 0,
        mask_for_llm: params.mask_for_llm.unwrap_or(true),
        speak_confirmation,
        confirmation_style: params.confirmation_style.unwrap_or(ConfirmationStyle::Last4),
        channel: params.channel.unwrap_or(Channel::Dtmf),
        terminator: params.terminator,
        allow_terminator: params.allow_terminator,
        buffer: String::new(),
        history: Vec::new(),
        last_masked_render: String::new(),
        plan: params.plan,
        risk_score: None,
        risk_action: None,
        reprompts,
        allow_spoken_fallback: params.allow_spoken_fallback,
        force_dtmf_only: false,
    })
}

impl DigitExpectation {
    /// Mask the buffer/collected digits for display, per the profile's mask
    /// strategy.
    pub fn masked(&self, digits: &str) -> String {
        match profile::resolve(&self.profile_id).map(|r| r.mask) {
            Some(crate::profile::MaskStrategy::Last4) => {
                let n = digits.len();
                if n <= 4 {
                    "*".repeat(n)
                } else {
                    format!("{}{}", "*".repeat(n - 4), &digits[n - 4..])
                }
            }
            _ => "*".repeat(digits.len()),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.retries > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ExpectationParams {
        ExpectationParams { profile: Some("verification".into()), ..Default::default() }
    }

    #[test]
    fn normalize_is_idempotent() {
        let first = normalize(params(), HealthStatus::Healthy).unwrap();
        let reparam = ExpectationParams {
            profile: Some(first.profile_id.clone()),
            min_digits: Some(first.min_digits),
            max_digits: Some(first.max_digits),
            timeout_s: Some(first.timeout_s),
            max_retries: Some(first.max_retries),
            ..Default::default()
        };
        let second = normalize(reparam, HealthStatus::Healthy).unwrap();
        assert_eq!(first.min_digits, second.min_digits);
        assert_eq!(first.max_digits, second.max_digits);
        assert_eq!(first.timeout_s, second.timeout_s);
        assert_eq!(first.max_retries, second.max_retries);
    }

    #[test]
    fn otp_bounds_are_clamped_to_4_8() {
        let p = ExpectationParams {
            profile: Some("verification".into()),
            min_digits: Some(1),
            max_digits: Some(20),
            ..Default::default()
        };
        let e = normalize(p, HealthStatus::Healthy).unwrap();
        assert_eq!(e.min_digits, 4);
        assert_eq!(e.max_digits, 8);
    }

    #[test]
    fn overloaded_health_clamps_retries_and_timeout() {
        let e = normalize(params(), HealthStatus::Overloaded).unwrap();
        assert!(e.max_retries <= 1);
        assert!(e.timeout_s <= 10);
        assert!(!e.speak_confirmation);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let p = ExpectationParams { profile: Some("not_a_real_profile".into()), ..Default::default() };
        assert!(normalize(p, HealthStatus::Healthy).is_err());
    }

    #[test]
    fn last4_mask_reveals_only_last_four() {
        let e = normalize(
            ExpectationParams { profile: Some("card_number".into()), ..Default::default() },
            HealthStatus::Healthy,
        )
        .unwrap();
        assert_eq!(e.masked("4532015112830366"), "************0366");
    }
}
