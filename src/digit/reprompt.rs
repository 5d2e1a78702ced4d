//! Retry policy / prompt adaptation (spec §4.2 Retry policy / prompt
//! adaptation): picks a reprompt line and a pre-speech delay based on the
//! rejection reason, attempt index, and an adaptive "caller affect" signal.
//!
//! Text is assembled from the expectation's own reprompt bag; nothing here
//! hardcodes a full sentence beyond the bag's entries and the small
//! connective phrases the spec calls out by example.

use crate::digit::expectation::{DigitExpectation, RepromptBag};
use crate::digit::outcome::Reason;
use std::time::Duration;

/// Caller impatience/affect signal (spec §4.2: "unless the caller's
/// impatience signal is low").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerAffect {
    Calm,
    Impatient,
}

/// A reprompt decision: what to say and how long to wait before saying it.
#[derive(Debug, Clone)]
pub struct RepromptPlan {
    pub delay: Duration,
    pub text: String,
    pub force_dtmf_only: bool,
    pub is_last_attempt: bool,
}

/// Build the reprompt for a rejected [`crate::digit::outcome::Collection`].
pub fn build(
    expectation: &DigitExpectation,
    reason: Reason,
    attempt_index: usize,
    affect: CallerAffect,
) -> RepromptPlan {
    let is_last_attempt = attempt_index >= expectation.max_retries as usize;
    let bag = &expectation.reprompts;

    let (delay_ms, base_text, force_dtmf_only) = match reason {
        Reason::TooFast => (350u64, pick(&bag.invalid, attempt_index, "Please enter the digits a little more slowly."), false),
        Reason::TooLong | Reason::InvalidLength | Reason::InvalidLuhn | Reason::InvalidRouting
        | Reason::InvalidMonth | Reason::InvalidDay | Reason::LowConfidence => {
            (0, pick(&bag.invalid, attempt_index, "Sorry, that doesn't look right."), false)
        }
        Reason::SpamPattern => (0, "That pattern does not look right.".to_string(), true),
        Reason::Timeout => (0, pick(&bag.timeout, attempt_index, "I didn't hear a response. Please try again."), false),
        Reason::Incomplete => {
            let echo = if !expectation.buffer.is_empty() && affect != CallerAffect::Impatient {
                Some(echo_buffer(&expectation.buffer))
            } else {
                None
            };
            let base = pick(&bag.incomplete, attempt_index, "Please continue entering the remaining digits.");
            let text = match echo {
                Some(e) => format!("{e} Enter the remaining digits."),
                None => base,
            };
            (0, text, false)
        }
    };

    let mut text = base_text;
    if is_last_attempt {
        text = format!("{text} This is your last attempt.");
    }

    RepromptPlan {
        delay: Duration::from_millis(delay_ms),
        text,
        force_dtmf_only,
        is_last_attempt,
    }
}

fn pick(bag: &[String], attempt_index: usize, fallback: &str) -> String {
    RepromptBag::pick(bag, attempt_index).map(str::to_string).unwrap_or_else(|| fallback.to_string())
}

/// Render a partial buffer as hyphen-separated spoken digits, e.g. "4-7-3"
/// (spec §4.2 example: "I have 4-7-3.").
fn echo_buffer(buffer: &str) -> String {
    let digits = buffer.chars().map(|c| c.to_string()).collect::<Vec<_>>().join("-");
    format!("I have {digits}.")
}

/// The timeout-path reprompt/failure message (spec §4.2: "Timeout exhaustion
/// is handled symmetrically using the timeout-failure message").
pub fn timeout_reprompt(expectation: &DigitExpectation, attempt_index: usize) -> RepromptPlan {
    let is_last_attempt = attempt_index >= expectation.max_retries as usize;
    let text = pick(&expectation.reprompts.timeout, attempt_index, "I didn't hear a response. Please try again.");
    RepromptPlan { delay: Duration::from_millis(0), text, force_dtmf_only: false, is_last_attempt }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digit::expectation::{normalize, ExpectationParams, HealthStatus};

    fn exp() -> DigitExpectation {
        normalize(
            ExpectationParams { profile: Some("verification".into()), force_exact_length: Some(6), ..Default::default() },
            HealthStatus::Healthy,
        )
        .unwrap()
    }

    #[test]
    fn too_fast_uses_short_delay() {
        let plan = build(&exp(), Reason::TooFast, 0, CallerAffect::Calm);
        assert!(plan.delay.as_millis() >= 250 && plan.delay.as_millis() <= 500);
    }

    #[test]
    fn spam_pattern_forces_dtmf_only() {
        let plan = build(&exp(), Reason::SpamPattern, 0, CallerAffect::Calm);
        assert!(plan.force_dtmf_only);
    }

    #[test]
    fn last_attempt_gets_last_attempt_variant() {
        let mut e = exp();
        e.max_retries = 1;
        let plan = build(&e, Reason::TooLong, 1, CallerAffect::Calm);
        assert!(plan.is_last_attempt);
        assert!(plan.text.contains("last attempt"));
    }

    #[test]
    fn incomplete_echoes_partial_buffer_when_not_impatient() {
        let mut e = exp();
        e.buffer = "473".to_string();
        let plan = build(&e, Reason::Incomplete, 0, CallerAffect::Calm);
        assert!(plan.text.contains("4-7-3"));
    }

    #[test]
    fn incomplete_skips_echo_when_impatient() {
        let mut e = exp();
        e.buffer = "473".to_string();
        let plan = build(&e, Reason::Incomplete, 0, CallerAffect::Impatient);
        assert!(!plan.text.contains("4-7-3"));
    }
}
