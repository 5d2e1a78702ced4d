//! Outcome classification and confidence scoring for a single digit input
//! (spec §4.2 Outcome classification, Confidence).

use crate::config::{
    DIGIT_CONFIDENCE_ACCEPT_THRESHOLD, DIGIT_MAX_BUFFER_LEN, DIGIT_MIN_DTMF_GAP_MS,
    DIGIT_SPAM_REPEAT_RUN,
};
use crate::digit::expectation::{Attempt, Channel, DigitExpectation};
use crate::profile::{self, validate, ValidationFailure};
use chrono::Utc;

/// Why a digit input was rejected, or `None` on acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    TooFast,
    TooLong,
    Incomplete,
    InvalidLength,
    InvalidLuhn,
    InvalidRouting,
    InvalidMonth,
    InvalidDay,
    SpamPattern,
    LowConfidence,
    Timeout,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Reason::TooFast => "too_fast",
            Reason::TooLong => "too_long",
            Reason::Incomplete => "incomplete",
            Reason::InvalidLength => "invalid_length",
            Reason::InvalidLuhn => "invalid_luhn",
            Reason::InvalidRouting => "invalid_routing",
            Reason::InvalidMonth => "invalid_month",
            Reason::InvalidDay => "invalid_day",
            Reason::SpamPattern => "spam_pattern",
            Reason::LowConfidence => "low_confidence",
            Reason::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

impl From<ValidationFailure> for Reason {
    fn from(v: ValidationFailure) -> Self {
        match v {
            ValidationFailure::InvalidLength => Reason::InvalidLength,
            ValidationFailure::InvalidLuhn => Reason::InvalidLuhn,
            ValidationFailure::InvalidRouting => Reason::InvalidRouting,
            ValidationFailure::InvalidMonth => Reason::InvalidMonth,
            ValidationFailure::InvalidDay => Reason::InvalidDay,
        }
    }
}

/// Per-candidate signals feeding the confidence formula (spec §4.2
/// Confidence).
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceSignals {
    pub dtmf_clarity: f64,
    pub asr_confidence: f64,
    pub consistency: f64,
    pub context_fit: f64,
}

/// Out-of-band metadata about how a digit input arrived (timing, ASR score).
#[derive(Debug, Clone, Copy, Default)]
pub struct InputMeta {
    /// Milliseconds since the previous keystroke, if this is DTMF and there
    /// was a previous one.
    pub gap_since_last_ms: Option<u64>,
    /// Vendor-supplied ASR confidence, for spoken/SMS-transcribed digits.
    pub asr_confidence: Option<f64>,
}

/// The outcome of applying a digit input to an expectation (spec §3/§4.2
/// Collection).
#[derive(Debug, Clone)]
pub struct Collection {
    pub accepted: bool,
    pub reason: Option<Reason>,
    pub digits: String,
    pub length: usize,
    pub masked: String,
    pub retries: u8,
    pub fallback: bool,
    pub attempt_count: u32,
    pub confidence: f64,
    pub confidence_signals: ConfidenceSignals,
}

fn clean_digits(input: &str) -> String {
    let mut out: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    out.truncate(DIGIT_MAX_BUFFER_LEN);
    out
}

fn is_spam_pattern(digits: &str) -> bool {
    if digits.len() >= DIGIT_SPAM_REPEAT_RUN {
        let first = digits.chars().next().unwrap();
        if digits.chars().all(|c| c == first) {
            return true;
        }
    }
    if digits.len() >= 4 {
        let ascending = digits
            .as_bytes()
            .windows(2)
            .all(|w| w[1] == w[0] + 1);
        if ascending {
            return true;
        }
    }
    false
}

fn consistency_score(history: &[Attempt], candidate: &str) -> f64 {
    match history.last() {
        Some(last) if last.digits == candidate => 0.9,
        Some(_) => 0.5,
        None => 0.5,
    }
}

fn context_fit(reason: Option<Reason>) -> f64 {
    match reason {
        Some(Reason::SpamPattern) | Some(Reason::InvalidLength) | Some(Reason::TooLong) => 0.1,
        Some(_) => 0.4,
        None => 0.9,
    }
}

/// Weighted-mean confidence: `0.4*dtmf_clarity + 0.3*asr_confidence +
/// 0.2*consistency + 0.1*context_fit` (spec §4.2 Confidence).
pub fn confidence(signals: ConfidenceSignals) -> f64 {
    0.4 * signals.dtmf_clarity + 0.3 * signals.asr_confidence + 0.2 * signals.consistency
        + 0.1 * signals.context_fit
}

/// Append `input` to `expectation`'s buffer and classify the outcome,
/// mutating the expectation's retry/attempt counters and history in place
/// (spec §4.2 Outcome classification, steps 1-7).
pub fn record(expectation: &mut DigitExpectation, input: &str, meta: InputMeta) -> Collection {
    expectation.attempt_count += 1;
    let incoming = clean_digits(input);
    expectation.buffer.push_str(&incoming);
    if expectation.buffer.len() > DIGIT_MAX_BUFFER_LEN {
        expectation.buffer.truncate(DIGIT_MAX_BUFFER_LEN);
    }
    let buffer = expectation.buffer.clone();

    let too_fast = matches!(meta.gap_since_last_ms, Some(gap) if gap < DIGIT_MIN_DTMF_GAP_MS)
        && incoming.len() == 1
        && expectation.channel == Channel::Dtmf;

    let mut reason: Option<Reason> = None;
    let mut accepted = false;

    if too_fast {
        reason = Some(Reason::TooFast);
    } else if buffer.len() > expectation.max_digits as usize {
        reason = Some(Reason::TooLong);
    } else if buffer.len() < expectation.min_digits as usize {
        reason = Some(Reason::Incomplete);
    } else {
        let profile_row = profile::resolve(&expectation.profile_id);
        let validator = profile_row.map(|r| r.validator).unwrap_or(crate::profile::ValidatorKind::None);
        match validate(validator, &buffer) {
            Err(v) => reason = Some(v.into()),
            Ok(()) => {
                if is_spam_pattern(&buffer) {
                    reason = Some(Reason::SpamPattern);
                } else {
                    accepted = true;
                }
            }
        }
    }

    let dtmf_clarity = if too_fast { 0.2 } else { 0.9 };
    let asr_confidence = meta.asr_confidence.unwrap_or(0.55);
    let consistency = consistency_score(&expectation.history, &buffer);
    let signals = ConfidenceSignals {
        dtmf_clarity,
        asr_confidence,
        consistency,
        context_fit: context_fit(reason),
    };
    let mut conf = confidence(signals);

    if accepted && conf < DIGIT_CONFIDENCE_ACCEPT_THRESHOLD {
        reason = Some(Reason::LowConfidence);
        accepted = false;
        conf = confidence(ConfidenceSignals { context_fit: context_fit(reason), ..signals });
    }

    // Buffer is cleared on any rejection per spec §4.2 steps 1,2,4,5,6; kept
    // only while `incomplete` (caller may still append more digits).
    let clears_buffer = matches!(
        reason,
        Some(Reason::TooFast)
            | Some(Reason::TooLong)
            | Some(Reason::InvalidLength)
            | Some(Reason::InvalidLuhn)
            | Some(Reason::InvalidRouting)
            | Some(Reason::InvalidMonth)
            | Some(Reason::InvalidDay)
            | Some(Reason::SpamPattern)
            | Some(Reason::LowConfidence)
    );

    let counts_as_retry = match reason {
        Some(Reason::Incomplete) => expectation.channel != Channel::Dtmf,
        Some(_) => true,
        None => false,
    };
    if counts_as_retry {
        expectation.retries += 1;
    }

    let masked = expectation.masked(&buffer);
    expectation.history.push(Attempt {
        digits: buffer.clone(),
        accepted,
        reason: reason.map(|r| r.to_string()),
        at: Utc::now(),
    });
    expectation.last_masked_render = masked.clone();

    if clears_buffer {
        expectation.buffer.clear();
    } else if accepted {
        // accepted buffers stay until the caller clears the expectation
    }

    let fallback = expectation.is_exhausted();

    Collection {
        accepted,
        reason,
        digits: buffer.clone(),
        length: buffer.len(),
        masked,
        retries: expectation.retries,
        fallback,
        attempt_count: expectation.attempt_count,
        confidence: conf,
        confidence_signals: signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digit::expectation::{normalize, ExpectationParams, HealthStatus};

    fn otp_expectation() -> DigitExpectation {
        let params = ExpectationParams {
            profile: Some("verification".into()),
            force_exact_length: Some(6),
            ..Default::default()
        };
        normalize(params, HealthStatus::Healthy).unwrap()
    }

    #[test]
    fn exact_max_accepted_one_more_too_long() {
        let mut exp = otp_expectation();
        let c = record(&mut exp, "482917", InputMeta { asr_confidence: Some(0.9), ..Default::default() });
        assert!(c.accepted, "{c:?}");
        let mut exp2 = otp_expectation();
        let c2 = record(&mut exp2, "4829171", InputMeta { asr_confidence: Some(0.9), ..Default::default() });
        assert_eq!(c2.reason, Some(Reason::TooLong));
    }

    #[test]
    fn single_fast_keystroke_is_too_fast() {
        let mut exp = otp_expectation();
        let c = record(
            &mut exp,
            "4",
            InputMeta { gap_since_last_ms: Some(199), asr_confidence: Some(0.9) },
        );
        assert_eq!(c.reason, Some(Reason::TooFast));
    }

    #[test]
    fn gap_of_201ms_is_accepted_as_incomplete_not_too_fast() {
        let mut exp = otp_expectation();
        let c = record(
            &mut exp,
            "4",
            InputMeta { gap_since_last_ms: Some(201), asr_confidence: Some(0.9) },
        );
        assert_ne!(c.reason, Some(Reason::TooFast));
    }

    #[test]
    fn repeating_digits_flagged_spam_pattern() {
        let mut exp = otp_expectation();
        let c = record(&mut exp, "111111", InputMeta { asr_confidence: Some(0.9), ..Default::default() });
        assert_eq!(c.reason, Some(Reason::SpamPattern));
    }

    #[test]
    fn ascending_digits_flagged_spam_pattern() {
        let params = ExpectationParams {
            profile: Some("account_number".into()),
            force_exact_length: Some(8),
            ..Default::default()
        };
        let mut exp = normalize(params, HealthStatus::Healthy).unwrap();
        let c = record(&mut exp, "12345678", InputMeta { asr_confidence: Some(0.9), ..Default::default() });
        assert_eq!(c.reason, Some(Reason::SpamPattern));
    }

    #[test]
    fn fallback_set_once_retries_exceed_max() {
        let mut exp = otp_expectation();
        exp.max_retries = 1;
        let meta = InputMeta { gap_since_last_ms: Some(50), asr_confidence: Some(0.9) };
        record(&mut exp, "4", meta); // too_fast -> retry 1
        let c = record(&mut exp, "8", meta); // too_fast -> retry 2, exceeds max
        assert!(c.fallback);
    }
}
