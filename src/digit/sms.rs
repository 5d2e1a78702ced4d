//! SMS fallback for digit collection (spec §4.2 SMS fallback).
//!
//! When an expectation permits SMS and enough retries have accumulated, the
//! engine asks the [`crate::adapters::SmsAdapter`] to send a prompt carrying
//! a correlation id; a later inbound SMS is matched back to the call by
//! sender phone number.

use crate::digit::outcome::Reason;
use chrono::{DateTime, Utc};
use rand::Rng;

/// Reasons that count toward the SMS-fallback retry threshold (spec §4.2:
/// "reason in {low_confidence, timeout, spam_pattern, too_fast}").
pub fn counts_toward_sms_fallback(reason: Reason) -> bool {
    matches!(reason, Reason::LowConfidence | Reason::SpamPattern | Reason::TooFast | Reason::Timeout)
}

/// An active SMS fallback session correlating an outbound prompt with the
/// call awaiting its reply.
#[derive(Debug, Clone)]
pub struct SmsSession {
    pub correlation_id: String,
    pub phone: String,
    pub started_at: DateTime<Utc>,
}

/// Build a correlation id of the shape `SMS-<last6 of call-id>-<random>`
/// (spec §4.2 SMS fallback).
pub fn correlation_id(call_id: &str) -> String {
    let last6: String = call_id.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
    let rand_suffix: u32 = rand::thread_rng().gen_range(1000..9999);
    format!("SMS-{last6}-{rand_suffix}")
}

impl SmsSession {
    pub fn new(call_id: &str, phone: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id(call_id), phone: phone.into(), started_at: Utc::now() }
    }
}

/// Extract digits from an inbound SMS body, for feeding through the normal
/// expectation path (spec §4.2: "digits parsed from the body are fed
/// through the normal expectation").
pub fn digits_from_sms_body(body: &str) -> String {
    body.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_has_expected_shape() {
        let id = correlation_id("CAxxxxxxxxxxxxxxxxxxxxxxxxx112233");
        assert!(id.starts_with("SMS-112233-"));
    }

    #[test]
    fn digits_extracted_from_body_ignore_non_digits() {
        assert_eq!(digits_from_sms_body("my code is 4 8 2 9 1 7"), "482917");
    }
}
