//! # Transcript Correlator
//!
//! Associates partial/final STT hypotheses with an interaction index and
//! produces the redacted variants downstream consumers need: a
//! *masked-for-LLM* copy (digit runs and spoken-digit sequences inside the
//! active expectation's bounds replaced), a *masked-for-logs* copy
//! (unconditional, using the OTP default bounds), and OTP-sized code
//! extraction. Built on the same `once_cell::Lazy` + `regex` static-table
//! pattern `crate::profile` and the corpus's `users-core` validation module
//! use for compiled patterns that never change at runtime.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Default OTP-sized bounds used when no expectation is active (spec §4.5:
/// "extracts OTP-sized codes using ... a default of 4-8 digits").
pub const DEFAULT_OTP_MIN: u8 = 4;
pub const DEFAULT_OTP_MAX: u8 = 8;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

static WORD_DIGIT: Lazy<HashMap<&'static str, char>> = Lazy::new(|| {
    HashMap::from([
        ("zero", '0'),
        ("oh", '0'),
        ("one", '1'),
        ("two", '2'),
        ("three", '3'),
        ("four", '4'),
        ("five", '5'),
        ("six", '6'),
        ("seven", '7'),
        ("eight", '8'),
        ("nine", '9'),
    ])
});

/// A final STT hypothesis correlated to an interaction index.
#[derive(Debug, Clone)]
pub struct Correlated {
    pub interaction_index: u32,
    pub text: String,
    pub masked_for_logs: String,
}

/// Partial hypotheses never race past the final that supersedes them: the
/// correlator tracks only the highest interaction index seen and drops any
/// partial carrying a lower one (spec §5: "correlator drops stale partials").
#[derive(Debug, Default)]
pub struct Correlator {
    latest_index: u32,
}

impl Correlator {
    pub fn new() -> Self {
        Self { latest_index: 0 }
    }

    /// Accept a partial hypothesis; returns `None` if it is stale.
    pub fn accept_partial(&self, interaction_index: u32, text: &str) -> Option<String> {
        if interaction_index < self.latest_index {
            return None;
        }
        Some(text.to_string())
    }

    /// Accept a final hypothesis, advancing the correlator's index.
    pub fn accept_final(&mut self, interaction_index: u32, text: &str) -> Correlated {
        self.latest_index = self.latest_index.max(interaction_index);
        Correlated { interaction_index, text: text.to_string(), masked_for_logs: masked_for_logs(text) }
    }
}

/// Replace every digit run whose length falls within `[min, max]` with a
/// fixed 6-star mask (spec §4.5 example: `******`).
fn redact_digit_runs(text: &str, min: u8, max: u8) -> String {
    DIGIT_RUN
        .replace_all(text, |caps: &regex::Captures| {
            let run = &caps[0];
            if run.len() >= min as usize && run.len() <= max as usize {
                "******".to_string()
            } else {
                run.to_string()
            }
        })
        .into_owned()
}

/// Detect a run of spoken-word digits (`one two three four five six`) and
/// replace it with the same fixed mask, regardless of how many words are in
/// the run (spec §4.5: "any spoken-word digit sequence ... likewise").
fn redact_spoken_digit_sequences(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let lower = words[i].trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase();
        if WORD_DIGIT.contains_key(lower.as_str()) {
            let mut j = i;
            while j < words.len() {
                let w = words[j].trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase();
                if WORD_DIGIT.contains_key(w.as_str()) {
                    j += 1;
                } else {
                    break;
                }
            }
            if j - i >= 2 {
                out.push("******".to_string());
                i = j;
                continue;
            }
        }
        out.push(words[i].to_string());
        i += 1;
    }
    out.join(" ")
}

/// Produce the copy of `text` sent to the LLM, masking digit content that
/// falls within the bounds of whatever expectation is active (spec §4.5).
pub fn masked_for_llm(text: &str, expectation_bounds: Option<(u8, u8)>) -> String {
    let (min, max) = expectation_bounds.unwrap_or((DEFAULT_OTP_MIN, DEFAULT_OTP_MAX));
    let redacted = redact_digit_runs(text, min, max);
    redact_spoken_digit_sequences(&redacted)
}

/// Produce the unconditional redacted copy used for live-console preview and
/// persistence (spec §4.5), always applying the OTP default bounds.
pub fn masked_for_logs(text: &str) -> String {
    masked_for_llm(text, Some((DEFAULT_OTP_MIN, DEFAULT_OTP_MAX)))
}

/// Extract the first OTP-sized digit run in `text`, using the active
/// expectation's bounds if given, otherwise the default 4-8 (spec §4.5).
pub fn extract_otp(text: &str, bounds: Option<(u8, u8)>) -> Option<String> {
    let (min, max) = bounds.unwrap_or((DEFAULT_OTP_MIN, DEFAULT_OTP_MAX));
    if let Some(m) = DIGIT_RUN.find_iter(text).find(|m| m.len() >= min as usize && m.len() <= max as usize) {
        return Some(m.as_str().to_string());
    }
    spoken_digit_run(text, min, max)
}

/// Extract a spoken-word digit sequence of matching length, e.g. "four eight
/// two nine one seven" -> "482917".
fn spoken_digit_run(text: &str, min: u8, max: u8) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut i = 0;
    while i < words.len() {
        let mut digits = String::new();
        let mut j = i;
        while j < words.len() {
            let w = words[j].trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase();
            match WORD_DIGIT.get(w.as_str()) {
                Some(&d) => {
                    digits.push(d);
                    j += 1;
                }
                None => break,
            }
        }
        if digits.len() >= min as usize && digits.len() <= max as usize {
            return Some(digits);
        }
        i = if j > i { j } else { i + 1 };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_digit_run_within_otp_bounds() {
        let out = masked_for_logs("your code is 482917 thanks");
        assert_eq!(out, "your code is ****** thanks");
    }

    #[test]
    fn leaves_digit_run_outside_bounds_alone() {
        let out = redact_digit_runs("call 911 now", 4, 8);
        assert_eq!(out, "call 911 now");
    }

    #[test]
    fn redacts_spoken_digit_sequence() {
        let out = redact_spoken_digit_sequences("the code is four eight two nine one seven okay");
        assert!(out.contains("******"));
        assert!(!out.contains("four"));
    }

    #[test]
    fn extract_otp_prefers_digit_run() {
        let code = extract_otp("my code is 482917", None);
        assert_eq!(code.as_deref(), Some("482917"));
    }

    #[test]
    fn extract_otp_falls_back_to_spoken_digits() {
        let code = extract_otp("it is four eight two nine one seven", None);
        assert_eq!(code.as_deref(), Some("482917"));
    }

    #[test]
    fn correlator_drops_stale_partial() {
        let mut correlator = Correlator::new();
        correlator.accept_final(3, "hello");
        assert!(correlator.accept_partial(2, "stale").is_none());
        assert!(correlator.accept_partial(3, "fresh").is_some());
    }
}
