//! Process-global circuit breaker for the digit collection engine (spec §3
//! Circuit-breaker state, §4.2 Circuit breaker).
//!
//! This state is deliberately process-wide, not per-call: it tracks the
//! overall health of digit collection across every active call and persists
//! across individual session teardown (spec §5 Cancellation).

use crate::config::{CIRCUIT_COOLDOWN_MS, CIRCUIT_ERROR_RATE_OPEN, CIRCUIT_MIN_SAMPLES, CIRCUIT_WINDOW_S};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    is_error: bool,
}

/// Rolling error-rate window governing whether the engine accepts new
/// expectations (spec glossary: "Circuit breaker").
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

struct Inner {
    window: std::time::Duration,
    min_samples: u32,
    error_rate_open: f64,
    cooldown: chrono::Duration,
    samples: VecDeque<Sample>,
    opened_at: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                window: std::time::Duration::from_secs(CIRCUIT_WINDOW_S),
                min_samples: CIRCUIT_MIN_SAMPLES,
                error_rate_open: CIRCUIT_ERROR_RATE_OPEN,
                cooldown: chrono::Duration::milliseconds(CIRCUIT_COOLDOWN_MS as i64),
                samples: VecDeque::new(),
                opened_at: None,
            }),
        }
    }

    fn prune(inner: &mut Inner, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(inner.window).unwrap_or(chrono::Duration::seconds(60));
        while let Some(front) = inner.samples.front() {
            if now - front.at > window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record an attempt's outcome (error = any reprompt-worthy rejection).
    pub fn record(&self, is_error: bool) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, now);
        inner.samples.push_back(Sample { at: now, is_error });
        if inner.opened_at.is_none() {
            let total = inner.samples.len() as u32;
            let errors = inner.samples.iter().filter(|s| s.is_error).count() as u32;
            if total >= inner.min_samples {
                let rate = f64::from(errors) / f64::from(total);
                if rate >= inner.error_rate_open {
                    inner.opened_at = Some(now);
                }
            }
        }
    }

    /// Whether the circuit is currently open (new expectations should fall
    /// back to SMS or a graceful end, spec §4.2 Circuit breaker).
    pub fn is_open(&self) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if let Some(opened_at) = inner.opened_at {
            if now - opened_at >= inner.cooldown {
                inner.opened_at = None;
                inner.samples.clear();
                return false;
            }
            return true;
        }
        false
    }

    #[cfg(test)]
    pub fn force_open_for_test(&self) {
        let mut inner = self.inner.lock();
        inner.opened_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_error_rate_exceeds_threshold() {
        let cb = CircuitBreaker::new();
        for _ in 0..6 {
            cb.record(false);
        }
        for _ in 0..4 {
            cb.record(true);
        }
        assert!(cb.is_open(), "10 samples, 4 errors = 40% should open (threshold 30%)");
    }

    #[test]
    fn stays_closed_below_min_samples() {
        let cb = CircuitBreaker::new();
        cb.record(true);
        cb.record(true);
        assert!(!cb.is_open());
    }

    #[test]
    fn stays_closed_below_error_rate() {
        let cb = CircuitBreaker::new();
        for _ in 0..9 {
            cb.record(false);
        }
        cb.record(true);
        assert!(!cb.is_open(), "10 samples, 1 error = 10% should not open");
    }
}
