//! # Status Classifier
//!
//! Normalizes provider status callbacks into the closed status set and
//! reconciles them against observed evidence (spec §4.9). Holds terminal
//! statuses for a quiet window so an out-of-order provider callback cannot
//! race the natural end-of-call notification.

use crate::config::TERMINAL_QUIET_MS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The closed set of call statuses this crate ever reports (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Completed,
    NoAnswer,
    Busy,
    Failed,
    Canceled,
    Voicemail,
    Answered,
    InProgress,
    Ringing,
    Initiated,
}

impl CallStatus {
    /// Parse a raw provider status string (spec §6: `CallStatus`), lowercased
    /// and hyphen-normalized first.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "completed" => Some(Self::Completed),
            "no-answer" => Some(Self::NoAnswer),
            "busy" => Some(Self::Busy),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "voicemail" => Some(Self::Voicemail),
            "answered" => Some(Self::Answered),
            "in-progress" => Some(Self::InProgress),
            "ringing" => Some(Self::Ringing),
            "initiated" | "queued" => Some(Self::Initiated),
            _ => None,
        }
    }

    /// Whether this status is a terminal state for the call lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::NoAnswer | Self::Busy | Self::Failed | Self::Canceled | Self::Voicemail)
    }
}

/// Raw fields consumed from the provider's status webhook (spec §6).
#[derive(Debug, Clone, Default)]
pub struct RawStatusEvent {
    pub call_status: String,
    /// Max of `Duration`, `CallDuration`, `DialCallDuration` (spec §6: "the
    /// max of these three is the authoritative duration").
    pub duration_s: u64,
    pub answered_by: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Evidence the orchestrator has independently observed about a call, used
/// to reconcile a possibly-stale provider status (spec §4.9).
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedEvidence {
    pub answered_at: bool,
    pub media_observed: bool,
    pub prior_answered_or_in_progress: bool,
}

/// Result of reconciling a raw status against evidence (spec §4.9).
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: CallStatus,
    pub voicemail_detected: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

fn is_answering_machine(answered_by: &Option<String>) -> bool {
    matches!(
        answered_by.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("machine") | Some("machine_start") | Some("machine_end") | Some("fax")
    )
}

/// Apply the reconciliation rules of spec §4.9 to a parsed raw event.
pub fn classify(raw: &RawStatusEvent, evidence: ObservedEvidence) -> Option<Classification> {
    let parsed = CallStatus::parse(&raw.call_status)?;

    if is_answering_machine(&raw.answered_by) {
        return Some(Classification {
            status: CallStatus::NoAnswer,
            voicemail_detected: true,
            error_code: raw.error_code.clone(),
            error_message: raw.error_message.clone(),
        });
    }

    let has_answer_evidence = evidence.answered_at || evidence.media_observed || evidence.prior_answered_or_in_progress;

    let status = match parsed {
        CallStatus::Completed if raw.duration_s < 3 && !has_answer_evidence => CallStatus::NoAnswer,
        CallStatus::NoAnswer if has_answer_evidence => CallStatus::Completed,
        CallStatus::InProgress if !has_answer_evidence => CallStatus::Ringing,
        other => other,
    };

    Some(Classification { status, voicemail_detected: false, error_code: raw.error_code.clone(), error_message: raw.error_message.clone() })
}

/// Tracks a single call's deferred-terminal bookkeeping (spec §4.9: "holds
/// terminal statuses for `terminal_quiet_ms` ... if media activity was
/// observed within that window").
#[derive(Debug, Clone)]
pub struct DeferredTerminal {
    quiet: Duration,
    pending: Option<(Classification, DateTime<Utc>)>,
}

impl Default for DeferredTerminal {
    fn default() -> Self {
        Self::new(Duration::from_millis(TERMINAL_QUIET_MS))
    }
}

/// What the caller should do with a classification just offered to the
/// deferred-terminal tracker.
#[derive(Debug)]
pub enum DeferDecision {
    /// Not terminal; emit immediately.
    EmitNow(CallStatus),
    /// Terminal; held pending the quiet window.
    Held,
    /// The previously-held terminal status is now final and should be emitted.
    Release(CallStatus),
}

impl DeferredTerminal {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, pending: None }
    }

    /// Offer a freshly-classified status. Non-terminal statuses pass through.
    /// Terminal statuses are held until `tick` confirms the quiet window
    /// elapsed without intervening media activity resetting it.
    pub fn offer(&mut self, classification: Classification, now: DateTime<Utc>) -> DefDecisionWrapper {
        if !classification.status.is_terminal() {
            return DefDecisionWrapper(DeferDecision::EmitNow(classification.status));
        }
        self.pending = Some((classification, now));
        DefDecisionWrapper(DeferDecision::Held)
    }

    /// Media activity observed while a terminal status is pending resets the
    /// quiet window (spec §4.9: "if media activity was observed within that
    /// window").
    pub fn note_media_activity(&mut self, now: DateTime<Utc>) {
        if let Some((classification, _)) = self.pending.take() {
            self.pending = Some((classification, now));
        }
    }

    /// Call periodically; returns `Some` once a held terminal status has
    /// survived its quiet window untouched.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<CallStatus> {
        let (classification, held_since) = self.pending.as_ref()?;
        let elapsed = now.signed_duration_since(*held_since);
        if elapsed >= chrono::Duration::from_std(self.quiet).unwrap_or_default() {
            let status = classification.status;
            self.pending = None;
            Some(status)
        } else {
            None
        }
    }
}

/// Newtype to keep `DeferDecision` ergonomic to match on without importing
/// both names at every call site.
pub struct DefDecisionWrapper(pub DeferDecision);

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: &str, duration_s: u64, answered_by: Option<&str>) -> RawStatusEvent {
        RawStatusEvent { call_status: status.to_string(), duration_s, answered_by: answered_by.map(str::to_string), ..Default::default() }
    }

    #[test]
    fn voicemail_answered_by_reclassifies_to_no_answer() {
        let c = classify(&raw("completed", 0, Some("machine_start")), ObservedEvidence::default()).unwrap();
        assert_eq!(c.status, CallStatus::NoAnswer);
        assert!(c.voicemail_detected);
    }

    #[test]
    fn short_completed_without_evidence_downgrades_to_no_answer() {
        let c = classify(&raw("completed", 1, None), ObservedEvidence::default()).unwrap();
        assert_eq!(c.status, CallStatus::NoAnswer);
    }

    #[test]
    fn short_completed_with_evidence_stays_completed() {
        let evidence = ObservedEvidence { answered_at: true, ..Default::default() };
        let c = classify(&raw("completed", 1, None), evidence).unwrap();
        assert_eq!(c.status, CallStatus::Completed);
    }

    #[test]
    fn no_answer_upgrades_to_completed_with_evidence() {
        let evidence = ObservedEvidence { media_observed: true, ..Default::default() };
        let c = classify(&raw("no-answer", 20, None), evidence).unwrap();
        assert_eq!(c.status, CallStatus::Completed);
    }

    #[test]
    fn in_progress_without_evidence_downgrades_to_ringing() {
        let c = classify(&raw("in-progress", 0, None), ObservedEvidence::default()).unwrap();
        assert_eq!(c.status, CallStatus::Ringing);
    }

    #[test]
    fn deferred_terminal_releases_after_quiet_window() {
        let mut deferred = DeferredTerminal::new(Duration::from_millis(100));
        let t0 = Utc::now();
        let classification = Classification { status: CallStatus::Completed, voicemail_detected: false, error_code: None, error_message: None };
        matches!(deferred.offer(classification, t0).0, DeferDecision::Held);
        assert!(deferred.tick(t0).is_none());
        let released = deferred.tick(t0 + chrono::Duration::milliseconds(150));
        assert_eq!(released, Some(CallStatus::Completed));
    }

    #[test]
    fn media_activity_resets_the_quiet_window() {
        let mut deferred = DeferredTerminal::new(Duration::from_millis(100));
        let t0 = Utc::now();
        let classification = Classification { status: CallStatus::Completed, voicemail_detected: false, error_code: None, error_message: None };
        deferred.offer(classification, t0);
        deferred.note_media_activity(t0 + chrono::Duration::milliseconds(50));
        assert!(deferred.tick(t0 + chrono::Duration::milliseconds(120)).is_none());
        assert!(deferred.tick(t0 + chrono::Duration::milliseconds(200)).is_some());
    }
}
