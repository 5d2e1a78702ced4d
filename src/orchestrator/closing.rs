//! Closing sequence and deferred-terminal status finalization (spec §4.3
//! Closing sequence / §4.9 Status Classifier). The teardown order below
//! mirrors the corpus's own end-of-call cleanup (`call-engine/src/server.rs`'s
//! `cleanup_finished_calls`): persist a final record, notify, then drop every
//! per-call structure exactly once.

use super::types::{ClosingReason, SessionState};
use super::Orchestrator;
use crate::config::{estimate_speech_ms, CLOSING_SPEECH_CEIL_MS, CLOSING_SPEECH_FLOOR_MS, CLOSING_SPEECH_WORDS_PER_MINUTE};
use crate::persistence::schema::{CallRow, CallStateRow};
use crate::status::{CallStatus, Classification, DeferDecision, DeferredTerminal};
use crate::timers::TimerKind;
use crate::types::CallId;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

impl Orchestrator {
    /// Drive a call from wherever it is into `Closing` then `Ended`
    /// (spec §4.3 Closing sequence). Idempotent: a call already ending or
    /// already ended is left alone.
    pub async fn close_call(self: &Arc<Self>, call: &CallId, reason: ClosingReason, message_override: Option<String>) {
        let Some(handle) = self.registry.get(call) else { return };
        {
            let mut session = handle.lock();
            if session.ending || session.state.is_terminal() {
                return;
            }
            session.ending = true;
            session.state = SessionState::Closing;
            session.phase = crate::types::Phase::Ending;
        }

        info!(call_id = %call, reason = reason.as_str(), "call_closing");
        self.llm_queue.begin_drain(call);

        let message = message_override.unwrap_or_else(|| default_closing_message(reason).to_string());
        let payload = serde_json::json!({ "reason": reason.as_str() }).to_string();
        let _ = self
            .store
            .insert_call_state(&CallStateRow {
                call_id: call.to_string(),
                event_type: "call_ending".to_string(),
                payload_json: Some(payload),
                created_at: Utc::now(),
            })
            .await;

        match self.tts.generate(call, 0, &message, 0).await {
            Ok(chunk) => self.push_outbound_audio(call, chunk),
            Err(err) => warn!(call_id = %call, error = %err, "closing_tts_failed"),
        }

        let speech_ms = estimate_speech_ms(&message, CLOSING_SPEECH_WORDS_PER_MINUTE).clamp(CLOSING_SPEECH_FLOOR_MS, CLOSING_SPEECH_CEIL_MS);
        tokio::time::sleep(Duration::from_millis(speech_ms)).await;

        if let Err(err) = self.telephony.hangup(call).await {
            warn!(call_id = %call, error = %err, "hangup_failed");
        }

        self.finish_call(call, reason_to_status(reason)).await;
    }

    /// Persist the final row and tear down every per-call structure
    /// (spec §5 Cancellation: teardown cascades through every per-call
    /// structure exactly once).
    async fn finish_call(self: &Arc<Self>, call: &CallId, status: CallStatus) {
        let now = Utc::now();
        let (started_at, answered_at, last_agent_text) = match self.registry.get(call) {
            Some(handle) => {
                let session = handle.lock();
                (session.created_at, session.answered_at, session.last_agent_text.clone())
            }
            None => (now, None, None),
        };
        let duration_s = answered_at.map(|at| now.signed_duration_since(at).num_seconds().max(0));

        let _ = self
            .store
            .finalize_call(&CallRow {
                call_id: call.to_string(),
                started_at,
                answered_at,
                ended_at: Some(now),
                duration_s,
                status: Some(call_status_str(status).to_string()),
                summary: last_agent_text,
                ..Default::default()
            })
            .await;
        let _ = self.store.upsert_notification(call.as_str(), "call_completed", call.as_str()).await;

        self.teardown(call).await;
    }

    /// Drop every per-call structure this orchestrator owns. Idempotent.
    async fn teardown(&self, call: &CallId) {
        self.timers.clear_all(call);
        self.digit_engine.clear_call_state(call);
        self.llm_queue.clear(call);
        self.action_locks.remove(call);
        self.speech_gates.remove(call);
        self.outbound_audio.remove(call);
        self.status_trackers.remove(call);
        self.console.unbind(call);
        if let Err(err) = self.stt.close(call).await {
            warn!(call_id = %call, error = %err, "stt_close_failed");
        }
        self.registry.remove(call);
        info!(call_id = %call, "call_ended");
    }

    /// Poll the deferred-terminal tracker for a call; once it releases a held
    /// status, finalize the call the same way a locally-driven closing does
    /// (spec §4.9: the provider's own callback can end a call this
    /// orchestrator never explicitly closed, e.g. the caller just hangs up).
    pub(crate) async fn tick_deferred_terminal(self: &Arc<Self>, call: &CallId) {
        let Some(tracker) = self.status_trackers.get(call) else { return };
        let released = tracker.lock().tick(Utc::now());
        drop(tracker);
        if let Some(status) = released {
            self.finish_call(call, status).await;
        }
    }

    /// Feed a freshly classified provider status into the deferred-terminal
    /// tracker, arming the quiet-window timer the first time a terminal
    /// status is held (spec §4.9).
    pub(crate) async fn offer_status(self: &Arc<Self>, call: &CallId, classification: Classification) {
        let error_code = classification.error_code.clone();
        let error_message = classification.error_message.clone();
        let tracker = self
            .status_trackers
            .entry(call.clone())
            .or_insert_with(|| parking_lot::Mutex::new(DeferredTerminal::new(self.config.terminal_quiet)));
        let decision = tracker.lock().offer(classification, Utc::now()).0;
        drop(tracker);
        match decision {
            DeferDecision::EmitNow(status) => {
                let _ = self.store.update_call_status(call.as_str(), call_status_str(status), error_code.as_deref(), error_message.as_deref()).await;
            }
            DeferDecision::Held => {
                self.timers.set(call.clone(), TimerKind::PendingTerminal, self.config.terminal_quiet);
            }
            DeferDecision::Release(status) => {
                self.finish_call(call, status).await;
            }
        }
    }

    /// WebSocket media-stream teardown (spec §6: "`stop` → session
    /// teardown"). The stream is already gone by the time this fires, so
    /// unlike [`Orchestrator::close_call`] there is no farewell audio or
    /// hangup request — just immediate finalization.
    pub async fn on_media_stream_closed(self: &Arc<Self>, call: &CallId) {
        let Some(handle) = self.registry.get(call) else { return };
        let already_ending = handle.lock().ending;
        drop(handle);
        if already_ending {
            return;
        }
        self.finish_call(call, CallStatus::Completed).await;
    }

    /// Media activity observed while a terminal status is pending resets its
    /// quiet window (spec §4.9).
    pub(crate) fn note_media_activity(&self, call: &CallId) {
        if let Some(tracker) = self.status_trackers.get(call) {
            tracker.lock().note_media_activity(Utc::now());
        }
        if let Some(handle) = self.registry.get(call) {
            handle.lock().media_observed = true;
        }
    }
}

fn default_closing_message(reason: ClosingReason) -> &'static str {
    match reason {
        ClosingReason::OtpVerified => "Thanks, you're all verified. Goodbye.",
        ClosingReason::PlanCompleted => "Thanks, that's everything I needed. Goodbye.",
        ClosingReason::DigitsSmsFallback => "I've sent you a text message with next steps. Goodbye.",
        ClosingReason::UserGoodbye => "Thanks for calling. Goodbye.",
        ClosingReason::NoResponse => "I haven't heard from you, so I'll let you go. Goodbye.",
        ClosingReason::Error => "Sorry, something went wrong on my end. Someone will follow up with you. Goodbye.",
        ClosingReason::RiskEscalation => "Let me connect you with someone who can help. Goodbye.",
        ClosingReason::ServiceUnavailable => "Our systems are having trouble right now. Someone will follow up with you. Goodbye.",
        ClosingReason::DigitFailure => "I wasn't able to verify that. Someone will follow up with you. Goodbye.",
        ClosingReason::OperatorEnd => "Goodbye.",
    }
}

fn reason_to_status(reason: ClosingReason) -> CallStatus {
    match reason {
        ClosingReason::OtpVerified
        | ClosingReason::PlanCompleted
        | ClosingReason::UserGoodbye
        | ClosingReason::DigitsSmsFallback
        | ClosingReason::OperatorEnd
        | ClosingReason::RiskEscalation => CallStatus::Completed,
        ClosingReason::NoResponse => CallStatus::NoAnswer,
        ClosingReason::Error | ClosingReason::ServiceUnavailable | ClosingReason::DigitFailure => CallStatus::Failed,
    }
}

fn call_status_str(status: CallStatus) -> &'static str {
    match status {
        CallStatus::Completed => "completed",
        CallStatus::NoAnswer => "no-answer",
        CallStatus::Busy => "busy",
        CallStatus::Failed => "failed",
        CallStatus::Canceled => "canceled",
        CallStatus::Voicemail => "voicemail",
        CallStatus::Answered => "answered",
        CallStatus::InProgress => "in-progress",
        CallStatus::Ringing => "ringing",
        CallStatus::Initiated => "initiated",
    }
}
