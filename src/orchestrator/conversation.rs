//! Call setup, Initial-Greeting, and Conversing (spec §4.3). Routes a
//! finalized utterance to either the LLM turn queue or, while digit capture
//! is active, straight past the LLM to [`super::digit_capture`] — the same
//! split the corpus draws between `CallCenterEngine::route_call` (business
//! logic) and its bridge/media plumbing.

use super::types::{CallSession, ClosingReason, SessionConfig, SessionState};
use super::Orchestrator;
use crate::adapters::{LlmEvent, SttEvent};
use crate::console::Direction;
use crate::persistence::schema::{CallRow, Speaker as RowSpeaker, TranscriptRow};
use crate::timers::TimerKind;
use crate::transcript;
use crate::types::{CallId, ChatId, Phase, ProviderKind};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Phrases that, once the agent has said anything at all, end the call
/// without waiting for a provider hangup (spec §4.3 Conversing: "a
/// user-closing-phrase detector ends the call after at least one
/// interaction").
const CLOSING_PHRASES: &[&str] =
    &["bye", "goodbye", "that's all", "thats all", "have a good day", "have a good one", "nothing else", "that's it"];

fn is_closing_phrase(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    CLOSING_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

impl Orchestrator {
    /// Register a new call in `Connecting` (spec §4.3). The transport layer
    /// calls this as soon as the provider hands it a call id, well before any
    /// media arrives.
    pub async fn accept_call(
        self: &Arc<Self>,
        call: CallId,
        provider_kind: ProviderKind,
        chat_id: ChatId,
        direction: Direction,
        phone: Option<String>,
        config: SessionConfig,
    ) {
        let now = Utc::now();
        let mut session = CallSession::new(call.clone(), provider_kind, chat_id, direction, config, now);
        session.phone = phone.clone();
        self.registry.insert(session);
        self.console.bind(&call);

        let _ = self
            .store
            .insert_call(&CallRow {
                call_id: call.to_string(),
                phone,
                started_at: now,
                status: Some("initiated".to_string()),
                ..Default::default()
            })
            .await;

        self.render_console(&call, false).await;
    }

    /// Drive `Connecting -> Initial-Greeting -> Conversing` (or
    /// `Digit-Capture`, if the session was created with a digit intent) once
    /// the provider's media stream actually opens (spec §4.3 Initial-Greeting:
    /// "plays the first message ... then the digit-expectation prompt if a
    /// digit intent was resolved at session creation").
    pub async fn on_stream_connected(self: &Arc<Self>, call: &CallId) {
        let Some(handle) = self.registry.get(call) else { return };
        let (greeting, digit_intent) = {
            let mut session = handle.lock();
            if session.state != SessionState::Connecting {
                return;
            }
            session.state = SessionState::InitialGreeting;
            session.answered_at = Some(Utc::now());
            session.phase = Phase::AgentSpeaking;
            let greeting = session.config.first_message.clone().unwrap_or_else(|| "Hello, thanks for holding.".to_string());
            (greeting, session.config.digit_intent.clone())
        };

        // A failed greeting gets one fallback attempt with a short filler
        // line; a second consecutive failure means TTS itself is down, so
        // the call closes rather than sitting in silence (spec §4.3
        // Initial-Greeting).
        let Some(spoken) = self.speak_with_fallback(call, &greeting, 0, "greeting").await else {
            self.close_call(call, ClosingReason::Error, Some("I'm having trouble on my end right now. Someone will follow up with you. Goodbye.".to_string())).await;
            return;
        };
        self.persist_transcript(call, RowSpeaker::Ai, &spoken, 0, None).await;

        {
            let mut session = handle.lock();
            session.greeting_played = true;
            session.last_agent_text = Some(spoken);
        }

        if let Some(request) = digit_intent {
            self.start_digit_capture(call, request).await;
        } else {
            {
                let mut session = handle.lock();
                session.state = SessionState::Conversing;
                session.phase = Phase::Listening;
            }
            self.timers.set(call.clone(), TimerKind::Silence, self.config.silence_timeout);
        }
        self.render_console(call, true).await;
    }

    /// Feed a partial STT hypothesis into the console preview only; partials
    /// never reach the LLM and never count toward digit capture (spec §4.3
    /// Conversing / §5: "the correlator drops stale partials").
    pub async fn on_partial_utterance(&self, call: &CallId, interaction_index: u32, text: &str) {
        let Some(handle) = self.registry.get(call) else { return };
        let preview = { handle.lock().correlator.accept_partial(interaction_index, text) };
        let Some(preview) = preview else { return };
        if handle.lock().digit_capture_active {
            return;
        }
        let content = {
            let session = handle.lock();
            let mut content = self.base_console_content(&session, Utc::now());
            content.preview_user = Some(preview);
            content.phase = Phase::UserSpeaking;
            content
        };
        self.offer_console_update(call, content, false).await;
    }

    /// Correlate a final STT hypothesis and route it: to digit capture while
    /// it is active, otherwise into the Conversing turn pipeline (spec §4.3:
    /// "during Digit-Capture every utterance is withheld from the LLM").
    pub async fn on_final_utterance(self: &Arc<Self>, call: &CallId, interaction_index: u32, text: &str) {
        let Some(handle) = self.registry.get(call) else { return };
        let correlated = { handle.lock().correlator.accept_final(interaction_index, text) };
        self.note_media_activity(call);
        self.persist_transcript(call, RowSpeaker::User, &correlated.text, interaction_index, None).await;

        if handle.lock().digit_capture_active {
            self.on_spoken_digits_candidate(call, &correlated.text).await;
            return;
        }

        let interaction_count = handle.lock().interaction_count;
        if interaction_count >= 1 && is_closing_phrase(&correlated.text) {
            self.close_call(call, ClosingReason::UserGoodbye, None).await;
            return;
        }

        let now = Utc::now();
        let duplicate = {
            let session = handle.lock();
            session
                .last_utterance
                .as_ref()
                .map(|(prev, at)| {
                    *prev == correlated.text && now.signed_duration_since(*at) < chrono::Duration::from_std(self.config.llm_duplicate_window).unwrap_or_default()
                })
                .unwrap_or(false)
        };
        if duplicate {
            debug!(call_id = %call, "duplicate_utterance_dropped");
            return;
        }

        {
            let mut session = handle.lock();
            session.last_utterance = Some((correlated.text.clone(), now));
            session.phase = Phase::Thinking;
        }
        self.render_console(call, false).await;

        let bounds = self.digit_engine.expectation_bounds(call);
        let masked = transcript::masked_for_llm(&correlated.text, bounds);
        let orch = self.clone();
        let task_call = call.clone();
        self.llm_queue.enqueue(call, async move {
            orch.run_llm_turn(task_call, masked).await;
        });
    }

    /// Route one drained STT event to the partial/final handler it belongs to
    /// (spec §6 STT adapter: "two streaming events, `utterance` ... and
    /// `transcription` (final only)"). Called by the media-stream handler in
    /// `server.rs` once per adapter poll.
    pub async fn dispatch_stt_event(self: &Arc<Self>, call: &CallId, event: SttEvent) {
        match event {
            SttEvent::Utterance { interaction_index, text } => {
                self.on_partial_utterance(call, interaction_index, &text).await;
            }
            SttEvent::Transcription { interaction_index, text } => {
                self.on_final_utterance(call, interaction_index, &text).await;
            }
        }
    }

    /// Run one LLM completion, retrying once inside this same call after
    /// speaking a filler line if the first attempt errors (spec §4.3 Failure
    /// model / §7: "filler + retry once inside same completion; 2nd ⇒
    /// Closing(error)" — the "2nd" error that actually counts toward the
    /// two-consecutive-errors rule is the retry's).
    async fn run_llm_turn(self: Arc<Self>, call: CallId, prompt: String) {
        let interaction_count = self.registry.get(&call).map(|h| h.lock().interaction_count).unwrap_or(0);
        let outcome = match self.llm.completion(&call, &prompt, interaction_count).await {
            Ok(events) => Ok(events),
            Err(err) => {
                warn!(call_id = %call, error = %err, "llm_completion_failed_retrying");
                let (_, retry) = tokio::join!(
                    self.speak_filler(&call, "One moment."),
                    self.llm.completion(&call, &prompt, interaction_count),
                );
                retry
            }
        };
        match outcome {
            Ok(events) => {
                for event in events {
                    self.handle_llm_event(&call, event).await;
                }
            }
            Err(err) => {
                warn!(call_id = %call, error = %err, "llm_completion_retry_failed");
                self.handle_llm_event(&call, LlmEvent::GptError { message: err.to_string() }).await;
            }
        }
    }

    /// Speak a short filler line without touching `last_agent_text` or the
    /// transcript — used only to cover an LLM retry, not a real turn (spec
    /// §4.3 Failure model: "filler response").
    async fn speak_filler(&self, call: &CallId, text: &str) {
        match self.tts.generate(call, 0, text, 0).await {
            Ok(chunk) => self.push_outbound_audio(call, chunk),
            Err(err) => warn!(call_id = %call, error = %err, "llm_retry_filler_tts_failed"),
        }
    }

    /// Speak `text`, retrying once with a "One moment." fallback line on a
    /// transient TTS error (spec §4.3 Failure model / §7 "Transient TTS").
    /// Returns the text actually spoken, or `None` if both attempts failed —
    /// callers close the call with whatever `ClosingReason`/message fits
    /// their flow. Shared by the greeting, LLM-reply, and digit-prompt paths.
    pub(crate) async fn speak_with_fallback(&self, call: &CallId, text: &str, interaction_count: u32, stage: &str) -> Option<String> {
        match self.tts.generate(call, 0, text, interaction_count).await {
            Ok(chunk) => {
                self.push_outbound_audio(call, chunk);
                Some(text.to_string())
            }
            Err(err) => {
                warn!(call_id = %call, error = %err, stage, "tts_failed_retrying");
                let fallback = "One moment.".to_string();
                match self.tts.generate(call, 0, &fallback, interaction_count).await {
                    Ok(chunk) => {
                        self.push_outbound_audio(call, chunk);
                        Some(fallback)
                    }
                    Err(err) => {
                        warn!(call_id = %call, error = %err, stage, "tts_fallback_failed");
                        None
                    }
                }
            }
        }
    }

    async fn handle_llm_event(self: &Arc<Self>, call: &CallId, event: LlmEvent) {
        let Some(handle) = self.registry.get(call) else { return };
        match event {
            LlmEvent::GptReply { partial_response, personality, adaptation_history } => {
                let interaction_count = {
                    let mut session = handle.lock();
                    session.interaction_count += 1;
                    session.consecutive_llm_errors = 0;
                    session.last_agent_text = Some(partial_response.clone());
                    session.phase = Phase::AgentResponding;
                    session.interaction_count
                };
                // TTS transient error: retry once with a fallback line;
                // second failure closes the call (spec §4.3 Failure model /
                // §7 "Transient TTS").
                let spoken = self.speak_with_fallback(call, &partial_response, interaction_count, "reply").await;
                if spoken.is_some() {
                    handle.lock().phase = Phase::AgentSpeaking;
                }
                if let Some(spoken) = &spoken {
                    self.persist_transcript(call, RowSpeaker::Ai, spoken, interaction_count, Some(adaptation_history.to_string())).await;
                }
                debug!(call_id = %call, personality = %personality, "llm_reply");
                self.render_console(call, false).await;
                if spoken.is_none() {
                    drop(handle);
                    self.close_call(call, ClosingReason::Error, None).await;
                    return;
                }
            }
            LlmEvent::Stall => {
                debug!(call_id = %call, "llm_stall");
            }
            LlmEvent::PersonalityChanged { personality } => {
                info!(call_id = %call, personality = %personality, "llm_personality_changed");
            }
            LlmEvent::ToolCall { tool: tool_call } => {
                drop(handle);
                self.handle_tool_call(call, tool_call).await;
                return;
            }
            LlmEvent::GptError { message } => {
                let errors = {
                    let mut session = handle.lock();
                    session.consecutive_llm_errors += 1;
                    session.consecutive_llm_errors
                };
                warn!(call_id = %call, error = %message, errors, "llm_turn_failed");
                let content = {
                    let mut session = handle.lock();
                    session.recent_events.push_back("GPT error, retrying".to_string());
                    if session.recent_events.len() > 8 {
                        session.recent_events.pop_front();
                    }
                    self.base_console_content(&session, Utc::now())
                };
                self.offer_console_update(call, content, true).await;
                if errors >= 2 {
                    self.close_call(call, ClosingReason::Error, None).await;
                }
            }
        }
    }

    /// Render the live console bubble from the current session snapshot
    /// (spec §4.7). Shared by every subsystem that changes session state
    /// visible in the bubble.
    pub(crate) async fn render_console(&self, call: &CallId, force: bool) {
        let Some(handle) = self.registry.get(call) else { return };
        let content = {
            let session = handle.lock();
            self.base_console_content(&session, Utc::now())
        };
        self.offer_console_update(call, content, force).await;
    }

    pub(crate) async fn persist_transcript(
        &self,
        call: &CallId,
        speaker: RowSpeaker,
        text: &str,
        interaction_count: u32,
        adaptation_json: Option<String>,
    ) {
        let _ = self
            .store
            .insert_transcript(&TranscriptRow {
                call_id: call.to_string(),
                speaker,
                message: text.to_string(),
                interaction_count: interaction_count as i64,
                personality: None,
                adaptation_json,
                created_at: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_phrase_detector_matches_common_sign_offs() {
        assert!(is_closing_phrase("okay, bye!"));
        assert!(is_closing_phrase("That's all, thanks"));
        assert!(!is_closing_phrase("what's my balance"));
    }
}
