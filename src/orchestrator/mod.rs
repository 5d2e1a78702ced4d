//! # Call Session Orchestrator (spec §4.3)
//!
//! Owns the per-call state machine: `Connecting -> Initial-Greeting ->
//! Conversing -> (Digit-Capture <-> Conversing) -> Closing -> Ended`. Wires
//! together every other subsystem (`DigitEngine`, `LlmTaskQueue`,
//! `TimerManager`, `ConsoleRenderer`, `CallStore`, and the adapter traits)
//! the way the corpus's `CallCenterServer` wires its registries, queues, and
//! monitor loops together (`call-engine/src/server.rs`): one struct built
//! once behind an `Arc`, with a background task folding fired timers into
//! state-machine transitions. Each concern (conversation turns, digit
//! capture, closing/status) gets its own `impl Orchestrator` block in a
//! sibling file, the way the corpus splits `CallCenterEngine` across
//! `agents.rs`/`routing.rs`/`bridge.rs`.

pub mod closing;
pub mod conversation;
pub mod digit_capture;
pub mod registry;
pub mod tools;
pub mod types;

use crate::adapters::{ChatAdapter, LlmAdapter, SmsAdapter, SpeechChunk, SttAdapter, TelephonyAdapter, TtsAdapter};
use crate::audio::SpeechGate;
use crate::config::OrchestratorConfig;
use crate::console::ConsoleRenderer;
use crate::digit::DigitEngine;
use crate::llm_queue::LlmTaskQueue;
use crate::persistence::CallStore;
use crate::status::DeferredTerminal;
use crate::timers::{TimerEvent, TimerKind, TimerManager};
use crate::types::CallId;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use registry::SessionRegistry;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Every out-of-scope collaborator the orchestrator drives, bundled so
/// [`Orchestrator::spawn`] takes one argument instead of eight.
pub struct Dependencies {
    pub store: Arc<dyn CallStore>,
    pub stt: Arc<dyn SttAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
    pub sms: Arc<dyn SmsAdapter>,
    pub chat: Arc<dyn ChatAdapter>,
    pub telephony: Arc<dyn TelephonyAdapter>,
    pub config: OrchestratorConfig,
}

pub struct Orchestrator {
    pub(crate) registry: SessionRegistry,
    pub(crate) digit_engine: Arc<DigitEngine>,
    pub(crate) llm_queue: Arc<LlmTaskQueue>,
    pub(crate) timers: Arc<TimerManager>,
    pub(crate) console: Arc<ConsoleRenderer>,
    pub(crate) store: Arc<dyn CallStore>,
    pub(crate) stt: Arc<dyn SttAdapter>,
    pub(crate) llm: Arc<dyn LlmAdapter>,
    pub(crate) tts: Arc<dyn TtsAdapter>,
    pub(crate) sms: Arc<dyn SmsAdapter>,
    pub(crate) chat: Arc<dyn ChatAdapter>,
    pub(crate) telephony: Arc<dyn TelephonyAdapter>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) action_locks: DashMap<CallId, Arc<AsyncMutex<()>>>,
    pub(crate) speech_gates: DashMap<CallId, SyncMutex<SpeechGate>>,
    pub(crate) outbound_audio: DashMap<CallId, SyncMutex<VecDeque<SpeechChunk>>>,
    pub(crate) status_trackers: DashMap<CallId, SyncMutex<DeferredTerminal>>,
    timer_loop: SyncMutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the orchestrator and start its timer-event loop (spec §5:
    /// every fired timer folds into the state machine as an event, the same
    /// way adapter callbacks do).
    pub fn spawn(deps: Dependencies) -> Arc<Self> {
        let (timers, mut timer_rx) = TimerManager::new();
        let console = Arc::new(ConsoleRenderer::new(deps.config.console.clone()));
        let digit_engine = Arc::new(DigitEngine::new(deps.config.collection_policy.clone()));

        let orch = Arc::new(Self {
            registry: SessionRegistry::new(),
            digit_engine,
            llm_queue: Arc::new(LlmTaskQueue::new()),
            timers: Arc::new(timers),
            console,
            store: deps.store,
            stt: deps.stt,
            llm: deps.llm,
            tts: deps.tts,
            sms: deps.sms,
            chat: deps.chat,
            telephony: deps.telephony,
            config: deps.config,
            action_locks: DashMap::new(),
            speech_gates: DashMap::new(),
            outbound_audio: DashMap::new(),
            status_trackers: DashMap::new(),
            timer_loop: SyncMutex::new(None),
        });

        let background = orch.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = timer_rx.recv().await {
                background.on_timer_event(event).await;
            }
        });
        *orch.timer_loop.lock() = Some(handle);
        orch
    }

    pub fn digit_engine(&self) -> Arc<DigitEngine> {
        self.digit_engine.clone()
    }

    pub fn console(&self) -> Arc<ConsoleRenderer> {
        self.console.clone()
    }

    /// Stop the background timer loop. Per-call teardown is handled by
    /// [`Orchestrator::close_call`]; this only tears down the orchestrator
    /// itself, e.g. at process shutdown.
    pub fn shutdown(&self) {
        if let Some(handle) = self.timer_loop.lock().take() {
            handle.abort();
        }
    }

    /// Serialize operator button actions per call (spec §4.7: "the working
    /// lock prevents a second action from racing the first").
    pub(crate) fn action_lock(&self, call: &CallId) -> Arc<AsyncMutex<()>> {
        self.action_locks.entry(call.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn on_timer_event(self: &Arc<Self>, event: TimerEvent) {
        match event.kind {
            TimerKind::Silence => self.on_silence_timeout(&event.call).await,
            TimerKind::DigitTimeout => self.on_digit_timer_fired(&event.call).await,
            TimerKind::ConsoleEdit => self.on_console_edit_timer(&event.call).await,
            TimerKind::PendingTerminal => self.on_pending_terminal_timer(&event.call).await,
            TimerKind::NoResponseInfer => self.on_no_response_infer(&event.call).await,
        }
    }

    async fn on_silence_timeout(self: &Arc<Self>, call: &CallId) {
        let Some(handle) = self.registry.get(call) else { return };
        if handle.lock().state.is_terminal() {
            return;
        }
        self.close_call(call, types::ClosingReason::NoResponse, None).await;
    }

    async fn on_no_response_infer(self: &Arc<Self>, call: &CallId) {
        self.close_call(call, types::ClosingReason::NoResponse, None).await;
    }

    async fn on_pending_terminal_timer(self: &Arc<Self>, call: &CallId) {
        self.tick_deferred_terminal(call).await;
    }

    async fn on_console_edit_timer(&self, call: &CallId) {
        let now = chrono::Utc::now();
        if let crate::console::OfferDecision::Send(rendered) = self.console.flush(call, now) {
            self.send_console_update(call, rendered).await;
        }
    }

    pub(crate) async fn send_console_update(&self, call: &CallId, rendered: crate::console::Rendered) {
        let Some(handle) = self.registry.get(call) else { return };
        let chat_id = handle.lock().chat_id.as_str().to_string();
        match self.chat.send_message(&chat_id, &rendered.text, Some(rendered.markup.clone())).await {
            Ok(_msg) => self.console.commit(call, rendered, chrono::Utc::now()),
            Err(err) => warn!(call_id = %call, error = %err, "console_send_failed"),
        }
    }

    /// Offer new console content, dispatching immediately or arming the
    /// debounce timer (spec §4.7).
    pub(crate) async fn offer_console_update(&self, call: &CallId, content: crate::console::ConsoleContent, force: bool) {
        let now = chrono::Utc::now();
        match self.console.offer(call, content, force, now) {
            crate::console::OfferDecision::Send(rendered) => self.send_console_update(call, rendered).await,
            crate::console::OfferDecision::Suppress => {}
            crate::console::OfferDecision::Hold { delay, already_armed } => {
                if !already_armed {
                    self.timers.set(call.clone(), TimerKind::ConsoleEdit, delay);
                }
            }
        }
    }

    /// Hand a synthesized chunk to whatever's reading the media stream (spec
    /// §4.3: the orchestrator produces speech, the transport layer ships it).
    pub(crate) fn push_outbound_audio(&self, call: &CallId, chunk: SpeechChunk) {
        self.outbound_audio.entry(call.clone()).or_insert_with(|| SyncMutex::new(VecDeque::new())).lock().push_back(chunk);
    }

    /// Drain every chunk queued for a call since the last drain; the
    /// media-stream handler in `server.rs` calls this once per outbound tick.
    pub fn drain_outbound_audio(&self, call: &CallId) -> Vec<SpeechChunk> {
        self.outbound_audio.get(call).map(|q| q.lock().drain(..).collect()).unwrap_or_default()
    }

    /// Evidence this orchestrator has independently observed about a call,
    /// for reconciling a provider status callback (spec §4.9).
    pub(crate) fn observed_evidence(&self, call: &CallId) -> crate::status::ObservedEvidence {
        match self.registry.get(call) {
            Some(handle) => {
                let session = handle.lock();
                crate::status::ObservedEvidence {
                    answered_at: session.answered_at.is_some(),
                    media_observed: session.media_observed,
                    prior_answered_or_in_progress: !matches!(session.state, types::SessionState::Connecting),
                }
            }
            None => crate::status::ObservedEvidence::default(),
        }
    }

    /// Feed one sampled audio level through the call's caller-speech gate
    /// (spec §4.4), returning the phase the transport layer should publish,
    /// if any.
    pub(crate) fn sample_speech_gate(&self, call: &CallId, level: f64) -> Option<crate::types::Phase> {
        let agent_was_speaking = self.registry.get(call).map(|h| h.lock().phase == crate::types::Phase::AgentSpeaking).unwrap_or(false);
        let gate = self.speech_gates.entry(call.clone()).or_insert_with(|| SyncMutex::new(SpeechGate::default()));
        let transition = gate.lock().sample(level, chrono::Utc::now(), agent_was_speaking);
        crate::audio::transition_phase(transition)
    }

    /// Set the session's display phase and re-render the console if it
    /// actually changed (spec §4.4 Phase transitions).
    pub(crate) async fn set_phase(&self, call: &CallId, phase: crate::types::Phase) {
        let Some(handle) = self.registry.get(call) else { return };
        let changed = {
            let mut session = handle.lock();
            let changed = session.phase != phase;
            session.phase = phase;
            changed
        };
        if changed {
            self.render_console(call, false).await;
        }
    }

    /// Shared console-content builder: every subsystem that wants to offer
    /// an updated bubble (conversation turns, digit capture, closing) starts
    /// from this snapshot of the session and layers its own preview/working
    /// flags on top (spec §4.7 content model).
    pub(crate) fn base_console_content(&self, session: &types::CallSession, now: chrono::DateTime<chrono::Utc>) -> crate::console::ConsoleContent {
        let waiting = elapsed_s(Some(session.created_at), session.answered_at.unwrap_or(now));
        let talk = session.answered_at.map(|at| elapsed_s(Some(at), now)).unwrap_or(0);
        crate::console::ConsoleContent {
            caller_label: session.config.customer_name.clone().unwrap_or_else(|| session.phone.clone().unwrap_or_else(|| session.call_id.to_string())),
            direction: session.direction,
            status_key: session.phase.to_string(),
            phase: session.phase,
            elapsed_waiting_s: waiting,
            elapsed_talk_s: talk,
            recent_events: session.recent_events.clone(),
            preview_agent: session.last_agent_text.clone(),
            inbound: matches!(session.direction, crate::console::Direction::Inbound),
            ..Default::default()
        }
    }
}

fn elapsed_s(since: Option<chrono::DateTime<chrono::Utc>>, now: chrono::DateTime<chrono::Utc>) -> u64 {
    since.map(|at| now.signed_duration_since(at).num_seconds().max(0) as u64).unwrap_or(0)
}
