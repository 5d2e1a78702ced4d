//! # External adapters
//!
//! Trait boundaries for every out-of-scope collaborator named in spec §1/§6:
//! the telephony provider, STT/LLM/TTS/SMS vendors, and the operator chat
//! API. Each is an `async_trait` object the orchestrator holds behind an
//! `Arc<dyn ...>`, the same shape the corpus uses for its own pluggable
//! hardware/transport boundaries (`client-core::audio::device::AudioDevice`,
//! implemented by both a real cpal backend and `MockAudioDevice` for tests).
//! No concrete vendor client lives in this crate; only the trait and
//! hand-rolled fakes for tests.

use crate::error::Result;
use crate::types::CallId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Audio encoding/sample-rate pair an STT session is configured with
/// (spec §6 STT adapter: "configurable encoding ... and sample rate").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: crate::audio::Encoding,
    pub sample_rate_hz: u32,
}

/// One event out of an STT stream (spec §6: "two streaming events,
/// `utterance` ... and `transcription` (final only)").
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Partial or final non-empty utterance.
    Utterance { interaction_index: u32, text: String },
    /// A final transcription, ready for correlation.
    Transcription { interaction_index: u32, text: String },
}

#[async_trait]
pub trait SttAdapter: Send + Sync {
    async fn push_audio(&self, call: &CallId, format: AudioFormat, payload: &[u8]) -> Result<()>;
    async fn next_event(&self, call: &CallId) -> Result<Option<SttEvent>>;
    async fn close(&self, call: &CallId) -> Result<()>;
}

/// One event out of an LLM completion stream (spec §6 LLM adapter).
#[derive(Debug, Clone)]
pub enum LlmEvent {
    GptReply { partial_response: String, personality: String, adaptation_history: serde_json::Value },
    Stall,
    PersonalityChanged { personality: String },
    GptError { message: String },
    /// The model invoked one of the fixed telephony tools rather than
    /// replying in natural language (spec §9 REDESIGN FLAGS: "register a
    /// fixed set of telephony tools ... and dispatch by name").
    ToolCall { tool: crate::tools::ToolCall },
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn completion(&self, call: &CallId, prompt: &str, interaction_count: u32) -> Result<Vec<LlmEvent>>;
}

/// A single synthesized speech chunk (spec §6 TTS adapter:
/// "speech(index, audio-base64, label, interactionCount)").
#[derive(Debug, Clone)]
pub struct SpeechChunk {
    pub index: u32,
    pub audio_base64: String,
    pub label: String,
    pub interaction_count: u32,
}

#[async_trait]
pub trait TtsAdapter: Send + Sync {
    async fn generate(
        &self,
        call: &CallId,
        partial_response_index: u32,
        partial_response: &str,
        interaction_count: u32,
    ) -> Result<SpeechChunk>;

    /// Pre-warm synthesis expected on session start (spec §6: "A pre-warm
    /// synthesis is expected on session start").
    async fn prewarm(&self, call: &CallId) -> Result<()>;
}

#[async_trait]
pub trait SmsAdapter: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str, from: Option<&str>, idempotency_key: &str) -> Result<()>;
}

/// Chat-API message reference, immutable once assigned (spec §3 Console
/// Entry invariant: "message-id, once obtained, is immutable").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageRef {
    pub chat_id: String,
    pub message_id: String,
}

#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str, markup: Option<serde_json::Value>) -> Result<ChatMessageRef>;
    async fn edit_message(&self, message: &ChatMessageRef, text: &str, markup: Option<serde_json::Value>) -> Result<()>;
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
    async fn send_audio(&self, chat_id: &str, audio_base64: &str, label: &str) -> Result<()>;
}

/// Minimal surface over the telephony provider needed by the orchestrator:
/// instructing a hangup and nothing else (the provider's own wire protocol
/// is out of scope per spec §1).
#[async_trait]
pub trait TelephonyAdapter: Send + Sync {
    async fn hangup(&self, call: &CallId) -> Result<()>;
}

/// Hand-rolled fakes for every adapter trait, used by this crate's own tests
/// and doctests and left public for downstream integration tests that want a
/// working [`Dependencies`](crate::orchestrator::Dependencies) without a real
/// vendor client.
pub mod fakes {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Programmable fake returning a fixed sequence of LLM events per call.
    #[derive(Default)]
    pub struct FakeLlmAdapter {
        pub scripted: Mutex<VecDeque<Result<Vec<LlmEvent>>>>,
    }

    #[async_trait]
    impl LlmAdapter for FakeLlmAdapter {
        async fn completion(&self, _call: &CallId, _prompt: &str, _interaction_count: u32) -> Result<Vec<LlmEvent>> {
            self.scripted
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![LlmEvent::GptReply {
                    partial_response: "ok".into(),
                    personality: "default".into(),
                    adaptation_history: serde_json::json!({}),
                }]))
        }
    }

    /// Fake TTS that always synthesizes instantly, counting calls.
    #[derive(Default)]
    pub struct FakeTtsAdapter {
        pub calls: AtomicU32,
    }

    #[async_trait]
    impl TtsAdapter for FakeTtsAdapter {
        async fn generate(
            &self,
            _call: &CallId,
            index: u32,
            partial_response: &str,
            interaction_count: u32,
        ) -> Result<SpeechChunk> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SpeechChunk {
                index,
                audio_base64: String::new(),
                label: partial_response.to_string(),
                interaction_count,
            })
        }

        async fn prewarm(&self, _call: &CallId) -> Result<()> {
            Ok(())
        }
    }

    /// Fake chat adapter recording every send/edit in order.
    #[derive(Default)]
    pub struct FakeChatAdapter {
        pub sent: Mutex<Vec<String>>,
        pub edits: Mutex<Vec<String>>,
        next_id: AtomicU32,
    }

    #[async_trait]
    impl ChatAdapter for FakeChatAdapter {
        async fn send_message(&self, chat_id: &str, text: &str, _markup: Option<serde_json::Value>) -> Result<ChatMessageRef> {
            self.sent.lock().push(text.to_string());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(ChatMessageRef { chat_id: chat_id.to_string(), message_id: format!("msg-{id}") })
        }

        async fn edit_message(&self, _message: &ChatMessageRef, text: &str, _markup: Option<serde_json::Value>) -> Result<()> {
            self.edits.lock().push(text.to_string());
            Ok(())
        }

        async fn answer_callback(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn send_audio(&self, _chat_id: &str, _audio_base64: &str, _label: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Fake STT adapter: records pushed audio and replays a scripted event
    /// sequence per call.
    #[derive(Default)]
    pub struct FakeSttAdapter {
        pub pushed: Mutex<Vec<(CallId, usize)>>,
        pub scripted: Mutex<std::collections::HashMap<String, VecDeque<SttEvent>>>,
    }

    #[async_trait]
    impl SttAdapter for FakeSttAdapter {
        async fn push_audio(&self, call: &CallId, _format: AudioFormat, payload: &[u8]) -> Result<()> {
            self.pushed.lock().push((call.clone(), payload.len()));
            Ok(())
        }

        async fn next_event(&self, call: &CallId) -> Result<Option<SttEvent>> {
            Ok(self.scripted.lock().get_mut(call.as_str()).and_then(|q| q.pop_front()))
        }

        async fn close(&self, _call: &CallId) -> Result<()> {
            Ok(())
        }
    }

    /// Fake telephony adapter recording hangups.
    #[derive(Default)]
    pub struct FakeTelephonyAdapter {
        pub hangups: Mutex<Vec<CallId>>,
    }

    #[async_trait]
    impl TelephonyAdapter for FakeTelephonyAdapter {
        async fn hangup(&self, call: &CallId) -> Result<()> {
            self.hangups.lock().push(call.clone());
            Ok(())
        }
    }

    /// Fake SMS adapter recording outbound sends.
    #[derive(Default)]
    pub struct FakeSmsAdapter {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsAdapter for FakeSmsAdapter {
        async fn send_sms(&self, to: &str, body: &str, _from: Option<&str>, _idempotency_key: &str) -> Result<()> {
            self.sent.lock().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }
}
