//! # Transport surface (spec §6 External Interfaces)
//!
//! Thin axum handlers for the provider's three HTTP/WS touch points: the
//! status webhook, the Gather-fallback webhook, and the bidirectional media
//! stream. Every handler only decodes wire fields and forwards them into
//! [`Orchestrator`] methods — the same split the corpus draws between its
//! axum router (`users-core::api::create_router`) and the service it calls
//! into; no call-state logic lives here.

use crate::adapters::AudioFormat;
use crate::audio::{self, Encoding, GateTransition, SpeechGate};
use crate::console::Direction;
use crate::orchestrator::types::SessionConfig;
use crate::orchestrator::Orchestrator;
use crate::status::{classify, ObservedEvidence, RawStatusEvent};
use crate::types::{CallId, ChatId, Phase, ProviderKind};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Form, Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{http::StatusCode, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Build the router. Callers bind their own listener and call
/// `axum::serve(listener, router(orchestrator)).await`.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/webhook/status", post(status_webhook))
        .route("/webhook/gather/:call_id", post(gather_webhook))
        .route("/media-stream", get(media_stream_upgrade))
        .with_state(orchestrator)
}

/// Provider status callback fields (spec §6: `CallSid`, `CallStatus`, the
/// three duration fields, `AnsweredBy`).
#[derive(Debug, Deserialize)]
struct StatusWebhookForm {
    #[serde(rename = "CallSid")]
    call_sid: String,
    #[serde(rename = "CallStatus")]
    call_status: String,
    #[serde(default, rename = "Duration")]
    duration: Option<u64>,
    #[serde(default, rename = "CallDuration")]
    call_duration: Option<u64>,
    #[serde(default, rename = "DialCallDuration")]
    dial_call_duration: Option<u64>,
    #[serde(default, rename = "AnsweredBy")]
    answered_by: Option<String>,
}

async fn status_webhook(State(orch): State<Arc<Orchestrator>>, Form(form): Form<StatusWebhookForm>) -> impl IntoResponse {
    let call = CallId::new(form.call_sid);
    let duration_s = [form.duration, form.call_duration, form.dial_call_duration].into_iter().flatten().max().unwrap_or(0);
    let raw = RawStatusEvent { call_status: form.call_status, duration_s, answered_by: form.answered_by };

    let evidence = orch.observed_evidence(&call);
    if let Some(classification) = classify(&raw, evidence) {
        orch.offer_status(&call, classification).await;
    } else {
        warn!(call_id = %call, status = %raw.call_status, "unrecognized_provider_status");
    }
    StatusCode::NO_CONTENT
}

/// Gather-fallback fields: a provider-side DTMF/speech prompt resolved
/// outside the media-stream WebSocket (spec §6 Gather fallback).
#[derive(Debug, Deserialize)]
struct GatherWebhookForm {
    #[serde(default, rename = "Digits")]
    digits: Option<String>,
    #[serde(default, rename = "SpeechResult")]
    speech_result: Option<String>,
}

async fn gather_webhook(
    State(orch): State<Arc<Orchestrator>>,
    Path(call_id): Path<String>,
    Form(form): Form<GatherWebhookForm>,
) -> impl IntoResponse {
    let call = CallId::new(call_id);
    if let Some(digits) = form.digits.filter(|d| !d.is_empty()) {
        for digit in digits.chars() {
            orch.on_dtmf_key(&call, &digit.to_string(), None).await;
        }
    } else if let Some(speech) = form.speech_result.filter(|s| !s.is_empty()) {
        orch.on_spoken_digits_candidate(&call, &speech).await;
    }
    StatusCode::NO_CONTENT
}

async fn media_stream_upgrade(State(orch): State<Arc<Orchestrator>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(socket, orch))
}

/// Inbound frames on a provider media-stream socket (spec §6: `start`,
/// `media`, `dtmf`, `mark`, `stop`).
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum MediaStreamEvent {
    Start {
        call_id: String,
        chat_id: String,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        direction: WireDirection,
    },
    Media {
        payload: String,
    },
    Dtmf {
        digit: String,
    },
    Mark {
        #[serde(default)]
        name: String,
    },
    Stop,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireDirection {
    #[default]
    Inbound,
    Outbound,
}

impl From<WireDirection> for Direction {
    fn from(value: WireDirection) -> Self {
        match value {
            WireDirection::Inbound => Direction::Inbound,
            WireDirection::Outbound => Direction::Outbound,
        }
    }
}

/// One provider media-stream connection, multiplexing the call's lifecycle
/// (`start`/`stop`), inbound audio, and DTMF over a single socket, and
/// draining the orchestrator's outbound audio queue back onto it after each
/// inbound frame (spec §6).
async fn handle_media_stream(mut socket: WebSocket, orch: Arc<Orchestrator>) {
    let mut call: Option<CallId> = None;

    while let Some(frame) = socket.recv().await {
        let Ok(message) = frame else { break };
        let Message::Text(text) = message else { continue };
        let event = match serde_json::from_str::<MediaStreamEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "media_stream_frame_unparseable");
                continue;
            }
        };

        match event {
            MediaStreamEvent::Start { call_id, chat_id, phone, direction } => {
                let id = CallId::new(call_id);
                orch.accept_call(id.clone(), ProviderKind::Twilio, ChatId::new(chat_id), direction.into(), phone, SessionConfig::default()).await;
                orch.on_stream_connected(&id).await;
                call = Some(id);
            }
            MediaStreamEvent::Media { payload } => {
                let Some(call_id) = call.clone() else { continue };
                let Ok(bytes) = BASE64.decode(payload.as_bytes()) else { continue };
                handle_media_payload(&orch, &call_id, &bytes).await;
            }
            MediaStreamEvent::Dtmf { digit } => {
                let Some(call_id) = call.clone() else { continue };
                orch.on_dtmf_key(&call_id, &digit, None).await;
            }
            MediaStreamEvent::Mark { .. } => {}
            MediaStreamEvent::Stop => break,
        }

        let Some(call_id) = call.clone() else { continue };
        for chunk in orch.drain_outbound_audio(&call_id) {
            let payload = serde_json::json!({ "event": "media", "payload": chunk.audio_base64 });
            if socket.send(Message::Text(payload.to_string())).await.is_err() {
                return;
            }
        }
    }

    if let Some(call_id) = call {
        orch.on_media_stream_closed(&call_id).await;
    }
}

const MEDIA_ENCODING: Encoding = Encoding::MuLaw;
const MEDIA_SAMPLE_RATE_HZ: u32 = 8000;

/// Push one inbound media chunk to STT, drain whatever events come back, and
/// run it through the caller-speech gate for phase transitions (spec §4.4 /
/// §6).
async fn handle_media_payload(orch: &Arc<Orchestrator>, call: &CallId, bytes: &[u8]) {
    orch.note_media_activity(call);

    let format = AudioFormat { encoding: MEDIA_ENCODING, sample_rate_hz: MEDIA_SAMPLE_RATE_HZ };
    if let Err(err) = orch.stt.push_audio(call, format, bytes).await {
        warn!(call_id = %call, error = %err, "media_push_failed");
        return;
    }

    let level = audio::level(bytes, MEDIA_ENCODING);
    if let Some(phase) = orch.sample_speech_gate(call, level) {
        orch.set_phase(call, phase).await;
    }

    loop {
        match orch.stt.next_event(call).await {
            Ok(Some(event)) => orch.dispatch_stt_event(call, event).await,
            Ok(None) => break,
            Err(err) => {
                warn!(call_id = %call, error = %err, "stt_next_event_failed");
                break;
            }
        }
    }
}

pub use GateTransition as _GateTransitionReexportForDocs;
