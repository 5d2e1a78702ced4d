//! End-to-end scenarios driven entirely through `Orchestrator`'s public
//! surface (no crate-private field access), the same black-box posture the
//! corpus's own `tests/` integration suites take against `CallCenterServer`.

use callflow_orchestrator::adapters::fakes::*;
use callflow_orchestrator::config::OrchestratorConfig;
use callflow_orchestrator::console::Direction;
use callflow_orchestrator::digit::{CollectionRequest, Group};
use callflow_orchestrator::orchestrator::types::SessionConfig;
use callflow_orchestrator::orchestrator::{Dependencies, Orchestrator};
use callflow_orchestrator::persistence::InMemoryCallStore;
use callflow_orchestrator::types::{CallId, ChatId, ProviderKind};
use std::sync::Arc;

fn deps() -> (Dependencies, Arc<InMemoryCallStore>, Arc<FakeSmsAdapter>, Arc<FakeTelephonyAdapter>, Arc<FakeTtsAdapter>) {
    let store = Arc::new(InMemoryCallStore::new());
    let sms = Arc::new(FakeSmsAdapter::default());
    let telephony = Arc::new(FakeTelephonyAdapter::default());
    let tts = Arc::new(FakeTtsAdapter::default());
    let d = Dependencies {
        store: store.clone(),
        stt: Arc::new(FakeSttAdapter::default()),
        llm: Arc::new(FakeLlmAdapter::default()),
        tts: tts.clone(),
        sms: sms.clone(),
        chat: Arc::new(FakeChatAdapter::default()),
        telephony: telephony.clone(),
        config: OrchestratorConfig::default(),
    };
    (d, store, sms, telephony, tts)
}

#[tokio::test]
async fn banking_group_plan_completes_and_persists_two_digit_events() {
    let (d, store, _sms, telephony, _tts) = deps();
    let orch = Orchestrator::spawn(d);
    let call = CallId::new("e2e-banking-1");
    orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-1"), Direction::Inbound, Some("+15005550006".into()), SessionConfig::default())
        .await;

    orch.start_digit_capture(
        &call,
        CollectionRequest { group: Some(Group::Banking), end_call_on_success: true, ..Default::default() },
    )
    .await;
    assert!(orch.digit_engine().has_expectation(&call));

    // Routing number then account number, each submitted as a whole
    // candidate the way a Gather-fallback webhook hands over a completed
    // DTMF string.
    orch.on_dtmf_key(&call, "021000021", Some(300)).await;
    assert!(orch.digit_engine().has_expectation(&call), "plan should have advanced to its second step");
    orch.on_dtmf_key(&call, "123456789012", Some(300)).await;

    assert_eq!(telephony.hangups.lock().len(), 1);
    let rows = store.calls_snapshot();
    let row = rows.iter().find(|r| r.call_id == call.as_str()).expect("call row persisted");
    assert_eq!(row.status.as_deref(), Some("completed"));

    let events = store.digit_events_snapshot();
    let call_events: Vec<_> = events.iter().filter(|e| e.call_id == call.as_str()).collect();
    assert_eq!(call_events.len(), 2);
    assert!(call_events.iter().all(|e| e.accepted));
    assert_eq!(call_events[0].profile, "routing_number");
    assert_eq!(call_events[1].profile, "account_number");

    let notifications = store.notifications_snapshot();
    assert_eq!(notifications.iter().filter(|n| n.call_id == call.as_str()).count(), 1);
}

#[tokio::test]
async fn circuit_breaker_open_falls_back_to_sms_before_any_prompt() {
    let (d, store, sms, _telephony, tts) = deps();
    let orch = Orchestrator::spawn(d);
    let call = CallId::new("e2e-circuit-1");
    orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-2"), Direction::Inbound, Some("+15005550007".into()), SessionConfig::default())
        .await;

    // Force the process-global breaker open with eight all-error samples,
    // the engine's own min-sample/error-rate thresholds (spec: circuit
    // breaker opens once a rolling window both has enough samples and
    // clears the error-rate threshold).
    let breaker = orch.digit_engine().circuit_breaker();
    for _ in 0..8 {
        breaker.record(true);
    }
    assert!(breaker.is_open());

    let tts_calls_before = tts.calls.load(std::sync::atomic::Ordering::SeqCst);
    orch.start_digit_capture(&call, CollectionRequest { profile: Some("pin".into()), ..Default::default() }).await;

    // No digit prompt was ever spoken; the breaker rejected the request
    // before an expectation was installed.
    assert_eq!(tts.calls.load(std::sync::atomic::Ordering::SeqCst), tts_calls_before);
    assert!(!orch.digit_engine().has_expectation(&call));

    let sent = sms.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15005550007");

    let rows = store.calls_snapshot();
    let row = rows.iter().find(|r| r.call_id == call.as_str()).expect("call row persisted");
    assert_eq!(row.status.as_deref(), Some("completed"));
}

#[tokio::test]
async fn digit_timeout_exhaustion_without_phone_ends_call_as_failed() {
    let (d, store, sms, _telephony, _tts) = deps();
    let orch = Orchestrator::spawn(d);
    let call = CallId::new("e2e-timeout-1");
    orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-3"), Direction::Inbound, None, SessionConfig::default())
        .await;

    orch.start_digit_capture(&call, CollectionRequest { profile: Some("pin".into()), ..Default::default() }).await;
    assert!(orch.digit_engine().has_expectation(&call));

    // "pin" allows 3 retries; the fourth timeout exhausts it. With no phone
    // on file the SMS-eligible branch has nothing to send to, so the
    // expectation fails the call outright.
    for _ in 0..4 {
        orch.on_digit_timer_fired(&call).await;
    }

    assert!(sms.sent.lock().is_empty());
    let rows = store.calls_snapshot();
    let row = rows.iter().find(|r| r.call_id == call.as_str()).expect("call row persisted");
    assert_eq!(row.status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn media_stream_disconnect_before_greeting_finalizes_without_hangup() {
    let (d, store, _sms, telephony, _tts) = deps();
    let orch = Orchestrator::spawn(d);
    let call = CallId::new("e2e-disconnect-1");
    orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-4"), Direction::Inbound, None, SessionConfig::default())
        .await;

    // A provider media-stream `stop` with no prior `on_stream_connected`:
    // the call never heard a greeting, so teardown must still finalize it
    // cleanly rather than assume a farewell message was ever queued.
    orch.on_media_stream_closed(&call).await;
    orch.on_media_stream_closed(&call).await;

    assert!(telephony.hangups.lock().is_empty());
    let rows = store.calls_snapshot();
    let row = rows.iter().find(|r| r.call_id == call.as_str()).expect("call row persisted");
    assert_eq!(row.status.as_deref(), Some("completed"));

    let notifications = store.notifications_snapshot();
    assert_eq!(notifications.iter().filter(|n| n.call_id == call.as_str()).count(), 1, "idempotent teardown must not duplicate the completion notification");
}

#[tokio::test]
async fn initial_greeting_queues_audio_then_enters_digit_capture_directly() {
    let (d, _store, _sms, _telephony, _tts) = deps();
    let orch = Orchestrator::spawn(d);
    let call = CallId::new("e2e-greeting-1");
    let config = SessionConfig { first_message: Some("Welcome, please hold.".into()), digit_intent: Some(CollectionRequest { profile: Some("verification".into()), ..Default::default() }), ..Default::default() };
    orch.accept_call(call.clone(), ProviderKind::Twilio, ChatId::new("chat-5"), Direction::Inbound, Some("+15005550008".into()), config).await;

    orch.on_stream_connected(&call).await;

    // Greeting plus the digit-expectation prompt are both queued before any
    // caller input, and the session lands directly in digit capture rather
    // than passing through Conversing.
    let chunks = orch.drain_outbound_audio(&call);
    assert_eq!(chunks.len(), 2);
    assert!(orch.digit_engine().has_expectation(&call));

    orch.shutdown();
}
