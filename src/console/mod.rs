//! # Live Console Renderer (spec §4.7)
//!
//! Renders one operator-chat bubble per call: a debounced, idempotent,
//! single-message edit loop with a content model (status/phase, timing,
//! quality, highlights, redacted preview, action buttons) and inbound-call
//! gating. The renderer itself stays synchronous and I/O-free, the same
//! split `status::DeferredTerminal` uses between "decide" and "act" — the
//! orchestrator owns the actual `ChatAdapter` calls and the debounce timer.

pub mod content;

use crate::config::ConsoleConfig;
use crate::types::{CallId, Phase};
use chrono::{DateTime, Utc};
use content::QualitySignals;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

/// Whether a call is inbound or outbound (spec §4.7 Identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A caller-risk flag shown alongside identity (spec §4.7 Identity:
/// "spam/allow/block").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallerFlag {
    #[default]
    None,
    Allowed,
    Blocked,
    Spam,
}

/// Inbound-call gate: while `Pending`, raw provider statuses are coerced
/// before display so an operator never sees "answered" before they've
/// actually answered (spec §4.7 Inbound gating).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Answered,
    Declined,
    Expired,
}

impl GateState {
    pub fn coerce(self, status_key: &str) -> String {
        if self != GateState::Pending {
            return status_key.to_string();
        }
        match status_key {
            "answered" | "in-progress" => "ringing".to_string(),
            "completed" | "canceled" => "no-answer".to_string(),
            other => other.to_string(),
        }
    }
}

/// Caller-supplied content for one render pass (spec §3 Console Entry /
/// §4.7 content model). The renderer adds debouncing and suppression only.
#[derive(Debug, Clone)]
pub struct ConsoleContent {
    pub caller_label: String,
    pub direction: Direction,
    pub route_label: Option<String>,
    pub caller_flag: CallerFlag,
    pub status_key: String,
    pub phase: Phase,
    pub level: f64,
    pub elapsed_waiting_s: u64,
    pub elapsed_talk_s: u64,
    pub quality: QualitySignals,
    pub recent_events: VecDeque<String>,
    pub preview_user: Option<String>,
    pub preview_agent: Option<String>,
    pub compact: bool,
    pub redact_preview: bool,
    pub working: bool,
    pub inbound: bool,
}

impl Default for ConsoleContent {
    fn default() -> Self {
        Self {
            caller_label: String::new(),
            direction: Direction::Outbound,
            route_label: None,
            caller_flag: CallerFlag::None,
            status_key: "initiated".to_string(),
            phase: Phase::Waiting,
            level: 0.0,
            elapsed_waiting_s: 0,
            elapsed_talk_s: 0,
            quality: QualitySignals::default(),
            recent_events: VecDeque::new(),
            preview_user: None,
            preview_agent: None,
            compact: false,
            redact_preview: true,
            working: false,
            inbound: false,
        }
    }
}

/// Rendered bubble text and button markup, ready to send or edit.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub markup: Value,
}

/// What the caller should do after offering content (spec §4.7: a 700ms
/// debounce window coalesces intervening edits into one).
#[derive(Debug)]
pub enum OfferDecision {
    /// Send (or edit) now with this content.
    Send(Rendered),
    /// Nothing changed since the last send; do nothing.
    Suppress,
    /// Hold until the debounce window elapses. `already_armed` tells the
    /// caller whether a `TimerKind::ConsoleEdit` timer is already running
    /// for this call (so it does not re-arm one).
    Hold { delay: Duration, already_armed: bool },
}

struct ConsoleEntry {
    last_text: String,
    last_markup: Option<Value>,
    last_edit_at: Option<DateTime<Utc>>,
    smoothed_signal: f64,
    gate: Option<GateState>,
    pending: Option<ConsoleContent>,
}

impl ConsoleEntry {
    fn new() -> Self {
        Self {
            last_text: String::new(),
            last_markup: None,
            last_edit_at: None,
            smoothed_signal: 0.0,
            gate: None,
            pending: None,
        }
    }
}

pub struct ConsoleRenderer {
    entries: DashMap<CallId, ConsoleEntry>,
    config: ConsoleConfig,
}

impl ConsoleRenderer {
    pub fn new(config: ConsoleConfig) -> Self {
        Self { entries: DashMap::new(), config }
    }

    pub fn bind(&self, call: &CallId) {
        self.entries.entry(call.clone()).or_insert_with(ConsoleEntry::new);
    }

    pub fn unbind(&self, call: &CallId) {
        self.entries.remove(call);
    }

    pub fn set_gate(&self, call: &CallId, gate: GateState) {
        if let Some(mut entry) = self.entries.get_mut(call) {
            entry.gate = Some(gate);
        }
    }

    /// Offer new content. Returns `Hold` unless `force` is set, mirroring
    /// the spec's debounce: every edit within the window coalesces into the
    /// most recent content, sent once the window elapses.
    pub fn offer(&self, call: &CallId, content: ConsoleContent, force: bool, now: DateTime<Utc>) -> OfferDecision {
        let Some(mut entry) = self.entries.get_mut(call) else { return OfferDecision::Suppress };
        entry.smoothed_signal = content::smooth(entry.smoothed_signal, quality_sample(&content.quality), crate::config::CONSOLE_SIGNAL_SMOOTHING);

        if force {
            entry.pending = None;
            return finalize(&mut entry, content, self.config.preview_max_chars, now);
        }

        let already_armed = entry.pending.is_some();
        entry.pending = Some(content);
        OfferDecision::Hold { delay: self.config.edit_debounce, already_armed }
    }

    /// Flush whatever content is pending once the debounce timer fires.
    pub fn flush(&self, call: &CallId, now: DateTime<Utc>) -> OfferDecision {
        let Some(mut entry) = self.entries.get_mut(call) else { return OfferDecision::Suppress };
        let Some(content) = entry.pending.take() else { return OfferDecision::Suppress };
        finalize(&mut entry, content, self.config.preview_max_chars, now)
    }

    /// Record a successful send/edit so later offers can be no-op-suppressed.
    pub fn commit(&self, call: &CallId, rendered: Rendered, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(call) {
            entry.last_text = rendered.text;
            entry.last_markup = Some(rendered.markup);
            entry.last_edit_at = Some(now);
        }
    }

    #[cfg(test)]
    pub fn last_text(&self, call: &CallId) -> Option<String> {
        self.entries.get(call).map(|e| e.last_text.clone())
    }
}

fn quality_sample(quality: &QualitySignals) -> f64 {
    (1.0 - quality.packet_loss_pct.clamp(0.0, 1.0) / 100.0).clamp(0.0, 1.0)
}

fn finalize(entry: &mut ConsoleEntry, mut content: ConsoleContent, preview_max: usize, now: DateTime<Utc>) -> OfferDecision {
    if let Some(gate) = entry.gate {
        content.status_key = gate.coerce(&content.status_key);
    }
    let rendered = render(&content, entry.smoothed_signal, preview_max);
    let _ = now;
    if entry.last_text == rendered.text && entry.last_markup.as_ref() == Some(&rendered.markup) {
        OfferDecision::Suppress
    } else {
        OfferDecision::Send(rendered)
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    }
}

fn flag_label(flag: CallerFlag) -> Option<&'static str> {
    match flag {
        CallerFlag::None => None,
        CallerFlag::Allowed => Some("allowed"),
        CallerFlag::Blocked => Some("blocked"),
        CallerFlag::Spam => Some("spam"),
    }
}

fn render(content: &ConsoleContent, smoothed_signal: f64, preview_max: usize) -> Rendered {
    let health = content::health_label(content.quality, &Vec::from(content.recent_events.clone()));
    let bars = content::signal_bars(smoothed_signal);
    let glyph = content::waveform_glyph(content.phase, content.level);
    let max_events = if content.inbound { 3 } else { 4 };
    let events: Vec<String> = content::dedup_pairwise(&content.recent_events.iter().cloned().collect::<Vec<_>>())
        .into_iter()
        .rev()
        .take(max_events)
        .collect();

    let mut lines = Vec::new();
    let mut header = format!("{} ({})", content.caller_label, direction_label(content.direction));
    if let Some(flag) = flag_label(content.caller_flag) {
        header.push_str(&format!(" [{flag}]"));
    }
    lines.push(header);
    if let Some(route) = &content.route_label {
        lines.push(format!("route: {route}"));
    }
    lines.push(format!(
        "{} {}  waiting {}s talk {}s",
        content.status_key, glyph, content.elapsed_waiting_s, content.elapsed_talk_s
    ));
    lines.push(format!(
        "signal {}{}  RTT {}ms — {}",
        "\u{2588}".repeat(bars as usize),
        "\u{2591}".repeat(5usize.saturating_sub(bars as usize)),
        content.quality.latency_ms as u64,
        health.as_str()
    ));
    if !events.is_empty() {
        lines.push(events.join(" | "));
    }
    if let Some(user) = &content.preview_user {
        let text = if content.redact_preview { content::redact_preview(user) } else { user.clone() };
        lines.push(format!("you: {}", content::truncate_preview(&text, preview_max)));
    }
    if let Some(agent) = &content.preview_agent {
        let text = if content.redact_preview { content::redact_preview(agent) } else { agent.clone() };
        lines.push(format!("agent: {}", content::truncate_preview(&text, preview_max)));
    }

    let markup = if content.working {
        json!({ "buttons": [{ "id": "working", "label": "Working…", "disabled": true }] })
    } else {
        let mut buttons = vec![
            json!({ "id": "record", "label": "Record" }),
            json!({ "id": "end", "label": "End" }),
            json!({ "id": "transfer", "label": "Transfer" }),
            json!({ "id": "compact", "label": if content.compact { "Expand" } else { "Compact" } }),
        ];
        if content.inbound {
            buttons.extend([
                json!({ "id": "answer_mini_app", "label": "Answer" }),
                json!({ "id": "sms", "label": "SMS" }),
                json!({ "id": "callback", "label": "Callback" }),
                json!({ "id": "spam", "label": "Spam" }),
                json!({ "id": "allow", "label": "Allow" }),
                json!({ "id": "block", "label": "Block" }),
                json!({ "id": "privacy_reveal", "label": "Reveal" }),
            ]);
        }
        json!({ "buttons": buttons })
    };

    Rendered { text: lines.join("\n"), markup }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> CallId {
        CallId::new("call-1")
    }

    #[test]
    fn forced_offer_sends_then_suppresses_identical_content() {
        let renderer = ConsoleRenderer::new(ConsoleConfig::default());
        renderer.bind(&call());
        let now = Utc::now();
        let content = ConsoleContent { caller_label: "Jane".into(), ..Default::default() };

        let first = renderer.offer(&call(), content.clone(), true, now);
        let Rendered { text, markup } = match first {
            OfferDecision::Send(rendered) => rendered,
            other => panic!("expected Send, got {other:?}"),
        };
        renderer.commit(&call(), Rendered { text: text.clone(), markup: markup.clone() }, now);

        let second = renderer.offer(&call(), content, true, now);
        assert!(matches!(second, OfferDecision::Suppress));
    }

    #[test]
    fn unforced_offer_holds_until_flushed() {
        let renderer = ConsoleRenderer::new(ConsoleConfig::default());
        renderer.bind(&call());
        let now = Utc::now();
        let content = ConsoleContent { caller_label: "Jane".into(), ..Default::default() };

        let held = renderer.offer(&call(), content, false, now);
        assert!(matches!(held, OfferDecision::Hold { already_armed: false, .. }));

        let flushed = renderer.flush(&call(), now);
        assert!(matches!(flushed, OfferDecision::Send(_)));
        assert!(matches!(renderer.flush(&call(), now), OfferDecision::Suppress));
    }

    #[test]
    fn gate_coerces_status_while_pending() {
        let renderer = ConsoleRenderer::new(ConsoleConfig::default());
        renderer.bind(&call());
        renderer.set_gate(&call(), GateState::Pending);
        let content = ConsoleContent { status_key: "answered".into(), ..Default::default() };
        let now = Utc::now();
        match renderer.offer(&call(), content, true, now) {
            OfferDecision::Send(rendered) => assert!(rendered.text.contains("ringing")),
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[test]
    fn inbound_content_adds_gate_action_buttons() {
        let renderer = ConsoleRenderer::new(ConsoleConfig::default());
        renderer.bind(&call());
        let content = ConsoleContent { inbound: true, ..Default::default() };
        match renderer.offer(&call(), content, true, Utc::now()) {
            OfferDecision::Send(rendered) => assert!(rendered.markup.to_string().contains("answer_mini_app")),
            other => panic!("expected Send, got {other:?}"),
        }
    }
}
