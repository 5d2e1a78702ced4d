//! Pure rendering helpers for the live console bubble's content model
//! (spec §4.7). Kept free of I/O and call-id bookkeeping so every rule here
//! is a plain function the orchestrator and tests can call directly.

use crate::types::Phase;
use once_cell::sync::Lazy;
use regex::Regex;

/// Health label derived from additive scoring of connection/ASR signals
/// (spec §4.7 Quality: "Stable / Degraded / At risk / Critical").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLabel {
    Stable,
    Degraded,
    AtRisk,
    Critical,
}

impl HealthLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "Stable",
            Self::Degraded => "Degraded",
            Self::AtRisk => "At risk",
            Self::Critical => "Critical",
        }
    }
}

/// Inputs to the health-label score (spec §4.7: jitter, RTT, packet loss,
/// ASR confidence, plus error keywords in recent events).
#[derive(Debug, Clone, Copy, Default)]
pub struct QualitySignals {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_pct: f64,
    pub asr_confidence: f64,
}

/// One point per breached threshold, plus one if a recent event mentions
/// "error"; 0 points -> Stable, 4+ -> Critical.
pub fn health_label(signals: QualitySignals, recent_events: &[String]) -> HealthLabel {
    let mut score = 0u8;
    if signals.jitter_ms > 20.0 {
        score += 1;
    }
    if signals.latency_ms > 250.0 {
        score += 1;
    }
    if signals.packet_loss_pct > 1.0 {
        score += 1;
    }
    if signals.asr_confidence < 0.6 {
        score += 1;
    }
    if recent_events.iter().any(|e| e.to_ascii_lowercase().contains("error")) {
        score += 1;
    }
    match score {
        0 => HealthLabel::Stable,
        1 => HealthLabel::Degraded,
        2 | 3 => HealthLabel::AtRisk,
        _ => HealthLabel::Critical,
    }
}

/// Exponential smoothing at the spec's fixed factor (spec §4.7: "a 5-bar
/// signal smoothed at 0.35").
pub fn smooth(previous: f64, sample: f64, factor: f64) -> f64 {
    factor * sample + (1.0 - factor) * previous
}

/// Map a smoothed `[0, 1]` signal to a 0-5 bar count.
pub fn signal_bars(smoothed: f64) -> u8 {
    (smoothed.clamp(0.0, 1.0) * 5.0).round() as u8
}

/// Per-phase waveform glyph, picked by the current audio level (spec §4.7
/// Status: "a waveform glyph reflecting phase and level").
pub fn waveform_glyph(phase: Phase, level: f64) -> &'static str {
    let bar = match ((level.clamp(0.0, 1.0)) * 4.0) as u8 {
        0 => "\u{2581}",
        1 => "\u{2583}",
        2 => "\u{2585}",
        _ => "\u{2587}",
    };
    match phase {
        Phase::UserSpeaking | Phase::Interrupted | Phase::AgentSpeaking | Phase::AgentResponding => bar,
        Phase::Listening => "\u{2581}",
        Phase::Thinking => "\u{2026}",
        Phase::Waiting => "\u{00b7}",
        Phase::Ending | Phase::Ended => "\u{2013}",
    }
}

static DIGIT_RUN_4PLUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4,}").expect("valid regex"));
static EMAIL_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:alnum:]._%+-]+@[[:alnum:].-]+").expect("valid regex"));

/// Redact a preview line: digit runs of 4+ become `••••`, email-like tokens
/// become `••@••` (spec §4.7 Preview).
pub fn redact_preview(text: &str) -> String {
    let redacted = DIGIT_RUN_4PLUS.replace_all(text, "\u{2022}\u{2022}\u{2022}\u{2022}");
    EMAIL_LIKE.replace_all(&redacted, "\u{2022}\u{2022}@\u{2022}\u{2022}").into_owned()
}

/// Truncate a preview line to at most `max_chars`, respecting char
/// boundaries rather than byte offsets.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// De-duplicate adjacent equal lines, keeping order (spec §4.7 Highlights:
/// "pairwise de-duplicated").
pub fn dedup_pairwise(lines: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if out.last() != Some(line) {
            out.push(line.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_label_escalates_with_score() {
        let clean = QualitySignals { latency_ms: 50.0, jitter_ms: 5.0, packet_loss_pct: 0.0, asr_confidence: 0.9 };
        assert_eq!(health_label(clean, &[]), HealthLabel::Stable);

        let one_bad = QualitySignals { latency_ms: 300.0, ..clean };
        assert_eq!(health_label(one_bad, &[]), HealthLabel::Degraded);

        let three_bad = QualitySignals { latency_ms: 300.0, jitter_ms: 30.0, packet_loss_pct: 2.0, ..clean };
        assert_eq!(health_label(three_bad, &[]), HealthLabel::AtRisk);

        let worst = QualitySignals { latency_ms: 300.0, jitter_ms: 30.0, packet_loss_pct: 2.0, asr_confidence: 0.1 };
        assert_eq!(health_label(worst, &["stt error timeout".to_string()]), HealthLabel::Critical);
    }

    #[test]
    fn smooth_converges_toward_repeated_sample() {
        let mut value = 0.0;
        for _ in 0..50 {
            value = smooth(value, 1.0, 0.35);
        }
        assert!(value > 0.99);
    }

    #[test]
    fn signal_bars_rounds_into_0_to_5() {
        assert_eq!(signal_bars(0.0), 0);
        assert_eq!(signal_bars(1.0), 5);
        assert_eq!(signal_bars(0.5), 3);
    }

    #[test]
    fn redact_preview_masks_digit_runs_and_emails() {
        let text = "card 4242424242424242 send to jane.doe@example.com";
        let redacted = redact_preview(text);
        assert!(!redacted.contains("4242"));
        assert!(redacted.contains("\u{2022}\u{2022}@\u{2022}\u{2022}"));
    }

    #[test]
    fn dedup_pairwise_collapses_repeats_only_when_adjacent() {
        let lines = vec!["a".to_string(), "a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(dedup_pairwise(&lines), vec!["a", "b", "a"]);
    }
}
