//! # Audio Meter
//!
//! Turns a chunk of raw audio bytes into a scalar level in `[0, 1]`, and
//! tracks user-speech on/off with hysteresis (spec §4.4). Two encodings are
//! supported directly on the wire bytes, the way the corpus's G.711 codec
//! module treats µ-law as an 8-bit sample format rather than something that
//! must be fully decoded before use.

use crate::config::{AUDIO_MAX_WAVEFORM_FRAMES, AUDIO_STRIDE_TARGET_SAMPLES, USER_SPEECH_HOLD_MS, USER_SPEECH_LEVEL_THRESHOLD};
use crate::types::Phase;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Audio sample encoding carried by the provider's media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// 8-bit unsigned µ-law (PCMU), one sample per byte.
    MuLaw,
    /// 16-bit little-endian linear PCM.
    Pcm16Le,
}

/// Stride, in bytes, used to subsample a chunk down to roughly
/// [`AUDIO_STRIDE_TARGET_SAMPLES`] samples (spec §4.4).
fn stride_bytes(len: usize, encoding: Encoding) -> usize {
    let mut stride = (len / AUDIO_STRIDE_TARGET_SAMPLES).max(1);
    if encoding == Encoding::Pcm16Le && stride % 2 != 0 {
        stride += 1;
    }
    stride
}

fn sample_magnitude(bytes: &[u8], offset: usize, encoding: Encoding) -> Option<f64> {
    match encoding {
        Encoding::MuLaw => bytes.get(offset).map(|&b| f64::from(b as i16 - 128).abs() / 128.0),
        Encoding::Pcm16Le => {
            let lo = *bytes.get(offset)?;
            let hi = *bytes.get(offset + 1)?;
            let sample = i16::from_le_bytes([lo, hi]);
            Some(f64::from(sample).abs() / 32768.0)
        }
    }
}

/// Mean sample magnitude over a strided pass through `bytes`, scaled to
/// `[0, 1]` (spec §4.4: µ-law `mean |sample-128|/128`, PCM `mean
/// |sample|/32768`).
pub fn level(bytes: &[u8], encoding: Encoding) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let stride = stride_bytes(bytes.len(), encoding);
    let step = if encoding == Encoding::Pcm16Le { stride.max(2) } else { stride };
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut offset = 0;
    while offset < bytes.len() {
        if let Some(magnitude) = sample_magnitude(bytes, offset, encoding) {
            sum += magnitude;
            count += 1;
        }
        offset += step;
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).clamp(0.0, 1.0)
    }
}

/// Per-frame levels for waveform rendering: `frames = min(48, ceil(duration_ms
/// / interval_ms))`, each covering `len / frames` bytes (spec §4.4).
pub fn waveform(bytes: &[u8], encoding: Encoding, duration_ms: u64, interval_ms: u64) -> Vec<f64> {
    if bytes.is_empty() || duration_ms == 0 || interval_ms == 0 {
        return Vec::new();
    }
    let frames = (duration_ms.div_ceil(interval_ms) as usize).min(AUDIO_MAX_WAVEFORM_FRAMES).max(1);
    let frame_len = (bytes.len() / frames).max(1);
    bytes.chunks(frame_len).take(frames).map(|chunk| level(chunk, encoding)).collect()
}

/// User-speech hysteresis state: once `level >= user_level_threshold`,
/// `speaking` stays true until `user_hold_ms` elapses below threshold (spec
/// §4.4).
#[derive(Debug, Clone)]
pub struct SpeechGate {
    threshold: f64,
    hold: Duration,
    speaking: bool,
    last_above_at: Option<DateTime<Utc>>,
}

/// What transition, if any, a sample should publish (spec §4.4: "Phase
/// transitions published: user_speaking (or interrupted if the agent was
/// speaking), and on release listening").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    None,
    Started { interrupted: bool },
    Released,
}

impl Default for SpeechGate {
    fn default() -> Self {
        Self::new(USER_SPEECH_LEVEL_THRESHOLD, Duration::from_millis(USER_SPEECH_HOLD_MS))
    }
}

impl SpeechGate {
    pub fn new(threshold: f64, hold: Duration) -> Self {
        Self { threshold, hold, speaking: false, last_above_at: None }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one sampled level at `now`, given whether the agent was speaking
    /// when this sample arrived (for `interrupted` classification).
    pub fn sample(&mut self, level: f64, now: DateTime<Utc>, agent_was_speaking: bool) -> GateTransition {
        if level >= self.threshold {
            self.last_above_at = Some(now);
            if !self.speaking {
                self.speaking = true;
                return GateTransition::Started { interrupted: agent_was_speaking };
            }
            return GateTransition::None;
        }

        if self.speaking {
            let held_below = self
                .last_above_at
                .map(|at| now.signed_duration_since(at) >= chrono::Duration::from_std(self.hold).unwrap_or_default())
                .unwrap_or(true);
            if held_below {
                self.speaking = false;
                return GateTransition::Released;
            }
        }
        GateTransition::None
    }
}

/// The phase a [`GateTransition`] maps onto, for callers that want to drive
/// the orchestrator's phase field directly.
pub fn transition_phase(transition: GateTransition) -> Option<Phase> {
    match transition {
        GateTransition::Started { interrupted: true } => Some(Phase::Interrupted),
        GateTransition::Started { interrupted: false } => Some(Phase::UserSpeaking),
        GateTransition::Released => Some(Phase::Listening),
        GateTransition::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_mu_law_is_zero_level() {
        let silence = vec![128u8; 1600];
        assert!(level(&silence, Encoding::MuLaw) < 0.01);
    }

    #[test]
    fn full_scale_mu_law_is_near_one() {
        let loud = vec![255u8; 1600];
        assert!(level(&loud, Encoding::MuLaw) > 0.95);
    }

    #[test]
    fn silence_pcm_is_zero_level() {
        let silence = vec![0u8; 3200];
        assert_eq!(level(&silence, Encoding::Pcm16Le), 0.0);
    }

    #[test]
    fn waveform_caps_at_max_frames() {
        let bytes = vec![255u8; 1_000_000];
        let frames = waveform(&bytes, Encoding::MuLaw, 60_000, 160);
        assert_eq!(frames.len(), AUDIO_MAX_WAVEFORM_FRAMES);
    }

    #[test]
    fn speech_gate_starts_and_releases_after_hold() {
        let mut gate = SpeechGate::new(0.08, Duration::from_millis(450));
        let t0 = Utc::now();
        assert_eq!(gate.sample(0.5, t0, false), GateTransition::Started { interrupted: false });
        assert!(gate.is_speaking());

        let t1 = t0 + chrono::Duration::milliseconds(100);
        assert_eq!(gate.sample(0.01, t1, false), GateTransition::None, "still within hold window");
        assert!(gate.is_speaking());

        let t2 = t0 + chrono::Duration::milliseconds(500);
        assert_eq!(gate.sample(0.01, t2, false), GateTransition::Released);
        assert!(!gate.is_speaking());
    }

    #[test]
    fn speech_gate_marks_interrupted_when_agent_was_speaking() {
        let mut gate = SpeechGate::default();
        let transition = gate.sample(0.5, Utc::now(), true);
        assert_eq!(transition, GateTransition::Started { interrupted: true });
    }
}
