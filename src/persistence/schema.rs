//! Row types for the durable tables of spec §6 "Persisted state". Mirrors the
//! corpus's `DbAgent`/`DbQueuedCall` row-struct convention
//! (`call-engine/src/database/mod.rs`): plain structs with public fields,
//! no ORM magic, populated from `sqlx::Row::try_get`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub struct CallRow {
    pub call_id: String,
    pub phone: Option<String>,
    pub prompt: Option<String>,
    pub first_message: Option<String>,
    pub chat_owner: Option<String>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_s: Option<i64>,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub summary: Option<String>,
    /// Last 4 digits only, ever (spec §6: "last OTP (last4 only)").
    pub last_otp_masked: Option<String>,
    pub digit_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Ai,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Ai => "ai",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptRow {
    pub call_id: String,
    pub speaker: Speaker,
    pub message: String,
    pub interaction_count: i64,
    pub personality: Option<String>,
    pub adaptation_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallStateRow {
    pub call_id: String,
    pub event_type: String,
    pub payload_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DigitEventRow {
    pub call_id: String,
    pub source: String,
    pub profile: String,
    /// Only populated when `ComplianceMode::Permissive`; otherwise `None`
    /// (spec §8 invariant 5: "raw digits never appear in any persisted row
    /// when compliance mode is safe").
    pub digits_opaque: Option<String>,
    pub length: i64,
    pub accepted: bool,
    pub reason: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Pending,
    Sent,
    Retrying,
    Failed,
}

impl NotificationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "retrying" => Self::Retrying,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub call_id: String,
    pub kind: String,
    pub chat_id: String,
    pub state: NotificationState,
    pub retry_count: i64,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
