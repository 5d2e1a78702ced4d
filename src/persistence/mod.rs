//! # Persistence
//!
//! `CallStore` is the one seam between this crate and its durable database,
//! kept an external collaborator per spec §1. `SqliteCallStore` mirrors
//! `rvoip_call_engine::database::DatabaseManager` in shape: an async,
//! `Send`-safe, connection-pooled `sqlx` wrapper with `sqlx::migrate!`-driven
//! schema setup and a `new_in_memory()` convenience constructor. Queries use
//! the dynamic `sqlx::query`/`query_as` API rather than the `query!`/
//! `query_as!` compile-time-checked macros, since those require a live
//! `DATABASE_URL` or a committed `.sqlx` query cache at build time (see
//! DESIGN.md).

pub mod schema;

use crate::config::ComplianceMode;
use crate::error::Result;
use async_trait::async_trait;
use schema::{CallRow, CallStateRow, DigitEventRow, NotificationRow, NotificationState, TranscriptRow};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

#[async_trait]
pub trait CallStore: Send + Sync {
    async fn insert_call(&self, row: &CallRow) -> Result<()>;
    async fn update_call_status(&self, call_id: &str, status: &str, error_code: Option<&str>, error_message: Option<&str>) -> Result<()>;
    async fn finalize_call(&self, row: &CallRow) -> Result<()>;
    async fn insert_transcript(&self, row: &TranscriptRow) -> Result<()>;
    async fn insert_call_state(&self, row: &CallStateRow) -> Result<()>;
    async fn insert_digit_event(&self, row: &DigitEventRow, compliance_mode: ComplianceMode) -> Result<()>;
    async fn upsert_notification(&self, call_id: &str, kind: &str, chat_id: &str) -> Result<i64>;
    async fn due_notifications(&self) -> Result<Vec<NotificationRow>>;
    async fn mark_notification(
        &self,
        id: i64,
        state: NotificationState,
        retry_count: i64,
        next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
        error_message: Option<&str>,
    ) -> Result<()>;
}

/// `sqlx` + SQLite implementation, migrated with `sqlx::migrate!` on
/// construction (same lifecycle as the teacher's `DatabaseManager::new`).
#[derive(Clone)]
pub struct SqliteCallStore {
    pool: SqlitePool,
}

impl SqliteCallStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| crate::error::OrchestratorError::Internal(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn notification_from_row(row: SqliteRow) -> Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.try_get("id")?,
        call_id: row.try_get("call_id")?,
        kind: row.try_get("kind")?,
        chat_id: row.try_get("chat_id")?,
        state: NotificationState::parse(row.try_get::<String, _>("state")?.as_str()),
        retry_count: row.try_get("retry_count")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CallStore for SqliteCallStore {
    async fn insert_call(&self, row: &CallRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO calls (call_id, phone, prompt, first_message, chat_owner, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(call_id) DO NOTHING",
        )
        .bind(&row.call_id)
        .bind(&row.phone)
        .bind(&row.prompt)
        .bind(&row.first_message)
        .bind(&row.chat_owner)
        .bind(row.started_at)
        .bind(&row.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_call_status(&self, call_id: &str, status: &str, error_code: Option<&str>, error_message: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE calls SET status = ?1, error_code = ?2, error_message = ?3 WHERE call_id = ?4")
            .bind(status)
            .bind(error_code)
            .bind(error_message)
            .bind(call_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize_call(&self, row: &CallRow) -> Result<()> {
        sqlx::query(
            "UPDATE calls SET answered_at = ?1, ended_at = ?2, duration_s = ?3, status = ?4,
             summary = ?5, last_otp_masked = ?6, digit_summary = ?7 WHERE call_id = ?8",
        )
        .bind(row.answered_at)
        .bind(row.ended_at)
        .bind(row.duration_s)
        .bind(&row.status)
        .bind(&row.summary)
        .bind(&row.last_otp_masked)
        .bind(&row.digit_summary)
        .bind(&row.call_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_transcript(&self, row: &TranscriptRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO transcripts (call_id, speaker, message, interaction_count, personality, adaptation_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&row.call_id)
        .bind(row.speaker.as_str())
        .bind(&row.message)
        .bind(row.interaction_count)
        .bind(&row.personality)
        .bind(&row.adaptation_json)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_call_state(&self, row: &CallStateRow) -> Result<()> {
        sqlx::query("INSERT INTO call_states (call_id, event_type, payload_json, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&row.call_id)
            .bind(&row.event_type)
            .bind(&row.payload_json)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_digit_event(&self, row: &DigitEventRow, compliance_mode: ComplianceMode) -> Result<()> {
        let digits_opaque = match compliance_mode {
            ComplianceMode::Safe => None,
            ComplianceMode::Permissive => row.digits_opaque.clone(),
        };
        sqlx::query(
            "INSERT INTO digit_events (call_id, source, profile, digits_opaque, length, accepted, reason, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&row.call_id)
        .bind(&row.source)
        .bind(&row.profile)
        .bind(digits_opaque)
        .bind(row.length)
        .bind(row.accepted)
        .bind(&row.reason)
        .bind(&row.metadata_json)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_notification(&self, call_id: &str, kind: &str, chat_id: &str) -> Result<i64> {
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO notifications (call_id, kind, chat_id, state, retry_count, created_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4)
             ON CONFLICT(call_id, kind) DO NOTHING",
        )
        .bind(call_id)
        .bind(kind)
        .bind(chat_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM notifications WHERE call_id = ?1 AND kind = ?2")
            .bind(call_id)
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("id")?)
    }

    async fn due_notifications(&self) -> Result<Vec<NotificationRow>> {
        let rows = sqlx::query(
            "SELECT id, call_id, kind, chat_id, state, retry_count, next_attempt_at, error_message, created_at
             FROM notifications
             WHERE state IN ('pending', 'retrying')
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)",
        )
        .bind(chrono::Utc::now())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(notification_from_row).collect()
    }

    async fn mark_notification(
        &self,
        id: i64,
        state: NotificationState,
        retry_count: i64,
        next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE notifications SET state = ?1, retry_count = ?2, next_attempt_at = ?3, error_message = ?4 WHERE id = ?5")
            .bind(state.as_str())
            .bind(retry_count)
            .bind(next_attempt_at)
            .bind(error_message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory `CallStore` for tests, matching the teacher's
/// `new_in_memory()` convenience constructor in spirit but backing it with
/// a plain `Mutex`-guarded set of vectors rather than a real pool.
pub mod memory {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub(crate) struct State {
        pub(crate) calls: Vec<CallRow>,
        pub(crate) transcripts: Vec<TranscriptRow>,
        pub(crate) call_states: Vec<CallStateRow>,
        pub(crate) digit_events: Vec<DigitEventRow>,
        pub(crate) notifications: Vec<NotificationRow>,
        pub(crate) next_id: i64,
    }

    #[derive(Default)]
    pub struct InMemoryCallStore {
        pub(crate) state: Mutex<State>,
    }

    impl InMemoryCallStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of every call row inserted so far, for test assertions
        /// that want to look past the `CallStore` trait's write-only surface.
        pub fn calls_snapshot(&self) -> Vec<CallRow> {
            self.state.lock().calls.clone()
        }

        pub fn transcripts_snapshot(&self) -> Vec<TranscriptRow> {
            self.state.lock().transcripts.clone()
        }

        pub fn call_states_snapshot(&self) -> Vec<CallStateRow> {
            self.state.lock().call_states.clone()
        }

        pub fn digit_events_snapshot(&self) -> Vec<DigitEventRow> {
            self.state.lock().digit_events.clone()
        }

        pub fn notifications_snapshot(&self) -> Vec<NotificationRow> {
            self.state.lock().notifications.clone()
        }
    }

    #[async_trait]
    impl CallStore for InMemoryCallStore {
        async fn insert_call(&self, row: &CallRow) -> Result<()> {
            let mut state = self.state.lock();
            if !state.calls.iter().any(|c| c.call_id == row.call_id) {
                state.calls.push(row.clone());
            }
            Ok(())
        }

        async fn update_call_status(&self, call_id: &str, status: &str, error_code: Option<&str>, error_message: Option<&str>) -> Result<()> {
            let mut state = self.state.lock();
            if let Some(call) = state.calls.iter_mut().find(|c| c.call_id == call_id) {
                call.status = Some(status.to_string());
                call.error_code = error_code.map(str::to_string);
                call.error_message = error_message.map(str::to_string);
            }
            Ok(())
        }

        async fn finalize_call(&self, row: &CallRow) -> Result<()> {
            let mut state = self.state.lock();
            if let Some(call) = state.calls.iter_mut().find(|c| c.call_id == row.call_id) {
                call.answered_at = row.answered_at;
                call.ended_at = row.ended_at;
                call.duration_s = row.duration_s;
                call.status = row.status.clone();
                call.summary = row.summary.clone();
                call.last_otp_masked = row.last_otp_masked.clone();
                call.digit_summary = row.digit_summary.clone();
            }
            Ok(())
        }

        async fn insert_transcript(&self, row: &TranscriptRow) -> Result<()> {
            self.state.lock().transcripts.push(row.clone());
            Ok(())
        }

        async fn insert_call_state(&self, row: &CallStateRow) -> Result<()> {
            self.state.lock().call_states.push(row.clone());
            Ok(())
        }

        async fn insert_digit_event(&self, row: &DigitEventRow, compliance_mode: ComplianceMode) -> Result<()> {
            let mut row = row.clone();
            if compliance_mode == ComplianceMode::Safe {
                row.digits_opaque = None;
            }
            self.state.lock().digit_events.push(row);
            Ok(())
        }

        async fn upsert_notification(&self, call_id: &str, kind: &str, chat_id: &str) -> Result<i64> {
            let mut state = self.state.lock();
            if let Some(existing) = state.notifications.iter().find(|n| n.call_id == call_id && n.kind == kind) {
                return Ok(existing.id);
            }
            state.next_id += 1;
            let id = state.next_id;
            state.notifications.push(NotificationRow {
                id,
                call_id: call_id.to_string(),
                kind: kind.to_string(),
                chat_id: chat_id.to_string(),
                state: NotificationState::Pending,
                retry_count: 0,
                next_attempt_at: None,
                error_message: None,
                created_at: chrono::Utc::now(),
            });
            Ok(id)
        }

        async fn due_notifications(&self) -> Result<Vec<NotificationRow>> {
            let now = chrono::Utc::now();
            Ok(self
                .state
                .lock()
                .notifications
                .iter()
                .filter(|n| matches!(n.state, NotificationState::Pending | NotificationState::Retrying))
                .filter(|n| n.next_attempt_at.map(|at| at <= now).unwrap_or(true))
                .cloned()
                .collect())
        }

        async fn mark_notification(
            &self,
            id: i64,
            state: NotificationState,
            retry_count: i64,
            next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
            error_message: Option<&str>,
        ) -> Result<()> {
            let mut guard = self.state.lock();
            if let Some(n) = guard.notifications.iter_mut().find(|n| n.id == id) {
                n.state = state;
                n.retry_count = retry_count;
                n.next_attempt_at = next_attempt_at;
                n.error_message = error_message.map(str::to_string);
            }
            Ok(())
        }
    }
}

pub use memory::InMemoryCallStore;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn call_row(id: &str) -> CallRow {
        CallRow { call_id: id.to_string(), started_at: Utc::now(), ..Default::default() }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_a_call() {
        let store = InMemoryCallStore::new();
        store.insert_call(&call_row("call-1")).await.unwrap();
        store.update_call_status("call-1", "completed", None, None).await.unwrap();
        assert_eq!(store.state.lock().calls[0].status.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn compliance_safe_mode_drops_raw_digits() {
        let store = InMemoryCallStore::new();
        let row = DigitEventRow {
            call_id: "call-1".into(),
            source: "dtmf".into(),
            profile: "pin".into(),
            digits_opaque: Some("1234".into()),
            length: 4,
            accepted: true,
            reason: None,
            metadata_json: None,
            created_at: Utc::now(),
        };
        store.insert_digit_event(&row, ComplianceMode::Safe).await.unwrap();
        assert!(store.state.lock().digit_events[0].digits_opaque.is_none());
    }

    #[tokio::test]
    async fn notification_upsert_is_idempotent_per_call_and_kind() {
        let store = InMemoryCallStore::new();
        let id1 = store.upsert_notification("call-1", "call_completed", "chat-1").await.unwrap();
        let id2 = store.upsert_notification("call-1", "call_completed", "chat-1").await.unwrap();
        assert_eq!(id1, id2);
    }
}
