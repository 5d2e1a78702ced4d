//! # Notification Dispatcher
//!
//! A durable FIFO of outgoing operator notifications keyed by `(call, kind)`
//! (spec §4.10), backed by whatever [`crate::persistence::CallStore`] the
//! caller configured. The worker loop follows the same
//! `tokio::spawn` + periodic-wake + `JoinHandle` lifecycle as the corpus's
//! `queue_processor_loop` (`call-engine/src/server.rs`), polling on an
//! interval rather than reacting to a channel, since notifications must
//! survive a process restart and a channel would not.

use crate::adapters::ChatAdapter;
use crate::config::{NOTIFY_PROCESS_INTERVAL_MS, NOTIFY_RETRY_BASE_MS, NOTIFY_RETRY_JITTER_MAX_MS, NOTIFY_RETRY_MAX_ATTEMPTS, NOTIFY_RETRY_MAX_MS};
use crate::persistence::schema::{NotificationRow, NotificationState};
use crate::persistence::CallStore;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Notification kind, distinguishing status-update bubbles (sent
/// immediately) from transcript kinds (which wait for the session's
/// terminal-status-sent flag, per spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    StatusUpdate,
    Transcript,
}

impl NotificationKind {
    fn from_str(kind: &str) -> Self {
        if kind.starts_with("call_transcript") {
            Self::Transcript
        } else {
            Self::StatusUpdate
        }
    }
}

/// Reports whether a call's terminal status has already been sent, gating
/// transcript-kind notifications (spec §4.10).
pub trait TerminalStatusFlags: Send + Sync {
    fn terminal_status_sent(&self, call_id: &str) -> bool;
}

/// Render a templated bubble for a notification kind; out-of-scope vendor
/// templating stays external, this just assembles plain text.
pub fn render_body(kind: &str, call_id: &str) -> String {
    format!("[{kind}] call {call_id}")
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = NOTIFY_RETRY_BASE_MS.saturating_mul(1u64 << attempt.min(32));
    let base = exp.min(NOTIFY_RETRY_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=NOTIFY_RETRY_JITTER_MAX_MS);
    Duration::from_millis(base + jitter)
}

/// What to do with one notification row this pass.
enum StepOutcome {
    Sent,
    Waiting,
    Retry { delay: Duration },
    Failed,
}

async fn process_one(
    chat: &dyn ChatAdapter,
    flags: &dyn TerminalStatusFlags,
    row: &NotificationRow,
) -> StepOutcome {
    let kind = NotificationKind::from_str(&row.kind);
    if kind == NotificationKind::Transcript && !flags.terminal_status_sent(&row.call_id) {
        return StepOutcome::Waiting;
    }

    let body = render_body(&row.kind, &row.call_id);
    match chat.send_message(&row.chat_id, &body, None).await {
        Ok(_) => StepOutcome::Sent,
        Err(err) => {
            let next_attempt = row.retry_count as u32 + 1;
            if next_attempt >= NOTIFY_RETRY_MAX_ATTEMPTS {
                warn!(call_id = %row.call_id, kind = %row.kind, error = %err, "notification_failed_permanently");
                StepOutcome::Failed
            } else {
                debug!(call_id = %row.call_id, kind = %row.kind, attempt = next_attempt, "notification_retry_scheduled");
                StepOutcome::Retry { delay: backoff_delay(next_attempt) }
            }
        }
    }
}

/// Run one dispatch pass over every due notification.
pub async fn dispatch_once(store: &dyn CallStore, chat: &dyn ChatAdapter, flags: &dyn TerminalStatusFlags) -> crate::error::Result<()> {
    let due = store.due_notifications().await?;
    for row in due {
        match process_one(chat, flags, &row).await {
            StepOutcome::Sent => {
                store.mark_notification(row.id, NotificationState::Sent, row.retry_count, None, None).await?;
            }
            StepOutcome::Waiting => {}
            StepOutcome::Retry { delay } => {
                let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                store
                    .mark_notification(row.id, NotificationState::Retrying, row.retry_count + 1, Some(next_attempt_at), None)
                    .await?;
            }
            StepOutcome::Failed => {
                store
                    .mark_notification(row.id, NotificationState::Failed, row.retry_count + 1, None, Some("retry attempts exhausted"))
                    .await?;
            }
        }
    }
    Ok(())
}

/// Owns the background polling task. Dropping or calling [`Self::stop`]
/// aborts it, the same `JoinHandle`-based lifecycle `TimerManager` and the
/// teacher's `CallCenterServer` both use.
pub struct Dispatcher {
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(
        store: Arc<dyn CallStore>,
        chat: Arc<dyn ChatAdapter>,
        flags: Arc<dyn TerminalStatusFlags>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = dispatch_once(store.as_ref(), chat.as_ref(), flags.as_ref()).await {
                    error!(error = %err, "notification_dispatch_pass_failed");
                }
            }
        });
        Self { handle: Some(handle) }
    }

    pub fn default_interval() -> Duration {
        Duration::from_millis(NOTIFY_PROCESS_INTERVAL_MS)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Transcript-wait ceiling: after this long waiting on the terminal-status
/// flag, a transcript notification is failed outright (spec §4.10: "retry
/// every 3s for up to 10 minutes").
pub fn transcript_wait_exceeded(first_seen: DateTime<Utc>, now: DateTime<Utc>, max: Duration) -> bool {
    now.signed_duration_since(first_seen) >= chrono::Duration::from_std(max).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fakes::FakeChatAdapter;
    use crate::persistence::InMemoryCallStore;

    struct AlwaysSent;
    impl TerminalStatusFlags for AlwaysSent {
        fn terminal_status_sent(&self, _call_id: &str) -> bool {
            true
        }
    }

    struct NeverSent;
    impl TerminalStatusFlags for NeverSent {
        fn terminal_status_sent(&self, _call_id: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn status_update_sends_immediately() {
        let store = InMemoryCallStore::new();
        store.upsert_notification("call-1", "call_completed", "chat-1").await.unwrap();
        let chat = FakeChatAdapter::default();
        dispatch_once(&store, &chat, &AlwaysSent).await.unwrap();
        assert_eq!(chat.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn transcript_notification_waits_for_terminal_flag() {
        let store = InMemoryCallStore::new();
        store.upsert_notification("call-1", "call_transcript", "chat-1").await.unwrap();
        let chat = FakeChatAdapter::default();
        dispatch_once(&store, &chat, &NeverSent).await.unwrap();
        assert!(chat.sent.lock().is_empty());
    }

    #[test]
    fn backoff_delay_is_bounded_by_retry_max() {
        let delay = backoff_delay(10);
        assert!(delay.as_millis() as u64 <= NOTIFY_RETRY_MAX_MS + NOTIFY_RETRY_JITTER_MAX_MS);
    }
}
