//! # Timer Manager
//!
//! Named per-call timers (spec §3/§4.3: silence, digit-collection timeout,
//! console-edit debounce, pending-terminal grace, no-response inference).
//! Each timer is a spawned [`tokio::task`] that sleeps for its delay and then
//! emits a [`TimerEvent`]; setting or clearing a timer cancels whatever task
//! was previously running for that `(call, kind)` pair via
//! [`tokio::task::JoinHandle::abort`] — the same lifecycle idiom the corpus
//! uses for its monitor/queue-processor background tasks.

use crate::types::CallId;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Which named timer fired or was (re)armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// No caller speech/digits for the configured silence window (spec §4.3).
    Silence,
    /// A digit expectation's collection timeout (spec §4.2).
    DigitTimeout,
    /// Debounce window before a console edit is flushed (spec §4.7).
    ConsoleEdit,
    /// Grace period before a deferred terminal status is finalized (spec §4.9).
    PendingTerminal,
    /// Grace period to infer "no response" after a prompt with no reply (spec §4.3).
    NoResponseInfer,
}

/// A fired timer, delivered on the manager's event channel.
#[derive(Debug, Clone)]
pub struct TimerEvent {
    pub call: CallId,
    pub kind: TimerKind,
}

/// Tracks one spawned delay task per `(call, kind)` pair so it can be
/// cancelled on reset or call teardown.
pub struct TimerManager {
    handles: DashMap<(CallId, TimerKind), JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<TimerEvent>,
}

impl TimerManager {
    /// Build a manager and the receiver side of its event channel. The
    /// orchestrator owns the receiver and folds `TimerEvent`s into its main
    /// event loop alongside adapter callbacks.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (Self { handles: DashMap::new(), events_tx }, events_rx)
    }

    /// Arm a timer, replacing (and cancelling) any existing timer of the same
    /// kind for this call (spec: "set/clear/reset with cancellation
    /// guarantees" — a `set` is always a clean reset, never additive).
    pub fn set(&self, call: CallId, kind: TimerKind, delay: Duration) {
        self.clear(&call, kind);
        let tx = self.events_tx.clone();
        let event_call = call.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerEvent { call: event_call, kind });
        });
        self.handles.insert((call, kind), handle);
    }

    /// Cancel a specific named timer for a call, if armed. Idempotent.
    pub fn clear(&self, call: &CallId, kind: TimerKind) {
        if let Some((_, handle)) = self.handles.remove(&(call.clone(), kind)) {
            handle.abort();
        }
    }

    /// Cancel every timer belonging to a call (spec §5: "cascaded-clear on
    /// teardown"). Idempotent.
    pub fn clear_all(&self, call: &CallId) {
        let keys: Vec<_> = self.handles.iter().map(|e| e.key().clone()).filter(|(c, _)| c == call).collect();
        for key in keys {
            if let Some((_, handle)) = self.handles.remove(&key) {
                handle.abort();
            }
        }
        debug!(call_id = %call, "timers_cleared");
    }

    #[cfg(test)]
    pub fn is_armed(&self, call: &CallId, kind: TimerKind) -> bool {
        self.handles.contains_key(&(call.clone(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_fires_after_delay() {
        let (mgr, mut rx) = TimerManager::new();
        let call = CallId::new("call-1");
        mgr.set(call.clone(), TimerKind::Silence, Duration::from_millis(10));
        let event = rx.recv().await.expect("timer event");
        assert_eq!(event.call, call);
        assert_eq!(event.kind, TimerKind::Silence);
    }

    #[tokio::test]
    async fn resetting_a_timer_cancels_the_previous_one() {
        let (mgr, mut rx) = TimerManager::new();
        let call = CallId::new("call-1");
        mgr.set(call.clone(), TimerKind::DigitTimeout, Duration::from_millis(500));
        assert!(mgr.is_armed(&call, TimerKind::DigitTimeout));
        mgr.set(call.clone(), TimerKind::DigitTimeout, Duration::from_millis(10));
        let event = rx.recv().await.expect("second timer should still fire");
        assert_eq!(event.kind, TimerKind::DigitTimeout);
        // Only one event should have been delivered; the first task was aborted.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clear_all_cancels_every_timer_for_the_call() {
        let (mgr, _rx) = TimerManager::new();
        let call = CallId::new("call-1");
        mgr.set(call.clone(), TimerKind::Silence, Duration::from_secs(60));
        mgr.set(call.clone(), TimerKind::DigitTimeout, Duration::from_secs(60));
        mgr.clear_all(&call);
        assert!(!mgr.is_armed(&call, TimerKind::Silence));
        assert!(!mgr.is_armed(&call, TimerKind::DigitTimeout));
    }
}
