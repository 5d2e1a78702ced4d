//! # LLM Task Queue
//!
//! One FIFO task queue per call, each drained by a single background task so
//! at most one LLM turn is ever in flight for a given call (spec §4.6). The
//! worker loop and its `JoinHandle`/abort-on-teardown lifecycle mirror the
//! corpus's `queue_processor_loop` (`call-engine/src/server.rs`): a task is
//! spawned per queue, owns an `mpsc::UnboundedReceiver`, and is aborted when
//! the call ends rather than signaled to stop cooperatively.

use crate::types::CallId;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

struct CallQueue {
    tx: mpsc::UnboundedSender<Task>,
    worker: JoinHandle<()>,
    draining: Arc<AtomicBool>,
}

/// Per-call FIFO executor for LLM turns (spec §4.6: "at most one outstanding
/// task per call; errors are isolated and never propagate to other tasks").
pub struct LlmTaskQueue {
    queues: DashMap<CallId, CallQueue>,
}

impl LlmTaskQueue {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    /// Enqueue a task for `call`, spawning its worker loop on first use.
    /// Refuses new work once the call has started draining (spec §4.6
    /// "drain semantics: refuses new tasks on call end").
    pub fn enqueue<F>(&self, call: &CallId, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let entry = self.queues.entry(call.clone()).or_insert_with(|| Self::spawn_worker(call.clone()));
        if entry.draining.load(Ordering::Acquire) {
            warn!(call_id = %call, "llm task rejected, queue draining");
            return false;
        }
        if entry.tx.send(Box::pin(task)).is_err() {
            warn!(call_id = %call, "llm task rejected, worker gone");
            return false;
        }
        true
    }

    fn spawn_worker(call: CallId) -> CallQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let draining = Arc::new(AtomicBool::new(false));
        let worker_call = call.clone();
        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
                debug!(call_id = %worker_call, "llm_task_completed");
            }
        });
        CallQueue { tx, worker, draining }
    }

    /// Stop accepting new tasks for `call`; whatever is already queued or
    /// in-flight still runs to completion (spec §4.6: "in-flight allowed to
    /// complete but discarded if the session entered Closing" — discarding
    /// the *result* is the caller's responsibility, since the task itself
    /// only ever produces side effects through channels it was given).
    pub fn begin_drain(&self, call: &CallId) {
        if let Some(queue) = self.queues.get(call) {
            queue.draining.store(true, Ordering::Release);
        }
    }

    /// Abort the worker and drop its queue outright, discarding anything
    /// still pending (spec §4.6 teardown).
    pub fn clear(&self, call: &CallId) {
        if let Some((_, queue)) = self.queues.remove(call) {
            queue.worker.abort();
        }
    }

    #[cfg(test)]
    pub fn is_draining(&self, call: &CallId) -> bool {
        self.queues.get(call).map(|q| q.draining.load(Ordering::Acquire)).unwrap_or(false)
    }
}

impl Default for LlmTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `body`, logging and swallowing any error rather than letting it
/// propagate, so one failing LLM turn never poisons the queue for the next
/// (spec §4.6: "errors are logged, never propagated to other tasks").
pub async fn isolate<Fut>(call: CallId, label: &'static str, body: Fut)
where
    Fut: Future<Output = crate::error::Result<()>>,
{
    if let Err(err) = body.await {
        error!(call_id = %call, task = label, error = %err, "llm_task_failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn tasks_run_in_fifo_order() {
        let queue = LlmTaskQueue::new();
        let call = CallId::new("call-1");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let order = order.clone();
            queue.enqueue(&call, async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                order.lock().push(i);
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn draining_rejects_new_tasks_but_lets_existing_finish() {
        let queue = LlmTaskQueue::new();
        let call = CallId::new("call-1");
        let completed = Arc::new(AtomicUsize::new(0));

        let c = completed.clone();
        queue.enqueue(&call, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.fetch_add(1, Ordering::SeqCst);
        });
        queue.begin_drain(&call);
        assert!(queue.is_draining(&call));

        let c2 = completed.clone();
        let accepted = queue.enqueue(&call, async move {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!accepted);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handles_a_large_burst_without_losing_tasks() {
        let queue = LlmTaskQueue::new();
        let call = CallId::new("call-1");
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..150 {
            let c = completed.clone();
            queue.enqueue(&call, async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 150);
    }

    #[tokio::test]
    async fn clear_aborts_the_worker() {
        let queue = LlmTaskQueue::new();
        let call = CallId::new("call-1");
        queue.enqueue(&call, async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        queue.clear(&call);
        assert!(queue.queues.get(&call).is_none());
    }
}
