//! Pull progress channel — polling fallback for call sites that do not need
//! sub-second latency.
//!
//! On attach the task's status is fetched immediately, reconciled into the
//! store, then re-fetched on a fixed cadence (default 2 s) until a fetched
//! status is terminal, at which point the timer stops permanently. Fetch
//! failures (task not yet visible, transient network errors) are swallowed
//! and retried on the next tick — this variant never surfaces a transport
//! error to the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::api::TaskStatusApi;
use crate::config::ProgressConfig;
use crate::diag::Diagnostics;
use crate::reconcile::Reconciler;

pub struct PollChannel {
    api: Arc<dyn TaskStatusApi>,
    interval: Duration,
    diag: Arc<Diagnostics>,
}

impl PollChannel {
    pub fn new(api: Arc<dyn TaskStatusApi>, config: &ProgressConfig) -> Self {
        Self {
            api,
            interval: config.poll_interval,
            diag: Arc::new(Diagnostics::default()),
        }
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diag.clone()
    }

    /// Poll the reconciler's task until it reaches a terminal state. Dropping
    /// (or stopping) the returned handle cancels polling early.
    pub fn watch(&self, reconciler: Reconciler) -> PollHandle {
        let api = self.api.clone();
        let diag = self.diag.clone();
        let interval = self.interval;
        let task_id = reconciler.task_id();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A slow fetch delays the next tick instead of bursting.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match api.fetch_task(task_id).await {
                    Ok(snapshot) => {
                        reconciler.apply_snapshot(&snapshot);
                        if snapshot.status.is_terminal() {
                            info!(task_id, status = %snapshot.status, "poll channel: task reached terminal state");
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(task_id, "poll channel: fetch failed, retrying next tick: {e}");
                        diag.record_fetch_failure();
                    }
                }
            }
        });
        PollHandle { handle }
    }
}

/// Scoped handle for one polling loop.
pub struct PollHandle {
    handle: JoinHandle<()>,
}

impl PollHandle {
    /// True once the task reached a terminal state and polling stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::error::ApiError;
    use crate::protocol::{TaskId, TaskSnapshot, TaskStatus};
    use crate::store::TaskStatusStore;

    /// Scripted fetch results; counts every call. Once the script runs dry
    /// every further call errors, so stray extra fetches still show up in the
    /// call count.
    struct ScriptedApi {
        script: Mutex<VecDeque<Result<TaskSnapshot, ApiError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<TaskSnapshot, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskStatusApi for ScriptedApi {
        async fn fetch_task(&self, task_id: TaskId) -> Result<TaskSnapshot, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ApiError::NotFound(task_id)))
        }
    }

    fn snapshot(status: TaskStatus, progress: f64) -> TaskSnapshot {
        TaskSnapshot {
            id: Some(11),
            status,
            progress_percentage: Some(progress),
            ..Default::default()
        }
    }

    fn fast_config() -> ProgressConfig {
        ProgressConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn polling_stops_after_terminal_fetch_and_no_further_fetch_occurs() {
        let api = ScriptedApi::new(vec![
            Ok(snapshot(TaskStatus::Processing, 30.0)),
            Ok(snapshot(TaskStatus::Completed, 100.0)),
        ]);
        let store = TaskStatusStore::new();
        let channel = PollChannel::new(api.clone(), &fast_config());

        let handle = channel.watch(Reconciler::new(store.clone(), 11));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(api.calls(), 2, "no fetch after the terminal one");
        assert!(handle.is_finished());
        let state = store.get(11).unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.progress, 100.0);
    }

    #[tokio::test]
    async fn fetch_failures_are_swallowed_and_retried() {
        let api = ScriptedApi::new(vec![
            Err(ApiError::NotFound(11)),
            Ok(snapshot(TaskStatus::Processing, 50.0)),
            Ok(snapshot(TaskStatus::Completed, 100.0)),
        ]);
        let store = TaskStatusStore::new();
        let channel = PollChannel::new(api.clone(), &fast_config());

        let _handle = channel.watch(Reconciler::new(store.clone(), 11));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(api.calls(), 3);
        assert_eq!(channel.diagnostics().snapshot().fetch_failures, 1);
        assert_eq!(store.get(11).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn completion_callback_fires_exactly_once() {
        let api = ScriptedApi::new(vec![Ok(snapshot(TaskStatus::Completed, 100.0))]);
        let store = TaskStatusStore::new();
        let channel = PollChannel::new(api.clone(), &fast_config());

        let fired = Arc::new(AtomicUsize::new(0));
        let count = fired.clone();
        let reconciler = Reconciler::new(store, 11).on_complete(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let _handle = channel.watch(reconciler);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(api.calls(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_cancels_polling_before_terminal() {
        let api = ScriptedApi::new(vec![
            Ok(snapshot(TaskStatus::Processing, 10.0)),
            Ok(snapshot(TaskStatus::Processing, 20.0)),
            Ok(snapshot(TaskStatus::Processing, 30.0)),
        ]);
        let store = TaskStatusStore::new();
        let channel = PollChannel::new(api.clone(), &fast_config());

        let handle = channel.watch(Reconciler::new(store, 11));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();
        let calls_at_stop = api.calls();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(api.calls(), calls_at_stop, "no fetches after stop");
    }
}
