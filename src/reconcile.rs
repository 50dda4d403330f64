//! Reconciliation — merges heterogeneous inbound notifications into the task
//! status store and drives consumer-visible terminal callbacks exactly once.
//!
//! Rules, in priority order:
//! 1. `progress` — write `processing` with the carried percentage (default 0)
//! 2. `status` — write status/progress/message/error; a positive percentage
//!    is additionally pushed through the plain progress projection
//! 3. `connection` — same as `status`, sourced from the embedded snapshot
//! 4. `error` — write `failed` with the carried (or a generic) error message
//! 5. anything else — ignored
//!
//! Duplicate terminal notifications are expected (a push message followed by
//! a stale poll); the completion/failure callback latches on the first
//! terminal observation and never fires again for this reconciler's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::protocol::{ServerFrame, TaskId, TaskSnapshot, TaskStatus};
use crate::store::TaskStatusStore;

const GENERIC_TASK_ERROR: &str = "Task failed";

type CompleteFn = dyn Fn() + Send + Sync;
type FailedFn = dyn Fn(&str) + Send + Sync;

/// Per-subscription reconciler, scoped to a single task id.
pub struct Reconciler {
    store: TaskStatusStore,
    task_id: TaskId,
    on_complete: Option<Arc<CompleteFn>>,
    on_failed: Option<Arc<FailedFn>>,
    terminal_fired: AtomicBool,
}

impl Reconciler {
    pub fn new(store: TaskStatusStore, task_id: TaskId) -> Self {
        Self {
            store,
            task_id,
            on_complete: None,
            on_failed: None,
            terminal_fired: AtomicBool::new(false),
        }
    }

    /// Callback fired exactly once when the task transitions to `completed`.
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Callback fired exactly once when the task transitions to `failed`,
    /// carrying the error message.
    pub fn on_failed(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(f));
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Merge one inbound frame into the store.
    pub fn apply(&self, frame: &ServerFrame) {
        // Frames addressed to a different task can arrive during a retarget
        // race; they must not touch this task's projection.
        if let Some(id) = frame.task_id() {
            if id != self.task_id {
                trace!(task_id = self.task_id, frame_task = id, "frame for another task ignored");
                return;
            }
        }

        match frame {
            ServerFrame::Progress {
                percentage,
                message,
                ..
            } => {
                self.store.set_status(
                    self.task_id,
                    TaskStatus::Processing,
                    Some(percentage.unwrap_or(0.0)),
                    message.clone(),
                    None,
                );
            }
            ServerFrame::Status {
                status,
                percentage,
                message,
                error,
                ..
            } => {
                self.write_status(*status, percentage.unwrap_or(0.0), message.clone(), error.clone());
            }
            ServerFrame::Connection { task, .. } => {
                if let Some(snapshot) = task {
                    self.apply_snapshot(snapshot);
                } else {
                    debug!(task_id = self.task_id, "connection frame without snapshot ignored");
                }
            }
            ServerFrame::Error { message, .. } => {
                let error = message
                    .clone()
                    .unwrap_or_else(|| GENERIC_TASK_ERROR.to_string());
                self.store.set_status(
                    self.task_id,
                    TaskStatus::Failed,
                    None,
                    None,
                    Some(error.clone()),
                );
                self.note_terminal(TaskStatus::Failed, Some(&error));
            }
            ServerFrame::Pong | ServerFrame::Other(_) => {}
        }
    }

    /// Merge a full task snapshot (connection frame or pull-channel fetch).
    pub fn apply_snapshot(&self, snapshot: &TaskSnapshot) {
        self.write_status(
            snapshot.status,
            snapshot.progress_percentage.unwrap_or(0.0),
            None,
            snapshot.error_message.clone(),
        );
    }

    fn write_status(
        &self,
        status: TaskStatus,
        percentage: f64,
        message: Option<String>,
        error: Option<String>,
    ) {
        self.store
            .set_status(self.task_id, status, Some(percentage), message, error.clone());
        if percentage > 0.0 {
            // Covers consumers that only watch the plain progress projection.
            self.store.set_progress(self.task_id, percentage);
        }
        self.note_terminal(status, error.as_deref());
    }

    fn note_terminal(&self, status: TaskStatus, error: Option<&str>) {
        if !status.is_terminal() || self.terminal_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        match status {
            TaskStatus::Completed => {
                if let Some(cb) = &self.on_complete {
                    cb();
                }
            }
            TaskStatus::Failed => {
                if let Some(cb) = &self.on_failed {
                    cb(error.unwrap_or(GENERIC_TASK_ERROR));
                }
            }
            _ => unreachable!(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
