//! Task status store — the single source of truth for "what do we currently
//! believe about task N".
//!
//! Written by the reconciliation logic only; read by any number of consumers.
//! Performs no I/O and cannot fail: the contract is last-write-wins per field
//! group, applied atomically under an interior lock. Alongside the full
//! status records it maintains a plain progress projection for consumers that
//! only render a progress bar.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::protocol::{TaskId, TaskStatus};

/// Last-known projection of a task's server-side state.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub status: TaskStatus,
    /// Last reported percentage in [0, 100]. Not contractually monotonic — a
    /// fresh snapshot after a reconnect may move backward.
    pub progress: f64,
    pub message: Option<String>,
    /// Only ever populated while `status` is `failed`.
    pub error: Option<String>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, TaskState>,
    progress: HashMap<TaskId, f64>,
}

/// Shared, cheaply clonable store keyed by task id.
#[derive(Clone, Default)]
pub struct TaskStatusStore {
    inner: Arc<RwLock<Inner>>,
}

impl TaskStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the record for `task_id`. An omitted `progress` retains the
    /// previously stored value (0 if none exists); the plain progress
    /// projection is kept in sync with the same value. An `error` is only
    /// retained alongside a failed status.
    pub fn set_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        progress: Option<f64>,
        message: Option<String>,
        error: Option<String>,
    ) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let prior = inner.tasks.get(&task_id).map(|t| t.progress).unwrap_or(0.0);
        let progress = clamp_percent(progress.unwrap_or(prior));
        let error = if status == TaskStatus::Failed { error } else { None };
        inner.tasks.insert(
            task_id,
            TaskState {
                status,
                progress,
                message,
                error,
            },
        );
        inner.progress.insert(task_id, progress);
    }

    /// Update only the plain progress projection.
    pub fn set_progress(&self, task_id: TaskId, progress: f64) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.progress.insert(task_id, clamp_percent(progress));
    }

    /// Remove all state for a task id. Idempotent — used when a consumer
    /// dismisses a finished task.
    pub fn clear(&self, task_id: TaskId) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.tasks.remove(&task_id);
        inner.progress.remove(&task_id);
    }

    /// Read the full record. `None` means "never tracked or already cleared",
    /// which callers must treat as unknown, not as an error.
    pub fn get(&self, task_id: TaskId) -> Option<TaskState> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .tasks
            .get(&task_id)
            .cloned()
    }

    /// Read the plain progress projection.
    pub fn progress(&self, task_id: TaskId) -> Option<f64> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .progress
            .get(&task_id)
            .copied()
    }
}

fn clamp_percent(p: f64) -> f64 {
    if p.is_nan() {
        return 0.0;
    }
    p.clamp(0.0, 100.0)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn omitted_progress_preserves_prior_value() {
        let store = TaskStatusStore::new();
        store.set_status(1, TaskStatus::Processing, Some(40.0), None, None);
        store.set_status(1, TaskStatus::Processing, None, Some("parsing".into()), None);
        let state = store.get(1).unwrap();
        assert_eq!(state.progress, 40.0);
        assert_eq!(state.message.as_deref(), Some("parsing"));
        assert_eq!(store.progress(1), Some(40.0));
    }

    #[test]
    fn first_write_with_omitted_progress_defaults_to_zero() {
        let store = TaskStatusStore::new();
        store.set_status(2, TaskStatus::Pending, None, None, None);
        assert_eq!(store.get(2).unwrap().progress, 0.0);
    }

    #[test]
    fn error_is_dropped_unless_status_is_failed() {
        let store = TaskStatusStore::new();
        store.set_status(3, TaskStatus::Processing, Some(10.0), None, Some("boom".into()));
        assert_eq!(store.get(3).unwrap().error, None);

        store.set_status(3, TaskStatus::Failed, None, None, Some("boom".into()));
        assert_eq!(store.get(3).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn progress_is_clamped_to_percent_range() {
        let store = TaskStatusStore::new();
        store.set_status(4, TaskStatus::Processing, Some(250.0), None, None);
        assert_eq!(store.get(4).unwrap().progress, 100.0);
        store.set_progress(4, -5.0);
        assert_eq!(store.progress(4), Some(0.0));
    }

    #[test]
    fn set_progress_does_not_touch_the_status_record() {
        let store = TaskStatusStore::new();
        store.set_status(5, TaskStatus::Processing, Some(20.0), Some("m".into()), None);
        store.set_progress(5, 60.0);
        let state = store.get(5).unwrap();
        assert_eq!(state.progress, 20.0);
        assert_eq!(state.status, TaskStatus::Processing);
        assert_eq!(store.progress(5), Some(60.0));
    }

    #[test]
    fn clear_is_idempotent_and_removes_both_projections() {
        let store = TaskStatusStore::new();
        store.set_status(6, TaskStatus::Completed, Some(100.0), None, None);
        store.clear(6);
        store.clear(6);
        assert!(store.get(6).is_none());
        assert!(store.progress(6).is_none());
    }

    fn arb_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::Processing),
            Just(TaskStatus::Completed),
            Just(TaskStatus::Failed),
        ]
    }

    proptest! {
        // Last-write-wins: after any sequence of set_status calls, get()
        // reflects the last status and the last non-omitted progress value.
        #[test]
        fn last_write_wins(seq in prop::collection::vec((arb_status(), prop::option::of(0u8..=100)), 1..32)) {
            let store = TaskStatusStore::new();
            let mut expected_progress = 0.0f64;
            for (status, progress) in &seq {
                let progress = progress.map(f64::from);
                if let Some(p) = progress {
                    expected_progress = p;
                }
                store.set_status(9, *status, progress, None, None);
            }
            let (last_status, _) = seq.last().unwrap();
            let state = store.get(9).unwrap();
            prop_assert_eq!(state.status, *last_status);
            prop_assert_eq!(state.progress, expected_progress);
            prop_assert_eq!(store.progress(9), Some(expected_progress));
        }
    }
}
