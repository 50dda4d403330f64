//! Subscription binding — a consumer's declarative "track task X" handle.
//!
//! Wraps the push channel's ref-counted attach/detach so a consumer never
//! touches connection lifecycle directly: changing the tracked task (or
//! toggling `enabled`) tears the previous attachment down and creates a new
//! one, re-syncing with an unchanged target is a no-op, and dropping the
//! subscription releases its interest on every exit path. Immediately after
//! the channel reports open, one `get_status` request is issued so a consumer
//! attaching to an already-running task gets a snapshot without waiting for
//! the next push.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::channel::push::PushChannel;
use crate::channel::{ConnectionStatus, TaskEventHandlers};
use crate::protocol::TaskId;

struct SubState {
    task_id: Option<TaskId>,
    enabled: bool,
    attached: Option<TaskId>,
    handlers: TaskEventHandlers,
}

pub struct TaskSubscription {
    channel: Arc<PushChannel>,
    state: Mutex<SubState>,
}

impl TaskSubscription {
    /// Create a subscription and, when `enabled` and a task id is present,
    /// attach immediately.
    pub async fn new(
        channel: Arc<PushChannel>,
        task_id: Option<TaskId>,
        enabled: bool,
        handlers: TaskEventHandlers,
    ) -> Self {
        let sub = Self {
            channel,
            state: Mutex::new(SubState {
                task_id,
                enabled,
                attached: None,
                handlers,
            }),
        };
        {
            let mut st = sub.state.lock().await;
            sub.sync(&mut st).await;
        }
        sub
    }

    /// Retarget to another task (or to none). The previous attachment is
    /// released before the new one is created, so the consumer is never left
    /// listening to the wrong task.
    pub async fn set_task(&self, task_id: Option<TaskId>) {
        let mut st = self.state.lock().await;
        st.task_id = task_id;
        self.sync(&mut st).await;
    }

    /// Retarget with a fresh per-attach handler set.
    pub async fn set_task_with_handlers(&self, task_id: Option<TaskId>, handlers: TaskEventHandlers) {
        let mut st = self.state.lock().await;
        st.task_id = task_id;
        st.handlers = handlers;
        // Force a re-attach so the new handlers take effect even when the id
        // is unchanged.
        if let Some(old) = st.attached.take() {
            self.channel.detach(old).await;
        }
        self.sync(&mut st).await;
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let mut st = self.state.lock().await;
        st.enabled = enabled;
        self.sync(&mut st).await;
    }

    /// Current connection status, derived from channel events.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.channel.status()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.channel.status_watch()
    }

    /// Best-effort send over the underlying channel.
    pub async fn send(&self, payload: Value) {
        self.channel.send(payload).await;
    }

    pub async fn request_status(&self) {
        self.channel.request_status().await;
    }

    /// Release this subscription's interest. Idempotent; also happens on
    /// Drop.
    pub async fn detach(&self) {
        let mut st = self.state.lock().await;
        st.enabled = false;
        if let Some(old) = st.attached.take() {
            self.channel.detach(old).await;
        }
    }

    /// Reconcile the attachment with the desired (task_id, enabled) pair.
    async fn sync(&self, st: &mut SubState) {
        let want = if st.enabled { st.task_id } else { None };
        if st.attached == want {
            // Repeated syncs with an unchanged target must not duplicate the
            // attachment.
            return;
        }
        if let Some(old) = st.attached.take() {
            self.channel.detach(old).await;
        }
        if let Some(id) = want {
            let handlers = self.with_auto_status(st.handlers.clone());
            self.channel.attach(id, handlers).await;
            st.attached = Some(id);
        }
    }

    /// Wrap `on_connect` so every open transition issues one `get_status`.
    fn with_auto_status(&self, handlers: TaskEventHandlers) -> TaskEventHandlers {
        let channel = self.channel.clone();
        let user_on_connect = handlers.on_connect.clone();
        handlers.on_connect(move || {
            if let Some(cb) = &user_on_connect {
                cb();
            }
            let channel = channel.clone();
            tokio::spawn(async move {
                channel.request_status().await;
            });
        })
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        // Best-effort release; deterministic teardown goes through detach().
        // A release that cannot happen here leaks the interest on the shared
        // channel, so it is counted rather than silently swallowed.
        match self.state.try_lock() {
            Ok(mut st) => {
                if let Some(id) = st.attached.take() {
                    let channel = self.channel.clone();
                    match tokio::runtime::Handle::try_current() {
                        Ok(rt) => {
                            rt.spawn(async move {
                                channel.detach(id).await;
                            });
                        }
                        Err(_) => {
                            debug!(task_id = id, "subscription dropped outside a runtime; interest leaked");
                            self.channel.diagnostics().record_leaked_interest();
                        }
                    }
                }
            }
            Err(_) => {
                debug!("subscription state contended at drop; interest may leak");
                self.channel.diagnostics().record_leaked_interest();
            }
        }
    }
}
