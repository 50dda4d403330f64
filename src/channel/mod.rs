//! Progress channels — push (duplex socket) and pull (polling) variants.

pub mod poll;
pub mod push;

use std::sync::Arc;

use crate::protocol::ServerFrame;

// ─── Connection status ────────────────────────────────────────────────────────

/// Lifecycle of the underlying transport, mirrored for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

// ─── Handler set ──────────────────────────────────────────────────────────────

/// Per-attachment callback set. The channel holds only the latest set for its
/// current attachment; a re-attach replaces it wholesale.
#[derive(Clone, Default)]
pub struct TaskEventHandlers {
    pub(crate) on_message: Option<Arc<dyn Fn(&ServerFrame) + Send + Sync>>,
    pub(crate) on_connect: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_disconnect: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_exhausted: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl TaskEventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every parsed, non-liveness frame, in transport order.
    pub fn on_message(mut self, f: impl Fn(&ServerFrame) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Fired on every successful open, including reconnects.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Fired when an open connection closes, cleanly or not.
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Transient transport errors. Informational — recovery is automatic.
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Fired once when the reconnect attempt cap is reached and the channel
    /// stops retrying.
    pub fn on_exhausted(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_exhausted = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for TaskEventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEventHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}
