//! graphload — progress-tracking client for asynchronous CSV → graph import
//! tasks.
//!
//! Server-side imports are long-running background jobs. This crate keeps a
//! live, eventually-consistent view of their state: a push channel over a
//! duplex socket when available, a polling fallback when not, both feeding a
//! shared [`store::TaskStatusStore`] through the reconciliation rules in
//! [`reconcile`]. Transport failures (flaps, reconnect storms, duplicate or
//! out-of-order frames) are absorbed here and never surface to consumers;
//! only task-level outcomes do.

pub mod api;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod diag;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod store;
pub mod subscribe;

pub use api::{HttpTaskApi, TaskStatusApi};
pub use channel::poll::{PollChannel, PollHandle};
pub use channel::push::PushChannel;
pub use channel::{ConnectionStatus, TaskEventHandlers};
pub use config::ProgressConfig;
pub use error::ApiError;
pub use protocol::{ServerFrame, TaskId, TaskSnapshot, TaskStatus};
pub use reconcile::Reconciler;
pub use store::{TaskState, TaskStatusStore};
pub use subscribe::TaskSubscription;
