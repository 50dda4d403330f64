//! Push progress channel — one persistent duplex socket per attached task.
//!
//! Lifecycle:
//! 1. `connect` (or `attach`) spawns a background task that opens the task's
//!    socket URL and publishes `closed → connecting → open` transitions
//!    through a watch channel
//! 2. While open, a keepalive ping is sent on a fixed interval (default 30 s)
//!    — intermediary proxies silently kill idle duplex connections
//! 3. Inbound `pong` frames are swallowed; every other parsed frame is
//!    forwarded to `on_message` in transport order; unparseable frames are
//!    dropped and counted
//! 4. On close the channel reconnects with exponential backoff
//!    (1 s, 2 s, 4 s, … capped at 30 s, at most 5 consecutive attempts),
//!    unless `disconnect` was called. The attempt counter resets to 0 on
//!    every successful open
//!
//! At most one live connection exists per channel instance; a new `connect`
//! for a different task tears the previous one down first. Consumers share
//! the connection through ref-counted `attach`/`detach`; the transport only
//! closes when the last interest is released.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::{ConnectionStatus, TaskEventHandlers};
use crate::backoff::{reconnect_delay, ReconnectPolicy};
use crate::config::ProgressConfig;
use crate::diag::Diagnostics;
use crate::protocol::{get_status_frame, ping_frame, ServerFrame, TaskId};

enum Command {
    Send(Value),
    Close,
}

struct Attachment {
    task_id: TaskId,
    refcount: usize,
    cmd_tx: mpsc::UnboundedSender<Command>,
    handlers: Arc<StdRwLock<TaskEventHandlers>>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    attachment: Option<Attachment>,
}

/// Explicitly constructed, injectable push channel service.
pub struct PushChannel {
    config: Arc<ProgressConfig>,
    diag: Arc<Diagnostics>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    manual_close: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    inner: Mutex<Inner>,
}

impl PushChannel {
    pub fn new(config: Arc<ProgressConfig>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Closed);
        Self {
            config,
            diag: Arc::new(Diagnostics::default()),
            status_tx: Arc::new(status_tx),
            manual_close: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU32::new(0)),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Current transport status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Event-driven status feed for consumers.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Leniency-policy counters (dropped frames, dropped sends, …).
    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diag.clone()
    }

    /// Open the progress socket for `task_id`. Idempotent: if the channel is
    /// already attached to the same task, only the handler set is replaced.
    /// A different task id tears the previous connection down first.
    pub async fn connect(&self, task_id: TaskId, handlers: TaskEventHandlers) {
        let mut inner = self.inner.lock().await;
        if let Some(att) = &inner.attachment {
            if att.task_id == task_id && !att.handle.is_finished() {
                *att.handlers.write().expect("handler lock poisoned") = handlers;
                return;
            }
        }
        self.teardown(&mut inner).await;
        inner.attachment = Some(self.spawn_attachment(task_id, handlers, 1));
    }

    /// Ref-counted variant of `connect` for shared consumers. Each `attach`
    /// must be balanced by one `detach`; the transport closes when the count
    /// reaches zero.
    pub async fn attach(&self, task_id: TaskId, handlers: TaskEventHandlers) {
        let mut inner = self.inner.lock().await;
        let mut carried = 0;
        if let Some(att) = &mut inner.attachment {
            if att.task_id == task_id && !att.handle.is_finished() {
                att.refcount += 1;
                *att.handlers.write().expect("handler lock poisoned") = handlers;
                return;
            }
            if att.task_id == task_id {
                // The connection task exited (reconnect exhaustion) but the
                // earlier interests are still registered; they must survive
                // the respawn or a single detach would close the transport
                // out from under them.
                carried = att.refcount;
            } else if att.refcount > 0 {
                // One shared transport per channel: latest target wins.
                warn!(
                    old_task = att.task_id,
                    new_task = task_id,
                    "push channel retargeted while still attached"
                );
            }
        }
        self.teardown(&mut inner).await;
        inner.attachment = Some(self.spawn_attachment(task_id, handlers, carried + 1));
    }

    /// Release one interest in `task_id`. Closes the transport when the last
    /// interest is released. Ignored when not attached to that task.
    pub async fn detach(&self, task_id: TaskId) {
        let mut inner = self.inner.lock().await;
        let last_interest = {
            let Some(att) = &mut inner.attachment else {
                return;
            };
            if att.task_id != task_id {
                return;
            }
            att.refcount = att.refcount.saturating_sub(1);
            att.refcount == 0
        };
        if last_interest {
            self.teardown(&mut inner).await;
        }
    }

    /// Transmit `payload` if the connection is currently open; otherwise the
    /// payload is silently dropped (best-effort, no queueing).
    pub async fn send(&self, payload: Value) {
        if self.status() != ConnectionStatus::Open {
            self.diag.record_dropped_send();
            return;
        }
        let inner = self.inner.lock().await;
        let delivered = match &inner.attachment {
            Some(att) => att.cmd_tx.send(Command::Send(payload)).is_ok(),
            None => false,
        };
        if !delivered {
            self.diag.record_dropped_send();
        }
    }

    /// Ask the server for its current task state. Used right after a
    /// (re)connect so a late-attaching consumer gets a snapshot instead of
    /// waiting for the next incremental update.
    pub async fn request_status(&self) {
        self.send(get_status_frame()).await;
    }

    /// Permanently stop this channel: suppresses any pending reconnect and
    /// closes the transport. The only way to stop retries short of the
    /// attempt cap.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
    }

    async fn teardown(&self, inner: &mut Inner) {
        let Some(att) = inner.attachment.take() else {
            return;
        };
        self.manual_close.store(true, Ordering::SeqCst);
        let _ = att.cmd_tx.send(Command::Close);
        // The connection task exits promptly on Close, including while it is
        // sleeping out a backoff delay.
        let _ = att.handle.await;
    }

    fn spawn_attachment(
        &self,
        task_id: TaskId,
        handlers: TaskEventHandlers,
        refcount: usize,
    ) -> Attachment {
        self.manual_close.store(false, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);

        let handlers = Arc::new(StdRwLock::new(handlers));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctx = ConnCtx {
            url: self.config.task_socket_url(task_id),
            task_id,
            handlers: handlers.clone(),
            status: self.status_tx.clone(),
            manual_close: self.manual_close.clone(),
            attempts: self.attempts.clone(),
            diag: self.diag.clone(),
            keepalive: self.config.keepalive_interval,
            policy: self.config.reconnect.clone(),
        };
        let handle = tokio::spawn(run_connection(ctx, cmd_rx));
        Attachment {
            task_id,
            refcount,
            cmd_tx,
            handlers,
            handle,
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(att) = inner.attachment.take() {
                att.handle.abort();
            }
        }
    }
}

// ─── Connection task ──────────────────────────────────────────────────────────

struct ConnCtx {
    url: String,
    task_id: TaskId,
    handlers: Arc<StdRwLock<TaskEventHandlers>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    manual_close: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    diag: Arc<Diagnostics>,
    keepalive: std::time::Duration,
    policy: ReconnectPolicy,
}

impl ConnCtx {
    fn handlers(&self) -> TaskEventHandlers {
        self.handlers.read().expect("handler lock poisoned").clone()
    }
}

async fn run_connection(ctx: ConnCtx, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    'outer: loop {
        ctx.status.send_replace(ConnectionStatus::Connecting);
        info!(task_id = ctx.task_id, url = %ctx.url, "task socket: connecting");

        match connect_async(&ctx.url).await {
            Ok((ws, _)) => {
                if ctx.manual_close.load(Ordering::SeqCst) {
                    // disconnect() raced the handshake
                    break 'outer;
                }
                ctx.attempts.store(0, Ordering::SeqCst);
                ctx.status.send_replace(ConnectionStatus::Open);
                info!(task_id = ctx.task_id, "task socket: open");
                if let Some(cb) = &ctx.handlers().on_connect {
                    cb();
                }

                let (mut sink, mut stream) = ws.split();
                let mut keepalive = tokio::time::interval(ctx.keepalive);
                keepalive.tick().await; // first tick fires immediately

                loop {
                    tokio::select! {
                        _ = keepalive.tick() => {
                            trace!(task_id = ctx.task_id, "task socket: ping");
                            if sink.send(Message::Text(ping_frame().to_string())).await.is_err() {
                                break;
                            }
                        }
                        cmd = cmd_rx.recv() => match cmd {
                            Some(Command::Send(payload)) => {
                                if sink.send(Message::Text(payload.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Command::Close) | None => {
                                ctx.status.send_replace(ConnectionStatus::Closing);
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                        },
                        msg = stream.next() => match msg {
                            Some(Ok(Message::Text(text))) => dispatch_frame(&ctx, &text),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                warn!(task_id = ctx.task_id, "task socket: receive error: {e}");
                                if let Some(cb) = &ctx.handlers().on_error {
                                    cb(&e.to_string());
                                }
                                break;
                            }
                            Some(Ok(_)) => {} // transport-level ping/pong/binary
                        }
                    }
                }

                ctx.status.send_replace(ConnectionStatus::Closed);
                info!(task_id = ctx.task_id, "task socket: closed");
                if let Some(cb) = &ctx.handlers().on_disconnect {
                    cb();
                }
            }
            Err(e) => {
                warn!(task_id = ctx.task_id, "task socket: connect failed: {e}");
                ctx.status.send_replace(ConnectionStatus::Closed);
                if let Some(cb) = &ctx.handlers().on_error {
                    cb(&e.to_string());
                }
            }
        }

        if ctx.manual_close.load(Ordering::SeqCst) {
            break 'outer;
        }

        let attempt = ctx.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > ctx.policy.max_attempts {
            warn!(
                task_id = ctx.task_id,
                attempts = ctx.policy.max_attempts,
                "task socket: reconnect attempts exhausted"
            );
            if let Some(cb) = &ctx.handlers().on_exhausted {
                cb();
            }
            break 'outer;
        }

        let delay = reconnect_delay(attempt, &ctx.policy);
        info!(
            task_id = ctx.task_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "task socket: reconnecting"
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close) | None => break 'outer,
                    // Best-effort sends are dropped while disconnected.
                    Some(Command::Send(_)) => ctx.diag.record_dropped_send(),
                }
            }
        }
    }

    ctx.status.send_replace(ConnectionStatus::Closed);
}

fn dispatch_frame(ctx: &ConnCtx, text: &str) {
    match ServerFrame::parse(text) {
        Some(ServerFrame::Pong) => {
            trace!(task_id = ctx.task_id, "task socket: pong");
            ctx.diag.record_pong();
        }
        Some(frame) => {
            if let Some(cb) = &ctx.handlers().on_message {
                cb(&frame);
            }
        }
        None => {
            // Deliberate leniency: the server is trusted and malformed frames
            // only occur in teardown races.
            debug!(task_id = ctx.task_id, "task socket: unparseable frame dropped");
            ctx.diag.record_malformed_frame();
        }
    }
}
