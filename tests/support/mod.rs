//! In-process WebSocket servers and timing helpers for channel tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

use graphload::backoff::ReconnectPolicy;
use graphload::ProgressConfig;

pub type ServerWs = WebSocketStream<TcpStream>;

pub struct WsServer {
    /// `ws://` base URL for `ProgressConfig::ws_base_url`.
    pub url: String,
    /// Completed WebSocket handshakes.
    pub accepted: Arc<AtomicUsize>,
}

/// Accept connections forever, running `behavior(ws, connection_index)` for
/// each completed handshake.
pub async fn spawn_ws_server<F, Fut>(behavior: F) -> WsServer
where
    F: Fn(ServerWs, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();
    let behavior = Arc::new(behavior);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let count = count.clone();
            let behavior = behavior.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    behavior(ws, n).await;
                }
            });
        }
    });

    WsServer {
        url: format!("ws://{addr}"),
        accepted,
    }
}

/// Accepts TCP connections and drops them before the WebSocket handshake, so
/// every connect attempt fails. Returns the base URL and the accept counter.
pub async fn spawn_refusing_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            count.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (format!("ws://{addr}"), accepted)
}

/// Config with millisecond-scale timers so tests run in real time.
pub fn fast_config(ws_url: &str) -> ProgressConfig {
    ProgressConfig {
        ws_base_url: Some(ws_url.to_string()),
        keepalive_interval: Duration::from_millis(40),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            max_attempts: 3,
        },
        ..Default::default()
    }
}

/// Poll `condition` every 5 ms until it holds or `timeout_ms` elapses.
pub async fn wait_until(timeout_ms: u64, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
