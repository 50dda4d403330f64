//! Client configuration.
//!
//! Priority (highest to lowest): env var > `config.toml` > built-in default.
//! The socket authority is normally derived from the REST API's own authority
//! (`http(s)` → `ws(s)`); an explicit `ws_base_url` overrides the derivation.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::error;

use crate::backoff::ReconnectPolicy;
use crate::protocol::TaskId;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Configuration for the progress channels.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// REST API base URL (GRAPHLOAD_API_URL env var).
    pub api_base_url: String,
    /// Explicit socket base URL (GRAPHLOAD_WS_URL env var). When absent the
    /// authority is derived from `api_base_url`.
    pub ws_base_url: Option<String>,
    /// Liveness probe interval for the push channel.
    pub keepalive_interval: Duration,
    /// Fetch cadence for the pull channel.
    pub poll_interval: Duration,
    /// Reconnect backoff policy for the push channel.
    pub reconnect: ReconnectPolicy,
    /// Log level filter string, e.g. "info" or "debug,graphload=trace".
    pub log: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: None,
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reconnect: ReconnectPolicy::default(),
            log: "info".to_string(),
        }
    }
}

/// Optional `config.toml` overrides — all fields optional.
#[derive(Deserialize, Default)]
struct TomlConfig {
    api_base_url: Option<String>,
    ws_base_url: Option<String>,
    keepalive_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    log: Option<String>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

impl ProgressConfig {
    /// Build config from CLI args + env + optional TOML file.
    pub fn new(
        api_base_url: Option<String>,
        ws_base_url: Option<String>,
        config_path: Option<&Path>,
    ) -> Self {
        let toml = config_path.and_then(load_toml).unwrap_or_default();
        let defaults = ReconnectPolicy::default();

        let api_base_url = api_base_url
            .or_else(|| std::env::var("GRAPHLOAD_API_URL").ok().filter(|s| !s.is_empty()))
            .or(toml.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let ws_base_url = ws_base_url
            .or_else(|| std::env::var("GRAPHLOAD_WS_URL").ok().filter(|s| !s.is_empty()))
            .or(toml.ws_base_url);

        let log = std::env::var("GRAPHLOAD_LOG")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log)
            .unwrap_or_else(|| "info".to_string());

        Self {
            api_base_url,
            ws_base_url,
            keepalive_interval: Duration::from_secs(
                toml.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
            ),
            poll_interval: Duration::from_millis(
                toml.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            reconnect: ReconnectPolicy {
                initial_delay: toml
                    .reconnect_initial_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.initial_delay),
                max_delay: toml
                    .reconnect_max_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_delay),
                max_attempts: toml.reconnect_max_attempts.unwrap_or(defaults.max_attempts),
            },
            log,
        }
    }

    /// Duplex socket URL for a task's progress stream.
    pub fn task_socket_url(&self, task_id: TaskId) -> String {
        let base = self
            .ws_base_url
            .clone()
            .unwrap_or_else(|| derive_ws_base(&self.api_base_url));
        format!("{}/ws/tasks/{}/", base.trim_end_matches('/'), task_id)
    }

    /// REST endpoint for a one-shot task status fetch.
    pub fn task_status_url(&self, task_id: TaskId) -> String {
        format!(
            "{}/api/datasets/tasks/{}/",
            self.api_base_url.trim_end_matches('/'),
            task_id
        )
    }
}

/// Mirror the API's security: `https` → `wss`, `http` → `ws`.
fn derive_ws_base(api_base_url: &str) -> String {
    api_base_url
        .replace("https://", "wss://")
        .replace("http://", "ws://")
}
