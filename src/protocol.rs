//! Wire protocol for the task-progress socket.
//!
//! Inbound frames are a tagged union on a `type` field:
//! - `connection` — sent once after attach, carries an embedded task snapshot
//! - `progress`   — incremental percentage + optional message
//! - `status`     — full status/percentage/message/error
//! - `error`      — the background job itself failed
//! - `pong`       — liveness reply, swallowed by the channel
//!
//! Outbound frames are `{"type":"ping"}` and `{"type":"get_status"}`.
//!
//! Parsing is deliberately lenient: malformed frames yield `None` and are
//! dropped by the channel (the server is trusted; garbage frames only occur
//! in teardown races). Progress percentages arrive under either `percentage`
//! or `progress_percentage` depending on server version, and task ids may be
//! serialized as numbers or strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Opaque, server-assigned task identifier.
pub type TaskId = i64;

// ─── Task status ──────────────────────────────────────────────────────────────

/// Lifecycle state of a server-side import task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `completed` or `failed` — no further progress is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Lenient parse — unknown strings map to `pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

// ─── Task snapshot ────────────────────────────────────────────────────────────

/// Full task record as serialized by the REST endpoint and embedded in
/// `connection` frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress_percentage: Option<f64>,
    #[serde(default)]
    pub processed_rows: Option<u64>,
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 timestamps, treats anything else (including naive
/// datetimes from misconfigured servers) as absent rather than failing the
/// whole snapshot.
fn de_opt_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

// ─── Inbound frames ───────────────────────────────────────────────────────────

/// A parsed server → client frame.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    /// Sent once immediately after attach with the task's current state.
    Connection {
        task_id: Option<TaskId>,
        message: Option<String>,
        task: Option<TaskSnapshot>,
    },
    /// Incremental progress update.
    Progress {
        task_id: Option<TaskId>,
        percentage: Option<f64>,
        message: Option<String>,
    },
    /// Full status update (also the reply to `get_status`).
    Status {
        task_id: Option<TaskId>,
        status: TaskStatus,
        percentage: Option<f64>,
        message: Option<String>,
        error: Option<String>,
    },
    /// The background job failed.
    Error {
        task_id: Option<TaskId>,
        message: Option<String>,
    },
    /// Liveness reply.
    Pong,
    /// Recognized as a frame, unknown kind — ignored downstream.
    Other(String),
}

impl ServerFrame {
    /// Parse one text frame. Returns `None` for anything that is not a JSON
    /// object with a string `type` tag.
    pub fn parse(text: &str) -> Option<Self> {
        let v: Value = serde_json::from_str(text).ok()?;
        let kind = v.get("type")?.as_str()?;
        let task_id = lenient_task_id(&v);

        let frame = match kind {
            "connection" => Self::Connection {
                task_id,
                message: str_field(&v, "message"),
                task: v
                    .get("task")
                    .cloned()
                    .and_then(|t| serde_json::from_value(t).ok()),
            },
            "progress" => {
                let data = v.get("data").unwrap_or(&Value::Null);
                Self::Progress {
                    task_id,
                    percentage: lenient_percentage(data),
                    message: str_field(data, "message"),
                }
            }
            "status" => {
                let data = v.get("data").unwrap_or(&Value::Null);
                Self::Status {
                    task_id,
                    status: str_field(data, "status")
                        .as_deref()
                        .map(TaskStatus::parse)
                        .unwrap_or_default(),
                    percentage: lenient_percentage(data),
                    message: str_field(data, "message"),
                    error: str_field(data, "error").or_else(|| str_field(data, "error_message")),
                }
            }
            "error" => {
                let data = v.get("data").unwrap_or(&Value::Null);
                Self::Error {
                    task_id,
                    message: str_field(data, "message").or_else(|| str_field(&v, "message")),
                }
            }
            "pong" => Self::Pong,
            other => Self::Other(other.to_owned()),
        };
        Some(frame)
    }

    /// Task id carried by the frame, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Connection { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Status { task_id, .. }
            | Self::Error { task_id, .. } => *task_id,
            Self::Pong | Self::Other(_) => None,
        }
    }
}

/// Task ids arrive as numbers from background workers and as strings when
/// echoed from the URL route.
fn lenient_task_id(v: &Value) -> Option<TaskId> {
    match v.get("task_id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// `percentage` with `progress_percentage` as the backward-compatible alias.
fn lenient_percentage(data: &Value) -> Option<f64> {
    data.get("percentage")
        .and_then(Value::as_f64)
        .or_else(|| data.get("progress_percentage").and_then(Value::as_f64))
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

// ─── Outbound frames ──────────────────────────────────────────────────────────

/// Liveness probe.
pub fn ping_frame() -> Value {
    json!({ "type": "ping" })
}

/// Explicit "send me your current status" request, issued after (re)connect so
/// a late-attaching consumer gets an initial snapshot.
pub fn get_status_frame() -> Value {
    json!({ "type": "get_status" })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_frame_with_snapshot() {
        let text = r#"{
            "type": "connection",
            "task_id": "7",
            "message": "Connected to task updates",
            "task": {
                "id": 7,
                "file_name": "nodes.csv",
                "status": "processing",
                "progress_percentage": 10.0,
                "started_at": "2024-03-01T12:00:00+00:00"
            }
        }"#;
        match ServerFrame::parse(text) {
            Some(ServerFrame::Connection { task_id, task, .. }) => {
                assert_eq!(task_id, Some(7), "string task ids must parse");
                let task = task.expect("snapshot present");
                assert_eq!(task.status, TaskStatus::Processing);
                assert_eq!(task.progress_percentage, Some(10.0));
                assert!(task.started_at.is_some());
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn status_frame_accepts_both_percentage_field_names() {
        let a = r#"{"type":"status","task_id":3,"data":{"status":"processing","percentage":45}}"#;
        let b = r#"{"type":"status","task_id":3,"data":{"status":"processing","progress_percentage":45}}"#;
        for text in [a, b] {
            match ServerFrame::parse(text) {
                Some(ServerFrame::Status {
                    status, percentage, ..
                }) => {
                    assert_eq!(status, TaskStatus::Processing);
                    assert_eq!(percentage, Some(45.0));
                }
                other => panic!("unexpected parse result: {other:?}"),
            }
        }
    }

    #[test]
    fn status_defaults_to_pending_when_absent() {
        let text = r#"{"type":"status","task_id":3,"data":{"percentage":0}}"#;
        match ServerFrame::parse(text) {
            Some(ServerFrame::Status { status, .. }) => assert_eq!(status, TaskStatus::Pending),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn error_frame_reads_nested_then_top_level_message() {
        let nested = r#"{"type":"error","task_id":4,"data":{"message":"bad csv"}}"#;
        match ServerFrame::parse(nested) {
            Some(ServerFrame::Error { message, .. }) => {
                assert_eq!(message.as_deref(), Some("bad csv"))
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn pong_and_unknown_kinds_are_distinguished_from_garbage() {
        assert!(matches!(
            ServerFrame::parse(r#"{"type":"pong","task_id":1}"#),
            Some(ServerFrame::Pong)
        ));
        assert!(matches!(
            ServerFrame::parse(r#"{"type":"shutdown_notice"}"#),
            Some(ServerFrame::Other(_))
        ));
        assert!(ServerFrame::parse("not json").is_none());
        assert!(ServerFrame::parse(r#"{"no_type":true}"#).is_none());
    }

    #[test]
    fn unknown_status_string_maps_to_pending() {
        assert_eq!(TaskStatus::parse("queued"), TaskStatus::Pending);
        assert!(TaskStatus::parse("failed").is_terminal());
        assert!(TaskStatus::parse("completed").is_terminal());
        assert!(!TaskStatus::parse("processing").is_terminal());
    }

    #[test]
    fn outbound_frames_carry_the_expected_tags() {
        assert_eq!(ping_frame()["type"], "ping");
        assert_eq!(get_status_frame()["type"], "get_status");
    }

    #[test]
    fn snapshot_tolerates_naive_timestamps() {
        let raw = r#"{"id":1,"status":"completed","completed_at":"2024-03-01 12:00:00"}"#;
        let snap: TaskSnapshot = serde_json::from_str(raw).expect("snapshot parses");
        assert_eq!(snap.status, TaskStatus::Completed);
        assert!(snap.completed_at.is_none(), "naive timestamp treated as absent");
    }
}
