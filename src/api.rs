//! REST collaborator for one-shot task status fetches.
//!
//! The pull channel talks to this seam through [`TaskStatusApi`] so tests can
//! script responses without an HTTP server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProgressConfig;
use crate::error::ApiError;
use crate::protocol::{TaskId, TaskSnapshot};

const FETCH_TIMEOUT_SECS: u64 = 10;

/// Fetch a task's current server-side state.
#[async_trait]
pub trait TaskStatusApi: Send + Sync {
    async fn fetch_task(&self, task_id: TaskId) -> Result<TaskSnapshot, ApiError>;
}

/// Production implementation over the datasets REST API.
pub struct HttpTaskApi {
    client: reqwest::Client,
    config: Arc<ProgressConfig>,
}

impl HttpTaskApi {
    pub fn new(config: Arc<ProgressConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl TaskStatusApi for HttpTaskApi {
    async fn fetch_task(&self, task_id: TaskId) -> Result<TaskSnapshot, ApiError> {
        let url = self.config.task_status_url(task_id);
        let response = self.client.get(&url).send().await?;
        match response.status().as_u16() {
            200 => Ok(response.json::<TaskSnapshot>().await?),
            404 => Err(ApiError::NotFound(task_id)),
            code => Err(ApiError::Status(code)),
        }
    }
}
