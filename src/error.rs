//! Library error types.
//!
//! Transport failures inside the channels never surface as errors — they are
//! logged, counted, and recovered via reconnect/retry. `ApiError` only exists
//! at the REST seam, where the caller (the pull channel or the CLI) decides
//! whether to swallow it.

use thiserror::Error;

use crate::protocol::TaskId;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response status {0}")]
    Status(u16),
}
