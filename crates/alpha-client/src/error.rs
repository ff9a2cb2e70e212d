//! HTTP client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// 401/403-class response. Callers flip the account's persisted
    /// login status instead of retrying with known-bad credentials.
    #[error("unauthorized: HTTP {0}")]
    Unauthorized(u16),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("time calibration failed: {0}")]
    TimeSync(String),
}

impl ClientError {
    /// Whether this error indicates dead credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
