//! Error types for the admin API
//!
//! Every failure renders as `{"error": {"code": "..", "message": ".."}}`
//! with a stable snake_case code. Internal details never carry a backtrace.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ingest::IngestError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Replay range rejected (400)
    #[error("Invalid block range: {0}")]
    InvalidBlockRange(String),

    /// Malformed parameter or body (400)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Replay aborted by a batch-level failure (500)
    #[error("Replay failed: {0}")]
    ReplayFailed(String),

    /// Retry batch aborted (500)
    #[error("Retry failed: {0}")]
    RetryFailed(String),

    /// Authentication check failed (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    /// Map a replay failure; only request errors keep their own code
    pub fn from_replay(err: IngestError) -> Self {
        match err {
            IngestError::InvalidBlockRange(msg) => ApiError::InvalidBlockRange(msg),
            IngestError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            other => ApiError::ReplayFailed(other.to_string()),
        }
    }

    pub fn from_retry(err: IngestError) -> Self {
        match err {
            IngestError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            other => ApiError::RetryFailed(other.to_string()),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidBlockRange(_) => "invalid_block_range",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::ReplayFailed(_) => "replay_failed",
            ApiError::RetryFailed(_) => "retry_failed",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Internal(_) | ApiError::Database(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBlockRange(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::ReplayFailed(_)
            | ApiError::RetryFailed(_)
            | ApiError::Internal(_)
            | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidBlockRange(msg) => ApiError::InvalidBlockRange(msg),
            IngestError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::InvalidBlockRange(msg)
            | ApiError::InvalidRequest(msg)
            | ApiError::ReplayFailed(msg)
            | ApiError::RetryFailed(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Database(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(code = self.code(), message = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
