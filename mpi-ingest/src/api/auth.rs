//! Authentication middleware for admin routes
//!
//! Callers sign `METHOD`, path and query, the timestamp header and the raw
//! body with the shared secret. A stored secret of 0 disables checking.

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use mpi_common::api::{
    validate_signature, validate_timestamp, ApiAuthError, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Admin request bodies are small JSON documents
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Authentication middleware
///
/// Applied to `/admin/*` only; `/health` stays public.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.shared_secret == 0 {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let timestamp = header_timestamp(&parts.headers).map_err(unauthorized)?;
    validate_timestamp(timestamp).map_err(unauthorized)?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiAuthError::MissingSignature)
        .map_err(unauthorized)?
        .to_string();

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to read body: {}", e)))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    validate_signature(
        &signature,
        parts.method.as_str(),
        path_and_query,
        timestamp,
        &body_bytes,
        state.shared_secret,
    )
    .map_err(|e| {
        warn!(method = %parts.method, path = %path_and_query, "Signature validation failed");
        unauthorized(e)
    })?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

fn header_timestamp(headers: &HeaderMap) -> Result<i64, ApiAuthError> {
    headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or(ApiAuthError::MissingTimestamp)
}

fn unauthorized(err: ApiAuthError) -> ApiError {
    ApiError::Unauthorized(err.to_string())
}
