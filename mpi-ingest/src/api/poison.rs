//! Poison queue endpoints
//!
//! - GET /admin/poison?limit=N: newest first
//! - POST /admin/poison/retry: oldest-first batch, optional `{limit}`

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;

use crate::db::poison::{ListOrder, PoisonRecord};
use crate::error::{ApiError, ApiResult};
use crate::ingest::RetrySummary;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    pub limit: Option<u32>,
}

pub async fn list_poison(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<PoisonRecord>>> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let limit = match params.limit {
        Some(0) => return Err(ApiError::InvalidRequest("limit must be > 0".into())),
        Some(n) => n.min(state.limits.poison_list_max),
        None => DEFAULT_LIST_LIMIT.min(state.limits.poison_list_max),
    };

    let records = state.services.poison.list(limit, ListOrder::NewestFirst).await?;
    Ok(Json(records))
}

/// Retry the oldest quarantined events, returning `{retried}`
pub async fn retry_poison(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<RetrySummary>> {
    let request: RetryRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RetryRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid retry body: {}", e)))?
    };

    let limit = request.limit.unwrap_or(state.limits.retry_batch_default);

    let cancel = state.shutdown.child_token();
    let summary = state
        .services
        .retry
        .retry_batch(limit, &cancel)
        .await
        .map_err(ApiError::from_retry)?;

    Ok(Json(summary))
}
