//! POST /admin/replay

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::ingest::ReplaySummary;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    pub from_block: i64,
    pub to_block: i64,
}

/// Replay a block range, returning `{scanned, successful}`
///
/// A body that does not carry two integer block numbers is an invalid
/// range, not a generic parse failure.
pub async fn replay_blocks(
    State(state): State<AppState>,
    payload: Result<Json<ReplayRequest>, JsonRejection>,
) -> ApiResult<Json<ReplaySummary>> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidBlockRange(e.body_text()))?;

    let cancel = state.shutdown.child_token();
    let summary = state
        .services
        .replay
        .replay(request.from_block, request.to_block, &cancel)
        .await
        .map_err(ApiError::from_replay)?;

    Ok(Json(summary))
}
