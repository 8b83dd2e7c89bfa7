//! POST /admin/plays/relink

use axum::{body::Bytes, extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RelinkRequest {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RelinkResponse {
    pub linked: u64,
}

/// Link play records whose song has since appeared in the catalog
pub async fn relink_plays(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<RelinkResponse>> {
    let request: RelinkRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RelinkRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid relink body: {}", e)))?
    };

    let limit = match request.limit {
        Some(0) => return Err(ApiError::InvalidRequest("limit must be > 0".into())),
        Some(n) => n.min(state.limits.retry_batch_max),
        None => state.limits.retry_batch_default,
    };

    let linked = state.services.engine.relink_unlinked(limit).await?;
    Ok(Json(RelinkResponse { linked }))
}
