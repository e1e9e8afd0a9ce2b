//! Cascade analysis route.

use axum::extract::State;
use axum::Json;

use foreman_engine::cascade::{CascadeRequest, CascadeResponse};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// `POST /cascade/analyze`
///
/// Runs blast-radius analysis on an explicit commit. When every job was
/// blocked by a lock conflict, the response is a structured 409 carrying
/// the contested rows; partial success stays a 200.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<CascadeRequest>,
) -> ApiResult<Json<CascadeResponse>> {
    let response = state.engine.analyze_commit(request).await?;
    if response.is_conflict() {
        return Err(ApiError::lock_conflict(&response.lock_conflicts));
    }
    Ok(Json(response))
}
