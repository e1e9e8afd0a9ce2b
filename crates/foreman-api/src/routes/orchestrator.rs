//! Orchestrator routes: batch dispatch and Agent Provider reconciliation.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use foreman_core::SessionId;
use foreman_engine::{BatchRequest, BatchResponse, SyncResult};

use crate::error::ApiResult;
use crate::server::AppState;

/// `POST /orchestrator/batch`
pub async fn batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    Ok(Json(state.engine.dispatch_batch(request).await?))
}

/// Body for `POST /orchestrator/sync`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// The session to reconcile.
    pub session_id: SessionId,
}

/// `POST /orchestrator/sync`
pub async fn sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncResult>> {
    Ok(Json(state.engine.sync_session(request.session_id).await?))
}

/// Body for `POST /orchestrator/sync-batch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchRequest {
    /// The sessions to reconcile.
    pub session_ids: Vec<SessionId>,
}

/// One entry of the sync-batch response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchEntry {
    /// The session this entry reconciled.
    pub session_id: SessionId,
    /// Whether reconciliation succeeded.
    pub ok: bool,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncResult>,
    /// The failure detail otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `POST /orchestrator/sync-batch`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    /// Per-session results, in request order.
    pub results: Vec<SyncBatchEntry>,
}

/// `POST /orchestrator/sync-batch`
///
/// One failed poll does not abort the batch; each entry carries its own
/// outcome.
pub async fn sync_batch(
    State(state): State<AppState>,
    Json(request): Json<SyncBatchRequest>,
) -> ApiResult<Json<SyncBatchResponse>> {
    let mut results = Vec::with_capacity(request.session_ids.len());
    for session_id in request.session_ids {
        match state.engine.sync_session(session_id).await {
            Ok(sync) => results.push(SyncBatchEntry {
                session_id,
                ok: true,
                sync: Some(sync),
                error: None,
            }),
            Err(err) => results.push(SyncBatchEntry {
                session_id,
                ok: false,
                sync: None,
                error: Some(err.to_string()),
            }),
        }
    }
    Ok(Json(SyncBatchResponse { results }))
}
