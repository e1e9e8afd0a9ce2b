//! Lock observability routes.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use foreman_core::FileLock;
use foreman_registry::LockStatus;

use crate::error::ApiResult;
use crate::server::AppState;

/// Query for `GET /locks`.
#[derive(Debug, Deserialize)]
pub struct LockQuery {
    /// Comma-separated paths to inspect. When present, the response
    /// joins each lock with its holding session for display.
    #[serde(default)]
    pub paths: Option<String>,
}

/// Response for `GET /locks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockList {
    /// Every live lock, ordered by path. Absent in path-query mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locks: Option<Vec<FileLock>>,
    /// Holder details for the queried paths. Absent in list mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holders: Option<Vec<LockStatus>>,
}

/// `GET /locks`
///
/// Without a query, lists every lock row. With `?paths=a,b`, returns
/// holder status (session, lifecycle state, branch) per contested path.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Json<LockList>> {
    if let Some(paths) = query.paths {
        let paths: Vec<String> = paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect();
        let holders = state.engine.locks().conflict_status(&paths).await?;
        return Ok(Json(LockList {
            locks: None,
            holders: Some(holders),
        }));
    }
    let locks = state.engine.locks().list_locks().await?;
    Ok(Json(LockList {
        locks: Some(locks),
        holders: None,
    }))
}

/// `DELETE /locks`
///
/// Operator escape hatch: drops every lock regardless of holder.
pub async fn purge(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let released = state.engine.locks().purge_all().await?;
    tracing::warn!(released, "operator purged the lock table");
    Ok(Json(serde_json::json!({ "releasedCount": released })))
}
