//! Session routes.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use foreman_core::{Session, SessionId};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Response for `GET /sessions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    /// Every non-terminal session, newest first.
    pub sessions: Vec<Session>,
}

fn parse_session_id(raw: &str) -> ApiResult<SessionId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid session id '{raw}'")))
}

/// `GET /sessions`
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<SessionList>> {
    let sessions = state.engine.store().list_active_sessions().await?;
    Ok(Json(SessionList { sessions }))
}

/// `POST /sessions/{id}/terminate`
///
/// Idempotent force-termination: the session fails and its locks go
/// away; terminating a terminal session succeeds without changes.
pub async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_session_id(&id)?;
    let session = state.engine.terminate_session(id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "sessionId": session.id,
    })))
}
