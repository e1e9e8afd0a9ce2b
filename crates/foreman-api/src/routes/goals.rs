//! Goal CRUD and re-audit routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use foreman_core::{AcceptanceCriterion, Goal, GoalId, GoalStatus};
use foreman_engine::review::ReAuditResult;
use foreman_registry::RegistryStore;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// One criterion of a goal-create request.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CriterionInput {
    /// Stable id; generated positionally when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// The requirement text.
    pub text: String,
}

/// Body for `POST /goals`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoalRequest {
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Acceptance criteria, in order.
    #[serde(default)]
    pub criteria: Vec<CriterionInput>,
}

/// Body for `PATCH /goals/{id}`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatchGoalRequest {
    /// New title, when present.
    #[serde(default)]
    pub title: Option<String>,
    /// New description, when present.
    #[serde(default)]
    pub description: Option<String>,
    /// New status, when present.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub status: Option<GoalStatus>,
    /// Full criteria rewrite, when present. Ids are preserved as given.
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub criteria: Option<Vec<AcceptanceCriterion>>,
}

/// Response for `GET /goals`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalList {
    /// All goals, newest first.
    pub goals: Vec<Goal>,
}

fn parse_goal_id(raw: &str) -> ApiResult<GoalId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid goal id '{raw}'")))
}

/// `GET /goals`
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<GoalList>> {
    let goals = state.engine.store().list_goals().await?;
    Ok(Json(GoalList { goals }))
}

/// `POST /goals`
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateGoalRequest>,
) -> ApiResult<(StatusCode, Json<Goal>)> {
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let criteria = request
        .criteria
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            AcceptanceCriterion::new(c.id.unwrap_or_else(|| format!("c-{}", i + 1)), c.text)
        })
        .collect();
    let goal = Goal::new(request.title, request.description, criteria);

    let store = state.engine.store();
    let mut tx = store.begin().await?;
    RegistryStore::insert_goal(&mut tx, &goal).await?;
    tx.commit()
        .await
        .map_err(|e| ApiError::internal(format!("commit failed: {e}")))?;
    Ok((StatusCode::CREATED, Json(goal)))
}

/// `GET /goals/{id}`
pub async fn read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Goal>> {
    let id = parse_goal_id(&id)?;
    let goal = state
        .engine
        .store()
        .goal(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("goal {id}")))?;
    Ok(Json(goal))
}

/// `PATCH /goals/{id}`
///
/// Criteria updates are a full rewrite under the goal's row; criterion
/// ids are preserved exactly as sent.
pub async fn patch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PatchGoalRequest>,
) -> ApiResult<Json<Goal>> {
    let id = parse_goal_id(&id)?;
    let store = state.engine.store();
    let mut tx = store.begin().await?;
    let Some(mut goal) = RegistryStore::goal_for_update(&mut tx, id).await? else {
        return Err(ApiError::not_found(format!("goal {id}")));
    };
    if let Some(title) = request.title {
        goal.title = title;
    }
    if let Some(description) = request.description {
        goal.description = description;
    }
    if let Some(status) = request.status {
        goal.status = status;
    }
    if let Some(criteria) = request.criteria {
        goal.criteria = criteria;
    }
    goal.updated_at = chrono::Utc::now();
    RegistryStore::update_goal(&mut tx, &goal).await?;
    tx.commit()
        .await
        .map_err(|e| ApiError::internal(format!("commit failed: {e}")))?;
    Ok(Json(goal))
}

/// `DELETE /goals/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_goal_id(&id)?;
    let deleted = state.engine.store().delete_goal(id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("goal {id}")));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

/// `POST /goals/{id}/re-audit`
pub async fn re_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReAuditResult>> {
    let id = parse_goal_id(&id)?;
    Ok(Json(state.engine.re_audit_goal(id).await?))
}
