//! OpenAPI document for the HTTP surface.
//!
//! Skeletal: route inventory plus the request schemas the dashboard
//! authors actually consume. Engine response shapes are documented in
//! prose until the contract is pinned.

use axum::Json;
use utoipa::OpenApi;

use crate::error::ApiErrorBody;
use crate::routes::goals::{CreateGoalRequest, CriterionInput, PatchGoalRequest};

/// The OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "foreman-api",
        description = "Control plane for a fleet of external AI coding agents"
    ),
    components(schemas(ApiErrorBody, CreateGoalRequest, CriterionInput, PatchGoalRequest))
)]
pub struct ApiDoc;

/// `GET /openapi.json`
pub async fn get_openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
