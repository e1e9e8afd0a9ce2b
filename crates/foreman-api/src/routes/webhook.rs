//! The VCS webhook receiver.
//!
//! Authenticates the raw body against the shared secret before any
//! parsing. Supported events route into the engine; everything else is
//! acknowledged with a 202 so the sender stops redelivering.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use foreman_engine::cascade::CascadeResponse;
use foreman_engine::events::VcsEvent;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::signature::{verify_signature, SIGNATURE_HEADER};

const SUPPORTED_PR_ACTIONS: [&str; 3] = ["opened", "synchronize", "closed"];

/// Acknowledgement body for processed deliveries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookAck {
    received: bool,
    event_type: String,
    result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cascade_trigger: Option<CascadeResponse>,
}

fn ignored(event_type: &str, status: StatusCode) -> Response {
    (
        status,
        Json(WebhookAck {
            received: true,
            event_type: event_type.to_string(),
            result: "ignored".into(),
            cascade_trigger: None,
        }),
    )
        .into_response()
}

/// `POST /webhook/vcs`
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&state.webhook_secret, &body, signature) {
        // No body detail on auth failures.
        return Err(ApiError::unauthorized());
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("malformed payload: {e}")))?;
    let event_type = payload
        .get("eventType")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match event_type.as_str() {
        "push" | "check_run" => {}
        "pull_request" => {
            let action = payload
                .get("action")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if !SUPPORTED_PR_ACTIONS.contains(&action) {
                return Ok(ignored(&event_type, StatusCode::ACCEPTED));
            }
        }
        _ => return Ok(ignored(&event_type, StatusCode::ACCEPTED)),
    }

    let event: VcsEvent = serde_json::from_value(payload)
        .map_err(|e| ApiError::bad_request(format!("invalid {event_type} event: {e}")))?;
    let result = state.engine.handle_webhook(event).await?;

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            event_type: result.event_type.to_string(),
            result: result.result,
            cascade_trigger: result.cascade_trigger,
        }),
    )
        .into_response())
}
