//! API error types and HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use foreman_core::Error as CoreError;
use foreman_registry::LockConflict;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Structured detail, e.g. lock conflict rows on a 409.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
    request_id: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns a 401 with no body detail, for webhook signature
    /// mismatches.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "unauthorized")
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns a structured 409 carrying the contested lock rows.
    #[must_use]
    pub fn lock_conflict(conflicts: &[LockConflict]) -> Self {
        let mut err = Self::new(
            StatusCode::CONFLICT,
            "LOCK_CONFLICT",
            "requested paths are locked by other sessions",
        );
        err.details = serde_json::to_value(conflicts).ok();
        err
    }

    /// Returns an error response for failed preconditions.
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            "PRECONDITION_FAILED",
            message,
        )
    }

    /// Returns an error response for upstream provider failures.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::InvalidId { .. } | CoreError::InvalidInput(_) => {
                Self::bad_request(err.to_string())
            }
            CoreError::ResourceNotFound { .. } => Self::not_found(err.to_string()),
            CoreError::PreconditionFailed { .. } => Self::precondition_failed(err.to_string()),
            CoreError::Provider { .. } | CoreError::ProviderRateLimit { .. } => {
                Self::bad_gateway(err.to_string())
            }
            CoreError::Storage { .. } | CoreError::Serialization { .. } | CoreError::Internal { .. } => {
                tracing::error!(error = %err, "internal failure");
                Self::internal("internal error")
            }
        }
    }
}

impl From<foreman_registry::RegistryError> for ApiError {
    fn from(err: foreman_registry::RegistryError) -> Self {
        CoreError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
            details: self.details,
            request_id: self.request_id,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::SessionId;

    #[test]
    fn lock_conflicts_map_to_409_with_rows() {
        let conflicts = vec![LockConflict {
            path: "a.ts".into(),
            held_by: SessionId::generate(),
        }];
        let err = ApiError::lock_conflict(&conflicts);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let details = err.details.expect("details");
        assert_eq!(details[0]["path"], "a.ts");
    }

    #[test]
    fn provider_errors_map_to_bad_gateway() {
        let err: ApiError = CoreError::provider("agents", "boom").into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn unknown_resources_map_to_404() {
        let err: ApiError = CoreError::resource_not_found("goal", "g-1").into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
