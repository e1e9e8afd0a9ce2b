//! Request context middleware.
//!
//! Every request gets a request ID: taken from the inbound
//! `x-request-id` header when present, generated otherwise, and echoed
//! on the response for correlation.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use ulid::Ulid;

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The per-request correlation ID, available via request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Attaches a request ID to the request extensions and the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Ulid::new().to_string(), ToString::to_string);

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
