//! Router assembly and serving.

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use foreman_engine::Engine;

use crate::context::request_id_middleware;
use crate::error::ApiError;
use crate::routes;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The control-plane engine.
    pub engine: Engine,
    /// Shared secret verifying webhook deliveries.
    pub webhook_secret: String,
}

/// Builds the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/openapi.json", get(crate::openapi::get_openapi_json))
        .route("/webhook/vcs", post(routes::webhook::receive))
        .route("/cascade/analyze", post(routes::cascade::analyze))
        .route("/orchestrator/batch", post(routes::orchestrator::batch))
        .route("/orchestrator/sync", post(routes::orchestrator::sync))
        .route(
            "/orchestrator/sync-batch",
            post(routes::orchestrator::sync_batch),
        )
        .route(
            "/goals",
            get(routes::goals::list).post(routes::goals::create),
        )
        .route(
            "/goals/{id}",
            get(routes::goals::read)
                .patch(routes::goals::patch)
                .delete(routes::goals::delete),
        )
        .route("/goals/{id}/re-audit", post(routes::goals::re_audit))
        .route("/sessions", get(routes::sessions::list))
        .route(
            "/sessions/{id}/terminate",
            post(routes::sessions::terminate),
        )
        .route(
            "/locks",
            get(routes::locks::list).delete(routes::locks::purge),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found(uri: axum::extract::OriginalUri) -> ApiError {
    ApiError::not_found(format!("no route for {}", uri.0.path()))
}

/// Binds the listener and serves until shutdown.
///
/// # Errors
///
/// Returns an IO error when the listener cannot bind or serving fails.
pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "foreman api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
    }
    tracing::info!("shutting down");
}
