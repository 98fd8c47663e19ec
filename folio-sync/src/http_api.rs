//! HTTP API for health, status, and metrics endpoints.
//!
//! Provides:
//! - `/health` - basic liveness check
//! - `/status` - session status (quota, queue, persistence)
//! - `/metrics` - Prometheus metrics export

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use crate::metrics;
use crate::session::SyncSession;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Session whose status is exposed.
    pub session: Arc<SyncSession>,
    /// Engine version.
    pub version: &'static str,
    /// Server start time.
    pub started_at: Instant,
}

/// Create the HTTP router for observability endpoints.
pub fn create_router(state: HttpState) -> Router {
    metrics::register_metrics();
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(state))
}

/// Handler for `/health` - liveness.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Handler for `/status` - the session's health/monitoring contract.
async fn status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.session.status().await)
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Start the HTTP server for observability endpoints.
///
/// Returns a handle to the spawned server task.
pub async fn start_server(
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<Result<(), std::io::Error>> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));

    tracing::info!("Starting HTTP server for observability on port {}", port);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemote;
    use axum::body::Body;
    use axum::http::Request;
    use folio_common::{RepoSlug, SyncConfig};
    use tower::ServiceExt;

    async fn make_test_state() -> HttpState {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;
        let session = Arc::new(SyncSession::new(
            remote as _,
            RepoSlug::new("acme", "portfolio"),
            "main",
            SyncConfig::default(),
        ));
        session.initialize().await.unwrap();
        HttpState {
            session,
            version: "0.0.0-test",
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_version() {
        let router = create_router(make_test_state().await);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.0.0-test");
    }

    #[tokio::test]
    async fn status_endpoint_exposes_the_session_contract() {
        let router = create_router(make_test_state().await);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json["quota"]["remaining"].is_number());
        assert!(json["quota"]["limit"].is_number());
        assert!(json["queue_depth"].is_number());
        assert_eq!(json["persist_state"], "idle");
        assert!(json["baseline"]["sha"].is_string());
    }

    #[tokio::test]
    async fn metrics_endpoint_exports_prometheus_text() {
        let router = create_router(make_test_state().await);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("# HELP") || text.is_empty());
    }
}
