//! JSON endpoint consumed by whatever renders the progress bar.

use std::future::Future;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use thiserror::Error;

use crate::error::MonitorError;
use crate::monitor::{Monitor, MonitorSnapshot, StopReport};

#[derive(Debug, Error)]
enum ApiError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("monitor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Monitor(MonitorError::AlreadyRunning | MonitorError::NotAcknowledged) => {
                StatusCode::CONFLICT
            }
            ApiError::Monitor(MonitorError::Supervisor(_)) | ApiError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(monitor: Monitor) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/reset", post(reset))
        .with_state(monitor)
}

/// Serve the API on `bind` until `shutdown` resolves.
pub async fn serve(
    monitor: Monitor,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("status endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn status(State(monitor): State<Monitor>) -> Json<MonitorSnapshot> {
    Json(monitor.snapshot())
}

// Start and stop touch the process and may wait on it. Reset takes the same
// lock a stop holds through its grace period. Keep all three off the runtime threads.

async fn start(State(monitor): State<Monitor>) -> Result<Json<MonitorSnapshot>, ApiError> {
    let snapshot = tokio::task::spawn_blocking(move || monitor.start()).await??;
    Ok(Json(snapshot))
}

async fn stop(State(monitor): State<Monitor>) -> Result<Json<StopReport>, ApiError> {
    let report = tokio::task::spawn_blocking(move || monitor.stop()).await?;
    Ok(Json(report))
}

async fn reset(State(monitor): State<Monitor>) -> Result<Json<MonitorSnapshot>, ApiError> {
    let snapshot = tokio::task::spawn_blocking(move || monitor.reset()).await??;
    Ok(Json(snapshot))
}
