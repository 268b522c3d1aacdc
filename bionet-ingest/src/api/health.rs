//! Health check endpoints

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response: status, module name and version
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "bionet-ingest".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /keep-alive
///
/// Plain-text reply for uptime pingers that keep hosted instances awake.
pub async fn keep_alive() -> &'static str {
    "I'm alive!"
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/keep-alive", get(keep_alive))
}
