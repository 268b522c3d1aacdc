//! bionet-ingest library - detection ingestion
//!
//! Parses raw sensor messages and persists them as detections. Aggregation
//! is left entirely to bionet-rollup, which reads the same database.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod parser;

pub use parser::{DetectionParser, ParseError};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Parser configured with the sensors' reporting offset
    pub parser: DetectionParser,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, parser: DetectionParser) -> Self {
        Self { db, parser }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::detection_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
