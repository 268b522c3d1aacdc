//! HTTP API handlers for bionet-ingest

pub mod detections;
pub mod health;

pub use detections::{detection_routes, ingest_detection};
pub use health::{health_check, health_routes, keep_alive};
