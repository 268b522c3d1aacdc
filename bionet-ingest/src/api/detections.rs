//! Detection ingestion endpoint
//!
//! The transport adapter: each request body is one raw sensor payload. It is
//! parsed and persisted, and nothing else happens here. Rollups read the
//! stored detections later on their own schedule.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use bionet_common::db;
use bionet_common::models::Detection;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/detections
///
/// Body: the two-line text payload. Returns 201 with the stored detection,
/// or 400 when the payload is rejected (nothing is written).
pub async fn ingest_detection(
    State(state): State<AppState>,
    payload: String,
) -> ApiResult<(StatusCode, Json<Detection>)> {
    debug!(bytes = payload.len(), "Received detection payload");

    let detection = match state.parser.parse(&payload, bionet_common::time::now()) {
        Ok(detection) => detection,
        Err(e) => {
            warn!(error = %e, payload = %payload.escape_debug(), "Dropping unparseable payload");
            return Err(ApiError::Parse(e));
        }
    };

    db::insert_detection(&state.db, &detection).await?;

    info!(
        id = %detection.id,
        species = %detection.species_name,
        location = %detection.location_id,
        observed_at = %detection.observed_at,
        "Stored detection"
    );

    Ok((StatusCode::CREATED, Json(detection)))
}

/// Build detection routes
pub fn detection_routes() -> Router<AppState> {
    Router::new().route("/api/detections", post(ingest_detection))
}
