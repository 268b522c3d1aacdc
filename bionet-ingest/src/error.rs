//! Error types for bionet-ingest

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::parser::ParseError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Payload rejected by the parser (400)
    #[error("Rejected payload: {0}")]
    Parse(#[from] ParseError),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// bionet-common error, typically a store failure (500)
    #[error("Common error: {0}")]
    Common(#[from] bionet_common::Error),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Parse(ParseError::MalformedPayload(_)) => "MALFORMED_PAYLOAD",
            ApiError::Parse(ParseError::InvalidScore(_)) => "INVALID_SCORE",
            ApiError::Parse(ParseError::MissingField(_)) => "MISSING_FIELD",
            ApiError::Parse(ParseError::InvalidTimestamp(_)) => "INVALID_TIMESTAMP",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Common(bionet_common::Error::Database(_)) => "PERSISTENCE_FAILURE",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Parse(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
