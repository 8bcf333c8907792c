//! Server error taxonomy.
//!
//! One enum covers every failure the API can report; the HTTP mapping lives
//! in a single `IntoResponse` impl so handlers just use `?`.
//!
//! Two failure classes deliberately never appear here:
//! - a single ROI's detector failure is folded into that ROI's result
//! - barcode-link failures fall back to the raw barcode inside the
//!   aggregator

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use aoi_types::ValidationError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed ROI, missing field, out-of-range value. Carries every
    /// violation found, not just the first.
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        errors: Vec<ValidationError>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// No active session, camera not ready, duplicate product.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn invalid_with(message: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            errors,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("io error: {e}"))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            Self::InvalidInput { message, errors } if !errors.is_empty() => json!({
                "error": message,
                "errors": errors,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_distinguishes_kinds() {
        let cases = [
            (ApiError::invalid("bad roi"), StatusCode::BAD_REQUEST),
            (ApiError::not_found("product x"), StatusCode::NOT_FOUND),
            (ApiError::conflict("camera not ready"), StatusCode::CONFLICT),
            (
                ApiError::UpstreamUnavailable("link api".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (ApiError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
