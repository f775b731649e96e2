//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orchestrator::OrchestratorError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Error returned by an orchestrator.
    Orchestrator(OrchestratorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orchestrator(err) => orchestrator_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn orchestrator_error_to_response(err: OrchestratorError) -> (StatusCode, String) {
    match &err {
        OrchestratorError::Conflict { .. } => (StatusCode::CONFLICT, err.to_string()),
        OrchestratorError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrchestratorError::Failed(_) => {
            tracing::error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                OrchestratorError::Conflict {
                    field: "sku",
                    value: "A".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::not_found("product", "1"),
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestratorError::validation("bad"),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::Failed("checkout"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
