//! Unified error taxonomy for the daemon.
//!
//! Every component below the API Surface returns `Result<T, AppError>` (or a
//! narrower error convertible into it). A single `IntoResponse` impl at the
//! edge turns a kind into the documented status code and `{ "error": ... }`
//! body, so no component other than this one needs to know about HTTP.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request bodies, invalid service/project fields, conflicting
    /// names, cycles, unknown dependency targets.
    #[error("validation error: {0}")]
    Validation(String),

    /// A named service or project does not exist in the current catalog.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempt to mutate a compose-managed service through the HTTP API.
    #[error("'{0}' is managed by a compose file and cannot be changed here")]
    ConflictWithComposeSource(String),

    /// The port registry file is unreadable, unparseable, or exhausted.
    #[error("port registry error: {0}")]
    Registry(String),

    /// A required process-supervisor operation failed for a reason other than
    /// "target window missing" (which is tolerated silently everywhere).
    #[error("supervisor error: {0}")]
    Supervisor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConflictWithComposeSource(_) => StatusCode::BAD_REQUEST,
            AppError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Supervisor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "rejected request");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            AppError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(AppError::not_found("x").status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn compose_conflict_maps_to_400() {
        assert_eq!(
            AppError::ConflictWithComposeSource("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn registry_and_supervisor_map_to_500() {
        assert_eq!(
            AppError::Registry("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Supervisor("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
