//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered to HTTP clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hbd_core::CoreError;
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An error raised by the issuer or the scheduler.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request input detected before reaching the core.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller exceeded the per-IP request budget.
    #[error("Too many requests")]
    RateLimited,

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// Status code and the message shown to the client.
    fn public_parts(&self) -> (StatusCode, String) {
        match self {
            ApiError::Core(CoreError::Validation(msg)) | ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::Core(CoreError::Authentication) => {
                (StatusCode::UNAUTHORIZED, "invalid credentials".to_string())
            }
            ApiError::Core(CoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Core(CoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "too many requests".to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.public_parts();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
