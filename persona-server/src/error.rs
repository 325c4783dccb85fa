//! Unified server error type.
//!
//! Every handler and service returns `Result<T, ServerError>`, which
//! implements [`axum::response::IntoResponse`] so errors are automatically
//! converted to the `{"success": false, "error": ..., "code": ...}` envelope
//! with an appropriate status code.
//!
//! Internal errors (Database, Internal) are logged with full detail but only a
//! generic message is returned to the caller so that file paths, SQL, or other
//! implementation details never leak to clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::runtime::RuntimeError;

/// All errors that can occur in the persona-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad or missing input. No state was changed.
    #[error("{0}")]
    Validation(String),

    /// The caller referenced a session, character or model that does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Attempted mutation of a built-in character.
    #[error("{0}")]
    Forbidden(String),

    /// The operation collides with the current state (e.g. a running download).
    #[error("{0}")]
    Conflict(String),

    /// The request body exceeds what the server will buffer.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// The inference runtime could not be reached.
    #[error("{0}")]
    Unavailable(String),

    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Validation(_) => "validation_error",
            ServerError::NotFound(_) => "not_found",
            ServerError::Forbidden(_) => "forbidden",
            ServerError::Conflict(_) => "conflict",
            ServerError::PayloadTooLarge(_) => "payload_too_large",
            ServerError::Unavailable(_) => "unavailable",
            ServerError::Database(_) | ServerError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServerError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            ServerError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),

            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (
            status,
            Json(json!({ "success": false, "error": client_message, "code": self.code() })),
        )
            .into_response()
    }
}

impl From<RuntimeError> for ServerError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::ModelNotFound(name) => {
                ServerError::NotFound(format!("model '{name}' is not installed"))
            }
            other => ServerError::Unavailable(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(e: validator::ValidationErrors) -> Self {
        ServerError::Validation(e.to_string())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        // Log the full error chain before discarding it so that diagnostic
        // detail survives in the server logs.
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
