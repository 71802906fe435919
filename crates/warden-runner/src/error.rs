//! Error types for the runner.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use warden_core::EngineError;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur in the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configuration file is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading a file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Failed to bind the receiver.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// The request body or parameters are invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A blocking task could not be joined.
    #[error("internal error: {0}")]
    Internal(String),

    /// The engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Engine(EngineError::CallbackNotFound { .. } | EngineError::UnknownAction { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Self::Engine(EngineError::QueueFull { .. } | EngineError::ShuttingDown) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            Self::Engine(e) if e.is_config_error() => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Engine(EngineError::Action { .. }) => (StatusCode::UNPROCESSABLE_ENTITY, "action_failed"),
            Self::Config(_) | Self::Io { .. } | Self::BindFailed(_, _) | Self::Internal(_) | Self::Engine(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}

impl From<toml::de::Error> for RunnerError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid TOML: {err}"))
    }
}
