use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for limiter and gateway operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Error types raised by the limiter and the gateway around it
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Invalid rate limit for command '{command}': {reason}")]
    InvalidPolicy { command: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Create an invalid policy error for a command
    pub fn invalid_policy(command: impl Into<String>, reason: impl Into<String>) -> Self {
        LimiterError::InvalidPolicy {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::InvalidPolicy { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Proxy(_) => StatusCode::BAD_GATEWAY,
            LimiterError::Backend(_) => StatusCode::BAD_GATEWAY,
            LimiterError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            LimiterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body written for every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Write an error response with the given status and `{"message": ...}` body
pub fn write_error(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        write_error(self.status_code(), ErrorResponse::new(self.to_string()))
    }
}
