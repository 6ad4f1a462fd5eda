use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body rendered for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// A domain rejection with its own stable code (e.g. `CredentialRevoked`).
    #[error("{code}: {message}")]
    Rejected {
        status: StatusCode,
        code: &'static str,
        message: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn rejected(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        AppError::Rejected {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Rejected { status, .. } => *status,
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `(error, message)` pair sent to the client. Infra failures never
    /// expose their cause.
    pub fn envelope(&self) -> ErrorEnvelope {
        let (error, message) = match self {
            AppError::Rejected { code, message, .. } => (code.to_string(), message.clone()),
            AppError::ValidationError(err) => ("ValidationError".to_string(), err.to_string()),
            AppError::BadRequest(err) => ("BadRequest".to_string(), err.to_string()),
            AppError::Timeout => ("Timeout".to_string(), "Request timed out".to_string()),
            AppError::InternalError(_) => (
                "InternalError".to_string(),
                "Internal server error".to_string(),
            ),
            AppError::DatabaseError(_) => {
                ("DatabaseError".to_string(), "Database error".to_string())
            }
            AppError::EmailError(_) => ("EmailError".to_string(), "Email error".to_string()),
            AppError::ConfigError(_) => (
                "ConfigError".to_string(),
                "Configuration error".to_string(),
            ),
        };
        ErrorEnvelope { error, message }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        (status, Json(self.envelope())).into_response()
    }
}
