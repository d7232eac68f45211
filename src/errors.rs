use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failures of the broker components.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("could not resolve storage credentials: {0}")]
    CredentialResolution(String),
    #[error("object `{0}` already exists")]
    KeyCollision(String),
    #[error("no free key found for `{0}`")]
    KeyExhausted(String),
    #[error("{}", .0.join("\n"))]
    Validation(Vec<String>),
    #[error("invalid upload location `{0}`")]
    InvalidLocation(String),
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: String, reason: String },
    #[error("object store request failed: {0}")]
    ObjectStore(String),
    #[error("could not encode upload policy: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        let status = match &err {
            BrokerError::KeyCollision(_) => StatusCode::CONFLICT,
            BrokerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BrokerError::InvalidLocation(_) | BrokerError::InvalidSetting { .. } => {
                StatusCode::BAD_REQUEST
            }
            BrokerError::CredentialResolution(_) | BrokerError::ObjectStore(_) => {
                StatusCode::BAD_GATEWAY
            }
            BrokerError::KeyExhausted(_) | BrokerError::Encoding(_) | BrokerError::Sqlx(_) => {
                tracing::error!("request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}
