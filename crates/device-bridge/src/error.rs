use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::tokens::TokenError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn device_not_found(id: &str) -> Self {
        Self::NotFound(format!("device {id} not found"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
            BridgeError::Conflict(_) => StatusCode::CONFLICT,
            BridgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Upstream(_) => StatusCode::BAD_GATEWAY,
            BridgeError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Repository plumbing failures surface as internal errors.
impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::internal(format!("{err:#}"))
    }
}

impl From<TokenError> for BridgeError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotConfigured => BridgeError::Configuration(err.to_string()),
            TokenError::Signing(_) => BridgeError::Internal(err.to_string()),
            TokenError::Invalid(_) | TokenError::SubjectMismatch | TokenError::ScopeDenied(_) => {
                BridgeError::Unauthorized(err.to_string())
            }
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
