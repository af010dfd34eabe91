use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::store::StoreError;

/// Challenge sent with every 401 and with permission failures
pub const BASIC_CHALLENGE: &str = "Basic realm=\".\"";

/// Application error type for HTTP handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {message}")]
    Forbidden { message: String, challenge: bool },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::BadCredentials => AppError::Unauthenticated("Invalid username or password".to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let generic = || StatusCode::INTERNAL_SERVER_ERROR.canonical_reason().unwrap_or("").to_string();

        let (status, message, challenge) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), false),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), true),
            AppError::Forbidden { message, challenge } => (StatusCode::FORBIDDEN, message.clone(), *challenge),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), false),
            AppError::Upstream(msg) => {
                tracing::error!("Upstream failure: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, generic(), false)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, generic(), false)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, generic(), false)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, generic(), false)
            }
        };

        if challenge {
            (status, [(header::WWW_AUTHENTICATE, BASIC_CHALLENGE)], message).into_response()
        } else {
            (status, message).into_response()
        }
    }
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        AppError::Unauthenticated(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: msg.into(),
            challenge: false,
        }
    }

    /// 403 that also asks the client for credentials
    pub fn forbidden_with_challenge(msg: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: msg.into(),
            challenge: true,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        AppError::Upstream(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
