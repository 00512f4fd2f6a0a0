//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jetswitch_core::{RepositoryError, UniqueField};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::auth::jwt::TokenError;
use crate::auth::password::PasswordError;
use crate::auth::provider::ProviderError;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn bad_gateway() -> Self {
        Self::new("UPSTREAM_ERROR", "Identity provider request failed")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid session token: {0}")]
    Token(TokenError),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        AppError::Authentication(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::Authentication(_) | AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::Validation(msg) => ApiError::bad_request(msg),
            AppError::Duplicate(msg) => ApiError::conflict(msg),
            AppError::Authentication(msg) => ApiError::new("UNAUTHORIZED", msg),
            AppError::NotFound(msg) => ApiError::not_found(msg),
            AppError::Token(_) => ApiError::unauthorized(),
            AppError::Upstream(detail) => {
                tracing::error!(error = %detail, "Identity provider failure");
                ApiError::bad_gateway()
            }
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                ApiError::internal_error()
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => AppError::NotFound("user not found".to_string()),
            RepositoryError::Duplicate(field) => AppError::Duplicate(
                match field {
                    UniqueField::Username => "username already taken",
                    UniqueField::Email => "email already registered",
                    UniqueField::ProviderId => "account already linked",
                }
                .to_string(),
            ),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => AppError::Internal(format!("token signing failed: {msg}")),
            other => AppError::Token(other),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Config(msg) => {
                AppError::Internal(format!("identity provider misconfigured: {msg}"))
            }
            other => AppError::Upstream(other.to_string()),
        }
    }
}
