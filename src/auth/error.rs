use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::{principal::PrincipalKind, repo::StoreError};

pub const REQUIRED_FIELDS_MESSAGE: &str = "All fields are required";
pub const INVALID_BODY_MESSAGE: &str = "Invalid request body";

/// Every way a credential request can fail. Client-facing variants carry
/// their exact message; infrastructure variants carry the source for the log only.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("{}", .0.duplicate_message())]
    DuplicateIdentifier(PrincipalKind),
    #[error("{}", .0.invalid_credentials_message())]
    InvalidCredentials(PrincipalKind),
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("identity store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
    #[error("unexpected failure")]
    Unexpected(#[source] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(message.into())
    }

    pub fn unexpected<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        AuthError::Unexpected(err.into())
    }

    /// Stable machine-readable code sent next to `message`.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_error",
            AuthError::PasswordMismatch => "password_mismatch",
            AuthError::DuplicateIdentifier(_) => "duplicate_identifier",
            AuthError::InvalidCredentials(_) => "invalid_credentials",
            AuthError::InvalidToken => "unauthorized",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Unexpected(_) => "unexpected",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::PasswordMismatch
            | AuthError::DuplicateIdentifier(_)
            | AuthError::InvalidCredentials(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::StoreUnavailable(_) | AuthError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(kind) => AuthError::DuplicateIdentifier(kind),
            StoreError::Unavailable(source) => AuthError::StoreUnavailable(source),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::StoreUnavailable(source) | AuthError::Unexpected(source) => {
                error!(error = ?source, code = self.code(), "request failed");
                "Server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "message": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
