use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::repo::StoreError;

/// Every failure a handler can surface to a client.
///
/// Login failures deliberately do not say whether the email or the
/// password was wrong, and all token failures (bad signature, expired,
/// wrong kind) collapse into one message.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0} already taken")]
    DuplicateIdentity(&'static str),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("User not found")]
    NotFound,
    #[error("Invalid or expired reset token")]
    InvalidResetToken,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => Self::DuplicateIdentity(field),
            StoreError::Other(err) => Self::Internal(err),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::DuplicateIdentity(_) => StatusCode::CONFLICT,
            Self::InvalidCredentials | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidResetToken | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(err) => {
                error!(error = %err, "internal error");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error" })),
                )
                    .into_response();
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
