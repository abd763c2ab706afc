use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::repository::RepoError;

/// ErrorBody
///
/// Wire shape of every JSON failure: a single `error` message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// ApiError
///
/// Every way a request can terminate unsuccessfully. The first failure ends the
/// request; nothing is persisted once one of these is produced.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No credential was supplied where one is required.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated, but the authorization gate said no.
    #[error("{0}")]
    Forbidden(String),

    /// A token was supplied (or expected) but could not be accepted.
    #[error("{0}")]
    TokenRejected(String),

    /// A field failed shape/type checks; the message names the field.
    #[error("{0}")]
    MalformedInput(String),

    /// A referenced parent record does not exist.
    #[error("Unable to find requested {0}")]
    MissingReference(&'static str),

    #[error("Validation failed: {0}")]
    UniquenessViolation(String),

    /// A precondition on the current state blocked the mutation.
    #[error("{0}")]
    OperationRefused(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Status code 419, used for rejected auth tokens.
pub fn token_rejected_status() -> StatusCode {
    StatusCode::from_u16(419).unwrap_or(StatusCode::UNAUTHORIZED)
}

impl ApiError {
    pub fn invalid(field: &str) -> Self {
        ApiError::MalformedInput(format!("{field} is invalid"))
    }

    pub fn empty(field: &str) -> Self {
        ApiError::MalformedInput(format!("{field} is empty"))
    }

    pub fn missing(field: &str) -> Self {
        ApiError::MalformedInput(format!("{field} is missing"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TokenRejected(_) => token_rejected_status(),
            ApiError::MalformedInput(_)
            | ApiError::UniquenessViolation(_)
            | ApiError::OperationRefused(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingReference(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed with internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::UniqueViolation(constraint) => ApiError::UniquenessViolation(constraint),
            RepoError::Database(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedInput(rejection.body_text())
    }
}
