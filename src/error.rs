use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    models::MessageResponse, password::PasswordError, policy::PolicyError, repository::RepoError,
    storage::StorageError,
};

/// AppError
///
/// The error type of every handler and extractor. The rendered body is always
/// `{"message": "..."}`; internal failures are logged in full and reported to the client
/// with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Upload exceeds the size limit")]
    PayloadTooLarge,
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(..) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Policy(PolicyError::Forbidden(..)) => StatusCode::FORBIDDEN,
            Self::Policy(PolicyError::MissingRejectionComment) => StatusCode::BAD_REQUEST,
            Self::Password(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Self::Repository(RepoError::Duplicate(..)) => StatusCode::BAD_REQUEST,
            Self::Repository(RepoError::Conflict(..)) => StatusCode::CONFLICT,
            Self::Password(..) | Self::Repository(..) | Self::Storage(..) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message shown to the client.
    fn public_message(&self) -> String {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "request failed");
        }

        (status, Json(MessageResponse::new(self.public_message()))).into_response()
    }
}
