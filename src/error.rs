use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::backend::BackendError;

/// Failure of a domain operation. Every variant leaves prior in-memory state
/// untouched.
#[derive(Debug, thiserror::Error)]
pub enum PodError {
    #[error("Failed to load {what}")]
    Fetch {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Failed to save {what}")]
    Write {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Please sign in and create a profile first")]
    Unauthenticated,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    /// The second write of a two-step creation failed and undoing the first
    /// failed too.
    #[error("Failed to save {what}; rollback also failed: {rollback}")]
    WriteRollback {
        what: &'static str,
        #[source]
        source: BackendError,
        rollback: BackendError,
    },
}

impl PodError {
    pub fn fetch(what: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::Fetch { what, source }
    }

    pub fn write(what: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::Write { what, source }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::WriteRollback { .. })
    }
}

pub type PodResult<T> = Result<T, PodError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Domain error: {0}")]
    Domain(#[from] PodError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Domain(err) => {
                let status = match &err {
                    PodError::NotFound(_) => StatusCode::NOT_FOUND,
                    PodError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    PodError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    PodError::Write {
                        source: BackendError::Conflict(_),
                        ..
                    } => StatusCode::CONFLICT,
                    PodError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                if status.is_server_error() {
                    tracing::error!("Domain error: {:?}", err);
                }
                let message = match status {
                    StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
                    _ => err.to_string(),
                };
                (status, message)
            }
            AppError::Backend(e) => {
                tracing::error!("Backend error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
