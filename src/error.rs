use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type for circulation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the circulation system.
///
/// Everything except `Database` and `Other` is an expected, user-facing
/// outcome and maps to a 4xx status. Infrastructure failures surface as a
/// generic 500 without leaking internals.
#[derive(Debug, Error)]
pub enum Error {
    /// No copies left to reserve
    #[error("no copies of this book are available")]
    OutOfStock { book_id: Uuid },

    /// Referenced entity does not exist
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: Uuid },

    /// Illegal state transition (e.g. confirming an already-confirmed return)
    #[error("{0}")]
    InvalidState(String),

    /// No valid bearer token supplied
    #[error("authentication required")]
    Unauthenticated,

    /// The borrow belongs to a different user
    #[error("this borrow belongs to another user")]
    NotOwner,

    /// Operation requires the admin role
    #[error("administrator role required")]
    NotAdmin,

    /// User already holds an active borrow of this book
    #[error("you have already borrowed this book")]
    AlreadyBorrowed { book_id: Uuid },

    /// User is at the concurrent active-borrow limit
    #[error("active borrow limit of {limit} books reached")]
    BorrowLimitReached { limit: usize },

    /// A pending return already exists for this borrow
    #[error("a return has already been requested for this borrow")]
    AlreadyRequested { borrow_id: Uuid },

    /// Rating requires a completed borrow of the book
    #[error("rating requires a completed borrow of this book")]
    NotEligible,

    /// At most one rating per user per book
    #[error("you have already rated this book")]
    AlreadyRated,

    /// Rating value outside [1, 5]
    #[error("rating must be an integer between 1 and 5, got {value}")]
    InvalidValue { value: i64 },

    /// Database operation failed
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::OutOfStock { .. }
            | Error::InvalidState(_)
            | Error::AlreadyBorrowed { .. }
            | Error::BorrowLimitReached { .. }
            | Error::AlreadyRequested { .. }
            | Error::NotEligible
            | Error::AlreadyRated
            | Error::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::NotOwner | Error::NotAdmin => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Database(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe message, without leaking internal implementation details.
    pub fn user_message(&self) -> String {
        match self {
            Error::Database(_) | Error::Other(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details at a severity matched to the error class.
        match &self {
            Error::Database(_) | Error::Other(_) => {
                tracing::error!(error = %self, "internal service error");
            }
            Error::Unauthenticated | Error::NotOwner | Error::NotAdmin => {
                tracing::info!(error = %self, "authorization error");
            }
            _ => {
                tracing::debug!(error = %self, "client error");
            }
        }

        let status = self.status_code();
        let body = json!({
            "success": false,
            "message": self.user_message(),
        });
        (status, Json(body)).into_response()
    }
}
