//! Error types for the chat server.
//!
//! Every fallible operation returns [`Result`]. HTTP handlers turn an
//! [`Error`] into the uniform `{success, message, data}` envelope; real-time
//! handlers turn it into an `error` event addressed to the initiating
//! connection only.
//!
//! ```text
//!   Error                 HTTP    real-time
//!   ─────────────────────────────────────────
//!   Authentication        401     connection rejected
//!   Forbidden             403     error{message}
//!   NotFound              404     error{message}
//!   Validation            400     error{message}
//!   Conflict              409     error{message}
//!   Database / Internal   500     error{message}, logged
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::ApiResponse;

/// Result type alias for chat server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the chat server
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, malformed or expired credential, or the user behind it is gone
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Caller is not a member / not the admin / not the owner
    #[error("{0}")]
    Forbidden(String),

    /// Chat, message or user absent
    #[error("{0}")]
    NotFound(String),

    /// Malformed payload
    #[error("{0}")]
    Validation(String),

    /// Unique constraint on a user-supplied value (e.g. e-mail)
    #[error("{0}")]
    Conflict(String),

    /// Persistence store failure
    #[error("Database error: {0}")]
    Database(String),

    /// Anything else unexpected
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Database(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is a server-side failure rather than a client mistake.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Internal(_))
    }

    /// Message safe to hand to a client. Server errors keep their detail
    /// in the logs only.
    pub fn client_message(&self) -> String {
        if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn not_member() -> Self {
        Error::Forbidden("You are not a member of this chat".to_string())
    }

    pub fn chat_not_found() -> Self {
        Error::NotFound("Chat not found".to_string())
    }

    pub fn message_not_found() -> Self {
        Error::NotFound("Message not found".to_string())
    }

    pub fn user_not_found() -> Self {
        Error::NotFound("User not found".to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization failed: {}", e))
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(e: bcrypt::BcryptError) -> Self {
        Error::Internal(format!("password hashing failed: {}", e))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(ApiResponse::<()>::failure(self.client_message()))).into_response()
    }
}
