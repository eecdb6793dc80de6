//! REST surface.
//!
//! Every endpoint answers with the same envelope:
//!
//! ```json
//! { "success": true, "message": "Chats retrieved", "data": [...] }
//! ```
//!
//! Failures come from [`crate::error::Error`]'s `IntoResponse` impl with
//! `success: false` and `data: null`.

use axum::{http::StatusCode, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Uniform response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }

    /// Same as [`ApiResponse::success`], with an explicit status (e.g. 201).
    pub fn with_status(
        status: StatusCode,
        message: impl Into<String>,
        data: T,
    ) -> (StatusCode, Json<Self>) {
        (status, Self::success(message, data))
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// All `/api/*` routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/api/auth", crate::auth::api::routes())
        .nest("/api/users", crate::users::api::routes())
        .nest("/api/chats", crate::chats::api::routes())
        .nest("/api/messages", crate::messages::api::routes())
}
