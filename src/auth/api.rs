//! Auth REST handlers and the request extractor.

use axum::{
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use super::service::{bearer_token, AuthSession};
use crate::api::ApiResponse;
use crate::chats::service::live_public;
use crate::error::{Error, Result};
use crate::extract::ApiJson;
use crate::models::{PublicUser, User};
use crate::state::AppState;

// ── Extractor ────────────────────────────────────────────────────────────────

/// The authenticated caller of a REST request.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let token = bearer_token(&parts.headers, query.token.as_deref())
            .map(|t| t.trim().to_string());

        let user = state.auth.authenticate(token.as_deref())?;
        Ok(AuthUser {
            user,
            token: token.unwrap_or_default(),
        })
    }
}

// ── Request / Response Types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: PublicUser,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<AuthSession> for AuthPayload {
    fn from(session: AuthSession) -> Self {
        Self {
            user: session.user.public(),
            token: session.token,
            expires_at: session.expires_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Bcrypt is deliberately slow; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

/// POST /api/auth/register
async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let auth = state.auth.clone();
    let session =
        run_blocking(move || auth.register(&req.name, &req.email, &req.password)).await?;
    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        "User registered successfully",
        AuthPayload::from(session),
    ))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse> {
    let auth = state.auth.clone();
    let session = run_blocking(move || auth.login(&req.email, &req.password)).await?;
    Ok(ApiResponse::success(
        "Login successful",
        AuthPayload::from(session),
    ))
}

/// POST /api/auth/logout
async fn logout(State(state): State<AppState>, caller: AuthUser) -> Result<impl IntoResponse> {
    state.auth.logout(&caller.token)?;
    tracing::info!(user_id = caller.user.id.as_str(), "User logged out");
    Ok(ApiResponse::success("Logout successful", ()))
}

/// GET /api/auth/me
async fn me(State(state): State<AppState>, caller: AuthUser) -> Result<impl IntoResponse> {
    Ok(ApiResponse::success(
        "User retrieved",
        live_public(&state, &caller.user),
    ))
}
