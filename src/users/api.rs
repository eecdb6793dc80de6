//! User lookup, search, profile and block-list handlers.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

use crate::api::ApiResponse;
use crate::auth::AuthUser;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::chats::service::live_public;
use crate::error::{Error, Result};
use crate::models::PublicUser;
use crate::state::AppState;

const MAX_SEARCH_RESULTS: usize = 20;
const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

/// PUT /api/users/profile
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(search_users))
        .route("/profile", put(update_profile))
        .route("/:id", get(get_user))
        .route("/:id/block", post(block_user).delete(unblock_user))
}

/// GET /api/users/search?search=
async fn search_users(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiQuery(q): ApiQuery<SearchQuery>,
) -> Result<impl IntoResponse> {
    let query = q.search.trim();
    if query.is_empty() {
        return Ok(ApiResponse::success("Users found", Vec::<PublicUser>::new()));
    }
    let users: Vec<PublicUser> = state
        .db
        .search_users(query, &user.id, MAX_SEARCH_RESULTS)?
        .iter()
        .map(|u| live_public(&state, u))
        .collect();
    Ok(ApiResponse::success("Users found", users))
}

/// GET /api/users/:id
async fn get_user(
    State(state): State<AppState>,
    _caller: AuthUser,
    ApiPath(user_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let user = state
        .db
        .get_user(&user_id)?
        .ok_or_else(Error::user_not_found)?;
    Ok(ApiResponse::success("User retrieved", live_public(&state, &user)))
}

/// PUT /api/users/profile
async fn update_profile(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse> {
    let name = req.name.as_deref().map(str::trim);
    if let Some(name) = name {
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "Name must be between 1 and {} characters",
                MAX_NAME_LEN
            )));
        }
    }

    let updated = state
        .db
        .update_profile(&user.id, name, req.avatar.as_deref())?
        .ok_or_else(Error::user_not_found)?;
    tracing::info!(user_id = user.id.as_str(), "Profile updated");
    Ok(ApiResponse::success("Profile updated", live_public(&state, &updated)))
}

/// POST /api/users/:id/block
async fn block_user(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(target_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    if target_id == user.id {
        return Err(Error::Validation("You cannot block yourself".to_string()));
    }
    state
        .db
        .get_user(&target_id)?
        .ok_or_else(Error::user_not_found)?;

    let mut blocked = user.blocked_users.clone();
    if !blocked.contains(&target_id) {
        blocked.push(target_id.clone());
        state.db.set_blocked_users(&user.id, &blocked)?;
    }
    Ok(ApiResponse::success("User blocked", blocked))
}

/// DELETE /api/users/:id/block
async fn unblock_user(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(target_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let before = user.blocked_users.len();
    let blocked: Vec<String> = user
        .blocked_users
        .into_iter()
        .filter(|id| *id != target_id)
        .collect();
    if blocked.len() != before {
        state.db.set_blocked_users(&user.id, &blocked)?;
    }
    Ok(ApiResponse::success("User unblocked", blocked))
}
