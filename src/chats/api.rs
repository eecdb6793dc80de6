//! Chat REST handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::service::{self, GroupUpdate};
use crate::api::ApiResponse;
use crate::auth::AuthUser;
use crate::extract::{ApiJson, ApiPath};
use crate::error::Result;
use crate::state::AppState;

// ── Request Types ────────────────────────────────────────────────────────────

/// POST /api/chats
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessChatRequest {
    #[serde(default)]
    pub user_id: String,
}

/// POST /api/chats/group
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub users: Vec<String>,
}

/// PUT /api/chats/:id
#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

/// POST /api/chats/:id/members
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    #[serde(default)]
    pub user_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_chats).post(access_chat))
        .route("/group", post(create_group))
        .route("/:id", get(get_chat).put(update_group).delete(delete_chat))
        .route("/:id/members", post(add_member))
        .route("/:id/members/:user_id", delete(remove_member))
        .route("/:id/leave", post(leave_chat))
        .route("/:id/read", put(mark_read))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/chats
async fn list_chats(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<impl IntoResponse> {
    let chats = service::list_chats(&state, &user.id)?;
    Ok(ApiResponse::success("Chats retrieved", chats))
}

/// POST /api/chats: open (or create) the one-on-one chat with `userId`.
async fn access_chat(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiJson(req): ApiJson<AccessChatRequest>,
) -> Result<impl IntoResponse> {
    let (chat, created) = service::access_direct_chat(&state, &user, &req.user_id)?;
    Ok(if created {
        ApiResponse::with_status(StatusCode::CREATED, "Chat created", chat)
    } else {
        ApiResponse::with_status(StatusCode::OK, "Chat retrieved", chat)
    })
}

/// POST /api/chats/group
async fn create_group(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> Result<impl IntoResponse> {
    let chat = service::create_group_chat(&state, &user, &req.name, req.description, &req.users)?;
    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        "Group chat created",
        chat,
    ))
}

/// GET /api/chats/:id
async fn get_chat(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let chat = service::get_chat(&state, &user.id, &chat_id)?;
    Ok(ApiResponse::success("Chat retrieved", chat))
}

/// PUT /api/chats/:id
async fn update_group(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateGroupRequest>,
) -> Result<impl IntoResponse> {
    let update = GroupUpdate {
        name: req.name,
        description: req.description,
        avatar: req.avatar,
    };
    let chat = service::update_group(&state, &user.id, &chat_id, update)?;
    Ok(ApiResponse::success("Chat updated", chat))
}

/// DELETE /api/chats/:id
async fn delete_chat(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    service::delete_chat(&state, &user.id, &chat_id)?;
    Ok(ApiResponse::success("Chat deleted", json!({ "chatId": chat_id })))
}

/// POST /api/chats/:id/members
async fn add_member(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> Result<impl IntoResponse> {
    let chat = service::add_member(&state, &user.id, &chat_id, &req.user_id)?;
    Ok(ApiResponse::success("Member added", chat))
}

/// DELETE /api/chats/:id/members/:user_id
async fn remove_member(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath((chat_id, member_id)): ApiPath<(String, String)>,
) -> Result<impl IntoResponse> {
    let chat = service::remove_member(&state, &user.id, &chat_id, &member_id)?;
    Ok(ApiResponse::success("Member removed", chat))
}

/// POST /api/chats/:id/leave
async fn leave_chat(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let chat = service::leave_chat(&state, &user.id, &chat_id)?;
    let message = if chat.is_some() {
        "Left chat"
    } else {
        "Left chat; chat removed"
    };
    Ok(ApiResponse::success(message, chat))
}

/// PUT /api/chats/:id/read
async fn mark_read(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let marked = service::mark_chat_read(&state, &user.id, &chat_id)?;
    Ok(ApiResponse::success(
        "Chat marked as read",
        json!({ "chatId": chat_id, "marked": marked }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{call, session, test_state};

    #[tokio::test]
    async fn test_direct_chat_routes() {
        let state = test_state();
        let (_, token_a) = session(&state, "A");
        let (b, token_b) = session(&state, "B");
        let app = crate::build_router(state);

        let body = json!({ "userId": b.id });
        let (status, created) = call(&app, "POST", "/api/chats", Some(&token_a), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = created["data"]["_id"].as_str().unwrap().to_string();

        let (status, again) = call(&app, "POST", "/api/chats", Some(&token_a), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["data"]["_id"], chat_id.as_str());

        let (status, listed) = call(&app, "GET", "/api/chats", Some(&token_b), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
        assert_eq!(listed["data"][0]["unreadCount"].as_array().unwrap().len(), 2);

        let uri = format!("/api/chats/{}/leave", chat_id);
        let (status, body) = call(&app, "POST", &uri, Some(&token_a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_group_routes() {
        let state = test_state();
        let (_, token_a) = session(&state, "A");
        let (b, token_b) = session(&state, "B");
        let (c, _) = session(&state, "C");
        let app = crate::build_router(state);

        let (status, created) = call(
            &app,
            "POST",
            "/api/chats/group",
            Some(&token_a),
            Some(json!({ "name": "Team", "users": [b.id, c.id] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = created["data"]["_id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["isGroup"], true);

        let uri = format!("/api/chats/{}", chat_id);
        let (status, _) = call(&app, "DELETE", &uri, Some(&token_b), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, renamed) = call(
            &app,
            "PUT",
            &uri,
            Some(&token_a),
            Some(json!({ "name": "Core" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["data"]["name"], "Core");

        let uri = format!("/api/chats/{}/members/{}", chat_id, c.id);
        let (status, removed) = call(&app, "DELETE", &uri, Some(&token_a), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(removed["data"]["users"].as_array().unwrap().len(), 2);

        let uri = format!("/api/chats/{}", chat_id);
        let (status, _) = call(&app, "DELETE", &uri, Some(&token_a), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", &uri, Some(&token_a), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
