//! Message REST handlers. Mutations go through the same service calls,
//! and so the same fan-out, as the real-time events.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

use super::service::{self, OutgoingMessage, DEFAULT_PAGE_SIZE};
use crate::api::ApiResponse;
use crate::auth::AuthUser;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::error::Result;
use crate::models::{Attachment, MessageType};
use crate::state::AppState;

// ── Request Types ────────────────────────────────────────────────────────────

/// POST /api/messages
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<String>,
}

/// PUT /api/messages/:id
#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    #[serde(default)]
    pub content: String,
}

/// POST /api/messages/:id/reactions
#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    pub chat_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(send_message))
        .route("/search", get(search_messages))
        .route("/chat/:chat_id", get(list_messages))
        .route("/:id", put(edit_message).delete(delete_message))
        .route("/:id/reactions", post(add_reaction).delete(remove_reaction))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/messages/chat/:chat_id?page=&limit=
async fn list_messages(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(chat_id): ApiPath<String>,
    ApiQuery(q): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = service::list_messages(
        &state,
        &user.id,
        &chat_id,
        q.page.unwrap_or(1),
        q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )?;
    Ok(ApiResponse::success("Messages retrieved", page))
}

/// POST /api/messages
async fn send_message(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = service::send_message(
        &state,
        &user.id,
        OutgoingMessage {
            chat_id: req.chat_id,
            content: req.content,
            message_type: req.message_type,
            attachment: req.attachment,
            reply_to: req.reply_to,
        },
    )?;
    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        "Message sent",
        message,
    ))
}

/// PUT /api/messages/:id
async fn edit_message(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = service::edit_message(&state, &user.id, &message_id, &req.content)?;
    Ok(ApiResponse::success("Message updated", message))
}

/// DELETE /api/messages/:id
async fn delete_message(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(message_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let message = service::delete_message(&state, &user.id, &message_id)?;
    Ok(ApiResponse::success("Message deleted", message))
}

/// POST /api/messages/:id/reactions
async fn add_reaction(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> Result<impl IntoResponse> {
    let message = service::add_reaction(&state, &user.id, &message_id, &req.emoji)?;
    Ok(ApiResponse::success("Reaction added", message))
}

/// DELETE /api/messages/:id/reactions
async fn remove_reaction(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiPath(message_id): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let message = service::remove_reaction(&state, &user.id, &message_id)?;
    Ok(ApiResponse::success("Reaction removed", message))
}

/// GET /api/messages/search?query=&chatId=
async fn search_messages(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    ApiQuery(q): ApiQuery<SearchQuery>,
) -> Result<impl IntoResponse> {
    let messages = service::search_messages(&state, &user.id, &q.query, q.chat_id.as_deref())?;
    Ok(ApiResponse::success("Messages found", messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::service::access_direct_chat;
    use crate::registry::Room;
    use crate::state::test_support::{call, connect, session, test_state};
    use serde_json::json;

    #[tokio::test]
    async fn test_rest_send_reaches_live_connection() {
        let state = test_state();
        let (a, token_a) = session(&state, "A");
        let (b, _) = session(&state, "B");
        let (chat, _) = access_direct_chat(&state, &a, &b.id).unwrap();
        let mut conn_b = connect(&state, &b);
        state.registry.join(Room::Chat(chat.id.clone()), conn_b.id());
        let app = crate::build_router(state);

        let (status, body) = call(
            &app,
            "POST",
            "/api/messages",
            Some(&token_a),
            Some(json!({ "chatId": chat.id, "content": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["content"], "hi");
        assert_eq!(body["data"]["sender"]["name"], "A");

        assert_eq!(conn_b.names(), vec!["message_received"]);
    }

    #[tokio::test]
    async fn test_message_routes() {
        let state = test_state();
        let (a, token_a) = session(&state, "A");
        let (b, token_b) = session(&state, "B");
        let (chat, _) = access_direct_chat(&state, &a, &b.id).unwrap();
        let app = crate::build_router(state);

        let (_, sent) = call(
            &app,
            "POST",
            "/api/messages",
            Some(&token_a),
            Some(json!({ "chatId": chat.id, "content": "first draft" })),
        )
        .await;
        let message_id = sent["data"]["_id"].as_str().unwrap().to_string();

        let uri = format!("/api/messages/{}/reactions", message_id);
        let (status, reacted) = call(&app, "POST", &uri, Some(&token_b), Some(json!({"emoji": "👍"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reacted["data"]["reactions"].as_array().unwrap().len(), 1);

        let uri = format!("/api/messages/{}", message_id);
        let (status, _) = call(&app, "PUT", &uri, Some(&token_b), Some(json!({"content": "x"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, edited) = call(&app, "PUT", &uri, Some(&token_a), Some(json!({"content": "final"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["data"]["isEdited"], true);

        let uri = format!("/api/messages/chat/{}?page=1&limit=10", chat.id);
        let (status, listed) = call(&app, "GET", &uri, Some(&token_b), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"]["messages"][0]["content"], "final");

        let (status, found) = call(&app, "GET", "/api/messages/search?query=FINAL", Some(&token_b), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["data"].as_array().unwrap().len(), 1);

        let uri = format!("/api/messages/{}", message_id);
        let (status, deleted) = call(&app, "DELETE", &uri, Some(&token_a), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["data"]["content"], "This message was deleted");
    }
}
