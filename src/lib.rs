//! Chatwire: a real-time chat server.
//!
//! Users authenticate with an opaque bearer token, hold one WebSocket at
//! `/ws` for live events, and use the REST API under `/api` for the same
//! operations. Both paths share one service layer and one fan-out path, so
//! a message sent over HTTP looks the same to connected clients as one sent
//! over the socket.

pub mod api;
pub mod auth;
pub mod chats;
pub mod error;
pub mod extract;
pub mod handler;
pub mod messages;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod state;
pub mod storage;
pub mod typing;
pub mod users;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::api::TokenQuery;
use extract::ApiQuery;

pub use error::{Error, Result};
pub use state::{AppState, ServerConfig};

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .merge(api::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade. The token is checked before upgrading; a bad one is
/// answered with a 401 envelope and no socket.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let token = auth::bearer_token(&headers, query.token.as_deref());
    let user = state.auth.authenticate(token)?;
    tracing::debug!(user_id = user.id.as_str(), "WebSocket upgrade accepted");
    Ok(ws.on_upgrade(move |socket| handler::handle_websocket(socket, state, user)))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "chatwire",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "online_users": state.registry.online_count(),
        "connections": state.registry.connection_count(),
        "rooms": state.registry.room_count(),
        "typing_indicators": state.typing.active_count(),
    }))
}
