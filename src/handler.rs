//! WebSocket connection handler.
//!
//! Runs one authenticated connection from bind to teardown: parses client
//! events, routes them through the event router, and drains the outbound
//! queue onto the socket.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::models::User;
use crate::presence;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionHandle;
use crate::router::{self, ConnectionContext};
use crate::state::AppState;

/// Handle a single WebSocket connection.
///
/// The credential was verified before the upgrade, so `user` is known.
/// This function runs for the lifetime of the connection:
/// 1. Spawns a sender task to forward outbound events
/// 2. Binds the connection (registry, presence, rooms)
/// 3. Processes incoming events until the connection closes
/// 4. Tears down exactly once
pub async fn handle_websocket(socket: WebSocket, state: AppState, user: User) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create the outbound channel for this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(&user.id, tx);
    let ctx = ConnectionContext {
        connection_id: handle.id.clone(),
        user,
    };

    // ── Step 1: Spawn Sender Task ─────────────────────────────────────────

    let connection_id = ctx.connection_id.clone();
    let mut sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(
                        connection_id = connection_id.as_str(),
                        event = event.name(),
                        error = %e,
                        "Failed to serialize server event"
                    );
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    // ── Step 2: Bind ──────────────────────────────────────────────────────

    if let Err(e) = presence::connect(&state, &ctx.user, handle) {
        tracing::error!(
            user_id = ctx.user.id.as_str(),
            error = %e,
            "Failed to bind connection"
        );
        state
            .registry
            .send(&ctx.connection_id, ServerEvent::error(e.client_message()));
        presence::disconnect(&state, &ctx.user.id, &ctx.connection_id);
        // Every sender is gone now, so the task flushes and exits.
        let _ = sender_task.await;
        return;
    }

    // ── Step 3: Process Events ────────────────────────────────────────────

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => router::dispatch(&state, &ctx, event),
                    Err(e) => {
                        tracing::warn!(
                            user_id = ctx.user.id.as_str(),
                            error = %e,
                            "Failed to parse client event"
                        );
                        state.registry.send(
                            &ctx.connection_id,
                            ServerEvent::error(format!("Invalid event: {}", e)),
                        );
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(user_id = ctx.user.id.as_str(), "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = ctx.user.id.as_str(),
                        error = %e,
                        "WebSocket error"
                    );
                    break;
                }
                // Binary, Ping, Pong: axum answers pings itself
                Some(Ok(_)) => {}
            },
            // The socket's write half failed; nothing more can be delivered.
            _ = &mut sender_task => break,
        }
    }

    // ── Step 4: Cleanup ───────────────────────────────────────────────────

    presence::disconnect(&state, &ctx.user.id, &ctx.connection_id);
    sender_task.abort();
}
