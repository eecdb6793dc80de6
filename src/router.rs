//! Real-time event dispatch.
//!
//! Each inbound [`ClientEvent`] is handled independently: the handler
//! re-checks membership against the store, mutates state, then fans out.
//! A failing handler answers with an `error` event on the originating
//! connection only; the connection stays open.

use crate::chats::service::{live_public, member_chat};
use crate::error::Result;
use crate::messages::service::{self as messages, OutgoingMessage};
use crate::models::User;
use crate::protocol::{ChatRef, ClientEvent, SendMessagePayload, ServerEvent};
use crate::registry::{ConnectionId, Room};
use crate::state::AppState;

/// Who sent an event, and over which connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub user: User,
}

/// Handle one inbound event, converting failures into an `error` event
/// for the sender.
pub fn dispatch(state: &AppState, ctx: &ConnectionContext, event: ClientEvent) {
    let name = event.name();
    tracing::debug!(
        user_id = ctx.user.id.as_str(),
        connection_id = ctx.connection_id.as_str(),
        event = name,
        "Dispatching client event"
    );

    if let Err(e) = handle(state, ctx, event) {
        if e.is_server_error() {
            tracing::error!(user_id = ctx.user.id.as_str(), event = name, error = %e, "Event handler failed");
        } else {
            tracing::debug!(user_id = ctx.user.id.as_str(), event = name, error = %e, "Event rejected");
        }
        state
            .registry
            .send(&ctx.connection_id, ServerEvent::error(e.client_message()));
    }
}

fn handle(state: &AppState, ctx: &ConnectionContext, event: ClientEvent) -> Result<()> {
    match event {
        ClientEvent::JoinChat(ChatRef { chat_id }) => join_chat(state, ctx, &chat_id),
        ClientEvent::LeaveChat(ChatRef { chat_id }) => leave_chat(state, ctx, &chat_id),
        ClientEvent::SendMessage(payload) => send_message(state, ctx, payload),
        ClientEvent::Typing(ChatRef { chat_id }) => typing_start(state, ctx, &chat_id),
        ClientEvent::StopTyping(ChatRef { chat_id }) => typing_stop(state, ctx, &chat_id),
        ClientEvent::UserStatusUpdate(status) => status_update(state, ctx, status.is_online),
        ClientEvent::AddReaction(r) => {
            messages::add_reaction(state, &ctx.user.id, &r.message_id, &r.emoji).map(|_| ())
        }
        ClientEvent::RemoveReaction(r) => {
            messages::remove_reaction(state, &ctx.user.id, &r.message_id).map(|_| ())
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

fn join_chat(state: &AppState, ctx: &ConnectionContext, chat_id: &str) -> Result<()> {
    member_chat(state, chat_id, &ctx.user.id)?;
    state
        .registry
        .join(Room::Chat(chat_id.to_string()), &ctx.connection_id);
    state.db.reset_unread(chat_id, &ctx.user.id)?;

    state.registry.send(
        &ctx.connection_id,
        ServerEvent::JoinedChat {
            chat_id: chat_id.to_string(),
        },
    );
    Ok(())
}

fn leave_chat(state: &AppState, ctx: &ConnectionContext, chat_id: &str) -> Result<()> {
    state
        .registry
        .leave(&Room::Chat(chat_id.to_string()), &ctx.connection_id);
    state.registry.send(
        &ctx.connection_id,
        ServerEvent::LeftChat {
            chat_id: chat_id.to_string(),
        },
    );
    Ok(())
}

fn send_message(state: &AppState, ctx: &ConnectionContext, payload: SendMessagePayload) -> Result<()> {
    messages::send_message(
        state,
        &ctx.user.id,
        OutgoingMessage {
            chat_id: payload.chat_id,
            content: payload.content,
            message_type: payload.message_type,
            attachment: None,
            reply_to: payload.reply_to,
        },
    )?;
    Ok(())
}

/// Every `typing` re-arms the expiry timer and re-broadcasts, so a client
/// that joined mid-stream still learns who is typing.
fn typing_start(state: &AppState, ctx: &ConnectionContext, chat_id: &str) -> Result<()> {
    member_chat(state, chat_id, &ctx.user.id)?;
    let room = Room::Chat(chat_id.to_string());

    let registry = state.registry.clone();
    let expired_room = room.clone();
    let user_id = ctx.user.id.clone();
    let expired_chat = chat_id.to_string();
    state.typing.start(chat_id, &ctx.user.id, move || {
        // The chat may be gone or the user may have left; an empty room
        // makes this a no-op.
        registry.emit_to_room(
            &expired_room,
            &ServerEvent::UserStoppedTyping {
                user_id: user_id.clone(),
                chat_id: expired_chat,
            },
            Some(user_id.as_str()),
        );
    });

    state.registry.emit_to_room(
        &room,
        &ServerEvent::UserTyping {
            user_id: ctx.user.id.clone(),
            user: live_public(state, &ctx.user),
            chat_id: chat_id.to_string(),
        },
        Some(ctx.user.id.as_str()),
    );
    Ok(())
}

fn typing_stop(state: &AppState, ctx: &ConnectionContext, chat_id: &str) -> Result<()> {
    member_chat(state, chat_id, &ctx.user.id)?;
    state.typing.stop(chat_id, &ctx.user.id);
    state.registry.emit_to_room(
        &Room::Chat(chat_id.to_string()),
        &ServerEvent::UserStoppedTyping {
            user_id: ctx.user.id.clone(),
            chat_id: chat_id.to_string(),
        },
        Some(ctx.user.id.as_str()),
    );
    Ok(())
}

/// Manual online/offline toggle. The connection itself stays registered.
fn status_update(state: &AppState, ctx: &ConnectionContext, is_online: bool) -> Result<()> {
    state.db.set_online(&ctx.user.id, is_online)?;
    let mut user = state
        .db
        .get_user(&ctx.user.id)?
        .unwrap_or_else(|| ctx.user.clone())
        .public();
    user.is_online = is_online;

    let event = ServerEvent::UserStatusChange {
        user_id: ctx.user.id.clone(),
        is_online,
        user,
    };
    for chat_id in state.db.chat_ids_for_user(&ctx.user.id)? {
        state
            .registry
            .emit_to_room(&Room::Chat(chat_id), &event, Some(ctx.user.id.as_str()));
    }
    Ok(())
}
