//! Presence & room binding.
//!
//! `connect` and `disconnect` are the only places a user's persisted
//! `isOnline` flag moves with the registry, so the two stay paired.

use crate::chats::service::live_public;
use crate::error::Result;
use crate::models::User;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionHandle, Room};
use crate::state::AppState;

/// Bind a freshly authenticated connection.
///
/// Registers the handle, persists the user as online, subscribes the
/// connection to the user's private room and to one room per chat the
/// user belongs to, then tells the other members the user came online.
/// Returns the chat ids the connection was subscribed to.
pub fn connect(state: &AppState, user: &User, handle: ConnectionHandle) -> Result<Vec<String>> {
    let connection_id = handle.id.clone();
    state.registry.register(&user.id, handle);
    state.registry.join(Room::User(user.id.clone()), &connection_id);

    state
        .db
        .set_presence(&user.id, true, Some(connection_id.as_str()))?;

    let chat_ids = state.db.chat_ids_for_user(&user.id)?;
    for chat_id in &chat_ids {
        state.registry.join(Room::Chat(chat_id.clone()), &connection_id);
    }

    let mut public = live_public(state, user);
    public.is_online = true;
    let event = ServerEvent::UserStatusChange {
        user_id: user.id.clone(),
        is_online: true,
        user: public,
    };
    for chat_id in &chat_ids {
        state
            .registry
            .emit_to_room(&Room::Chat(chat_id.clone()), &event, Some(user.id.as_str()));
    }

    tracing::info!(
        user_id = user.id.as_str(),
        connection_id = connection_id.as_str(),
        chats = chat_ids.len(),
        "User connected"
    );
    Ok(chat_ids)
}

/// Tear down a connection. Runs its effects at most once per connection
/// and never fails: errors are logged and swallowed.
///
/// A connection that was superseded by a newer one for the same user only
/// leaves its rooms; the newer connection keeps the user online.
pub fn disconnect(state: &AppState, user_id: &str, connection_id: &str) {
    let Some(rooms) = state.registry.detach(connection_id) else {
        return;
    };

    if !state.registry.unregister(user_id, connection_id) {
        tracing::debug!(
            user_id = user_id,
            connection_id = connection_id,
            "Superseded connection closed"
        );
        return;
    }

    if let Err(e) = state.db.set_presence(user_id, false, None) {
        tracing::warn!(user_id = user_id, error = %e, "Failed to persist offline presence");
    }

    let user = match state.db.get_user(user_id) {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(user_id = user_id, "Disconnected user no longer exists");
            return;
        }
        Err(e) => {
            tracing::warn!(user_id = user_id, error = %e, "Failed to load disconnected user");
            return;
        }
    };

    // Membership from the store; the rooms this connection held are the
    // fallback if the store is unavailable.
    let chat_ids = state.db.chat_ids_for_user(user_id).unwrap_or_else(|e| {
        tracing::warn!(user_id = user_id, error = %e, "Failed to load chats on disconnect");
        rooms
            .into_iter()
            .filter_map(|room| match room {
                Room::Chat(chat_id) => Some(chat_id),
                Room::User(_) => None,
            })
            .collect()
    });

    let mut public = user.public();
    public.is_online = false;
    let offline = ServerEvent::UserStatusChange {
        user_id: user_id.to_string(),
        is_online: false,
        user: public,
    };

    for chat_id in &chat_ids {
        state.typing.stop(chat_id, user_id);
        let room = Room::Chat(chat_id.clone());
        state.registry.emit_to_room(&room, &offline, Some(user_id));
        state.registry.emit_to_room(
            &room,
            &ServerEvent::UserStoppedTyping {
                user_id: user_id.to_string(),
                chat_id: chat_id.clone(),
            },
            Some(user_id),
        );
    }

    tracing::info!(
        user_id = user_id,
        connection_id = connection_id,
        chats = chat_ids.len(),
        "User disconnected"
    );
}
