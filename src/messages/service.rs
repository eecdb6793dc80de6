//! Message operations and their fan-out.
//!
//! Real-time handlers and REST handlers both call into here, so a message
//! sent over HTTP reaches connected clients exactly like one sent over the
//! socket.

use std::collections::HashSet;

use chrono::{Duration, Utc};

use crate::chats::service::member_chat;
use crate::error::{Error, Result};
use crate::models::{Attachment, ChatRecord, Message, MessageType};
use crate::protocol::{ServerEvent, NOTIFICATION_NEW_MESSAGE};
use crate::registry::Room;
use crate::state::{AppState, MAX_CONFIG_HOURS};
use crate::storage::NewMessage;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_SEARCH_RESULTS: usize = 50;

/// A message about to be sent.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub chat_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<String>,
}

/// One page of a chat's history, oldest first.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}

fn check_content(state: &AppState, content: &str, has_attachment: bool) -> Result<()> {
    if content.trim().is_empty() && !has_attachment {
        return Err(Error::Validation("Message content is required".to_string()));
    }
    let max = state.config.max_message_length;
    if content.chars().count() > max {
        return Err(Error::Validation(format!(
            "Message cannot exceed {} characters",
            max
        )));
    }
    Ok(())
}

fn load_message(state: &AppState, message_id: &str) -> Result<Message> {
    state
        .db
        .get_message(message_id)?
        .ok_or_else(Error::message_not_found)
}

/// Persist a message and deliver it.
///
/// The store bumps the latest-message pointer and the other members'
/// unread counters in the same transaction as the insert. The sender's
/// typing indicator is cleared.
pub fn send_message(state: &AppState, sender_id: &str, outgoing: OutgoingMessage) -> Result<Message> {
    if outgoing.chat_id.trim().is_empty() {
        return Err(Error::Validation("chatId is required".to_string()));
    }
    check_content(state, &outgoing.content, outgoing.attachment.is_some())?;

    let chat = member_chat(state, &outgoing.chat_id, sender_id)?;

    if let Some(reply_id) = &outgoing.reply_to {
        let replied = state
            .db
            .get_message(reply_id)?
            .ok_or_else(|| Error::NotFound("Replied-to message not found".to_string()))?;
        if replied.chat != chat.id {
            return Err(Error::Validation(
                "Replied-to message belongs to a different chat".to_string(),
            ));
        }
    }

    let message = state.db.insert_message(&NewMessage {
        chat_id: chat.id.clone(),
        sender_id: sender_id.to_string(),
        content: outgoing.content,
        message_type: outgoing.message_type,
        attachment: outgoing.attachment,
        reply_to: outgoing.reply_to,
    })?;

    if state.typing.stop(&chat.id, sender_id) {
        state.registry.emit_to_room(
            &Room::Chat(chat.id.clone()),
            &ServerEvent::UserStoppedTyping {
                user_id: sender_id.to_string(),
                chat_id: chat.id.clone(),
            },
            Some(sender_id),
        );
    }

    let reached = fan_out_message(state, &chat, &message);
    tracing::debug!(
        message_id = message.id.as_str(),
        chat_id = chat.id.as_str(),
        sender_id = sender_id,
        connections = reached,
        "Message sent"
    );
    Ok(message)
}

/// Deliver `message_received` to every connection in the chat room, the
/// sender's included. Members with live connections outside the room get
/// it through their private room along with a `notification`. Each
/// connection receives the message at most once. Returns the number of
/// connections reached.
pub fn fan_out_message(state: &AppState, chat: &ChatRecord, message: &Message) -> usize {
    let event = ServerEvent::MessageReceived {
        message: message.clone(),
        chat_id: chat.id.clone(),
    };

    let in_room: HashSet<String> = state
        .registry
        .room_members(&Room::Chat(chat.id.clone()))
        .into_iter()
        .collect();

    let mut reached = in_room
        .iter()
        .filter(|conn| state.registry.send(conn, event.clone()))
        .count();

    for member_id in chat.member_ids() {
        let is_sender = member_id == message.sender.id;
        let outside: Vec<String> = state
            .registry
            .room_members(&Room::User(member_id.clone()))
            .into_iter()
            .filter(|conn| !in_room.contains(conn))
            .collect();

        if outside.is_empty() {
            let reachable = state
                .registry
                .lookup(&member_id)
                .map_or(false, |handle| !handle.is_closed());
            if !is_sender && !reachable {
                tracing::debug!(
                    user_id = member_id.as_str(),
                    message_id = message.id.as_str(),
                    "Recipient offline; push notification not sent"
                );
            }
            continue;
        }

        for conn in &outside {
            if state.registry.send(conn, event.clone()) {
                reached += 1;
            }
            if !is_sender {
                state.registry.send(
                    conn,
                    ServerEvent::Notification {
                        kind: NOTIFICATION_NEW_MESSAGE.to_string(),
                        chat_id: chat.id.clone(),
                        message: message.clone(),
                        sender: message.sender.clone(),
                    },
                );
            }
        }
    }

    reached
}

/// A page of history. `page` counts from 1 (the newest messages).
pub fn list_messages(
    state: &AppState,
    user_id: &str,
    chat_id: &str,
    page: usize,
    limit: usize,
) -> Result<MessagePage> {
    member_chat(state, chat_id, user_id)?;

    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1)
        .checked_mul(limit)
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| Error::Validation("Page out of range".to_string()))?;
    let messages = state.db.list_messages(chat_id, limit, offset)?;

    Ok(MessagePage {
        has_more: messages.len() == limit,
        messages,
        page,
        limit,
    })
}

/// Replace a message's content. Only its sender may, and only within the
/// configured edit window.
pub fn edit_message(state: &AppState, user_id: &str, message_id: &str, content: &str) -> Result<Message> {
    check_content(state, content, false)?;

    let message = load_message(state, message_id)?;
    if message.sender.id != user_id {
        return Err(Error::Forbidden(
            "You can only edit your own messages".to_string(),
        ));
    }
    if message.is_deleted {
        return Err(Error::Validation(
            "Cannot edit a deleted message".to_string(),
        ));
    }

    let window = state.config.edit_window_hours.clamp(0, MAX_CONFIG_HOURS);
    if Utc::now() - message.created_at > Duration::hours(window) {
        return Err(Error::Validation(format!(
            "Messages can only be edited within {} hours",
            window
        )));
    }
    member_chat(state, &message.chat, user_id)?;

    let updated = state
        .db
        .update_message_content(message_id, content)?
        .ok_or_else(Error::message_not_found)?;

    state.registry.emit_to_room(
        &Room::Chat(updated.chat.clone()),
        &ServerEvent::MessageUpdated {
            message: updated.clone(),
            chat_id: updated.chat.clone(),
        },
        None,
    );
    Ok(updated)
}

/// Soft-delete a message. Its sender may, and so may the admin of a group
/// chat.
pub fn delete_message(state: &AppState, user_id: &str, message_id: &str) -> Result<Message> {
    let message = load_message(state, message_id)?;
    let chat = member_chat(state, &message.chat, user_id)?;

    let allowed = message.sender.id == user_id || (chat.is_group && chat.is_admin(user_id));
    if !allowed {
        return Err(Error::Forbidden(
            "You can only delete your own messages".to_string(),
        ));
    }
    if message.is_deleted {
        return Err(Error::Validation("Message is already deleted".to_string()));
    }

    let deleted = state
        .db
        .soft_delete_message(message_id, user_id)?
        .ok_or_else(Error::message_not_found)?;

    state.registry.emit_to_room(
        &Room::Chat(chat.id.clone()),
        &ServerEvent::MessageDeleted {
            message_id: deleted.id.clone(),
            chat_id: chat.id.clone(),
            message: deleted.clone(),
        },
        None,
    );
    tracing::debug!(message_id = message_id, actor_id = user_id, "Message deleted");
    Ok(deleted)
}

/// Set the caller's reaction, replacing any earlier one, and broadcast the
/// full list.
pub fn add_reaction(state: &AppState, user_id: &str, message_id: &str, emoji: &str) -> Result<Message> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(Error::Validation("Emoji is required".to_string()));
    }

    let mut message = load_message(state, message_id)?;
    member_chat(state, &message.chat, user_id)?;
    if message.is_deleted {
        return Err(Error::Validation(
            "Cannot react to a deleted message".to_string(),
        ));
    }

    message.upsert_reaction(user_id, emoji);
    state.db.set_reactions(&message.id, &message.reactions)?;

    state.registry.emit_to_room(
        &Room::Chat(message.chat.clone()),
        &ServerEvent::ReactionAdded {
            message_id: message.id.clone(),
            reactions: message.reactions.clone(),
        },
        None,
    );
    Ok(message)
}

/// Withdraw the caller's reaction, if any, and broadcast the full list.
pub fn remove_reaction(state: &AppState, user_id: &str, message_id: &str) -> Result<Message> {
    let mut message = load_message(state, message_id)?;

    if message.remove_reaction(user_id).is_some() {
        state.db.set_reactions(&message.id, &message.reactions)?;
    }

    state.registry.emit_to_room(
        &Room::Chat(message.chat.clone()),
        &ServerEvent::ReactionRemoved {
            message_id: message.id.clone(),
            reactions: message.reactions.clone(),
        },
        None,
    );
    Ok(message)
}

/// Content search across the caller's chats, or one chat if given.
pub fn search_messages(
    state: &AppState,
    user_id: &str,
    query: &str,
    chat_id: Option<&str>,
) -> Result<Vec<Message>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::Validation("Search query is required".to_string()));
    }
    if let Some(chat_id) = chat_id {
        member_chat(state, chat_id, user_id)?;
    }
    state
        .db
        .search_messages(user_id, query, chat_id, MAX_SEARCH_RESULTS)
}
