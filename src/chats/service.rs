//! Chat membership operations.
//!
//! Every mutation here re-binds live connections to match the new
//! membership and pushes `chat_updated` / `chat_deleted` through the
//! registry, so REST callers and real-time clients see the same state.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{Chat, ChatRecord, PublicUser, UnreadCount, User};
use crate::protocol::ServerEvent;
use crate::registry::Room;
use crate::state::AppState;
use crate::storage::{DirectChat, LeaveOutcome, NewChat};

/// Members a group needs besides its creator.
pub const MIN_GROUP_OTHERS: usize = 2;

const MAX_GROUP_NAME_LEN: usize = 100;

/// Fields an admin may change on a group. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// Public view of a user with `isOnline` reflecting live reachability.
pub fn live_public(state: &AppState, user: &User) -> PublicUser {
    let mut public = user.public();
    public.is_online = user.is_online && state.registry.is_online(&user.id);
    public
}

/// Populate a stored chat for clients: members, latest message, unread
/// counters and the typing users currently live in the tracker.
pub fn hydrate(state: &AppState, record: ChatRecord) -> Result<Chat> {
    let users = state
        .db
        .get_users(&record.member_ids())?
        .iter()
        .map(|u| live_public(state, u))
        .collect();

    let latest_message = match &record.latest_message_id {
        Some(id) => state.db.get_message(id)?,
        None => None,
    };

    let unread_count = record
        .members
        .iter()
        .map(|m| UnreadCount {
            user: m.user_id.clone(),
            count: m.unread_count,
        })
        .collect();

    Ok(Chat {
        typing_users: state.typing.active_in(&record.id),
        id: record.id,
        is_group: record.is_group,
        name: record.name,
        description: record.description,
        avatar: record.avatar,
        admin: record.admin_id,
        users,
        latest_message,
        unread_count,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

/// Load a chat and check `user_id` belongs to it.
pub fn member_chat(state: &AppState, chat_id: &str, user_id: &str) -> Result<ChatRecord> {
    let chat = state
        .db
        .get_chat(chat_id)?
        .ok_or_else(Error::chat_not_found)?;
    if !chat.is_member(user_id) {
        return Err(Error::not_member());
    }
    Ok(chat)
}

fn admin_chat(state: &AppState, chat_id: &str, user_id: &str) -> Result<ChatRecord> {
    let chat = member_chat(state, chat_id, user_id)?;
    if !chat.is_group {
        return Err(Error::Validation(
            "This operation is only available for group chats".to_string(),
        ));
    }
    if !chat.is_admin(user_id) {
        return Err(Error::Forbidden(
            "Only the group admin can do this".to_string(),
        ));
    }
    Ok(chat)
}

/// Push `chat_updated` to every member's private room.
fn notify_members(state: &AppState, chat: &Chat) {
    let event = ServerEvent::ChatUpdated { chat: chat.clone() };
    for user in &chat.users {
        state.registry.emit_to_user(&user.id, &event);
    }
}

fn bind_members(state: &AppState, chat_id: &str, member_ids: &[String]) {
    for member_id in member_ids {
        state
            .registry
            .join_user_connections(member_id, Room::Chat(chat_id.to_string()));
    }
}

// ── Queries ───────────────────────────────────────────────────────────────────

/// The caller's chats, most recently active first.
pub fn list_chats(state: &AppState, user_id: &str) -> Result<Vec<Chat>> {
    state
        .db
        .chats_for_user(user_id)?
        .into_iter()
        .map(|record| hydrate(state, record))
        .collect()
}

pub fn get_chat(state: &AppState, user_id: &str, chat_id: &str) -> Result<Chat> {
    let record = member_chat(state, chat_id, user_id)?;
    hydrate(state, record)
}

// ── Mutations ─────────────────────────────────────────────────────────────────

/// Return the one-on-one chat between the caller and `other_id`, creating
/// it on first contact. Returns the chat and whether it was just created.
pub fn access_direct_chat(state: &AppState, caller: &User, other_id: &str) -> Result<(Chat, bool)> {
    let other_id = other_id.trim();
    if other_id.is_empty() {
        return Err(Error::Validation("userId is required".to_string()));
    }
    if other_id == caller.id {
        return Err(Error::Validation(
            "Cannot start a chat with yourself".to_string(),
        ));
    }

    let other = state
        .db
        .get_user(other_id)?
        .ok_or_else(Error::user_not_found)?;

    let may_create = !(caller.has_blocked(&other.id) || other.has_blocked(&caller.id));
    let record = match state
        .db
        .find_or_create_direct_chat(&caller.id, &other.id, may_create)?
    {
        DirectChat::Existing(record) => return Ok((hydrate(state, record)?, false)),
        DirectChat::Created(record) => record,
        DirectChat::Refused => {
            return Err(Error::Forbidden(
                "Cannot start a chat with this user".to_string(),
            ))
        }
    };
    bind_members(state, &record.id, &record.member_ids());

    let chat = hydrate(state, record)?;
    notify_members(state, &chat);

    tracing::info!(
        chat_id = chat.id.as_str(),
        user_id = caller.id.as_str(),
        other_id = other.id.as_str(),
        "Direct chat created"
    );
    Ok((chat, true))
}

/// Create a group with the caller as admin and first member.
pub fn create_group_chat(
    state: &AppState,
    caller: &User,
    name: &str,
    description: Option<String>,
    user_ids: &[String],
) -> Result<Chat> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("Group name is required".to_string()));
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(Error::Validation(format!(
            "Group name must be at most {} characters",
            MAX_GROUP_NAME_LEN
        )));
    }

    let mut seen = HashSet::new();
    let others: Vec<String> = user_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && *id != caller.id && seen.insert(id.clone()))
        .collect();

    if others.len() < MIN_GROUP_OTHERS {
        return Err(Error::Validation(format!(
            "A group chat needs at least {} other members",
            MIN_GROUP_OTHERS
        )));
    }
    if state.db.get_users(&others)?.len() != others.len() {
        return Err(Error::user_not_found());
    }

    let mut member_ids = Vec::with_capacity(others.len() + 1);
    member_ids.push(caller.id.clone());
    member_ids.extend(others);

    let record = state.db.create_chat(&NewChat {
        is_group: true,
        name: Some(name.to_string()),
        description: description.filter(|d| !d.trim().is_empty()),
        avatar: None,
        admin_id: Some(caller.id.clone()),
        member_ids: member_ids.clone(),
    })?;
    bind_members(state, &record.id, &member_ids);

    let chat = hydrate(state, record)?;
    notify_members(state, &chat);

    tracing::info!(
        chat_id = chat.id.as_str(),
        admin_id = caller.id.as_str(),
        members = member_ids.len(),
        "Group chat created"
    );
    Ok(chat)
}

pub fn update_group(
    state: &AppState,
    caller_id: &str,
    chat_id: &str,
    update: GroupUpdate,
) -> Result<Chat> {
    admin_chat(state, chat_id, caller_id)?;

    let name = update.name.as_deref().map(str::trim);
    if let Some(name) = name {
        if name.is_empty() {
            return Err(Error::Validation("Group name cannot be empty".to_string()));
        }
        if name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(Error::Validation(format!(
                "Group name must be at most {} characters",
                MAX_GROUP_NAME_LEN
            )));
        }
    }

    let record = state
        .db
        .update_group_details(
            chat_id,
            name,
            update.description.as_deref(),
            update.avatar.as_deref(),
        )?
        .ok_or_else(Error::chat_not_found)?;

    let chat = hydrate(state, record)?;
    notify_members(state, &chat);
    Ok(chat)
}

pub fn add_member(state: &AppState, caller_id: &str, chat_id: &str, user_id: &str) -> Result<Chat> {
    admin_chat(state, chat_id, caller_id)?;

    let user = state
        .db
        .get_user(user_id)?
        .ok_or_else(Error::user_not_found)?;
    if !state.db.add_member(chat_id, &user.id)? {
        return Err(Error::Validation(
            "User is already a member of this chat".to_string(),
        ));
    }
    bind_members(state, chat_id, std::slice::from_ref(&user.id));

    let record = state
        .db
        .get_chat(chat_id)?
        .ok_or_else(Error::chat_not_found)?;
    let chat = hydrate(state, record)?;
    notify_members(state, &chat);

    tracing::info!(chat_id = chat_id, user_id = user.id.as_str(), "Member added");
    Ok(chat)
}

/// Admin removes another member. Returns the chat afterwards, or None if
/// it was removed with its last member.
pub fn remove_member(
    state: &AppState,
    caller_id: &str,
    chat_id: &str,
    user_id: &str,
) -> Result<Option<Chat>> {
    let chat = admin_chat(state, chat_id, caller_id)?;
    if !chat.is_member(user_id) {
        return Err(Error::NotFound(
            "User is not a member of this chat".to_string(),
        ));
    }
    depart(state, &chat, user_id)
}

/// The caller leaves a group. Returns the chat afterwards, or None if it
/// was removed because nobody is left.
pub fn leave_chat(state: &AppState, user_id: &str, chat_id: &str) -> Result<Option<Chat>> {
    let chat = member_chat(state, chat_id, user_id)?;
    if !chat.is_group {
        return Err(Error::Validation(
            "Cannot leave a one-on-one chat".to_string(),
        ));
    }
    depart(state, &chat, user_id)
}

/// Remove `user_id` from `chat` and bring everyone's live state in line.
fn depart(state: &AppState, chat: &ChatRecord, user_id: &str) -> Result<Option<Chat>> {
    let outcome = state.db.remove_member(&chat.id, user_id)?;
    if outcome == LeaveOutcome::NotMember {
        return Err(Error::not_member());
    }
    let room = Room::Chat(chat.id.clone());

    if state.typing.stop(&chat.id, user_id) {
        state.registry.emit_to_room(
            &room,
            &ServerEvent::UserStoppedTyping {
                user_id: user_id.to_string(),
                chat_id: chat.id.clone(),
            },
            Some(user_id),
        );
    }
    state.registry.leave_user_connections(user_id, &room);
    state.registry.emit_to_user(
        user_id,
        &ServerEvent::ChatDeleted {
            chat_id: chat.id.clone(),
        },
    );

    match outcome {
        LeaveOutcome::Deleted => {
            state.typing.clear_chat(&chat.id);
            tracing::info!(chat_id = chat.id.as_str(), "Chat removed with its last member");
            Ok(None)
        }
        _ => {
            if let LeaveOutcome::AdminReassigned(ref admin_id) = outcome {
                tracing::info!(
                    chat_id = chat.id.as_str(),
                    admin_id = admin_id.as_str(),
                    "Admin role reassigned"
                );
            }
            let record = state
                .db
                .get_chat(&chat.id)?
                .ok_or_else(Error::chat_not_found)?;
            let updated = hydrate(state, record)?;
            notify_members(state, &updated);
            Ok(Some(updated))
        }
    }
}

/// Admin deletes a chat together with all of its messages.
pub fn delete_chat(state: &AppState, caller_id: &str, chat_id: &str) -> Result<()> {
    let chat = member_chat(state, chat_id, caller_id)?;
    if !chat.is_admin(caller_id) {
        return Err(Error::Forbidden(
            "Only the group admin can delete this chat".to_string(),
        ));
    }

    state.db.delete_chat(chat_id)?;
    state.typing.clear_chat(chat_id);

    let event = ServerEvent::ChatDeleted {
        chat_id: chat_id.to_string(),
    };
    let room = Room::Chat(chat_id.to_string());
    for member_id in chat.member_ids() {
        state.registry.emit_to_user(&member_id, &event);
        state.registry.leave_user_connections(&member_id, &room);
    }

    tracing::info!(chat_id = chat_id, admin_id = caller_id, "Chat deleted");
    Ok(())
}

/// Zero the caller's unread counter and add read receipts. Returns how
/// many messages were newly marked read.
pub fn mark_chat_read(state: &AppState, user_id: &str, chat_id: &str) -> Result<usize> {
    member_chat(state, chat_id, user_id)?;
    state.db.reset_unread(chat_id, user_id)?;
    state.db.mark_chat_read(chat_id, user_id)
}
