//! Persisted entities and the JSON views handed to clients.
//!
//! Records use `_id` for identity and camelCase fields on the wire so REST
//! and real-time clients see the same shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder that replaces the content of a soft-deleted message.
pub const DELETED_MESSAGE_PLACEHOLDER: &str = "This message was deleted";

// ── Users ─────────────────────────────────────────────────────────────────────

/// A registered user as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    /// Connection id of the active real-time connection, if any.
    pub socket_id: Option<String>,
    pub blocked_users: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }

    pub fn has_blocked(&self, user_id: &str) -> bool {
        self.blocked_users.iter().any(|b| b == user_id)
    }
}

/// The part of a user other users may see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

// ── Chats ─────────────────────────────────────────────────────────────────────

/// A chat member row: membership and the member's unread counter live
/// together, so one can't exist without the other.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMember {
    pub user_id: String,
    pub unread_count: i64,
}

/// A chat as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: Option<String>,
    pub latest_message_id: Option<String>,
    /// Members in join order.
    pub members: Vec<ChatMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id.as_deref() == Some(user_id)
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }

    pub fn unread_for(&self, user_id: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.unread_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub user: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub user: String,
    pub started_at: DateTime<Utc>,
}

/// A chat as handed to clients: members populated, latest message
/// attached, and live presence/typing state folded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub admin: Option<String>,
    pub users: Vec<PublicUser>,
    pub latest_message: Option<Message>,
    pub unread_count: Vec<UnreadCount>,
    pub typing_users: Vec<TypingUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "file" => Some(MessageType::File),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user: String,
    pub read_at: DateTime<Utc>,
}

/// At most one per (message, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user: String,
    pub emoji: String,
}

/// Enough of the replied-to message to render a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: PublicUser,
    pub chat: String,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<ReplyPreview>,
    pub read_by: Vec<ReadReceipt>,
    pub reactions: Vec<Reaction>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Insert or replace `user_id`'s reaction. Returns the previous emoji.
    pub fn upsert_reaction(&mut self, user_id: &str, emoji: &str) -> Option<String> {
        let previous = self.remove_reaction(user_id);
        self.reactions.push(Reaction {
            user: user_id.to_string(),
            emoji: emoji.to_string(),
        });
        previous
    }

    /// Drop `user_id`'s reaction, if any. Returns the removed emoji.
    pub fn remove_reaction(&mut self, user_id: &str) -> Option<String> {
        let idx = self.reactions.iter().position(|r| r.user == user_id)?;
        Some(self.reactions.remove(idx).emoji)
    }
}

// ── Time helpers ──────────────────────────────────────────────────────────────

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let now = Utc::now();
        Message {
            id: "m1".into(),
            sender: PublicUser {
                id: "u1".into(),
                name: "Alice".into(),
                email: "alice@example.com".into(),
                avatar: None,
                is_online: true,
                last_seen: now,
            },
            chat: "c1".into(),
            content: "hi".into(),
            message_type: MessageType::Text,
            attachment: None,
            reply_to: None,
            read_by: vec![],
            reactions: vec![],
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reaction_replaces_previous() {
        let mut msg = sample_message();
        assert_eq!(msg.upsert_reaction("u2", "👍"), None);
        assert_eq!(msg.upsert_reaction("u2", "🎉"), Some("👍".to_string()));
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions[0].emoji, "🎉");
    }

    #[test]
    fn test_remove_reaction_only_touches_caller() {
        let mut msg = sample_message();
        msg.upsert_reaction("u2", "👍");
        msg.upsert_reaction("u3", "❤️");
        assert_eq!(msg.remove_reaction("u2"), Some("👍".to_string()));
        assert_eq!(msg.remove_reaction("u2"), None);
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions[0].user, "u3");
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_value(sample_message()).unwrap();
        assert_eq!(json["_id"], "m1");
        assert_eq!(json["messageType"], "text");
        assert_eq!(json["sender"]["name"], "Alice");
        assert_eq!(json["sender"]["isOnline"], true);
        assert!(json["replyTo"].is_null());
        assert_eq!(json["isDeleted"], false);
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!(MessageType::parse("image"), Some(MessageType::Image));
        assert_eq!(MessageType::parse("video"), None);
        assert_eq!(MessageType::System.as_str(), "system");
    }
}
