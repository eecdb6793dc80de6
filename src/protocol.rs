//! Real-time protocol event definitions.
//!
//! The server speaks JSON-over-WebSocket. Every frame in either direction
//! is `{"event": "<name>", "data": {...}}`. Both directions are closed
//! unions: a frame that doesn't parse into [`ClientEvent`] never reaches a
//! handler.

use serde::{Deserialize, Serialize};

use crate::models::{Chat, Message, MessageType, PublicUser, Reaction};

// ── Client → Server ───────────────────────────────────────────────────────────

/// Events sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe this connection to a chat room and mark the chat read.
    JoinChat(ChatRef),

    /// Unsubscribe this connection from a chat room.
    LeaveChat(ChatRef),

    /// Send a message to a chat.
    SendMessage(SendMessagePayload),

    /// The user started (or is still) typing.
    Typing(ChatRef),

    /// The user stopped typing.
    StopTyping(ChatRef),

    /// Manually set online/offline.
    UserStatusUpdate(StatusPayload),

    /// React to a message (replaces any earlier reaction by the same user).
    AddReaction(ReactionPayload),

    /// Withdraw the user's reaction from a message.
    RemoveReaction(MessageRef),
}

impl ClientEvent {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChat(_) => "join_chat",
            ClientEvent::LeaveChat(_) => "leave_chat",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stop_typing",
            ClientEvent::UserStatusUpdate(_) => "user_status_update",
            ClientEvent::AddReaction(_) => "add_reaction",
            ClientEvent::RemoveReaction(_) => "remove_reaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub content: String,
    pub chat_id: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: String,
    pub emoji: String,
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// `notification.type` for a message delivered outside the chat room.
pub const NOTIFICATION_NEW_MESSAGE: &str = "new_message";

/// Events sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Confirmation of `join_chat`, to the caller only.
    #[serde(rename_all = "camelCase")]
    JoinedChat { chat_id: String },

    /// Confirmation of `leave_chat`, to the caller only.
    #[serde(rename_all = "camelCase")]
    LeftChat { chat_id: String },

    /// A new message, to every member (the sender included).
    #[serde(rename_all = "camelCase")]
    MessageReceived { message: Message, chat_id: String },

    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: String,
        user: PublicUser,
        chat_id: String,
    },

    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { user_id: String, chat_id: String },

    #[serde(rename_all = "camelCase")]
    UserStatusChange {
        user_id: String,
        is_online: bool,
        user: PublicUser,
    },

    /// A message for a member whose connection isn't in the chat room.
    #[serde(rename_all = "camelCase")]
    Notification {
        #[serde(rename = "type")]
        kind: String,
        chat_id: String,
        message: Message,
        sender: PublicUser,
    },

    /// Full reaction list after an add.
    #[serde(rename_all = "camelCase")]
    ReactionAdded {
        message_id: String,
        reactions: Vec<Reaction>,
    },

    /// Full reaction list after a removal.
    #[serde(rename_all = "camelCase")]
    ReactionRemoved {
        message_id: String,
        reactions: Vec<Reaction>,
    },

    #[serde(rename_all = "camelCase")]
    MessageUpdated { message: Message, chat_id: String },

    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: String,
        chat_id: String,
        message: Message,
    },

    /// A chat the recipient belongs to was created or changed.
    ChatUpdated { chat: Chat },

    /// A chat the recipient belonged to is gone (deleted, or they left or
    /// were removed).
    #[serde(rename_all = "camelCase")]
    ChatDeleted { chat_id: String },

    /// Failure of a request made on this connection.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::JoinedChat { .. } => "joined_chat",
            ServerEvent::LeftChat { .. } => "left_chat",
            ServerEvent::MessageReceived { .. } => "message_received",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserStoppedTyping { .. } => "user_stopped_typing",
            ServerEvent::UserStatusChange { .. } => "user_status_change",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::ReactionAdded { .. } => "reaction_added",
            ServerEvent::ReactionRemoved { .. } => "reaction_removed",
            ServerEvent::MessageUpdated { .. } => "message_updated",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::ChatUpdated { .. } => "chat_updated",
            ServerEvent::ChatDeleted { .. } => "chat_deleted",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_chat() {
        let raw = r#"{"event":"join_chat","data":{"chatId":"c1"}}"#;
        let parsed: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::JoinChat(ChatRef {
                chat_id: "c1".into()
            })
        );
    }

    #[test]
    fn test_parse_send_message_defaults() {
        let raw = r#"{"event":"send_message","data":{"chatId":"c1","content":"hi"}}"#;
        match serde_json::from_str::<ClientEvent>(raw).unwrap() {
            ClientEvent::SendMessage(p) => {
                assert_eq!(p.content, "hi");
                assert_eq!(p.message_type, MessageType::Text);
                assert!(p.reply_to.is_none());
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_message_with_reply() {
        let raw = r#"{"event":"send_message","data":{"chatId":"c1","content":"yes","messageType":"text","replyTo":"m9"}}"#;
        match serde_json::from_str::<ClientEvent>(raw).unwrap() {
            ClientEvent::SendMessage(p) => assert_eq!(p.reply_to.as_deref(), Some("m9")),
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_update() {
        let raw = r#"{"event":"user_status_update","data":{"isOnline":false}}"#;
        assert_eq!(
            serde_json::from_str::<ClientEvent>(raw).unwrap(),
            ClientEvent::UserStatusUpdate(StatusPayload { is_online: false })
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = r#"{"event":"delete_everything","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        let raw = r#"{"event":"add_reaction","data":{"messageId":"m1"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_server_event_shapes() {
        let json = serde_json::to_value(ServerEvent::UserStoppedTyping {
            user_id: "u1".into(),
            chat_id: "c1".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"event": "user_stopped_typing", "data": {"userId": "u1", "chatId": "c1"}})
        );

        let json = serde_json::to_value(ServerEvent::error("nope")).unwrap();
        assert_eq!(json, json!({"event": "error", "data": {"message": "nope"}}));

        let json = serde_json::to_value(ServerEvent::ReactionRemoved {
            message_id: "m1".into(),
            reactions: vec![],
        })
        .unwrap();
        assert_eq!(json["data"]["messageId"], "m1");
        assert_eq!(json["data"]["reactions"], json!([]));
    }

    #[test]
    fn test_name_matches_wire_tag() {
        let event = ServerEvent::JoinedChat {
            chat_id: "c1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
    }
}
