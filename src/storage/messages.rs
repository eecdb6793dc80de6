//! Message records, read receipts and reactions.

use chrono::Utc;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{contains_pattern, json_column, Database};
use crate::error::{Error, Result};
use crate::models::{
    from_millis, to_millis, Attachment, Message, MessageType, PublicUser, Reaction, ReadReceipt,
    ReplyPreview, DELETED_MESSAGE_PLACEHOLDER,
};

/// Fields for a message about to be sent.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<String>,
}

const MESSAGE_SELECT: &str = "SELECT
        m.id, m.chat_id, m.content, m.message_type, m.attachment, m.read_by, m.reactions,
        m.is_edited, m.edited_at, m.is_deleted, m.deleted_at, m.deleted_by,
        m.created_at, m.updated_at,
        u.id, u.name, u.email, u.avatar, u.is_online, u.last_seen,
        r.id, r.content, r.sender_id
    FROM messages m
    JOIN users u ON u.id = m.sender_id
    LEFT JOIN messages r ON r.id = m.reply_to";

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let message_type: String = row.get(3)?;
    let message_type = MessageType::parse(&message_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown message type '{}'", message_type).into(),
        )
    })?;
    let attachment: Option<String> = row.get(4)?;
    let read_by: String = row.get(5)?;
    let reactions: String = row.get(6)?;
    let reply_id: Option<String> = row.get(20)?;

    let reply_to = match reply_id {
        Some(id) => Some(ReplyPreview {
            id,
            content: row.get(21)?,
            sender: row.get(22)?,
        }),
        None => None,
    };

    Ok(Message {
        id: row.get(0)?,
        chat: row.get(1)?,
        content: row.get(2)?,
        message_type,
        attachment: match attachment {
            Some(raw) => Some(json_column(&raw, 4)?),
            None => None,
        },
        read_by: json_column(&read_by, 5)?,
        reactions: json_column(&reactions, 6)?,
        is_edited: row.get(7)?,
        edited_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
        is_deleted: row.get(9)?,
        deleted_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
        deleted_by: row.get(11)?,
        created_at: from_millis(row.get(12)?),
        updated_at: from_millis(row.get(13)?),
        sender: PublicUser {
            id: row.get(14)?,
            name: row.get(15)?,
            email: row.get(16)?,
            avatar: row.get(17)?,
            is_online: row.get(18)?,
            last_seen: from_millis(row.get(19)?),
        },
        reply_to,
    })
}

fn load_message(conn: &Connection, id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("{} WHERE m.id = ?", MESSAGE_SELECT),
        params![id],
        message_from_row,
    )
    .optional()
}

impl Database {
    // ========================================================================
    // MESSAGE OPERATIONS
    // ========================================================================

    /// Persist a new message, point the chat's latest-message at it and bump
    /// every other member's unread counter, all in one transaction.
    pub fn insert_message(&self, new_message: &NewMessage) -> Result<Message> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = to_millis(Utc::now());
        let id = Uuid::new_v4().to_string();
        let attachment = match &new_message.attachment {
            Some(a) => Some(serde_json::to_string(a)?),
            None => None,
        };

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, message_type, attachment,
                                   reply_to, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                new_message.chat_id,
                new_message.sender_id,
                new_message.content,
                new_message.message_type.as_str(),
                attachment,
                new_message.reply_to,
                now,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE chats SET latest_message_id = ?, updated_at = ? WHERE id = ?",
            params![id, now, new_message.chat_id],
        )?;
        tx.execute(
            "UPDATE chat_members SET unread_count = unread_count + 1
             WHERE chat_id = ? AND user_id != ?",
            params![new_message.chat_id, new_message.sender_id],
        )?;

        let message = load_message(&tx, &id)?;
        tx.commit()?;

        message.ok_or_else(|| Error::Internal("inserted message vanished".to_string()))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        Ok(load_message(&conn, id)?)
    }

    /// A page of a chat's history. Page 0 is the newest; each page is
    /// returned oldest first.
    pub fn list_messages(&self, chat_id: &str, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE m.chat_id = ? ORDER BY m.created_at DESC, m.rowid DESC LIMIT ? OFFSET ?",
            MESSAGE_SELECT
        ))?;
        let mut messages = stmt
            .query_map(
                params![chat_id, limit as i64, offset as i64],
                message_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Replace the content and mark the message edited.
    pub fn update_message_content(&self, id: &str, content: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        let now = to_millis(Utc::now());
        conn.execute(
            "UPDATE messages SET content = ?, is_edited = 1, edited_at = ?, updated_at = ?
             WHERE id = ?",
            params![content, now, now, id],
        )?;
        Ok(load_message(&conn, id)?)
    }

    /// Soft-delete: content becomes the placeholder, reactions are dropped,
    /// and who deleted it is recorded.
    pub fn soft_delete_message(&self, id: &str, actor_id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        let now = to_millis(Utc::now());
        conn.execute(
            "UPDATE messages SET content = ?, attachment = NULL, reactions = '[]', is_deleted = 1,
             deleted_at = ?, deleted_by = ?, updated_at = ? WHERE id = ?",
            params![DELETED_MESSAGE_PLACEHOLDER, now, actor_id, now, id],
        )?;
        Ok(load_message(&conn, id)?)
    }

    #[cfg(test)]
    pub(crate) fn backdate_message(&self, id: &str, created_at_ms: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE messages SET created_at = ?, updated_at = ? WHERE id = ?",
            params![created_at_ms, created_at_ms, id],
        )?;
        Ok(())
    }

    pub fn set_reactions(&self, id: &str, reactions: &[Reaction]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE messages SET reactions = ?, updated_at = ? WHERE id = ?",
            params![serde_json::to_string(reactions)?, to_millis(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Add a read receipt for `user_id` to every message in the chat they
    /// didn't send and haven't read yet. Returns how many were marked.
    pub fn mark_chat_read(&self, chat_id: &str, user_id: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let unread: Vec<(String, Vec<ReadReceipt>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, read_by FROM messages WHERE chat_id = ? AND sender_id != ?",
            )?;
            let rows = stmt
                .query_map(params![chat_id, user_id], |row| {
                    let raw: String = row.get(1)?;
                    Ok((row.get::<_, String>(0)?, json_column::<Vec<ReadReceipt>>(&raw, 1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .filter(|(_, receipts)| !receipts.iter().any(|r| r.user == user_id))
                .collect()
        };

        let read_at = Utc::now();
        for (id, mut receipts) in unread.iter().cloned() {
            receipts.push(ReadReceipt {
                user: user_id.to_string(),
                read_at,
            });
            tx.execute(
                "UPDATE messages SET read_by = ? WHERE id = ?",
                params![serde_json::to_string(&receipts)?, id],
            )?;
        }

        tx.commit()?;
        Ok(unread.len())
    }

    /// Content search across the chats `user_id` belongs to, newest first.
    /// Deleted messages are excluded.
    pub fn search_messages(
        &self,
        user_id: &str,
        query: &str,
        chat_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let pattern = contains_pattern(query);
        let mut stmt = conn.prepare(&format!(
            "{} WHERE m.chat_id IN (SELECT chat_id FROM chat_members WHERE user_id = ?1)
               AND (?2 IS NULL OR m.chat_id = ?2)
               AND m.is_deleted = 0
               AND LOWER(m.content) LIKE ?3 ESCAPE '\\'
             ORDER BY m.created_at DESC LIMIT ?4",
            MESSAGE_SELECT
        ))?;
        let messages = stmt
            .query_map(
                params![user_id, chat_id, pattern, limit as i64],
                message_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewChat;

    struct Fixture {
        db: Database,
        users: Vec<String>,
        chat_id: String,
    }

    fn setup() -> Fixture {
        let db = Database::open(None).unwrap();
        let users: Vec<String> = ["A", "B", "C"]
            .iter()
            .map(|n| {
                db.create_user(n, &format!("{}@example.com", n.to_lowercase()), "h")
                    .unwrap()
                    .id
            })
            .collect();
        let chat = db
            .create_chat(&NewChat {
                is_group: true,
                name: Some("Team".into()),
                description: None,
                avatar: None,
                admin_id: Some(users[0].clone()),
                member_ids: users.clone(),
            })
            .unwrap();
        Fixture {
            db,
            users,
            chat_id: chat.id,
        }
    }

    fn text(f: &Fixture, sender: usize, content: &str) -> NewMessage {
        NewMessage {
            chat_id: f.chat_id.clone(),
            sender_id: f.users[sender].clone(),
            content: content.to_string(),
            message_type: MessageType::Text,
            attachment: None,
            reply_to: None,
        }
    }

    #[test]
    fn test_insert_updates_latest_and_unread() {
        let f = setup();
        let msg = f.db.insert_message(&text(&f, 0, "hi")).unwrap();
        assert_eq!(msg.sender.name, "A");
        assert_eq!(msg.content, "hi");

        let chat = f.db.get_chat(&f.chat_id).unwrap().unwrap();
        assert_eq!(chat.latest_message_id.as_deref(), Some(msg.id.as_str()));
        assert_eq!(chat.unread_for(&f.users[0]), Some(0));
        assert_eq!(chat.unread_for(&f.users[1]), Some(1));
        assert_eq!(chat.unread_for(&f.users[2]), Some(1));
    }

    #[test]
    fn test_reply_preview_populated() {
        let f = setup();
        let original = f.db.insert_message(&text(&f, 0, "question?")).unwrap();
        let mut reply = text(&f, 1, "answer");
        reply.reply_to = Some(original.id.clone());
        let reply = f.db.insert_message(&reply).unwrap();

        let preview = reply.reply_to.unwrap();
        assert_eq!(preview.id, original.id);
        assert_eq!(preview.content, "question?");
        assert_eq!(preview.sender, f.users[0]);
    }

    #[test]
    fn test_list_messages_pages_newest_first() {
        let f = setup();
        for i in 0..5 {
            f.db.insert_message(&text(&f, 0, &format!("m{}", i))).unwrap();
        }
        let newest = f.db.list_messages(&f.chat_id, 2, 0).unwrap();
        let contents: Vec<_> = newest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        let older = f.db.list_messages(&f.chat_id, 2, 2).unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[test]
    fn test_soft_delete_replaces_content() {
        let f = setup();
        let msg = f.db.insert_message(&text(&f, 0, "secret")).unwrap();
        f.db.set_reactions(
            &msg.id,
            &[Reaction {
                user: f.users[1].clone(),
                emoji: "👍".into(),
            }],
        )
        .unwrap();

        let deleted = f.db.soft_delete_message(&msg.id, &f.users[0]).unwrap().unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(deleted.content, DELETED_MESSAGE_PLACEHOLDER);
        assert_eq!(deleted.deleted_by.as_deref(), Some(f.users[0].as_str()));
        assert!(deleted.reactions.is_empty());
    }

    #[test]
    fn test_mark_chat_read_skips_own_and_already_read() {
        let f = setup();
        f.db.insert_message(&text(&f, 0, "one")).unwrap();
        f.db.insert_message(&text(&f, 1, "two")).unwrap();

        assert_eq!(f.db.mark_chat_read(&f.chat_id, &f.users[1]).unwrap(), 1);
        assert_eq!(f.db.mark_chat_read(&f.chat_id, &f.users[1]).unwrap(), 0);
        assert_eq!(f.db.mark_chat_read(&f.chat_id, &f.users[2]).unwrap(), 2);
    }

    #[test]
    fn test_search_messages_scoped_to_membership() {
        let f = setup();
        f.db.insert_message(&text(&f, 0, "Lunch at noon?")).unwrap();
        f.db.insert_message(&text(&f, 1, "sure")).unwrap();
        let outsider = f.db.create_user("D", "d@example.com", "h").unwrap();

        let hits = f.db.search_messages(&f.users[2], "LUNCH", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(f.db.search_messages(&outsider.id, "lunch", None, 10).unwrap().is_empty());
        assert!(f
            .db
            .search_messages(&f.users[2], "lunch", Some("other-chat"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_messages_matches_wildcards_literally() {
        let f = setup();
        f.db.insert_message(&text(&f, 0, "Prices cut 50% today")).unwrap();
        f.db.insert_message(&text(&f, 1, "see you at 5")).unwrap();

        let hits = f.db.search_messages(&f.users[0], "50%", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(f.db.search_messages(&f.users[0], "%", None, 10).unwrap().len(), 1);
        assert!(f.db.search_messages(&f.users[0], "_", None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_chat_cascades_messages() {
        let f = setup();
        let msg = f.db.insert_message(&text(&f, 0, "bye")).unwrap();
        assert!(f.db.delete_chat(&f.chat_id).unwrap());
        assert!(f.db.get_message(&msg.id).unwrap().is_none());
    }
}
