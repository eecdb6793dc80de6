//! Chat records, membership and unread counters.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{from_millis, to_millis, ChatMember, ChatRecord};

/// Fields for a chat about to be created.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: Option<String>,
    /// Members in join order; must be unique.
    pub member_ids: Vec<String>,
}

/// What happened when a member left (or was removed from) a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The user wasn't a member.
    NotMember,
    /// The user left; the chat and its admin are unchanged.
    Left,
    /// The admin left and the role moved to this member.
    AdminReassigned(String),
    /// The last member left and the chat was removed with its messages.
    Deleted,
}

/// Outcome of looking up a one-on-one chat.
#[derive(Debug, Clone)]
pub enum DirectChat {
    Existing(ChatRecord),
    Created(ChatRecord),
    /// None exists and creating one was not allowed.
    Refused,
}

const CHAT_COLUMNS: &str =
    "id, is_group, name, description, avatar, admin_id, latest_message_id, created_at, updated_at";

fn chat_from_row(row: &Row) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        id: row.get(0)?,
        is_group: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        avatar: row.get(4)?,
        admin_id: row.get(5)?,
        latest_message_id: row.get(6)?,
        members: Vec::new(),
        created_at: from_millis(row.get(7)?),
        updated_at: from_millis(row.get(8)?),
    })
}

fn load_members(conn: &Connection, chat_id: &str) -> rusqlite::Result<Vec<ChatMember>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, unread_count FROM chat_members WHERE chat_id = ? ORDER BY position",
    )?;
    let members = stmt
        .query_map(params![chat_id], |row| {
            Ok(ChatMember {
                user_id: row.get(0)?,
                unread_count: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

fn load_chat(conn: &Connection, chat_id: &str) -> rusqlite::Result<Option<ChatRecord>> {
    let chat = conn
        .query_row(
            &format!("SELECT {} FROM chats WHERE id = ?", CHAT_COLUMNS),
            params![chat_id],
            chat_from_row,
        )
        .optional()?;

    match chat {
        Some(mut chat) => {
            chat.members = load_members(conn, chat_id)?;
            Ok(Some(chat))
        }
        None => Ok(None),
    }
}

fn delete_chat_rows(conn: &Connection, chat_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM messages WHERE chat_id = ?", params![chat_id])?;
    conn.execute("DELETE FROM chat_members WHERE chat_id = ?", params![chat_id])?;
    conn.execute("DELETE FROM chats WHERE id = ?", params![chat_id])
}

fn insert_chat(conn: &Connection, new_chat: &NewChat) -> rusqlite::Result<String> {
    let now = to_millis(Utc::now());
    let id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO chats (id, is_group, name, description, avatar, admin_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            new_chat.is_group,
            new_chat.name,
            new_chat.description,
            new_chat.avatar,
            new_chat.admin_id,
            now,
            now,
        ],
    )?;

    for (position, user_id) in new_chat.member_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO chat_members (chat_id, user_id, position, unread_count, joined_at)
             VALUES (?, ?, ?, 0, ?)",
            params![id, user_id, position as i64, now],
        )?;
    }
    Ok(id)
}

/// The one-on-one chat whose member set is exactly `{a, b}`.
fn direct_chat_id(conn: &Connection, a: &str, b: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT c.id FROM chats c
         WHERE c.is_group = 0
           AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = ?1)
           AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = ?2)
           AND (SELECT COUNT(*) FROM chat_members m WHERE m.chat_id = c.id) = 2
         ORDER BY c.created_at
         LIMIT 1",
        params![a, b],
        |row| row.get(0),
    )
    .optional()
}

impl Database {
    // ========================================================================
    // CHAT OPERATIONS
    // ========================================================================

    /// Create a chat with its members, each starting at zero unread.
    pub fn create_chat(&self, new_chat: &NewChat) -> Result<ChatRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = insert_chat(&tx, new_chat)?;
        let chat = load_chat(&tx, &id)?;
        tx.commit()?;

        chat.ok_or_else(|| Error::Internal("created chat vanished".to_string()))
    }

    /// The one-on-one chat between `a` and `b`, created if absent and
    /// `may_create` allows it. Lookup and insert share one transaction, so
    /// two concurrent requests for the same pair end up with one chat.
    pub fn find_or_create_direct_chat(&self, a: &str, b: &str, may_create: bool) -> Result<DirectChat> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let (id, created) = match direct_chat_id(&tx, a, b)? {
            Some(id) => (id, false),
            None if !may_create => return Ok(DirectChat::Refused),
            None => {
                let new_chat = NewChat {
                    is_group: false,
                    name: None,
                    description: None,
                    avatar: None,
                    admin_id: None,
                    member_ids: vec![a.to_string(), b.to_string()],
                };
                (insert_chat(&tx, &new_chat)?, true)
            }
        };

        let chat = load_chat(&tx, &id)?
            .ok_or_else(|| Error::Internal("direct chat vanished".to_string()))?;
        tx.commit()?;

        Ok(if created {
            DirectChat::Created(chat)
        } else {
            DirectChat::Existing(chat)
        })
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        let conn = self.conn.lock();
        Ok(load_chat(&conn, chat_id)?)
    }

    /// All chats `user_id` belongs to, most recently active first.
    pub fn chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chats
             WHERE id IN (SELECT chat_id FROM chat_members WHERE user_id = ?)
             ORDER BY updated_at DESC",
            CHAT_COLUMNS
        ))?;
        let mut chats = stmt
            .query_map(params![user_id], chat_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for chat in &mut chats {
            chat.members = load_members(&conn, &chat.id)?;
        }
        Ok(chats)
    }

    pub fn chat_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chat_id FROM chat_members WHERE user_id = ?")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Zero `user_id`'s unread counter. Returns false if not a member.
    pub fn reset_unread(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE chat_members SET unread_count = 0 WHERE chat_id = ? AND user_id = ?",
            params![chat_id, user_id],
        )?;
        Ok(updated > 0)
    }

    pub fn update_group_details(
        &self,
        chat_id: &str,
        name: Option<&str>,
        description: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<ChatRecord>> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE chats SET name = COALESCE(?, name), description = COALESCE(?, description),
             avatar = COALESCE(?, avatar), updated_at = ? WHERE id = ?",
            params![name, description, avatar, to_millis(Utc::now()), chat_id],
        )?;
        Ok(load_chat(&conn, chat_id)?)
    }

    /// Append a member at the end of the join order. Returns false if
    /// they were already a member.
    pub fn add_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let now = to_millis(Utc::now());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, position, unread_count, joined_at)
             VALUES (?1, ?2,
                     (SELECT COALESCE(MAX(position), -1) + 1 FROM chat_members WHERE chat_id = ?1),
                     0, ?3)",
            params![chat_id, user_id, now],
        )?;
        if inserted > 0 {
            conn.execute(
                "UPDATE chats SET updated_at = ? WHERE id = ?",
                params![now, chat_id],
            )?;
        }
        Ok(inserted > 0)
    }

    /// Remove a member, keeping the admin invariant: the admin role moves to
    /// the earliest-joined remaining member, and an emptied chat is removed
    /// together with its messages.
    pub fn remove_member(&self, chat_id: &str, user_id: &str) -> Result<LeaveOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM chat_members WHERE chat_id = ? AND user_id = ?",
            params![chat_id, user_id],
        )?;
        if removed == 0 {
            return Ok(LeaveOutcome::NotMember);
        }

        let remaining = load_members(&tx, chat_id)?;
        let outcome = if remaining.is_empty() {
            delete_chat_rows(&tx, chat_id)?;
            LeaveOutcome::Deleted
        } else {
            let admin: Option<String> = tx
                .query_row(
                    "SELECT admin_id FROM chats WHERE id = ?",
                    params![chat_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let now = to_millis(Utc::now());
            if admin.as_deref() == Some(user_id) {
                let successor = remaining[0].user_id.clone();
                tx.execute(
                    "UPDATE chats SET admin_id = ?, updated_at = ? WHERE id = ?",
                    params![successor, now, chat_id],
                )?;
                LeaveOutcome::AdminReassigned(successor)
            } else {
                tx.execute(
                    "UPDATE chats SET updated_at = ? WHERE id = ?",
                    params![now, chat_id],
                )?;
                LeaveOutcome::Left
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Delete a chat, its membership rows and all of its messages.
    pub fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let deleted = delete_chat_rows(&tx, chat_id)?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, Vec<String>) {
        let db = Database::open(None).unwrap();
        let ids = ["A", "B", "C"]
            .iter()
            .map(|n| {
                db.create_user(n, &format!("{}@example.com", n.to_lowercase()), "h")
                    .unwrap()
                    .id
            })
            .collect();
        (db, ids)
    }

    fn direct(a: &str, b: &str) -> NewChat {
        NewChat {
            is_group: false,
            name: None,
            description: None,
            avatar: None,
            admin_id: None,
            member_ids: vec![a.to_string(), b.to_string()],
        }
    }

    fn group(admin: &str, members: &[String]) -> NewChat {
        NewChat {
            is_group: true,
            name: Some("Team".into()),
            description: None,
            avatar: None,
            admin_id: Some(admin.to_string()),
            member_ids: members.to_vec(),
        }
    }

    #[test]
    fn test_direct_chat_found_in_either_order() {
        let (db, u) = setup();
        let chat = match db.find_or_create_direct_chat(&u[0], &u[1], true).unwrap() {
            DirectChat::Created(chat) => chat,
            other => panic!("expected a new chat, got {:?}", other),
        };
        assert_eq!(chat.member_ids(), vec![u[0].clone(), u[1].clone()]);

        match db.find_or_create_direct_chat(&u[1], &u[0], true).unwrap() {
            DirectChat::Existing(found) => assert_eq!(found.id, chat.id),
            other => panic!("expected the existing chat, got {:?}", other),
        }
        // An existing chat is returned even when creating is not allowed.
        assert!(matches!(
            db.find_or_create_direct_chat(&u[0], &u[1], false).unwrap(),
            DirectChat::Existing(_)
        ));
        assert!(matches!(
            db.find_or_create_direct_chat(&u[0], &u[2], false).unwrap(),
            DirectChat::Refused
        ));
    }

    #[test]
    fn test_group_with_same_pair_is_not_direct() {
        let (db, u) = setup();
        let team = db.create_chat(&group(&u[0], &u)).unwrap();
        match db.find_or_create_direct_chat(&u[0], &u[1], true).unwrap() {
            DirectChat::Created(chat) => assert_ne!(chat.id, team.id),
            other => panic!("expected a new chat, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_direct_requests_share_one_chat() {
        let (db, u) = setup();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                let (a, b) = if i % 2 == 0 {
                    (u[0].clone(), u[1].clone())
                } else {
                    (u[1].clone(), u[0].clone())
                };
                std::thread::spawn(move || match db.find_or_create_direct_chat(&a, &b, true).unwrap() {
                    DirectChat::Existing(chat) | DirectChat::Created(chat) => chat.id,
                    DirectChat::Refused => panic!("creation was allowed"),
                })
            })
            .collect();

        let ids: std::collections::HashSet<String> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.chats_for_user(&u[0]).unwrap().len(), 1);
    }

    #[test]
    fn test_members_have_unread_entries() {
        let (db, u) = setup();
        let chat = db.create_chat(&group(&u[0], &u)).unwrap();
        assert_eq!(chat.members.len(), 3);
        assert!(chat.members.iter().all(|m| m.unread_count == 0));
        assert_eq!(chat.member_ids(), u);
    }

    #[test]
    fn test_admin_leaves_reassigns_to_first_remaining() {
        let (db, u) = setup();
        let chat = db.create_chat(&group(&u[0], &u)).unwrap();

        let outcome = db.remove_member(&chat.id, &u[0]).unwrap();
        assert_eq!(outcome, LeaveOutcome::AdminReassigned(u[1].clone()));

        let chat = db.get_chat(&chat.id).unwrap().unwrap();
        assert_eq!(chat.admin_id.as_deref(), Some(u[1].as_str()));
        assert_eq!(chat.members.len(), 2);
    }

    #[test]
    fn test_last_member_leaving_deletes_chat() {
        let (db, u) = setup();
        let chat = db.create_chat(&group(&u[0], &u)).unwrap();

        assert_eq!(db.remove_member(&chat.id, &u[1]).unwrap(), LeaveOutcome::Left);
        assert_eq!(
            db.remove_member(&chat.id, &u[0]).unwrap(),
            LeaveOutcome::AdminReassigned(u[2].clone())
        );
        assert_eq!(db.remove_member(&chat.id, &u[2]).unwrap(), LeaveOutcome::Deleted);
        assert!(db.get_chat(&chat.id).unwrap().is_none());
        assert_eq!(db.remove_member(&chat.id, &u[2]).unwrap(), LeaveOutcome::NotMember);
    }

    #[test]
    fn test_add_member_appends_once() {
        let (db, u) = setup();
        let chat = db.create_chat(&direct(&u[0], &u[1])).unwrap();
        assert!(db.add_member(&chat.id, &u[2]).unwrap());
        assert!(!db.add_member(&chat.id, &u[2]).unwrap());
        let chat = db.get_chat(&chat.id).unwrap().unwrap();
        assert_eq!(chat.member_ids(), u);
    }

    #[test]
    fn test_chats_for_user() {
        let (db, u) = setup();
        db.create_chat(&direct(&u[0], &u[1])).unwrap();
        db.create_chat(&group(&u[0], &u)).unwrap();
        assert_eq!(db.chats_for_user(&u[0]).unwrap().len(), 2);
        assert_eq!(db.chat_ids_for_user(&u[2]).unwrap().len(), 1);
    }
}
