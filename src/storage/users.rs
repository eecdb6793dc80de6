//! User and session records.

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use super::{contains_pattern, json_column, placeholders, Database};
use crate::error::{Error, Result};
use crate::models::{from_millis, to_millis, User};

const USER_COLUMNS: &str =
    "id, name, email, avatar, is_online, last_seen, socket_id, blocked_users, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let blocked: String = row.get(7)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        avatar: row.get(3)?,
        is_online: row.get(4)?,
        last_seen: from_millis(row.get(5)?),
        socket_id: row.get(6)?,
        blocked_users: json_column(&blocked, 7)?,
        created_at: from_millis(row.get(8)?),
    })
}

impl Database {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Insert a new user. Fails with [`Error::Conflict`] when the e-mail is
    /// already registered.
    pub fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let inserted = conn.execute(
            "INSERT INTO users (id, name, email, password_hash, last_seen, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![id, name, email, password_hash, to_millis(now), to_millis(now), to_millis(now)],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(Error::Conflict("A user with this email already exists".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            avatar: None,
            is_online: false,
            last_seen: now,
            socket_id: None,
            blocked_users: Vec::new(),
            created_at: now,
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Fetch several users, returned in the order of `ids`. Unknown ids are
    /// skipped.
    pub fn get_users(&self, ids: &[String]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM users WHERE id IN ({})",
            USER_COLUMNS,
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let found = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|u| &u.id == id).cloned())
            .collect())
    }

    /// Look up a user and their password hash by e-mail.
    pub fn get_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                &format!(
                    "SELECT {}, password_hash FROM users WHERE email = ?",
                    USER_COLUMNS
                ),
                params![email],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(9)?)),
            )
            .optional()?;
        Ok(found)
    }

    /// Record a connect/disconnect transition: online flag, last-seen and
    /// the active connection id move together.
    pub fn set_presence(&self, id: &str, online: bool, socket_id: Option<&str>) -> Result<bool> {
        let conn = self.conn.lock();
        let now = to_millis(Utc::now());
        let updated = conn.execute(
            "UPDATE users SET is_online = ?, last_seen = ?, socket_id = ?, updated_at = ?
             WHERE id = ?",
            params![online, now, socket_id, now, id],
        )?;
        Ok(updated > 0)
    }

    /// Manual status change; leaves the connection id alone.
    pub fn set_online(&self, id: &str, online: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let now = to_millis(Utc::now());
        let updated = conn.execute(
            "UPDATE users SET is_online = ?, last_seen = ?, updated_at = ? WHERE id = ?",
            params![online, now, now, id],
        )?;
        Ok(updated > 0)
    }

    /// Mark everyone offline and drop stored connection ids. Run at startup:
    /// the registry is empty, so no stored connection can still be live.
    pub fn reset_presence(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let reset = conn.execute(
            "UPDATE users SET is_online = 0, socket_id = NULL
             WHERE is_online = 1 OR socket_id IS NOT NULL",
            [],
        )?;
        Ok(reset)
    }

    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<User>> {
        {
            let conn = self.conn.lock();
            let now = to_millis(Utc::now());
            conn.execute(
                "UPDATE users SET name = COALESCE(?, name), avatar = COALESCE(?, avatar),
                 updated_at = ? WHERE id = ?",
                params![name, avatar, now, id],
            )?;
        }
        self.get_user(id)
    }

    /// Case-insensitive substring match on name or e-mail.
    pub fn search_users(&self, query: &str, exclude_id: &str, limit: usize) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let pattern = contains_pattern(query);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users
             WHERE id != ? AND (LOWER(name) LIKE ? ESCAPE '\\' OR LOWER(email) LIKE ? ESCAPE '\\')
             ORDER BY name LIMIT ?",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map(
                params![exclude_id, pattern, pattern, limit as i64],
                user_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn set_blocked_users(&self, id: &str, blocked: &[String]) -> Result<()> {
        let conn = self.conn.lock();
        let now = to_millis(Utc::now());
        conn.execute(
            "UPDATE users SET blocked_users = ?, updated_at = ? WHERE id = ?",
            params![serde_json::to_string(blocked)?, now, id],
        )?;
        Ok(())
    }

    // ========================================================================
    // SESSION OPERATIONS
    // ========================================================================

    pub fn create_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
            params![token_hash, user_id, to_millis(Utc::now()), to_millis(expires_at)],
        )?;
        Ok(())
    }

    /// The user id and expiry a token digest maps to.
    pub fn get_session(&self, token_hash: &str) -> Result<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token_hash = ?",
                params![token_hash],
                |row| Ok((row.get::<_, String>(0)?, from_millis(row.get(1)?))),
            )
            .optional()?;
        Ok(session)
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?",
            params![token_hash],
        )?;
        Ok(deleted > 0)
    }

    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?",
            params![to_millis(now)],
        )?;
        Ok(deleted)
    }
}
