//! Persistence store.
//!
//! A SQLite database behind a mutex. All methods are synchronous and hold
//! the lock only for the duration of their statements; the lock is never
//! held across an `.await`.
//!
//! Record operations are split by entity:
//! - [`users`]: users and auth sessions
//! - [`chats`]: chats, membership and unread counters
//! - [`messages`]: messages, read receipts and reactions

mod chats;
mod messages;
pub mod schema;
mod users;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub use chats::{DirectChat, LeaveOutcome, NewChat};
pub use messages::NewMessage;

/// Handle to the persistence store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database.
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::Database(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::Database(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| Error::Database(format!("Failed to create tables: {}", e)))?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::Database(format!("Failed to set schema version: {}", e)))?;
                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }
}

/// Decode a JSON text column, surfacing failures as a rusqlite conversion
/// error on that column.
pub(crate) fn json_column<T: DeserializeOwned>(raw: &str, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Case-folded `%query%` pattern for `LIKE ... ESCAPE '\'`, with the
/// query's own wildcards matched literally.
pub(crate) fn contains_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Build a `?, ?, ...` placeholder list for an `IN (...)` clause.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("Lunch"), "%lunch%");
        assert_eq!(contains_pattern("100%_off"), "%100\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open(None).unwrap();
        let conn = db.conn.lock();
        let version: i32 = conn
            .query_row("SELECT version FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_init_is_idempotent() {
        let db = Database::open(None).unwrap();
        db.init_schema().unwrap();
        let conn = db.conn.lock();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
