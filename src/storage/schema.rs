//! SQLite schema.
//!
//! Timestamps are epoch milliseconds. List-valued fields that belong to a
//! single record (blocked users, read receipts, reactions) are JSON text.

pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    avatar        TEXT,
    is_online     INTEGER NOT NULL DEFAULT 0,
    last_seen     INTEGER NOT NULL,
    socket_id     TEXT,
    blocked_users TEXT NOT NULL DEFAULT '[]',
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

CREATE TABLE IF NOT EXISTS chats (
    id                TEXT PRIMARY KEY,
    is_group          INTEGER NOT NULL,
    name              TEXT,
    description       TEXT,
    avatar            TEXT,
    admin_id          TEXT,
    latest_message_id TEXT,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    position     INTEGER NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    joined_at    INTEGER NOT NULL,
    PRIMARY KEY (chat_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY,
    chat_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL,
    attachment   TEXT,
    reply_to     TEXT,
    read_by      TEXT NOT NULL DEFAULT '[]',
    reactions    TEXT NOT NULL DEFAULT '[]',
    is_edited    INTEGER NOT NULL DEFAULT 0,
    edited_at    INTEGER,
    is_deleted   INTEGER NOT NULL DEFAULT 0,
    deleted_at   INTEGER,
    deleted_by   TEXT,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at);
"#;
