//! Server state management.
//!
//! `AppState` bundles the handles every request and connection needs: the
//! persistence store, the connection registry, the typing tracker and the
//! auth service. All of them are internally reference-counted, so the
//! state is cloned freely into handlers and spawned tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::auth::AuthService;
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::storage::Database;
use crate::typing::TypingTracker;

/// Default token lifetime in hours (7 days).
const DEFAULT_TOKEN_TTL_HOURS: i64 = 7 * 24;

/// Default bcrypt work factor.
const DEFAULT_BCRYPT_COST: u32 = 10;

/// Default typing-indicator timeout in seconds.
const DEFAULT_TYPING_TIMEOUT_SECS: u64 = 5;

/// Default window during which a sender may edit a message, in hours.
const DEFAULT_EDIT_WINDOW_HOURS: i64 = 24;

/// Upper bound for hour-valued settings (token lifetime, edit window):
/// ten years, well inside what `chrono` can add to the current time.
pub const MAX_CONFIG_HOURS: i64 = 10 * 365 * 24;

/// Default maximum message length in characters.
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 5000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// SQLite file; `None` keeps everything in memory.
    pub database_path: Option<String>,
    pub token_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub typing_timeout: Duration,
    pub edit_window_hours: i64,
    pub max_message_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            database_path: Some("chatwire.db".to_string()),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            typing_timeout: Duration::from_secs(DEFAULT_TYPING_TIMEOUT_SECS),
            edit_window_hours: DEFAULT_EDIT_WINDOW_HOURS,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: ConnectionRegistry,
    pub typing: TypingTracker,
    pub auth: AuthService,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Open the store named by the config and wire up the in-memory parts.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let db = Database::open(config.database_path.as_deref())?;
        let reset = db.reset_presence()?;
        if reset > 0 {
            tracing::info!(count = reset, "Cleared presence left over from the last run");
        }
        Ok(Self::with_database(config, db))
    }

    pub fn with_database(config: ServerConfig, db: Database) -> Self {
        let auth = AuthService::new(db.clone(), config.token_ttl_hours, config.bcrypt_cost);
        Self {
            typing: TypingTracker::new(config.typing_timeout),
            registry: ConnectionRegistry::new(),
            auth,
            db,
            config: Arc::new(config),
        }
    }

    /// Remove expired sessions, stale typing entries and active connections
    /// whose socket side is already gone. Called periodically by the
    /// cleanup task.
    pub fn cleanup_expired(&self) {
        match self.db.purge_expired_sessions(Utc::now()) {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count = count, "Cleaned up expired sessions"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired sessions"),
        }

        let swept = self.typing.sweep_stale();
        if swept > 0 {
            tracing::debug!(count = swept, "Cleaned up stale typing indicators");
        }

        for (user_id, handle) in self.registry.list_all() {
            if handle.is_closed() {
                tracing::warn!(
                    user_id = user_id.as_str(),
                    connection_id = handle.id.as_str(),
                    "Tearing down connection with a closed channel"
                );
                crate::presence::disconnect(self, &user_id, &handle.id);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the service and router tests.

    use tokio::sync::mpsc;

    use super::*;
    use crate::models::User;
    use crate::protocol::ServerEvent;
    use crate::registry::{ConnectionHandle, Room};

    pub fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            database_path: None,
            bcrypt_cost: 4,
            ..ServerConfig::default()
        }
    }

    pub fn test_state() -> AppState {
        AppState::new(test_config()).unwrap()
    }

    pub fn user(state: &AppState, name: &str) -> User {
        state
            .db
            .create_user(name, &format!("{}@example.com", name.to_lowercase()), "hash")
            .unwrap()
    }

    /// A registered connection whose outbound queue the test can read.
    pub struct TestConnection {
        pub handle: ConnectionHandle,
        pub rx: mpsc::UnboundedReceiver<ServerEvent>,
    }

    impl TestConnection {
        pub fn id(&self) -> &str {
            &self.handle.id
        }

        pub fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }

        pub fn names(&mut self) -> Vec<&'static str> {
            self.drain().iter().map(|e| e.name()).collect()
        }
    }

    /// Drive one request through a router and decode the JSON envelope.
    pub async fn call(
        app: &axum::Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (axum::http::StatusCode, serde_json::Value) {
        use axum::body::Body;
        use axum::http::{header, Request};
        use tower::ServiceExt;

        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    /// A user with a live session token, for REST tests.
    pub fn session(state: &AppState, name: &str) -> (User, String) {
        let session = state
            .auth
            .register(name, &format!("{}@example.com", name.to_lowercase()), "secret1")
            .unwrap();
        (session.user, session.token)
    }

    /// Register a connection for `user` and subscribe it to its private
    /// room, without touching persisted presence.
    pub fn connect(state: &AppState, user: &User) -> TestConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(&user.id, tx);
        state.registry.register(&user.id, handle.clone());
        state
            .registry
            .join(Room::User(user.id.clone()), &handle.id);
        TestConnection { handle, rx }
    }
}
