//! Chatwire server
//!
//! A real-time chat backend:
//!
//! 1. **REST API** under `/api`: accounts, users, chats and messages,
//!    answering with a uniform `{success, message, data}` envelope.
//!
//! 2. **WebSocket** at `/ws`: one authenticated connection per client,
//!    carrying presence, typing indicators and message fan-out.
//!
//! Both paths mutate the same SQLite store and push events through the
//! same connection registry.

use std::time::Duration;

use clap::Parser;

use chatwire::state::MAX_CONFIG_HOURS;
use chatwire::{build_router, AppState, ServerConfig};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "chatwire", version, about = "Real-time chat server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 5000, env = "CHAT_PORT")]
    port: u16,

    /// SQLite database file. Empty keeps everything in memory.
    #[arg(long, default_value = "chatwire.db", env = "DATABASE_PATH")]
    database_path: String,

    /// Bearer token lifetime in hours
    #[arg(
        long,
        default_value_t = 7 * 24,
        env = "TOKEN_TTL_HOURS",
        value_parser = clap::value_parser!(i64).range(1..=MAX_CONFIG_HOURS)
    )]
    token_ttl_hours: i64,

    /// Bcrypt work factor for password hashes
    #[arg(
        long,
        default_value_t = 10,
        env = "BCRYPT_COST",
        value_parser = clap::value_parser!(u32).range(4..=31)
    )]
    bcrypt_cost: u32,

    /// Seconds before an unrefreshed typing indicator expires
    #[arg(
        long,
        default_value_t = 5,
        env = "TYPING_TIMEOUT_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    typing_timeout_secs: u64,

    /// Hours after sending during which a message may be edited
    #[arg(
        long,
        default_value_t = 24,
        env = "MESSAGE_EDIT_WINDOW_HOURS",
        value_parser = clap::value_parser!(i64).range(0..=MAX_CONFIG_HOURS)
    )]
    edit_window_hours: i64,

    /// Maximum message length in characters
    #[arg(
        long,
        default_value_t = 5000,
        env = "MAX_MESSAGE_LENGTH",
        value_parser = parse_positive_usize
    )]
    max_message_length: usize,

    /// Cleanup interval in seconds
    #[arg(
        long,
        default_value_t = 300,
        env = "CLEANUP_INTERVAL_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    cleanup_interval_secs: u64,
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        let database_path = Some(args.database_path).filter(|p| !p.trim().is_empty());
        Self {
            port: args.port,
            database_path,
            token_ttl_hours: args.token_ttl_hours,
            bcrypt_cost: args.bcrypt_cost,
            typing_timeout: Duration::from_secs(args.typing_timeout_secs),
            edit_window_hours: args.edit_window_hours,
            max_message_length: args.max_message_length,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatwire=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let cleanup_interval = args.cleanup_interval_secs;
    let config = ServerConfig::from(args);
    let port = config.port;

    match &config.database_path {
        Some(path) => tracing::info!(path = path.as_str(), "Opening database"),
        None => tracing::warn!("No database path set; using an in-memory store"),
    }

    // The only fatal error: without a store there is nothing to serve.
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database");
            std::process::exit(1);
        }
    };

    // Spawn periodic cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval));
        loop {
            interval.tick().await;
            cleanup_state.cleanup_expired();
        }
    });

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Chatwire server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("chatwire").chain(extra.iter().copied()))
    }

    #[test]
    fn test_defaults_map_to_config() {
        let config = ServerConfig::from(parse(&["--database-path", ""]).unwrap());
        assert_eq!(config.database_path, None);
        assert_eq!(config.typing_timeout, Duration::from_secs(5));
        assert_eq!(config.edit_window_hours, 24);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(parse(&["--cleanup-interval-secs", "0"]).is_err());
        assert!(parse(&["--typing-timeout-secs", "0"]).is_err());
        assert!(parse(&["--max-message-length", "0"]).is_err());
        assert!(parse(&["--bcrypt-cost", "99"]).is_err());
        assert!(parse(&["--token-ttl-hours", "0"]).is_err());
        let huge = i64::MAX.to_string();
        assert!(parse(&["--token-ttl-hours", huge.as_str()]).is_err());
        assert!(parse(&["--edit-window-hours", huge.as_str()]).is_err());

        let args = parse(&["--edit-window-hours", "0", "--cleanup-interval-secs", "1"]).unwrap();
        assert_eq!(args.edit_window_hours, 0);
        assert_eq!(args.cleanup_interval_secs, 1);
    }
}
