//! Credential checks and bearer tokens.
//!
//! Tokens are 32 random bytes, hex-encoded, handed to the client once. The
//! store only ever sees their SHA-256 digest.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::User;
use crate::state::MAX_CONFIG_HOURS;
use crate::storage::Database;

/// Length of an encoded token.
const TOKEN_HEX_LEN: usize = 64;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_NAME_LEN: usize = 50;

/// A freshly issued token and who it belongs to.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies bearer tokens against the persistence store.
#[derive(Clone)]
pub struct AuthService {
    db: Database,
    token_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(db: Database, token_ttl_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            db,
            token_ttl: Duration::hours(token_ttl_hours.clamp(1, MAX_CONFIG_HOURS)),
            bcrypt_cost,
        }
    }

    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthSession> {
        let name = name.trim();
        let email = normalize_email(email);

        if name.is_empty() {
            return Err(Error::Validation("Name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "Name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }
        if !is_plausible_email(&email) {
            return Err(Error::Validation("A valid email is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let hash = bcrypt::hash(password, self.bcrypt_cost)?;
        let user = self.db.create_user(name, &email, &hash)?;
        tracing::info!(user_id = user.id.as_str(), "User registered");
        self.issue(user)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = normalize_email(email);
        let invalid = || Error::Authentication("Invalid email or password".to_string());

        let (user, hash) = self.db.get_credentials(&email)?.ok_or_else(invalid)?;
        if !bcrypt::verify(password, &hash)? {
            tracing::debug!(user_id = user.id.as_str(), "Login rejected: wrong password");
            return Err(invalid());
        }

        tracing::info!(user_id = user.id.as_str(), "User logged in");
        self.issue(user)
    }

    /// Revoke a token. Returns whether it existed.
    pub fn logout(&self, token: &str) -> Result<bool> {
        self.db.delete_session(&hash_token(token))
    }

    /// Resolve a bearer token to its user.
    ///
    /// Rejects missing, malformed, unknown and expired tokens, and tokens
    /// whose user no longer exists.
    pub fn authenticate(&self, token: Option<&str>) -> Result<User> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication("No token provided".to_string()))?;

        if token.len() != TOKEN_HEX_LEN || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Authentication("Malformed token".to_string()));
        }

        let digest = hash_token(token);
        let (user_id, expires_at) = self
            .db
            .get_session(&digest)?
            .ok_or_else(|| Error::Authentication("Invalid token".to_string()))?;

        if expires_at <= Utc::now() {
            self.db.delete_session(&digest)?;
            return Err(Error::Authentication("Token expired".to_string()));
        }

        self.db
            .get_user(&user_id)?
            .ok_or_else(|| Error::Authentication("User not found".to_string()))
    }

    fn issue(&self, user: User) -> Result<AuthSession> {
        let token = generate_token();
        let expires_at = Utc::now() + self.token_ttl;
        self.db.create_session(&hash_token(&token), &user.id, expires_at)?;
        Ok(AuthSession {
            token,
            user,
            expires_at,
        })
    }
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The bearer token from an `Authorization: Bearer ...` header, falling
/// back to a `token` query parameter (browsers can't set headers on a
/// WebSocket upgrade).
pub fn bearer_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(query_token)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !email.contains(' '),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> AuthService {
        AuthService::new(Database::open(None).unwrap(), 1, 4)
    }

    #[test]
    fn test_register_then_authenticate() {
        let auth = service();
        let session = auth.register("Alice", "Alice@Example.com", "secret1").unwrap();
        assert_eq!(session.user.email, "alice@example.com");
        assert_eq!(session.token.len(), TOKEN_HEX_LEN);

        let user = auth.authenticate(Some(&session.token)).unwrap();
        assert_eq!(user.id, session.user.id);
    }

    #[test]
    fn test_register_validation() {
        let auth = service();
        assert!(matches!(
            auth.register("", "a@example.com", "secret1"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            auth.register("A", "not-an-email", "secret1"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            auth.register("A", "a@example.com", "123"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_login_wrong_password() {
        let auth = service();
        auth.register("Alice", "alice@example.com", "secret1").unwrap();
        assert!(auth.login("alice@example.com", "secret1").is_ok());
        assert!(matches!(
            auth.login("alice@example.com", "wrong!"),
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            auth.login("nobody@example.com", "secret1"),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_authenticate_rejections() {
        let auth = service();
        assert!(matches!(auth.authenticate(None), Err(Error::Authentication(_))));
        assert!(matches!(
            auth.authenticate(Some("abc")),
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            auth.authenticate(Some(&generate_token())),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = AuthService::new(Database::open(None).unwrap(), -1, 4);
        let session = auth.register("Alice", "alice@example.com", "secret1").unwrap();
        let err = auth.authenticate(Some(&session.token)).unwrap_err();
        assert_eq!(err.to_string(), "Authentication error: Token expired");
    }

    #[test]
    fn test_logout_revokes() {
        let auth = service();
        let session = auth.register("Alice", "alice@example.com", "secret1").unwrap();
        assert!(auth.logout(&session.token).unwrap());
        assert!(auth.authenticate(Some(&session.token)).is_err());
    }

    #[test]
    fn test_bearer_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers, Some("q")), Some("q"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer h"));
        assert_eq!(bearer_token(&headers, Some("q")), Some("h"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers, None), None);
    }
}
