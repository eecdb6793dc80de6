//! Authentication: password credentials and opaque bearer tokens.
//!
//! The same token authenticates REST requests (via [`AuthUser`]) and the
//! real-time handshake (via [`AuthService::authenticate`] before upgrade).

pub mod api;
pub mod service;

pub use api::AuthUser;
pub use service::{bearer_token, AuthService, AuthSession};
