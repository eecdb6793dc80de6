//! User directory endpoints.

pub mod api;
