//! One-on-one and group chats.

pub mod api;
pub mod service;
