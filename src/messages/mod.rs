//! Messages: send, edit, delete, reactions, history and search.

pub mod api;
pub mod service;
