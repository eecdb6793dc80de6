//! Connection registry and rooms.
//!
//! Tracks which user is reachable over which live connection, and which
//! connections are subscribed to which broadcast rooms. Nothing here is
//! durable: the registry starts empty on every process start.
//!
//! One active handle per user: registering a second connection for the same
//! user replaces the entry (last connect wins). The superseded connection
//! stays live, and subscribed to its rooms, until its socket closes.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// Sending half of a connection's outbound queue.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

/// Identity of one live connection.
pub type ConnectionId = String;

/// A broadcast scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Everyone currently viewing a chat.
    Chat(String),
    /// Every connection of one user, for targeted notifications.
    User(String),
}

/// A reference to a live connection, usable to push events to one client.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    sender: ClientSender,
}

impl ConnectionHandle {
    pub fn new(user_id: &str, sender: ClientSender) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            sender,
        }
    }

    /// Queue an event. Returns false if the connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Whether the receiving side (the socket's sender task) has gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Shared registry state. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    /// user id → active handle
    active: Arc<DashMap<String, ConnectionHandle>>,

    /// connection id → handle, for every live connection (superseded ones
    /// included)
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,

    /// room → subscribed connection ids
    rooms: Arc<DashMap<Room, HashSet<ConnectionId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Make `handle` the active connection for `user_id`. Returns the handle
    /// it replaced, if any.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.id.clone(), handle.clone());
        let previous = self.active.insert(user_id.to_string(), handle);

        if let Some(ref old) = previous {
            tracing::info!(
                user_id = user_id,
                replaced = old.id.as_str(),
                "Connection superseded by newer connection"
            );
        }
        previous
    }

    /// Drop the active entry for `user_id`, but only if it still belongs to
    /// `connection_id`. Returns whether the entry was removed.
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        self.active
            .remove_if(user_id, |_, handle| handle.id == connection_id)
            .is_some()
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.active.get(user_id).map(|h| h.clone())
    }

    pub fn list_all(&self) -> Vec<(String, ConnectionHandle)> {
        self.active
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.active.contains_key(user_id)
    }

    /// Whether `connection_id` is the active connection of its user.
    #[cfg(test)]
    pub fn is_active(&self, user_id: &str, connection_id: &str) -> bool {
        self.active
            .get(user_id)
            .map(|h| h.id == connection_id)
            .unwrap_or(false)
    }

    /// Forget a connection entirely: leaves every room and drops it from the
    /// live set. Returns the rooms it was in, or None if it was already
    /// detached.
    pub fn detach(&self, connection_id: &str) -> Option<Vec<Room>> {
        self.connections.remove(connection_id)?;
        Some(self.leave_all(connection_id))
    }

    // ── Rooms ─────────────────────────────────────────────────────────────

    pub fn join(&self, room: Room, connection_id: &str) {
        self.rooms
            .entry(room)
            .or_default()
            .insert(connection_id.to_string());
    }

    /// Returns whether the connection was in the room.
    pub fn leave(&self, room: &Room, connection_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(connection_id),
            None => return false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    fn leave_all(&self, connection_id: &str) -> Vec<Room> {
        let rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(connection_id))
            .map(|entry| entry.key().clone())
            .collect();
        for room in &rooms {
            self.leave(room, connection_id);
        }
        rooms
    }

    #[cfg(test)]
    pub fn is_in_room(&self, room: &Room, connection_id: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(connection_id))
            .unwrap_or(false)
    }

    pub fn room_members(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe every live connection of `user_id` to `room`.
    pub fn join_user_connections(&self, user_id: &str, room: Room) {
        for connection_id in self.room_members(&Room::User(user_id.to_string())) {
            self.join(room.clone(), &connection_id);
        }
    }

    /// Unsubscribe every live connection of `user_id` from `room`.
    pub fn leave_user_connections(&self, user_id: &str, room: &Room) {
        for connection_id in self.room_members(&Room::User(user_id.to_string())) {
            self.leave(room, &connection_id);
        }
    }

    // ── Delivery ──────────────────────────────────────────────────────────

    /// Push an event to one connection. Returns true if it was queued.
    pub fn send(&self, connection_id: &str, event: ServerEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    /// Push an event to every connection in a room, skipping connections
    /// that belong to `except_user`. Returns the number of connections
    /// reached.
    pub fn emit_to_room(&self, room: &Room, event: &ServerEvent, except_user: Option<&str>) -> usize {
        let mut delivered = 0;
        for connection_id in self.room_members(room) {
            let Some(handle) = self.connections.get(&connection_id).map(|h| h.clone()) else {
                continue;
            };
            if except_user == Some(handle.user_id.as_str()) {
                continue;
            }
            if handle.send(event.clone()) {
                delivered += 1;
            }
        }
        tracing::debug!(
            room = ?room,
            event = event.name(),
            delivered = delivered,
            "Room broadcast"
        );
        delivered
    }

    /// Push an event to every connection of one user.
    pub fn emit_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        self.emit_to_room(&Room::User(user_id.to_string()), event, None)
    }

    // ── Stats ─────────────────────────────────────────────────────────────

    pub fn online_count(&self) -> usize {
        self.active.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
