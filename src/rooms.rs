//! Room membership: join/leave signaling and the active room.

use crate::protocol::{ClientEvent, RoomRef};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Subscribed locally; the join goes out once the connection is up.
    PendingJoin,
    Joined,
}

#[derive(Debug, Default)]
pub struct RoomMembership {
    rooms: BTreeMap<String, RoomState>,
    active: Option<String>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a room. At most one join is outstanding per room.
    pub fn join(&mut self, room_id: &str, connected: bool) -> Vec<ClientEvent> {
        if room_id.trim().is_empty() {
            tracing::debug!("Ignoring join without a room id");
            return Vec::new();
        }
        if self.rooms.contains_key(room_id) {
            return Vec::new();
        }

        if connected {
            self.rooms.insert(room_id.to_string(), RoomState::Joined);
            vec![ClientEvent::JoinRoom(RoomRef::new(room_id))]
        } else {
            tracing::debug!("Deferring join of {} until connected", room_id);
            self.rooms.insert(room_id.to_string(), RoomState::PendingJoin);
            Vec::new()
        }
    }

    /// Drops the subscription. Safe for rooms that were never joined.
    pub fn leave(&mut self, room_id: &str, connected: bool) -> Vec<ClientEvent> {
        self.rooms.remove(room_id);
        if self.active.as_deref() == Some(room_id) {
            self.active = None;
        }

        if !connected || room_id.trim().is_empty() {
            return Vec::new();
        }
        vec![
            ClientEvent::TypingStop(RoomRef::new(room_id)),
            ClientEvent::LeaveRoom(RoomRef::new(room_id)),
        ]
    }

    /// (Re)joins every subscription. A fresh transport carries no server-side
    /// membership, so joined rooms are joined again as well.
    pub fn on_connected(&mut self) -> Vec<ClientEvent> {
        self.rooms
            .iter_mut()
            .map(|(room_id, state)| {
                *state = RoomState::Joined;
                ClientEvent::JoinRoom(RoomRef::new(room_id))
            })
            .collect()
    }

    pub fn on_disconnected(&mut self) {
        for state in self.rooms.values_mut() {
            *state = RoomState::PendingJoin;
        }
    }

    pub fn activate(&mut self, room_id: &str) {
        if self.rooms.contains_key(room_id) {
            self.active = Some(room_id.to_string());
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.active.as_deref() == Some(room_id)
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn state(&self, room_id: &str) -> Option<RoomState> {
        self.rooms.get(room_id).copied()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
        self.active = None;
    }
}
