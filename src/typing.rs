//! Typing presence.
//!
//! Local side: one burst per room, ended automatically after the quiescence
//! window. Remote side: per-room typing sets whose entries expire unless
//! renewed.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct TypingTracker {
    quiescence: Duration,
    expiry: Duration,
    /// room -> deadline of the local burst
    local: HashMap<String, Instant>,
    /// room -> user -> expiry deadline
    remote: HashMap<String, BTreeMap<String, Instant>>,
}

impl TypingTracker {
    pub fn new(quiescence: Duration, expiry: Duration) -> Self {
        Self {
            quiescence,
            expiry,
            local: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    /// Records a local keystroke. Returns `true` when it opens a new burst.
    pub fn keystroke(&mut self, room_id: &str, now: Instant) -> bool {
        self.local
            .insert(room_id.to_string(), now + self.quiescence)
            .is_none()
    }

    /// Ends the local burst for a room. Returns whether one was active.
    pub fn stop_local(&mut self, room_id: &str) -> bool {
        self.local.remove(room_id).is_some()
    }

    pub fn is_bursting(&self, room_id: &str) -> bool {
        self.local.contains_key(room_id)
    }

    pub fn end_all_local(&mut self) {
        self.local.clear();
    }

    /// Ends every burst whose quiescence window has elapsed.
    pub fn expire_local(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<String> = self
            .local
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(room, _)| room.clone())
            .collect();
        expired.sort();

        for room in &expired {
            self.local.remove(room);
        }
        expired
    }

    /// Adds or renews a remote typist. Returns `true` if the set changed.
    pub fn show(&mut self, room_id: &str, user_id: &str, now: Instant) -> bool {
        self.remote
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string(), now + self.expiry)
            .is_none()
    }

    /// Removes a remote typist. Returns `true` if the set changed.
    pub fn hide(&mut self, room_id: &str, user_id: &str) -> bool {
        let Some(users) = self.remote.get_mut(room_id) else {
            return false;
        };
        let removed = users.remove(user_id).is_some();
        if users.is_empty() {
            self.remote.remove(room_id);
        }
        removed
    }

    /// Drops expired remote typists. Returns the rooms whose set changed.
    pub fn expire_remote(&mut self, now: Instant) -> Vec<String> {
        let mut changed = Vec::new();

        self.remote.retain(|room, users| {
            let before = users.len();
            users.retain(|_, deadline| *deadline > now);
            if users.len() != before {
                changed.push(room.clone());
            }
            !users.is_empty()
        });

        changed.sort();
        changed
    }

    /// Forgets all state for a room. Returns `true` if remote typists were dropped.
    pub fn clear_room(&mut self, room_id: &str) -> bool {
        self.local.remove(room_id);
        self.remote.remove(room_id).is_some()
    }

    pub fn clear(&mut self) {
        self.local.clear();
        self.remote.clear();
    }

    pub fn typing_users(&self, room_id: &str) -> Vec<String> {
        self.remote
            .get(room_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let local = self.local.values();
        let remote = self.remote.values().flat_map(|users| users.values());
        local.chain(remote).min().copied()
    }
}
