//! Inbound reconciliation.
//!
//! Per-room message lists where server-confirmed messages are merged with
//! optimistic placeholders, plus the queue of read marks waiting to be sent.

use crate::models::Message;
use crate::protocol::{MarkReadPayload, ReadUpdate};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of merging a confirmed message into a room list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// Already present; the list is unchanged.
    Duplicate,
    /// Took the place of a pending placeholder.
    Replaced { placeholder_id: String },
    Appended,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    rooms: HashMap<String, Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, chat_room_id: &str) {
        self.rooms.entry(chat_room_id.to_string()).or_default();
    }

    pub fn close(&mut self, chat_room_id: &str) -> Option<Vec<Message>> {
        self.rooms.remove(chat_room_id)
    }

    pub fn is_open(&self, chat_room_id: &str) -> bool {
        self.rooms.contains_key(chat_room_id)
    }

    pub fn messages(&self, chat_room_id: &str) -> &[Message] {
        self.rooms.get(chat_room_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Appends an optimistic message. Returns `false` if the room is not open.
    pub fn push_placeholder(&mut self, placeholder: Message) -> bool {
        match self.rooms.get_mut(&placeholder.chat_room_id) {
            Some(list) => {
                list.push(placeholder);
                true
            }
            None => false,
        }
    }

    /// Merges a confirmed message. `None` if its room is not open.
    ///
    /// An identical id is a duplicate. Otherwise the earliest pending
    /// placeholder with the same payload is replaced in place; failing that,
    /// the message is appended.
    pub fn ingest(&mut self, message: Message) -> Option<Ingest> {
        let list = self.rooms.get_mut(&message.chat_room_id)?;

        if list.iter().any(|m| m.id == message.id) {
            return Some(Ingest::Duplicate);
        }

        let mut confirmed = message;
        confirmed.pending = false;

        if let Some(slot) = list
            .iter_mut()
            .find(|m| m.pending && m.is_placeholder() && m.same_payload(&confirmed))
        {
            let placeholder = std::mem::replace(slot, confirmed);
            return Some(Ingest::Replaced {
                placeholder_id: placeholder.id,
            });
        }

        list.push(confirmed);
        Some(Ingest::Appended)
    }

    /// Swaps a placeholder for the message returned by the durable path.
    ///
    /// If the confirmed id is already listed the placeholder is dropped
    /// instead, so the pair always collapses to one entry. Returns `false`
    /// when the placeholder no longer exists.
    pub fn confirm_placeholder(&mut self, chat_room_id: &str, placeholder_id: &str, confirmed: Message) -> bool {
        let Some(list) = self.rooms.get_mut(chat_room_id) else {
            return false;
        };
        let Some(pos) = list.iter().position(|m| m.id == placeholder_id) else {
            return false;
        };

        if list.iter().any(|m| m.id == confirmed.id) {
            list.remove(pos);
        } else {
            let mut confirmed = confirmed;
            confirmed.pending = false;
            list[pos] = confirmed;
        }
        true
    }

    pub fn remove(&mut self, chat_room_id: &str, message_id: &str) -> Option<Message> {
        let list = self.rooms.get_mut(chat_room_id)?;
        let pos = list.iter().position(|m| m.id == message_id)?;
        Some(list.remove(pos))
    }

    /// Adds the reader to every listed message present locally.
    /// Returns how many reader sets grew.
    pub fn apply_read_update(&mut self, update: &ReadUpdate) -> usize {
        let Some(list) = self.rooms.get_mut(&update.chat_room_id) else {
            return 0;
        };

        list.iter_mut()
            .filter(|m| update.message_ids.contains(&m.id))
            .map(|m| m.readers.insert(update.read_by.clone()))
            .filter(|grew| *grew)
            .count()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

/// Read marks batched per room and flushed after a short delay.
#[derive(Debug)]
pub struct ReadQueue {
    delay: Duration,
    rooms: BTreeMap<String, (Instant, Vec<String>)>,
}

impl ReadQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            rooms: BTreeMap::new(),
        }
    }

    pub fn enqueue(&mut self, chat_room_id: &str, message_id: &str, now: Instant) {
        let (_, ids) = self
            .rooms
            .entry(chat_room_id.to_string())
            .or_insert_with(|| (now + self.delay, Vec::new()));
        if !ids.iter().any(|id| id == message_id) {
            ids.push(message_id.to_string());
        }
    }

    /// Removes and returns every batch whose delay has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Vec<MarkReadPayload> {
        let due: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(room, _)| room.clone())
            .collect();

        due.into_iter()
            .filter_map(|room| {
                self.rooms.remove(&room).map(|(_, message_ids)| MarkReadPayload {
                    chat_room_id: room,
                    message_ids,
                })
            })
            .collect()
    }

    pub fn drop_room(&mut self, chat_room_id: &str) {
        self.rooms.remove(chat_room_id);
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.rooms.values().map(|(deadline, _)| *deadline).min()
    }
}
