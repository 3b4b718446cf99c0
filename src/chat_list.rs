//! Chat list projection: one row per room with a type-aware preview and an
//! unread counter.

use crate::models::{ChatRoom, ChatSummary, Message, MessageKind};
use crate::protocol::ChatListUpdate;
use chrono::{DateTime, Utc};

pub const IMAGE_PREVIEW: &str = "📷 Image";
pub const AUDIO_PREVIEW: &str = "🎤 Audio message";
pub const EMPTY_PREVIEW: &str = "No messages yet";
pub const NEW_CHAT_PREVIEW: &str = "New chat started...";

/// Preview label for a message. Media never shows raw content.
pub fn preview_text(message: &Message) -> String {
    match message.kind {
        MessageKind::Text => message.content.clone(),
        MessageKind::Image => IMAGE_PREVIEW.to_string(),
        MessageKind::Audio => AUDIO_PREVIEW.to_string(),
    }
}

fn counts_as_unread(message: &Message, me: &str) -> bool {
    message.sender_id != me && !message.is_read_by(me)
}

#[derive(Debug, Default)]
pub struct ChatList {
    rows: Vec<ChatSummary>,
    active: Option<String>,
}

impl ChatList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rows with a server listing, most recent first.
    pub fn load(&mut self, rooms: Vec<ChatRoom>, me: &str) {
        let mut rooms = rooms;
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        self.rows = rooms
            .into_iter()
            .map(|room| {
                let (preview, kind, unread) = match &room.last_message {
                    Some(last) => {
                        let unread = counts_as_unread(last, me) && !self.is_active(&room.id);
                        (preview_text(last), last.kind, u32::from(unread))
                    }
                    None => (EMPTY_PREVIEW.to_string(), MessageKind::Text, 0),
                };
                ChatSummary {
                    other_user_id: room.counterpart(me).map(str::to_string),
                    chat_room_id: room.id,
                    preview,
                    kind,
                    last_activity: Some(room.updated_at),
                    unread,
                }
            })
            .collect();
    }

    /// Applies a summary delta. Returns `false` for rooms not in the list.
    pub fn apply(&mut self, update: &ChatListUpdate, me: &str) -> bool {
        let Some(index) = self
            .rows
            .iter()
            .position(|row| row.chat_room_id == update.chat_room_id)
        else {
            tracing::debug!("chat list update for unknown room {}", update.chat_room_id);
            return false;
        };

        let active = self.is_active(&update.chat_room_id);
        let mut row = self.rows.remove(index);
        let message = &update.message;

        row.preview = preview_text(message);
        row.kind = message.kind;
        row.last_activity = Some(message.created_at);
        if active {
            row.unread = 0;
        } else if counts_as_unread(message, me) {
            row.unread += 1;
        }

        self.rows.insert(0, row);
        true
    }

    /// Puts a freshly created room at the top with nothing unread. A room
    /// already listed is only moved to the top.
    pub fn insert_new(&mut self, chat_room_id: &str, other_user_id: &str, created_at: DateTime<Utc>) {
        let row = match self.rows.iter().position(|row| row.chat_room_id == chat_room_id) {
            Some(index) => self.rows.remove(index),
            None => ChatSummary {
                chat_room_id: chat_room_id.to_string(),
                other_user_id: Some(other_user_id.to_string()),
                preview: NEW_CHAT_PREVIEW.to_string(),
                kind: MessageKind::Text,
                last_activity: Some(created_at),
                unread: 0,
            },
        };
        self.rows.insert(0, row);
    }

    /// Existing conversation with a user, if any.
    pub fn find_by_counterpart(&self, other_user_id: &str) -> Option<&ChatSummary> {
        self.rows
            .iter()
            .find(|row| row.other_user_id.as_deref() == Some(other_user_id))
    }

    /// Marks a room as the one on screen and clears its unread counter.
    pub fn set_active(&mut self, chat_room_id: Option<&str>) {
        self.active = chat_room_id.map(str::to_string);
        if let Some(id) = chat_room_id {
            if let Some(row) = self.rows.iter_mut().find(|row| row.chat_room_id == id) {
                row.unread = 0;
            }
        }
    }

    pub fn is_active(&self, chat_room_id: &str) -> bool {
        self.active.as_deref() == Some(chat_room_id)
    }

    pub fn rows(&self) -> &[ChatSummary] {
        &self.rows
    }

    pub fn get(&self, chat_room_id: &str) -> Option<&ChatSummary> {
        self.rows.iter().find(|row| row.chat_room_id == chat_room_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.rows.iter().map(|row| row.unread).sum()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.active = None;
    }
}
