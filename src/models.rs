//! Data models for ChatSync

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix reserved for locally generated message ids.
pub const PLACEHOLDER_PREFIX: &str = "temp-";

// ============================================================================
// Identity
// ============================================================================

/// Authenticated user of a session. Holds the bearer token, so it is never
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub token: String,
}

impl Identity {
    pub fn new(user_id: &str, token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            token: token.to_string(),
        }
    }

    /// Both the user id and the credential are present.
    pub fn is_complete(&self) -> bool {
        !self.user_id.trim().is_empty() && !self.token.trim().is_empty()
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
}

impl MessageKind {
    pub fn is_media(self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_room_id: String,
    pub sender_id: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Audio length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub readers: BTreeSet<String>,
    /// Awaiting server confirmation. Local only.
    #[serde(skip)]
    pub pending: bool,
}

impl Message {
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Same author and same body, ignoring id, timestamps and readers.
    pub fn same_payload(&self, other: &Message) -> bool {
        self.sender_id == other.sender_id
            && self.kind == other.kind
            && self.content == other.content
            && self.media_url == other.media_url
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.readers.contains(user_id)
    }
}

/// Message body as composed by the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

impl OutgoingMessage {
    pub fn text(content: &str) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.to_string(),
            media_url: None,
            duration: None,
        }
    }

    pub fn image(media_url: &str, caption: &str) -> Self {
        Self {
            kind: MessageKind::Image,
            content: caption.to_string(),
            media_url: Some(media_url.to_string()),
            duration: None,
        }
    }

    pub fn audio(media_url: &str, duration: u32) -> Self {
        Self {
            kind: MessageKind::Audio,
            content: String::new(),
            media_url: Some(media_url.to_string()),
            duration: Some(duration),
        }
    }

    /// Text needs non-blank content; media needs a non-blank URL.
    pub fn validate(&self) -> Result<()> {
        let has_body = if self.kind.is_media() {
            self.media_url.as_deref().is_some_and(|url| !url.trim().is_empty())
        } else {
            !self.content.trim().is_empty()
        };

        if has_body {
            Ok(())
        } else {
            Err(Error::EmptyMessage)
        }
    }

    /// Optimistic local copy shown until the server confirms it.
    pub fn to_placeholder(
        &self,
        id: String,
        chat_room_id: &str,
        sender_id: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        Message {
            id,
            chat_room_id: chat_room_id.to_string(),
            sender_id: sender_id.to_string(),
            kind: self.kind,
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            duration: self.duration,
            created_at,
            readers: BTreeSet::from([sender_id.to_string()]),
            pending: true,
        }
    }
}

/// Body of the durable message-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub sender_id: String,
    #[serde(flatten)]
    pub message: OutgoingMessage,
}

// ============================================================================
// Chat list
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub user_id: String,
}

/// Room row as returned by the chat room endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    #[serde(default)]
    pub members: Vec<RoomMember>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRoom {
    /// First member that is not `me`.
    pub fn counterpart(&self, me: &str) -> Option<&str> {
        self.members
            .iter()
            .map(|member| member.user_id.as_str())
            .find(|user_id| *user_id != me)
    }
}

/// Body of the room-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRoomRequest {
    pub current_user_id: String,
    pub other_user_id: String,
}

/// Chat list row. Derived from room events, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_room_id: String,
    /// The other participant, when known.
    pub other_user_id: Option<String>,
    pub preview: String,
    pub kind: MessageKind,
    pub last_activity: Option<DateTime<Utc>>,
    pub unread: u32,
}
