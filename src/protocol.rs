//! Realtime wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}`.

use crate::error::Result;
use crate::models::{Message, OutgoingMessage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub chat_room_id: String,
}

impl RoomRef {
    pub fn new(chat_room_id: &str) -> Self {
        Self {
            chat_room_id: chat_room_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub chat_room_id: String,
    #[serde(flatten)]
    pub message: OutgoingMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub chat_room_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadUpdate {
    pub chat_room_id: String,
    pub message_ids: Vec<String>,
    pub read_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub chat_room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListUpdate {
    pub chat_room_id: String,
    pub message: Message,
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinRoom")]
    JoinRoom(RoomRef),

    #[serde(rename = "leaveRoom")]
    LeaveRoom(RoomRef),

    #[serde(rename = "message:send")]
    SendMessage(SendMessagePayload),

    #[serde(rename = "message:read")]
    MarkRead(MarkReadPayload),

    #[serde(rename = "typing:start")]
    TypingStart(RoomRef),

    #[serde(rename = "typing:stop")]
    TypingStop(RoomRef),
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:received")]
    MessageReceived(Message),

    #[serde(rename = "message:readUpdate")]
    ReadUpdate(ReadUpdate),

    #[serde(rename = "typing:show")]
    TypingShow(TypingPayload),

    #[serde(rename = "typing:hide")]
    TypingHide(TypingPayload),

    #[serde(rename = "chatList:update")]
    ChatListUpdate(ChatListUpdate),
}

impl ClientEvent {
    pub fn chat_room_id(&self) -> &str {
        match self {
            ClientEvent::JoinRoom(r)
            | ClientEvent::LeaveRoom(r)
            | ClientEvent::TypingStart(r)
            | ClientEvent::TypingStop(r) => &r.chat_room_id,
            ClientEvent::SendMessage(p) => &p.chat_room_id,
            ClientEvent::MarkRead(p) => &p.chat_room_id,
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
