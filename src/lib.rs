//! ChatSync Core Library
//!
//! Realtime message synchronization for room-based chat clients.
//! Provides: connection management, room membership, optimistic sends with
//! a durable fallback, inbound reconciliation, typing presence and the chat
//! list projection.

pub mod chat_list;
pub mod client;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod outbound;
pub mod protocol;
pub mod reconciler;
pub mod rooms;
pub mod typing;

pub use client::ChatClient;
pub use config::{ClientConfig, ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionManager, Connector, RemoteEnd, TransportEvent, TransportLink};
pub use engine::{Notification, SyncAction, SyncEngine, SyncEvent};
pub use error::{Error, Result};
pub use models::*;
pub use network::{ApiClient, MessageApi, WsConnector};
pub use outbound::SendFailure;
pub use protocol::{ClientEvent, ServerEvent};
