//! Sync engine.
//!
//! A synchronous state machine with no I/O. The caller feeds it user intents
//! (methods) and [`SyncEvent`]s, always passing the current time, and carries
//! out the returned [`SyncAction`]s. Timers are deadlines owned by the records
//! they belong to; [`SyncEngine::next_deadline`] tells the caller when to tick.

use crate::chat_list::ChatList;
use crate::config::SyncConfig;
use crate::connection::{ConnectionState, TransportEvent};
use crate::error::{Error, Result};
use crate::models::{ChatRoom, ChatSummary, CreateMessageRequest, Message, OutgoingMessage};
use crate::outbound::{OutboundPipeline, SendFailure};
use crate::protocol::{ClientEvent, RoomRef, SendMessagePayload, ServerEvent};
use crate::reconciler::{Ingest, MessageStore, ReadQueue};
use crate::rooms::{RoomMembership, RoomState};
use crate::typing::TypingTracker;
use chrono::Utc;
use tokio::time::Instant;

/// Inputs that do not originate from the local user.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Transport(TransportEvent),
    /// The realtime emit for a placeholder failed synchronously.
    RealtimeSendFailed { placeholder_id: String },
    FallbackSucceeded { placeholder_id: String, message: Message },
    FallbackFailed { placeholder_id: String, reason: String },
    /// A deadline reported by `next_deadline` may have passed.
    Tick,
}

/// Work for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Send over the realtime channel; losing it is harmless.
    Emit(ClientEvent),
    /// Send a message over the realtime channel. If that fails synchronously,
    /// report `SyncEvent::RealtimeSendFailed`.
    EmitMessage { placeholder_id: String, event: ClientEvent },
    /// Issue the durable request and report its outcome as
    /// `FallbackSucceeded` / `FallbackFailed`.
    PostMessage {
        placeholder_id: String,
        chat_room_id: String,
        request: CreateMessageRequest,
    },
    Notify(Notification),
}

/// State changes worth showing to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ConnectionChanged { connected: bool },
    /// Reconnection gave up.
    ConnectionLost,
    MessagesChanged { chat_room_id: String },
    TypingChanged { chat_room_id: String },
    ChatListChanged,
    SendFailed(SendFailure),
}

fn notify_messages(chat_room_id: &str) -> SyncAction {
    SyncAction::Notify(Notification::MessagesChanged {
        chat_room_id: chat_room_id.to_string(),
    })
}

fn notify_typing(chat_room_id: &str) -> SyncAction {
    SyncAction::Notify(Notification::TypingChanged {
        chat_room_id: chat_room_id.to_string(),
    })
}

#[derive(Debug)]
pub struct SyncEngine {
    local_user: Option<String>,
    connection: ConnectionState,
    rooms: RoomMembership,
    store: MessageStore,
    outbound: OutboundPipeline,
    reads: ReadQueue,
    typing: TypingTracker,
    chat_list: ChatList,
    last_failure: Option<SendFailure>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            local_user: None,
            connection: ConnectionState::default(),
            rooms: RoomMembership::new(),
            store: MessageStore::new(),
            outbound: OutboundPipeline::new(config.fallback_send),
            reads: ReadQueue::new(config.read_mark_delay),
            typing: TypingTracker::new(config.typing_quiescence, config.typing_expiry),
            chat_list: ChatList::new(),
            last_failure: None,
        }
    }

    // ============= Session =============

    /// Binds the engine to a user. Switching users discards the old state.
    pub fn begin_session(&mut self, user_id: &str) {
        if self.local_user.as_deref() == Some(user_id) {
            return;
        }
        self.end_session();
        self.local_user = Some(user_id.to_string());
    }

    /// Releases every subscription, timer and message list.
    pub fn end_session(&mut self) {
        self.local_user = None;
        self.connection = ConnectionState::default();
        self.rooms.clear();
        self.store.clear();
        self.outbound.clear();
        self.reads.clear();
        self.typing.clear();
        self.chat_list.clear();
        self.last_failure = None;
    }

    pub fn local_user(&self) -> Option<&str> {
        self.local_user.as_deref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.connected
    }

    // ============= Rooms =============

    /// Subscribes to a room and makes it the active one.
    pub fn open_room(&mut self, chat_room_id: &str) -> Vec<SyncAction> {
        if self.local_user.is_none() || chat_room_id.trim().is_empty() {
            tracing::debug!("Ignoring open of room {:?}", chat_room_id);
            return Vec::new();
        }

        let mut actions: Vec<SyncAction> = self
            .rooms
            .join(chat_room_id, self.connection.connected)
            .into_iter()
            .map(SyncAction::Emit)
            .collect();

        self.store.open(chat_room_id);
        self.rooms.activate(chat_room_id);
        self.chat_list.set_active(Some(chat_room_id));

        actions.push(notify_messages(chat_room_id));
        actions.push(SyncAction::Notify(Notification::ChatListChanged));
        actions
    }

    /// Leaves a room. Its message list, fallback timers, queued read marks
    /// and typing state go with it.
    pub fn close_room(&mut self, chat_room_id: &str) -> Vec<SyncAction> {
        let was_active = self.rooms.is_active(chat_room_id);

        let mut actions: Vec<SyncAction> = self
            .rooms
            .leave(chat_room_id, self.connection.connected)
            .into_iter()
            .map(SyncAction::Emit)
            .collect();

        let cancelled = self.outbound.cancel_room(chat_room_id);
        if cancelled > 0 {
            tracing::debug!("Cancelled {} pending sends for {}", cancelled, chat_room_id);
        }
        self.reads.drop_room(chat_room_id);
        if self.typing.clear_room(chat_room_id) {
            actions.push(notify_typing(chat_room_id));
        }
        if self.store.close(chat_room_id).is_some() {
            actions.push(notify_messages(chat_room_id));
        }
        if was_active {
            self.chat_list.set_active(None);
        }
        actions
    }

    pub fn room_state(&self, chat_room_id: &str) -> Option<RoomState> {
        self.rooms.state(chat_room_id)
    }

    pub fn active_room(&self) -> Option<&str> {
        self.rooms.active()
    }

    // ============= Sending =============

    /// Sends a message optimistically. Returns the placeholder id.
    pub fn send(
        &mut self,
        chat_room_id: &str,
        message: OutgoingMessage,
        now: Instant,
    ) -> Result<(String, Vec<SyncAction>)> {
        let sender_id = self.local_user.clone().ok_or(Error::NotLoggedIn)?;
        if chat_room_id.trim().is_empty() {
            return Err(Error::InvalidRoom);
        }
        if !self.store.is_open(chat_room_id) {
            return Err(Error::RoomNotOpen(chat_room_id.to_string()));
        }
        message.validate()?;

        let placeholder_id = self.outbound.next_placeholder_id();
        let placeholder =
            message.to_placeholder(placeholder_id.clone(), chat_room_id, &sender_id, Utc::now());
        self.store.push_placeholder(placeholder);

        let mut actions = vec![notify_messages(chat_room_id)];

        if self.connection.connected {
            if self.typing.stop_local(chat_room_id) {
                actions.push(SyncAction::Emit(ClientEvent::TypingStop(RoomRef::new(chat_room_id))));
            }
            self.outbound
                .await_echo(&placeholder_id, chat_room_id, message.clone(), now);
            actions.push(SyncAction::EmitMessage {
                placeholder_id: placeholder_id.clone(),
                event: ClientEvent::SendMessage(SendMessagePayload {
                    chat_room_id: chat_room_id.to_string(),
                    message,
                }),
            });
        } else {
            tracing::info!("Offline, sending {} via fallback", placeholder_id);
            self.outbound
                .start_fallback(&placeholder_id, chat_room_id, message.clone());
            actions.push(SyncAction::PostMessage {
                placeholder_id: placeholder_id.clone(),
                chat_room_id: chat_room_id.to_string(),
                request: CreateMessageRequest { sender_id, message },
            });
        }

        Ok((placeholder_id, actions))
    }

    pub fn pending_sends(&self) -> usize {
        self.outbound.len()
    }

    pub fn last_failure(&self) -> Option<&SendFailure> {
        self.last_failure.as_ref()
    }

    pub fn clear_failure(&mut self) -> Option<SendFailure> {
        self.last_failure.take()
    }

    // ============= Typing =============

    /// Local keystroke in a room. Opens a burst if none is active.
    pub fn keystroke(&mut self, chat_room_id: &str, now: Instant) -> Vec<SyncAction> {
        if !self.connection.connected || !self.rooms.is_subscribed(chat_room_id) {
            return Vec::new();
        }
        if self.typing.keystroke(chat_room_id, now) {
            vec![SyncAction::Emit(ClientEvent::TypingStart(RoomRef::new(chat_room_id)))]
        } else {
            Vec::new()
        }
    }

    pub fn stop_typing(&mut self, chat_room_id: &str) -> Vec<SyncAction> {
        self.typing.stop_local(chat_room_id);
        if !self.connection.connected || chat_room_id.trim().is_empty() {
            return Vec::new();
        }
        vec![SyncAction::Emit(ClientEvent::TypingStop(RoomRef::new(chat_room_id)))]
    }

    pub fn typing_users(&self, chat_room_id: &str) -> Vec<String> {
        self.typing.typing_users(chat_room_id)
    }

    // ============= Chat list =============

    pub fn load_chat_list(&mut self, rooms: Vec<ChatRoom>) -> Vec<SyncAction> {
        let Some(me) = self.local_user.as_deref() else {
            return Vec::new();
        };
        self.chat_list.load(rooms, me);
        if let Some(active) = self.rooms.active() {
            self.chat_list.set_active(Some(active));
        }
        vec![SyncAction::Notify(Notification::ChatListChanged)]
    }

    pub fn chat_list(&self) -> &[ChatSummary] {
        self.chat_list.rows()
    }

    /// Listed room shared with `other_user_id`, if any.
    pub fn chat_with(&self, other_user_id: &str) -> Option<&str> {
        self.chat_list
            .find_by_counterpart(other_user_id)
            .map(|row| row.chat_room_id.as_str())
    }

    /// Lists a room created during this session and opens it.
    pub fn add_chat_room(&mut self, chat_room_id: &str, other_user_id: &str) -> Vec<SyncAction> {
        if self.local_user.is_none() || chat_room_id.trim().is_empty() {
            return Vec::new();
        }
        self.chat_list.insert_new(chat_room_id, other_user_id, Utc::now());
        self.open_room(chat_room_id)
    }

    pub fn messages(&self, chat_room_id: &str) -> &[Message] {
        self.store.messages(chat_room_id)
    }

    // ============= Events =============

    pub fn handle(&mut self, event: SyncEvent, now: Instant) -> Vec<SyncAction> {
        match event {
            SyncEvent::Transport(event) => self.handle_transport(event, now),
            SyncEvent::RealtimeSendFailed { placeholder_id } => self.escalate(&placeholder_id),
            SyncEvent::FallbackSucceeded {
                placeholder_id,
                message,
            } => self.handle_fallback_success(&placeholder_id, message),
            SyncEvent::FallbackFailed {
                placeholder_id,
                reason,
            } => self.handle_fallback_failure(&placeholder_id, reason),
            SyncEvent::Tick => self.handle_tick(now),
        }
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.outbound.next_deadline(),
            self.typing.next_deadline(),
            self.reads.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn handle_transport(&mut self, event: TransportEvent, now: Instant) -> Vec<SyncAction> {
        match event {
            TransportEvent::Connected => {
                let was_connected = self.connection.connected;
                self.connection = ConnectionState {
                    connected: true,
                    reconnect_attempts: 0,
                };

                let mut actions: Vec<SyncAction> = self
                    .rooms
                    .on_connected()
                    .into_iter()
                    .map(SyncAction::Emit)
                    .collect();
                if !was_connected {
                    actions.push(SyncAction::Notify(Notification::ConnectionChanged { connected: true }));
                }
                actions
            }
            TransportEvent::Disconnected { reason } => {
                tracing::info!("Connection dropped: {}", reason);
                self.mark_disconnected()
            }
            TransportEvent::ConnectError { attempt, reason } => {
                tracing::debug!("Connect attempt {} failed: {}", attempt, reason);
                self.connection.reconnect_attempts = attempt;
                self.mark_disconnected()
            }
            TransportEvent::ReconnectExhausted { attempts } => {
                tracing::warn!("Connection lost after {} attempts", attempts);
                let mut actions = self.mark_disconnected();
                actions.push(SyncAction::Notify(Notification::ConnectionLost));
                actions
            }
            TransportEvent::Event(event) => self.handle_server_event(event, now),
        }
    }

    /// Messages and typing sets survive; only the flag and local bursts reset.
    fn mark_disconnected(&mut self) -> Vec<SyncAction> {
        if !self.connection.connected {
            return Vec::new();
        }
        self.connection.connected = false;
        self.rooms.on_disconnected();
        self.typing.end_all_local();
        vec![SyncAction::Notify(Notification::ConnectionChanged { connected: false })]
    }

    fn handle_server_event(&mut self, event: ServerEvent, now: Instant) -> Vec<SyncAction> {
        match event {
            ServerEvent::MessageReceived(message) => self.handle_new_message(message, now),
            ServerEvent::ReadUpdate(update) => {
                if self.store.apply_read_update(&update) > 0 {
                    vec![notify_messages(&update.chat_room_id)]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::TypingShow(typing) => {
                if !self.rooms.is_subscribed(&typing.chat_room_id) {
                    tracing::debug!("typing:show for unsubscribed room {}", typing.chat_room_id);
                    return Vec::new();
                }
                if self.local_user.as_deref() == Some(typing.user_id.as_str()) {
                    return Vec::new();
                }
                if self.typing.show(&typing.chat_room_id, &typing.user_id, now) {
                    vec![notify_typing(&typing.chat_room_id)]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::TypingHide(typing) => {
                if self.typing.hide(&typing.chat_room_id, &typing.user_id) {
                    vec![notify_typing(&typing.chat_room_id)]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::ChatListUpdate(update) => {
                let Some(me) = self.local_user.as_deref() else {
                    return Vec::new();
                };
                if self.chat_list.apply(&update, me) {
                    vec![SyncAction::Notify(Notification::ChatListChanged)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn handle_new_message(&mut self, message: Message, now: Instant) -> Vec<SyncAction> {
        let chat_room_id = message.chat_room_id.clone();
        if !self.rooms.is_subscribed(&chat_room_id) {
            tracing::debug!("message:received for unsubscribed room {}", chat_room_id);
            return Vec::new();
        }

        let from_other = self.local_user.as_deref() != Some(message.sender_id.as_str());
        let message_id = message.id.clone();

        match self.store.ingest(message) {
            None | Some(Ingest::Duplicate) => return Vec::new(),
            Some(Ingest::Replaced { placeholder_id }) => {
                self.outbound.complete(&placeholder_id);
                tracing::debug!("Reconciled {} as {}", placeholder_id, message_id);
            }
            Some(Ingest::Appended) => {}
        }

        if from_other && self.rooms.is_active(&chat_room_id) {
            self.reads.enqueue(&chat_room_id, &message_id, now);
        }
        vec![notify_messages(&chat_room_id)]
    }

    /// Puts a realtime send on the durable path, at most once.
    fn escalate(&mut self, placeholder_id: &str) -> Vec<SyncAction> {
        let Some(sender_id) = self.local_user.clone() else {
            return Vec::new();
        };
        let Some(send) = self.outbound.escalate(placeholder_id) else {
            return Vec::new();
        };

        tracing::info!("No confirmation for {}, using fallback", placeholder_id);
        vec![SyncAction::PostMessage {
            placeholder_id: placeholder_id.to_string(),
            chat_room_id: send.chat_room_id.clone(),
            request: CreateMessageRequest {
                sender_id,
                message: send.message.clone(),
            },
        }]
    }

    fn handle_fallback_success(&mut self, placeholder_id: &str, message: Message) -> Vec<SyncAction> {
        let Some(send) = self.outbound.complete(placeholder_id) else {
            tracing::debug!("Discarding late fallback result for {}", placeholder_id);
            return Vec::new();
        };

        if self
            .store
            .confirm_placeholder(&send.chat_room_id, placeholder_id, message)
        {
            vec![notify_messages(&send.chat_room_id)]
        } else {
            Vec::new()
        }
    }

    fn handle_fallback_failure(&mut self, placeholder_id: &str, reason: String) -> Vec<SyncAction> {
        let Some(send) = self.outbound.complete(placeholder_id) else {
            tracing::debug!("Discarding late fallback failure for {}", placeholder_id);
            return Vec::new();
        };

        tracing::warn!("Send {} failed: {}", placeholder_id, reason);
        self.store.remove(&send.chat_room_id, placeholder_id);

        let failure = SendFailure {
            chat_room_id: send.chat_room_id,
            placeholder_id: placeholder_id.to_string(),
            message: send.message,
            reason,
        };
        self.last_failure = Some(failure.clone());

        vec![
            notify_messages(&failure.chat_room_id),
            SyncAction::Notify(Notification::SendFailed(failure)),
        ]
    }

    fn handle_tick(&mut self, now: Instant) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        for placeholder_id in self.outbound.due(now) {
            actions.extend(self.escalate(&placeholder_id));
        }

        for chat_room_id in self.typing.expire_local(now) {
            if self.connection.connected {
                actions.push(SyncAction::Emit(ClientEvent::TypingStop(RoomRef::new(&chat_room_id))));
            }
        }

        for chat_room_id in self.typing.expire_remote(now) {
            actions.push(notify_typing(&chat_room_id));
        }

        for payload in self.reads.take_due(now) {
            if self.connection.connected && self.rooms.is_active(&payload.chat_room_id) {
                actions.push(SyncAction::Emit(ClientEvent::MarkRead(payload)));
            }
        }

        actions
    }
}
