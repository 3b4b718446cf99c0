//! Session object: owns the sync engine, the connection and the HTTP API,
//! and performs the I/O the engine asks for.

use crate::config::{ClientConfig, SyncConfig};
use crate::connection::{ConnectionManager, Connector, TransportEvent};
use crate::engine::{Notification, SyncAction, SyncEngine, SyncEvent};
use crate::error::{Error, Result};
use crate::models::{
    ChatSummary, CreateChatRoomRequest, CreateMessageRequest, Identity, Message, OutgoingMessage,
};
use crate::network::{ApiClient, MessageApi, WsConnector};
use crate::outbound::SendFailure;
use crate::rooms::RoomState;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Chat client for one application session.
///
/// All methods must be called from within a tokio runtime: fallback sends
/// are spawned as tasks.
pub struct ChatClient<C: Connector = WsConnector> {
    engine: SyncEngine,
    connections: ConnectionManager<C>,
    api: Arc<dyn MessageApi>,
    identity: Option<Identity>,
    results_tx: mpsc::UnboundedSender<SyncEvent>,
    results_rx: mpsc::UnboundedReceiver<SyncEvent>,
    notifications: VecDeque<Notification>,
}

impl ChatClient<WsConnector> {
    /// Client talking to the configured backend over WebSocket and HTTP.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let api = ApiClient::new(config)?;
        Ok(Self::new(
            config.sync(),
            WsConnector::new(config.clone()),
            Arc::new(api),
        ))
    }
}

impl<C: Connector> ChatClient<C> {
    pub fn new(config: SyncConfig, connector: C, api: Arc<dyn MessageApi>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            engine: SyncEngine::new(config),
            connections: ConnectionManager::new(connector),
            api,
            identity: None,
            results_tx,
            results_rx,
            notifications: VecDeque::new(),
        }
    }

    // ============= Session =============

    /// Binds the client to an identity and opens its transport.
    ///
    /// `None` or an identity without a credential ends the session instead.
    /// Returns whether a transport is open.
    pub fn connect(&mut self, identity: Option<Identity>) -> bool {
        let Some(identity) = identity.filter(Identity::is_complete) else {
            self.disconnect();
            return false;
        };

        let replacing = self
            .connections
            .identity()
            .is_some_and(|current| current != &identity);
        if replacing {
            let actions = self.engine.handle(
                SyncEvent::Transport(TransportEvent::Disconnected {
                    reason: "identity changed".to_string(),
                }),
                Instant::now(),
            );
            self.execute(actions);
        }

        self.engine.begin_session(&identity.user_id);
        let open = self.connections.connect(Some(&identity));
        self.identity = Some(identity);
        open
    }

    /// Reopens the transport for the current identity when the old one has
    /// given up. Session state is kept and rooms are re-joined on connect.
    pub fn reconnect(&mut self) -> bool {
        match self.identity.clone() {
            Some(identity) => self.connect(Some(identity)),
            None => false,
        }
    }

    /// Closes the transport and forgets all session state.
    pub fn disconnect(&mut self) {
        let was_connected = self.engine.is_connected();
        self.connections.disconnect();
        self.engine.end_session();
        self.identity = None;
        if was_connected {
            self.notifications
                .push_back(Notification::ConnectionChanged { connected: false });
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Fetches the initial chat list over HTTP.
    pub async fn load_chat_list(&mut self) -> Result<()> {
        let identity = self.identity.clone().ok_or(Error::NotLoggedIn)?;
        let rooms = self
            .api
            .list_chat_rooms(&identity.token, &identity.user_id)
            .await?;

        tracing::debug!("Loaded {} chat rooms", rooms.len());
        let actions = self.engine.load_chat_list(rooms);
        self.execute(actions);
        Ok(())
    }

    /// Opens the conversation with `other_user_id`, creating the room on the
    /// server first when none is listed. Returns the room id.
    pub async fn start_chat(&mut self, other_user_id: &str) -> Result<String> {
        let identity = self.identity.clone().ok_or(Error::NotLoggedIn)?;
        if other_user_id.trim().is_empty() || other_user_id == identity.user_id {
            return Err(Error::InvalidUser(other_user_id.to_string()));
        }

        if let Some(existing) = self.engine.chat_with(other_user_id).map(str::to_string) {
            self.open_room(&existing);
            return Ok(existing);
        }

        let request = CreateChatRoomRequest {
            current_user_id: identity.user_id.clone(),
            other_user_id: other_user_id.to_string(),
        };
        let room = self.api.create_chat_room(&identity.token, &request).await?;

        tracing::info!("Started chat room {} with {}", room.id, other_user_id);
        let actions = self.engine.add_chat_room(&room.id, other_user_id);
        self.execute(actions);
        Ok(room.id)
    }

    // ============= Rooms =============

    pub fn open_room(&mut self, chat_room_id: &str) {
        let actions = self.engine.open_room(chat_room_id);
        self.execute(actions);
    }

    pub fn close_room(&mut self, chat_room_id: &str) {
        let actions = self.engine.close_room(chat_room_id);
        self.execute(actions);
    }

    pub fn room_state(&self, chat_room_id: &str) -> Option<RoomState> {
        self.engine.room_state(chat_room_id)
    }

    // ============= Messages =============

    /// Sends a message and returns its placeholder id.
    pub fn send(&mut self, chat_room_id: &str, message: OutgoingMessage) -> Result<String> {
        let (placeholder_id, actions) = self.engine.send(chat_room_id, message, Instant::now())?;
        self.execute(actions);
        Ok(placeholder_id)
    }

    pub fn send_text(&mut self, chat_room_id: &str, text: &str) -> Result<String> {
        self.send(chat_room_id, OutgoingMessage::text(text))
    }

    pub fn messages(&self, chat_room_id: &str) -> &[Message] {
        self.engine.messages(chat_room_id)
    }

    pub fn last_failure(&self) -> Option<&SendFailure> {
        self.engine.last_failure()
    }

    pub fn clear_failure(&mut self) -> Option<SendFailure> {
        self.engine.clear_failure()
    }

    // ============= Typing =============

    pub fn keystroke(&mut self, chat_room_id: &str) {
        let actions = self.engine.keystroke(chat_room_id, Instant::now());
        self.execute(actions);
    }

    pub fn stop_typing(&mut self, chat_room_id: &str) {
        let actions = self.engine.stop_typing(chat_room_id);
        self.execute(actions);
    }

    pub fn typing_users(&self, chat_room_id: &str) -> Vec<String> {
        self.engine.typing_users(chat_room_id)
    }

    pub fn chat_list(&self) -> &[ChatSummary] {
        self.engine.chat_list()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    // ============= Event loop =============

    /// Notifications already produced, without waiting.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Drives transport events, fallback results and timers until the next
    /// notification is available. Cancel-safe.
    pub async fn next_notification(&mut self) -> Notification {
        loop {
            if let Some(notification) = self.notifications.pop_front() {
                return notification;
            }

            let event = self.next_event().await;
            let actions = self.engine.handle(event, Instant::now());
            self.execute(actions);
        }
    }

    async fn next_event(&mut self) -> SyncEvent {
        let deadline = self.engine.next_deadline();

        tokio::select! {
            event = self.connections.recv() => SyncEvent::Transport(event),
            Some(event) = self.results_rx.recv() => event,
            _ = sleep_until(deadline) => SyncEvent::Tick,
        }
    }

    fn execute(&mut self, actions: Vec<SyncAction>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                SyncAction::Emit(event) => {
                    if let Err(e) = self.connections.emit(event) {
                        tracing::debug!("Dropped realtime event: {}", e);
                    }
                }
                SyncAction::EmitMessage {
                    placeholder_id,
                    event,
                } => {
                    if let Err(e) = self.connections.emit(event) {
                        tracing::warn!("Realtime send of {} failed: {}", placeholder_id, e);
                        let followup = self
                            .engine
                            .handle(SyncEvent::RealtimeSendFailed { placeholder_id }, Instant::now());
                        queue.extend(followup);
                    }
                }
                SyncAction::PostMessage {
                    placeholder_id,
                    chat_room_id,
                    request,
                } => self.spawn_fallback(placeholder_id, chat_room_id, request),
                SyncAction::Notify(notification) => self.notifications.push_back(notification),
            }
        }
    }

    /// Issues the durable request on a separate task; the outcome comes back
    /// through `results_rx`.
    fn spawn_fallback(&self, placeholder_id: String, chat_room_id: String, request: CreateMessageRequest) {
        let Some(token) = self.identity.as_ref().map(|identity| identity.token.clone()) else {
            let _ = self.results_tx.send(SyncEvent::FallbackFailed {
                placeholder_id,
                reason: Error::NotLoggedIn.to_string(),
            });
            return;
        };

        let api = Arc::clone(&self.api);
        let results = self.results_tx.clone();

        tokio::spawn(async move {
            let event = match api.create_message(&token, &chat_room_id, &request).await {
                Ok(message) => SyncEvent::FallbackSucceeded {
                    placeholder_id,
                    message,
                },
                Err(e) => SyncEvent::FallbackFailed {
                    placeholder_id,
                    reason: e.to_string(),
                },
            };
            let _ = results.send(event);
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
