//! Network layer for ChatSync - HTTP API and WebSocket transport

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connection::{Connector, TransportEvent, TransportLink};
use crate::error::{Error, Result};
use crate::models::*;
use crate::protocol::{ClientEvent, ServerEvent};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use url::Url;

// ============================================================================
// HTTP API
// ============================================================================

/// Request/response backend used for the durable send path and the initial
/// chat list.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// `POST /chatrooms/{roomId}/messages`
    async fn create_message(
        &self,
        token: &str,
        chat_room_id: &str,
        request: &CreateMessageRequest,
    ) -> Result<Message>;

    /// `GET /chatrooms/user/{userId}`
    async fn list_chat_rooms(&self, token: &str, user_id: &str) -> Result<Vec<ChatRoom>>;

    /// `POST /chatrooms`
    async fn create_chat_room(&self, token: &str, request: &CreateChatRoomRequest) -> Result<ChatRoom>;
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_base_url(&config.http_url())
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(resp: Response) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(Error::Http(format!("{} - {}", status, text)))
    }
}

#[async_trait]
impl MessageApi for ApiClient {
    async fn create_message(
        &self,
        token: &str,
        chat_room_id: &str,
        request: &CreateMessageRequest,
    ) -> Result<Message> {
        let resp = self
            .client
            .post(format!("{}/chatrooms/{}/messages", self.base_url, chat_room_id))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let message: Message = Self::check(resp).await?.json().await?;
        Ok(message)
    }

    async fn list_chat_rooms(&self, token: &str, user_id: &str) -> Result<Vec<ChatRoom>> {
        let resp = self
            .client
            .get(format!("{}/chatrooms/user/{}", self.base_url, user_id))
            .bearer_auth(token)
            .send()
            .await?;

        let rooms: Vec<ChatRoom> = Self::check(resp).await?.json().await?;
        Ok(rooms)
    }

    async fn create_chat_room(&self, token: &str, request: &CreateChatRoomRequest) -> Result<ChatRoom> {
        let resp = self
            .client
            .post(format!("{}/chatrooms", self.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let room: ChatRoom = Self::check(resp).await?.json().await?;
        Ok(room)
    }
}

// ============================================================================
// WebSocket transport
// ============================================================================

/// Opens WebSocket transports with the configured reconnect policy.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: ClientConfig,
}

impl WsConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Handshake URL; the identity travels as query parameters.
    pub fn handshake_url(&self, identity: &Identity) -> Result<Url> {
        let mut url = Url::parse(&self.config.ws_url())?;
        url.query_pairs_mut()
            .append_pair("userId", &identity.user_id)
            .append_pair("token", &identity.token);
        Ok(url)
    }
}

impl Connector for WsConnector {
    /// Spawns the socket driver; must be called inside a tokio runtime.
    fn open(&self, identity: &Identity) -> Result<TransportLink> {
        let url = self.handshake_url(identity)?;
        let (out_tx, out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let task = tokio::spawn(drive_socket(url, self.config.reconnect.clone(), out_rx, in_tx));

        Ok(TransportLink::new(out_tx, in_rx, Some(task)))
    }
}

/// Connects, pumps frames until the socket drops, and retries per `policy`.
async fn drive_socket(
    url: Url,
    policy: ReconnectPolicy,
    mut outgoing: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut failures: u32 = 0;

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                failures = 0;
                tracing::info!("WebSocket connected to {}", url.host_str().unwrap_or_default());
                if events.send(TransportEvent::Connected).is_err() {
                    return;
                }

                let Some(reason) = pump(ws_stream, &mut outgoing, &events).await else {
                    return;
                };
                tracing::warn!("WebSocket disconnected: {}", reason);
                if events.send(TransportEvent::Disconnected { reason }).is_err() {
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("WebSocket connect attempt {} failed: {}", failures, e);
                let event = TransportEvent::ConnectError {
                    attempt: failures,
                    reason: e.to_string(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }

        if !policy.should_retry(failures) {
            tracing::warn!("Giving up after {} connect attempts", failures);
            let _ = events.send(TransportEvent::ReconnectExhausted { attempts: failures });
            return;
        }
        tokio::time::sleep(policy.delay_for(failures.max(1))).await;
    }
}

/// Relays frames in both directions. Returns why the socket ended, or `None`
/// when the session side went away.
async fn pump<S>(
    stream: S,
    outgoing: &mut mpsc::UnboundedReceiver<ClientEvent>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<String>
where
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match ServerEvent::from_frame(&text) {
                    Ok(event) => {
                        if events.send(TransportEvent::Event(event)).is_err() {
                            return None;
                        }
                    }
                    Err(e) => tracing::warn!("Skipping malformed frame: {}", e),
                },
                Some(Ok(WsMessage::Close(_))) | None => return Some("closed by server".to_string()),
                Some(Err(e)) => return Some(e.to_string()),
                Some(Ok(_)) => {}
            },
            event = outgoing.recv() => match event {
                Some(event) => match event.to_frame() {
                    Ok(frame) => {
                        if let Err(e) = write.send(WsMessage::Text(frame)).await {
                            return Some(e.to_string());
                        }
                    }
                    Err(e) => tracing::warn!("Dropping unencodable event: {}", e),
                },
                None => {
                    let _ = write.close().await;
                    return None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_carries_identity() {
        let connector = WsConnector::new(ClientConfig::new("chat.example.com", 443, true));
        let url = connector
            .handshake_url(&Identity::new("user 1", "abc"))
            .unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws");
        assert_eq!(url.query(), Some("userId=user+1&token=abc"));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let api = ApiClient::with_base_url("http://localhost:3050/").unwrap();
        assert_eq!(api.base_url, "http://localhost:3050");
    }
}
