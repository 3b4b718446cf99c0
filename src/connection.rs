//! Connection management.
//!
//! A [`ConnectionManager`] owns at most one live transport, bound to the
//! identity it was opened for. Transports are reached through
//! [`TransportLink`]: a pair of channels to a driver task that does the actual
//! socket I/O (see `network::WsConnector`) or, in tests, to a [`RemoteEnd`].

use crate::error::{Error, Result};
use crate::models::Identity;
use crate::protocol::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// Transport
// ============================================================================

/// What a transport reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { attempt: u32, reason: String },
    /// The retry budget is spent; the transport will not reconnect.
    ReconnectExhausted { attempts: u32 },
    Event(ServerEvent),
}

/// Connection flag mirrored from transport events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

pub struct TransportLink {
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
    closed: bool,
    gave_up: bool,
}

impl TransportLink {
    pub fn new(
        outgoing: mpsc::UnboundedSender<ClientEvent>,
        incoming: mpsc::UnboundedReceiver<TransportEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            task,
            closed: false,
            gave_up: false,
        }
    }

    /// In-memory link. The [`RemoteEnd`] plays the transport: it injects
    /// events and observes what the session sends.
    pub fn pair() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self::new(out_tx, in_rx, None),
            RemoteEnd {
                events: in_tx,
                sent: out_rx,
            },
        )
    }

    pub fn send(&self, event: ClientEvent) -> Result<()> {
        self.outgoing
            .send(event)
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    /// Next transport event. Reports a single `Disconnected` once the driver
    /// is gone, then never resolves.
    pub async fn recv(&mut self) -> TransportEvent {
        if !self.closed {
            match self.incoming.recv().await {
                Some(event) => {
                    if matches!(event, TransportEvent::ReconnectExhausted { .. }) {
                        self.gave_up = true;
                    }
                    return event;
                }
                None => {
                    self.closed = true;
                    return TransportEvent::Disconnected {
                        reason: "transport closed".to_string(),
                    };
                }
            }
        }
        std::future::pending().await
    }

    /// Whether the driver may still deliver a connection. False once it has
    /// stopped retrying or its channel has ended.
    pub fn is_live(&self) -> bool {
        !self.closed && !self.gave_up
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Far side of an in-memory [`TransportLink`].
pub struct RemoteEnd {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<ClientEvent>,
}

impl RemoteEnd {
    /// Returns `false` once the link has been dropped.
    pub fn push(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn push_event(&self, event: ServerEvent) -> bool {
        self.push(TransportEvent::Event(event))
    }

    /// Everything the session has sent so far.
    pub fn drain_sent(&mut self) -> Vec<ClientEvent> {
        let mut sent = Vec::new();
        while let Ok(event) = self.sent.try_recv() {
            sent.push(event);
        }
        sent
    }

    pub fn is_link_dropped(&self) -> bool {
        self.events.is_closed()
    }
}

/// Opens transports for an identity.
pub trait Connector {
    fn open(&self, identity: &Identity) -> Result<TransportLink>;
}

// ============================================================================
// Connection manager
// ============================================================================

pub struct Connection {
    identity: Identity,
    link: TransportLink,
}

impl Connection {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

pub struct ConnectionManager<C> {
    connector: C,
    current: Option<Connection>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: None,
        }
    }

    /// Ensures a live transport for `identity`. Returns whether one exists.
    ///
    /// A missing or incomplete identity tears down any current transport and
    /// returns `false`. A different identity replaces the old transport,
    /// which is disposed first. The same identity keeps a live transport but
    /// reopens one that has given up.
    pub fn connect(&mut self, identity: Option<&Identity>) -> bool {
        let Some(identity) = identity.filter(|identity| identity.is_complete()) else {
            tracing::warn!("No identity or credential, staying offline");
            self.disconnect();
            return false;
        };

        if let Some(current) = &self.current {
            if current.identity == *identity {
                if current.link.is_live() {
                    return true;
                }
                tracing::info!("Transport for {} is dead, reopening", identity.user_id);
            }
        }

        self.disconnect();

        match self.connector.open(identity) {
            Ok(link) => {
                tracing::info!("Opened connection for {}", identity.user_id);
                self.current = Some(Connection {
                    identity: identity.clone(),
                    link,
                });
                true
            }
            Err(e) => {
                tracing::warn!("Failed to open connection for {}: {}", identity.user_id, e);
                false
            }
        }
    }

    /// Drops the live transport, if any. Returns whether there was one.
    pub fn disconnect(&mut self) -> bool {
        match self.current.take() {
            Some(connection) => {
                tracing::info!("Closing connection for {}", connection.identity.user_id);
                true
            }
            None => false,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.current.as_ref().map(Connection::identity)
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Whether the current transport can still connect on its own.
    pub fn is_live(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|connection| connection.link.is_live())
    }

    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        self.current
            .as_ref()
            .ok_or(Error::NotConnected)?
            .link
            .send(event)
    }

    /// Next event from the live transport; never resolves without one.
    pub async fn recv(&mut self) -> TransportEvent {
        match self.current.as_mut() {
            Some(connection) => connection.link.recv().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomRef;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Hands out in-memory links and keeps their far ends.
    #[derive(Clone, Default)]
    struct MemoryConnector {
        opened: Arc<Mutex<Vec<(String, RemoteEnd)>>>,
    }

    impl Connector for MemoryConnector {
        fn open(&self, identity: &Identity) -> Result<TransportLink> {
            let (link, remote) = TransportLink::pair();
            self.opened.lock().push((identity.user_id.clone(), remote));
            Ok(link)
        }
    }

    #[test]
    fn test_absent_identity_stays_offline() {
        let connector = MemoryConnector::default();
        let mut manager = ConnectionManager::new(connector.clone());

        assert!(!manager.connect(None));
        assert!(!manager.connect(Some(&Identity::new("alice", ""))));
        assert!(connector.opened.lock().is_empty());
        assert!(matches!(
            manager.emit(ClientEvent::JoinRoom(RoomRef::new("r1"))),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_same_identity_reuses_transport() {
        let connector = MemoryConnector::default();
        let mut manager = ConnectionManager::new(connector.clone());
        let alice = Identity::new("alice", "t1");

        assert!(manager.connect(Some(&alice)));
        assert!(manager.connect(Some(&alice)));
        assert_eq!(connector.opened.lock().len(), 1);
    }

    #[test]
    fn test_identity_change_disposes_old_transport() {
        let connector = MemoryConnector::default();
        let mut manager = ConnectionManager::new(connector.clone());

        manager.connect(Some(&Identity::new("alice", "t1")));
        manager.connect(Some(&Identity::new("bob", "t2")));

        let opened = connector.opened.lock();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].1.is_link_dropped());
        assert!(!opened[1].1.is_link_dropped());
        assert_eq!(manager.identity().map(|i| i.user_id.as_str()), Some("bob"));
    }

    #[tokio::test]
    async fn test_closed_link_reports_disconnect_once() {
        let (mut link, remote) = TransportLink::pair();
        remote.push(TransportEvent::Connected);
        drop(remote);

        assert_eq!(link.recv().await, TransportEvent::Connected);
        assert!(matches!(link.recv().await, TransportEvent::Disconnected { .. }));

        let again = tokio::time::timeout(std::time::Duration::from_millis(10), link.recv()).await;
        assert!(again.is_err());
        assert!(!link.is_live());
    }

    #[tokio::test]
    async fn test_exhausted_transport_is_reopened() {
        let connector = MemoryConnector::default();
        let mut manager = ConnectionManager::new(connector.clone());
        let alice = Identity::new("alice", "t1");

        assert!(manager.connect(Some(&alice)));
        connector.opened.lock()[0]
            .1
            .push(TransportEvent::ReconnectExhausted { attempts: 3 });
        assert_eq!(
            manager.recv().await,
            TransportEvent::ReconnectExhausted { attempts: 3 }
        );
        assert!(manager.is_open());
        assert!(!manager.is_live());

        assert!(manager.connect(Some(&alice)));
        let opened = connector.opened.lock();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].1.is_link_dropped());
        assert!(!opened[1].1.is_link_dropped());
        drop(opened);
        assert!(manager.is_live());
    }
}
