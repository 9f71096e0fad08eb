//! Messaging Transport
//!
//! Turns WebSocket connections into [`PeerLink`]s: a bounded outbound queue
//! drained by a writer task and an inbound queue filled by a reader task.
//! Malformed frames and closed sockets both surface as
//! [`Inbound::Closed`], which the proxies treat as a disconnect.
//!
//! Liveness metadata for every peer lives in the [`ConnectionRegistry`].
//! Nothing outside this module touches the registry map directly; callers
//! hold a [`PeerId`] handle.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::network::protocol::{Envelope, ProtocolError};

/// Default capacity of a link's outbound queue.
pub const DEFAULT_LINK_CAPACITY: usize = 64;

/// How long a closing link may spend flushing when the caller has no deadline.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// How long a TCP connection may take to complete the WebSocket upgrade.
pub const UPGRADE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed TCP accept before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket level failure (bind, accept).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The link was closed.
    #[error("link closed")]
    Closed,

    /// The peer did not finish the WebSocket upgrade in time.
    #[error("WebSocket upgrade timed out")]
    UpgradeTimeout,
}

/// Registry handle of one peer.
pub type PeerId = u64;

/// What a peer is connected as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Player process of a team.
    Team(usize),
    /// Passive observer.
    Viewer,
    /// Client side of a link (inside a player process or viewer).
    Referee,
}

/// Liveness metadata of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    /// Handle.
    pub id: PeerId,
    /// Remote address.
    pub addr: SocketAddr,
    /// Role.
    pub role: PeerRole,
    /// When the link was established.
    pub connected_at: DateTime<Utc>,
    /// Last inbound frame.
    pub last_seen: DateTime<Utc>,
    /// Timeouts since the last reply.
    pub consecutive_timeouts: u32,
    /// False once the link is closed.
    pub open: bool,
}

/// Identity → endpoint and liveness.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    peers: Arc<RwLock<BTreeMap<PeerId, PeerInfo>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer.
    pub async fn register(&self, addr: SocketAddr, role: PeerRole) -> PeerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        self.peers.write().await.insert(
            id,
            PeerInfo {
                id,
                addr,
                role,
                connected_at: now,
                last_seen: now,
                consecutive_timeouts: 0,
                open: true,
            },
        );
        id
    }

    /// Record inbound activity.
    pub async fn touch(&self, id: PeerId) {
        if let Some(peer) = self.peers.write().await.get_mut(&id) {
            peer.last_seen = Utc::now();
        }
    }

    /// Count a missed deadline, returning the new consecutive count.
    pub async fn record_timeout(&self, id: PeerId) -> u32 {
        match self.peers.write().await.get_mut(&id) {
            Some(peer) => {
                peer.consecutive_timeouts += 1;
                peer.consecutive_timeouts
            }
            None => 0,
        }
    }

    /// Reset the consecutive timeout counter after a reply.
    pub async fn reset_timeouts(&self, id: PeerId) {
        if let Some(peer) = self.peers.write().await.get_mut(&id) {
            peer.consecutive_timeouts = 0;
        }
    }

    /// Mark a peer as gone.
    pub async fn mark_closed(&self, id: PeerId) {
        if let Some(peer) = self.peers.write().await.get_mut(&id) {
            peer.open = false;
        }
    }

    /// Metadata of one peer.
    pub async fn get(&self, id: PeerId) -> Option<PeerInfo> {
        self.peers.read().await.get(&id).cloned()
    }

    /// Metadata of every peer, by id.
    pub async fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Number of open links.
    pub async fn open_count(&self) -> usize {
        self.peers.read().await.values().filter(|p| p.open).count()
    }
}

/// One item from a link's inbound queue.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded envelope.
    Envelope(Envelope),
    /// The link is gone; no further items follow.
    Closed {
        /// Why.
        reason: String,
    },
}

/// Bidirectional envelope channel to one peer.
pub struct PeerLink {
    id: PeerId,
    addr: SocketAddr,
    registry: ConnectionRegistry,
    outbound: Option<mpsc::Sender<Envelope>>,
    inbound: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PeerLink {
    /// Start reader and writer tasks for an established WebSocket.
    pub async fn spawn<S>(
        ws: WebSocketStream<S>,
        addr: SocketAddr,
        role: PeerRole,
        registry: ConnectionRegistry,
        capacity: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = registry.register(addr, role).await;
        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(capacity.max(1));

        // Writer: drain the outbound queue, then close the socket.
        let writer = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let text = match envelope.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to serialize envelope for {}: {}", addr, e);
                        continue;
                    }
                };
                trace!(peer = %addr, frame = %text, "send");
                if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.send(WsMessage::Close(None)).await;
            let _ = ws_sender.close().await;
        });

        // Reader: decode frames until the peer leaves or misbehaves.
        let reader_registry = registry.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_receiver.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        reader_registry.touch(id).await;
                        trace!(peer = %addr, frame = %text, "recv");
                        match Envelope::from_json(&text) {
                            Ok(envelope) => {
                                if in_tx.send(Inbound::Envelope(envelope)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => break ProtocolError::Malformed(e).to_string(),
                        }
                    }
                    Some(Ok(WsMessage::Binary(_))) => break ProtocolError::NotText.to_string(),
                    Some(Ok(WsMessage::Close(_))) | None => break "connection closed".to_string(),
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => break format!("WebSocket error: {e}"),
                }
            };
            debug!("Link {} ({}) closed: {}", id, addr, reason);
            reader_registry.mark_closed(id).await;
            let _ = in_tx.send(Inbound::Closed { reason }).await;
        });

        Self {
            id,
            addr,
            registry,
            outbound: Some(out_tx),
            inbound: in_rx,
            reader,
            writer,
        }
    }

    /// Registry handle.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Registry the link reports to.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Queue an envelope. Waits while the outbound queue is full.
    pub async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(envelope).await.map_err(|_| TransportError::Closed)
    }

    /// Next inbound item. Returns `Closed` forever once the peer is gone.
    pub async fn recv(&mut self) -> Inbound {
        match self.inbound.recv().await {
            Some(item) => item,
            None => Inbound::Closed {
                reason: "link closed".to_string(),
            },
        }
    }

    /// Flush queued envelopes and close the connection.
    pub async fn close(&mut self) {
        if self.outbound.take().is_some() {
            self.reader.abort();
            self.registry.mark_closed(self.id).await;
            debug!("Closing link {} ({})", self.id, self.addr);
        }
    }

    /// Close, then give the writer `grace` to flush what is queued.
    ///
    /// A peer that stops reading cannot hold the caller longer than
    /// `grace`: the writer is aborted and the socket dropped unflushed.
    /// Returns whether the queue was flushed.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        self.close().await;
        if self.writer.is_finished() {
            return true;
        }
        match timeout(grace, &mut self.writer).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Link {} ({}) did not flush within {:?}, aborting", self.id, self.addr, grace);
                self.writer.abort();
                false
            }
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// TCP listener that upgrades connections to WebSocket links.
pub struct Listener {
    inner: TcpListener,
    registry: ConnectionRegistry,
    capacity: usize,
}

impl Listener {
    /// Bind to an address (port 0 picks a free port).
    pub async fn bind(
        addr: SocketAddr,
        registry: ConnectionRegistry,
        capacity: usize,
    ) -> Result<Self, TransportError> {
        let inner = TcpListener::bind(addr).await?;
        info!("Listening on {}", inner.local_addr()?);
        Ok(Self {
            inner,
            registry,
            capacity,
        })
    }

    /// Actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept one TCP connection without upgrading it.
    pub async fn accept_tcp(&self) -> Result<PendingPeer, TransportError> {
        let (stream, addr) = self.inner.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok(PendingPeer {
            stream,
            addr,
            registry: self.registry.clone(),
            capacity: self.capacity,
        })
    }

    /// Accept one connection and complete the WebSocket handshake.
    pub async fn accept(&self, role: PeerRole) -> Result<PeerLink, TransportError> {
        self.accept_tcp().await?.upgrade(role, UPGRADE_TIMEOUT).await
    }

    /// Accept connections until one upgrades to a link or `deadline` passes.
    ///
    /// Connections that fail or stall the upgrade are logged and skipped.
    pub async fn accept_before(&self, role: PeerRole, deadline: Instant) -> Option<PeerLink> {
        loop {
            let pending = match timeout_at(deadline, self.accept_tcp()).await {
                Ok(Ok(pending)) => pending,
                Ok(Err(e)) => {
                    warn!("{:?} accept failed: {}", role, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(_) => return None,
            };
            let addr = pending.addr();
            let within = UPGRADE_TIMEOUT.min(deadline.saturating_duration_since(Instant::now()));
            match pending.upgrade(role, within).await {
                Ok(link) => return Some(link),
                Err(e) => warn!("Skipping {:?} connection from {}: {}", role, addr, e),
            }
        }
    }
}

/// TCP connection that has not completed the WebSocket upgrade yet.
pub struct PendingPeer {
    stream: TcpStream,
    addr: SocketAddr,
    registry: ConnectionRegistry,
    capacity: usize,
}

impl PendingPeer {
    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the WebSocket handshake, giving up after `within`.
    pub async fn upgrade(self, role: PeerRole, within: Duration) -> Result<PeerLink, TransportError> {
        let ws = timeout(within, accept_async(self.stream))
            .await
            .map_err(|_| TransportError::UpgradeTimeout)??;
        info!("Accepted {:?} from {}", role, self.addr);
        Ok(PeerLink::spawn(ws, self.addr, role, self.registry, self.capacity).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{Message, Ready};
    use tokio_tungstenite::connect_async;

    fn ready(name: &str) -> Envelope {
        Message::Ready(Ready {
            team_name: name.to_string(),
        })
        .to_envelope(1)
        .unwrap()
    }

    #[tokio::test]
    async fn test_registry_counts_timeouts() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("127.0.0.1:1".parse().unwrap(), PeerRole::Team(0)).await;
        assert_eq!(registry.record_timeout(id).await, 1);
        assert_eq!(registry.record_timeout(id).await, 2);
        registry.reset_timeouts(id).await;
        assert_eq!(registry.get(id).await.unwrap().consecutive_timeouts, 0);
        registry.mark_closed(id).await;
        assert_eq!(registry.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_link_exchanges_envelopes() {
        let registry = ConnectionRegistry::new();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), registry.clone(), 8)
            .await
            .unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let client = tokio::spawn(async move {
            let (ws, _) = connect_async(url).await.unwrap();
            let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
            let mut link = PeerLink::spawn(ws, addr, PeerRole::Referee, ConnectionRegistry::new(), 8).await;
            link.send(ready("client")).await.unwrap();
            match link.recv().await {
                Inbound::Envelope(env) => env,
                Inbound::Closed { reason } => panic!("closed: {reason}"),
            }
        });

        let mut server_link = listener.accept(PeerRole::Team(0)).await.unwrap();
        match server_link.recv().await {
            Inbound::Envelope(env) => assert_eq!(env, ready("client")),
            Inbound::Closed { reason } => panic!("closed: {reason}"),
        }
        server_link.send(ready("server")).await.unwrap();

        let echoed = client.await.unwrap();
        assert_eq!(echoed, ready("server"));

        let info = registry.get(server_link.id()).await.unwrap();
        assert_eq!(info.role, PeerRole::Team(0));
        assert!(info.open);
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_link() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), ConnectionRegistry::new(), 8)
            .await
            .unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(WsMessage::Text("{not json".to_string())).await.unwrap();
            // Keep the socket open until the server reacts
            let _ = ws.next().await;
        });

        let mut link = listener.accept(PeerRole::Team(1)).await.unwrap();
        match link.recv().await {
            Inbound::Closed { reason } => assert!(reason.contains("malformed")),
            Inbound::Envelope(env) => panic!("unexpected envelope {env:?}"),
        }
        assert!(link.shutdown(Duration::from_secs(1)).await);
        client.await.unwrap();
    }
}
