//! Viewer Proxies
//!
//! Viewers are passive observers on the publish channel. The [`ViewerHub`]
//! delivers every message to every viewer in order; a viewer that cannot
//! take a message within the grace period is dropped so the match is never
//! held up by a slow observer.

use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::network::protocol::{Envelope, Message};
use crate::network::transport::{
    Listener, PeerLink, PeerRole, TransportError, ACCEPT_BACKOFF, UPGRADE_TIMEOUT,
};

/// A viewer refused or failed to take a message.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The viewer is gone.
    #[error("viewer disconnected")]
    Disconnected,
    /// The viewer did not take the message within the grace period.
    #[error("viewer too slow")]
    TooSlow,
}

impl From<TransportError> for DeliveryError {
    fn from(_: TransportError) -> Self {
        DeliveryError::Disconnected
    }
}

/// Receives published messages.
pub trait Viewer: Send {
    /// Label for logs.
    fn name(&self) -> String;

    /// Deliver one envelope.
    fn deliver<'a>(&'a mut self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), DeliveryError>>;

    /// Flush and release the viewer, spending at most `grace` on it.
    fn close(&mut self, _grace: Duration) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }
}

/// Viewer connected over a link.
pub struct ViewerProxy {
    link: PeerLink,
}

impl ViewerProxy {
    /// Wrap an accepted link.
    pub fn new(link: PeerLink) -> Self {
        Self { link }
    }
}

impl Viewer for ViewerProxy {
    fn name(&self) -> String {
        format!("viewer {} ({})", self.link.id(), self.link.addr())
    }

    fn deliver<'a>(&'a mut self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), DeliveryError>> {
        async move {
            self.link.send(envelope.clone()).await?;
            Ok(())
        }
        .boxed()
    }

    fn close(&mut self, grace: Duration) -> BoxFuture<'_, ()> {
        async move {
            self.link.shutdown(grace).await;
        }
        .boxed()
    }
}

/// In-process viewer that forwards envelopes into a channel.
pub struct ChannelViewer {
    name: String,
    tx: mpsc::Sender<Envelope>,
}

impl ChannelViewer {
    /// Create a viewer and the receiving end of its channel.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl Viewer for ChannelViewer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn deliver<'a>(&'a mut self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), DeliveryError>> {
        async move {
            self.tx
                .send(envelope.clone())
                .await
                .map_err(|_| DeliveryError::Disconnected)
        }
        .boxed()
    }
}

/// Ordered fan-out to all viewers.
pub struct ViewerHub {
    viewers: Vec<Box<dyn Viewer>>,
    joiners: Option<mpsc::Receiver<Box<dyn Viewer>>>,
    grace: Duration,
    sequence: u64,
}

impl ViewerHub {
    /// Create an empty hub.
    pub fn new(grace: Duration) -> Self {
        Self {
            viewers: Vec::new(),
            joiners: None,
            grace,
            sequence: 0,
        }
    }

    /// Accept viewers that arrive while the match is running.
    pub fn set_joiners(&mut self, joiners: mpsc::Receiver<Box<dyn Viewer>>) {
        self.joiners = Some(joiners);
    }

    /// Add a viewer.
    pub fn add(&mut self, viewer: Box<dyn Viewer>) {
        debug!("Viewer {} joined", viewer.name());
        self.viewers.push(viewer);
    }

    /// Number of attached viewers.
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    /// Whether no viewer is attached.
    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    fn admit_joiners(&mut self) {
        let mut arrived = Vec::new();
        if let Some(joiners) = self.joiners.as_mut() {
            while let Ok(viewer) = joiners.try_recv() {
                arrived.push(viewer);
            }
        }
        for viewer in arrived {
            self.add(viewer);
        }
    }

    /// Publish a message to every viewer, dropping the ones that fail.
    pub async fn publish(&mut self, message: &Message) {
        self.admit_joiners();

        let envelope = match message.to_envelope(self.sequence) {
            Ok(env) => env,
            Err(e) => {
                warn!("Failed to encode {:?} for viewers: {}", message.kind(), e);
                return;
            }
        };
        self.sequence += 1;

        let mut index = 0;
        while index < self.viewers.len() {
            let viewer = &mut self.viewers[index];
            let result = match timeout(self.grace, viewer.deliver(&envelope)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::TooSlow),
            };
            match result {
                Ok(()) => index += 1,
                Err(e) => {
                    let mut dropped = self.viewers.remove(index);
                    warn!("Dropping {}: {}", dropped.name(), e);
                    dropped.close(self.grace).await;
                }
            }
        }
    }

    /// Close every viewer, each within the grace period.
    pub async fn close(&mut self) {
        self.admit_joiners();
        let grace = self.grace;
        join_all(self.viewers.iter_mut().map(|viewer| viewer.close(grace))).await;
        self.viewers.clear();
    }
}

/// Accept viewer connections in the background and hand them to a hub.
///
/// Each upgrade runs in its own task with [`UPGRADE_TIMEOUT`], so a client
/// that stalls the handshake does not hold up later viewers.
pub fn spawn_viewer_acceptor(
    listener: Listener,
    joiners: mpsc::Sender<Box<dyn Viewer>>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept_tcp() => {
                    let pending = match result {
                        Ok(pending) => pending,
                        Err(e) => {
                            warn!("Viewer accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    if joiners.is_closed() {
                        break;
                    }
                    let joiners = joiners.clone();
                    tokio::spawn(async move {
                        let addr = pending.addr();
                        match pending.upgrade(PeerRole::Viewer, UPGRADE_TIMEOUT).await {
                            Ok(link) => {
                                info!("Viewer connected from {}", addr);
                                let _ = joiners.send(Box::new(ViewerProxy::new(link))).await;
                            }
                            Err(e) => warn!("Skipping viewer connection from {}: {}", addr, e),
                        }
                    });
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}
