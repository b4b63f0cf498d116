//! In-process peer network backed by `tokio::sync::mpsc` channels.
//!
//! A [`MemoryHub`] plays the part of the rendezvous service: every
//! [`MemoryNetwork`] created from the same hub can dial the others by
//! [`PeerId`]. Used by the integration tests and the loopback demo, and
//! handy for exercising game logic without sockets.
//!
//! ```rust
//! # async fn example() -> Result<(), duel_link::DuelError> {
//! use duel_link::transports::MemoryHub;
//! use duel_link::{PeerNetwork, Transport};
//!
//! let hub = MemoryHub::new();
//! let mut host = hub.network();
//! let mut client = hub.network();
//!
//! let host_id = host.open(None).await?;
//! client.open(None).await?;
//!
//! let mut dialed = client.connect(&host_id).await?;
//! let Some(Ok((_, mut accepted))) = host.accept().await else { return Ok(()) };
//!
//! dialed.send("hello".into()).await?;
//! assert_eq!(accepted.recv().await.transpose()?, Some("hello".to_string()));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DuelError;
use crate::protocol::PeerId;
use crate::transport::{PeerNetwork, Transport};

type Incoming = mpsc::UnboundedSender<(PeerId, MemoryLink)>;

#[derive(Debug, Default)]
struct HubInner {
    peers: Mutex<HashMap<PeerId, Incoming>>,
    offline: AtomicBool,
}

impl HubInner {
    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, Incoming>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared registry through which [`MemoryNetwork`]s find each other.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network endpoint attached to this hub.
    pub fn network(&self) -> MemoryNetwork {
        MemoryNetwork {
            hub: self.clone(),
            id: None,
            incoming: None,
        }
    }

    /// Simulate losing the rendezvous service: while offline, `open` fails.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Release);
    }

    /// Number of identities currently registered.
    pub fn registered(&self) -> usize {
        self.inner.peers().len()
    }
}

/// One endpoint on a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryNetwork {
    hub: MemoryHub,
    id: Option<PeerId>,
    incoming: Option<mpsc::UnboundedReceiver<(PeerId, MemoryLink)>>,
}

impl MemoryNetwork {
    /// The identity acquired by [`open`](PeerNetwork::open), if any.
    pub fn local_id(&self) -> Option<&PeerId> {
        self.id.as_ref()
    }
}

impl Drop for MemoryNetwork {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.hub.inner.peers().remove(&id);
        }
    }
}

#[async_trait]
impl PeerNetwork for MemoryNetwork {
    type Link = MemoryLink;

    async fn open(&mut self, requested: Option<PeerId>) -> Result<PeerId, DuelError> {
        if self.hub.inner.offline.load(Ordering::Acquire) {
            return Err(DuelError::IdentityAcquisition(
                "rendezvous hub is offline".into(),
            ));
        }
        if let Some(id) = &self.id {
            return Ok(id.clone());
        }

        let id = requested.unwrap_or_else(|| PeerId::new(uuid::Uuid::new_v4().to_string()));
        if id.is_empty() {
            return Err(DuelError::IdentityAcquisition("empty identity".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut peers = self.hub.inner.peers();
            if peers.contains_key(&id) {
                return Err(DuelError::IdentityAcquisition(format!(
                    "identity {id} is already taken"
                )));
            }
            peers.insert(id.clone(), tx);
        }

        debug!(peer = %id, "memory network opened");
        self.id = Some(id.clone());
        self.incoming = Some(rx);
        Ok(id)
    }

    async fn connect(&mut self, remote: &PeerId) -> Result<Self::Link, DuelError> {
        let Some(local) = self.id.clone() else {
            return Err(DuelError::Connect {
                remote: remote.clone(),
                reason: "local network is not open".into(),
            });
        };
        if remote.is_empty() || *remote == local {
            return Err(DuelError::Connect {
                remote: remote.clone(),
                reason: "invalid remote identity".into(),
            });
        }

        let target = self.hub.inner.peers().get(remote).cloned();
        let Some(target) = target else {
            return Err(DuelError::Connect {
                remote: remote.clone(),
                reason: "no such peer".into(),
            });
        };

        let (dialer, acceptor) = MemoryLink::pair();
        target
            .send((local, acceptor))
            .map_err(|_| DuelError::Connect {
                remote: remote.clone(),
                reason: "peer stopped accepting".into(),
            })?;

        debug!(peer = %remote, "memory link established");
        Ok(dialer)
    }

    async fn accept(&mut self) -> Option<Result<(PeerId, Self::Link), DuelError>> {
        let incoming = self.incoming.as_mut()?;
        incoming.recv().await.map(Ok)
    }
}

/// One side of an in-process link.
#[derive(Debug)]
pub struct MemoryLink {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryLink {
    /// Create two connected link ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryLink {
    async fn send(&mut self, message: String) -> Result<(), DuelError> {
        let Some(tx) = &self.tx else {
            return Err(DuelError::TransportClosed);
        };
        tx.send(message)
            .map_err(|e| DuelError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, DuelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), DuelError> {
        // Dropping our sender ends the peer's stream once it drains.
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_assigns_unique_identities() {
        let hub = MemoryHub::new();
        let mut a = hub.network();
        let mut b = hub.network();
        let id_a = a.open(None).await.unwrap();
        let id_b = b.open(None).await.unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(hub.registered(), 2);
    }

    #[tokio::test]
    async fn requested_identity_is_honoured_once() {
        let hub = MemoryHub::new();
        let mut a = hub.network();
        let mut b = hub.network();
        let id = a.open(Some("alpha".into())).await.unwrap();
        assert_eq!(id.as_str(), "alpha");
        let err = b.open(Some("alpha".into())).await.unwrap_err();
        assert!(matches!(err, DuelError::IdentityAcquisition(_)));
    }

    #[tokio::test]
    async fn open_fails_while_offline() {
        let hub = MemoryHub::new();
        hub.set_offline(true);
        let err = hub.network().open(None).await.unwrap_err();
        assert!(matches!(err, DuelError::IdentityAcquisition(_)));
    }

    #[tokio::test]
    async fn connect_to_unknown_peer_fails() {
        let hub = MemoryHub::new();
        let mut a = hub.network();
        a.open(None).await.unwrap();
        let err = a.connect(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, DuelError::Connect { .. }));
    }

    #[tokio::test]
    async fn connect_to_self_fails() {
        let hub = MemoryHub::new();
        let mut a = hub.network();
        let me = a.open(None).await.unwrap();
        assert!(a.connect(&me).await.is_err());
    }

    #[tokio::test]
    async fn dropped_network_unregisters() {
        let hub = MemoryHub::new();
        let mut a = hub.network();
        a.open(None).await.unwrap();
        drop(a);
        assert_eq!(hub.registered(), 0);
    }

    #[tokio::test]
    async fn link_round_trip_and_close() {
        let (mut a, mut b) = MemoryLink::pair();
        a.send("one".into()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), "one");

        a.close().await.unwrap();
        assert!(b.recv().await.is_none());
        assert!(matches!(
            a.send("late".into()).await,
            Err(DuelError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn accept_yields_dialer_identity() {
        let hub = MemoryHub::new();
        let mut host = hub.network();
        let mut client = hub.network();
        let host_id = host.open(None).await.unwrap();
        let client_id = client.open(Some("joiner".into())).await.unwrap();

        let _link = client.connect(&host_id).await.unwrap();
        let (from, _accepted) = host.accept().await.unwrap().unwrap();
        assert_eq!(from, client_id);
    }
}
