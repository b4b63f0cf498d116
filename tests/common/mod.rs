#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for duel session integration tests.
//!
//! Provides a [`RawPeer`] that speaks the wire protocol by hand, so tests can
//! script one side of a duel exactly, and helpers for pairing two real
//! sessions on a [`MemoryHub`].

use std::time::Duration;

use duel_link::{
    DuelSession, MemoryHub, MemoryLink, MemoryNetwork, Packet, PeerId, PeerNetwork, Role,
    SessionConfig, SessionEvent, Transport,
};
use tokio::sync::mpsc;

/// How long helpers wait before failing a test. Virtual time under
/// `start_paused`, so generous values cost nothing.
pub const WAIT: Duration = Duration::from_secs(30);

// ── RawPeer ─────────────────────────────────────────────────────────

/// One end of a duel driven directly from the test.
///
/// Incoming `PING`s are answered automatically by [`RawPeer::recv`] so the
/// session under test never sees a silent peer.
pub struct RawPeer {
    pub id: PeerId,
    network: MemoryNetwork,
    link: Option<MemoryLink>,
}

impl RawPeer {
    /// Register on `hub` under a fresh identity.
    pub async fn open(hub: &MemoryHub) -> Self {
        let mut network = hub.network();
        let id = network.open(None).await.expect("raw peer open");
        Self {
            id,
            network,
            link: None,
        }
    }

    /// Wait for a session to dial in (raw peer plays the host).
    pub async fn accept(&mut self) -> PeerId {
        let accepted = tokio::time::timeout(WAIT, self.network.accept())
            .await
            .expect("timed out waiting for a dial")
            .expect("network stopped accepting")
            .expect("accept failed");
        self.link = Some(accepted.1);
        accepted.0
    }

    /// Dial a hosting session (raw peer plays the client).
    pub async fn connect(&mut self, host: &PeerId) {
        let link = self.network.connect(host).await.expect("raw peer connect");
        self.link = Some(link);
    }

    pub async fn send(&mut self, packet: &Packet) {
        let json = packet.encode().expect("encode");
        self.link_mut().send(json).await.expect("raw peer send");
    }

    /// Next packet from the session, PINGs included, or `None` once it closed.
    pub async fn recv_any(&mut self) -> Option<Packet> {
        let text = tokio::time::timeout(WAIT, self.link_mut().recv())
            .await
            .expect("timed out waiting for a packet")?
            .expect("raw peer recv");
        Some(Packet::decode(&text).expect("session sent an undecodable packet"))
    }

    /// Next non-PING packet from the session, or `None` once it closed.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            match self.recv_any().await? {
                Packet::Ping { time } => self.send(&Packet::Pong { time }).await,
                other => return Some(other),
            }
        }
    }

    /// Collect packets up to (excluding) the `PONG` answering `marker`.
    ///
    /// The link is ordered, so everything the session sent in response to
    /// packets queued before the marker arrives first.
    pub async fn collect_until_pong(&mut self, marker: u64) -> Vec<Packet> {
        self.send(&Packet::Ping { time: marker }).await;
        let mut seen = Vec::new();
        while let Some(packet) = self.recv().await {
            if packet == (Packet::Pong { time: marker }) {
                return seen;
            }
            seen.push(packet);
        }
        panic!("link closed before PONG {marker}; saw {seen:?}");
    }

    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await.expect("raw peer close");
        }
    }

    fn link_mut(&mut self) -> &mut MemoryLink {
        self.link.as_mut().expect("raw peer has no link")
    }
}

// ── Session pairs ───────────────────────────────────────────────────

/// Two real sessions connected through one hub.
pub struct Duel {
    pub hub: MemoryHub,
    pub host: DuelSession,
    pub host_events: mpsc::Receiver<SessionEvent>,
    pub client: DuelSession,
    pub client_events: mpsc::Receiver<SessionEvent>,
}

/// Open a host and a client with default settings and connect them.
pub async fn connected_duel() -> Duel {
    connected_duel_with(SessionConfig::new(Role::Host), SessionConfig::new(Role::Client)).await
}

/// Open a host and a client with the given configs and connect them.
pub async fn connected_duel_with(host_config: SessionConfig, client_config: SessionConfig) -> Duel {
    let hub = MemoryHub::new();
    let (host, mut host_events) = DuelSession::open(hub.network(), host_config)
        .await
        .expect("host open");
    let (client, mut client_events) = DuelSession::open(hub.network(), client_config)
        .await
        .expect("client open");

    client
        .connect_to(host.local_id().clone())
        .expect("connect_to");
    expect_event(&mut host_events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    expect_event(&mut client_events, |e| {
        matches!(e, SessionEvent::Connected { .. })
    })
    .await;

    Duel {
        hub,
        host,
        host_events,
        client,
        client_events,
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Skip events until one matches `pred`; panics on timeout or channel close.
pub async fn expect_event<F>(events: &mut mpsc::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event channel closed before the expected event"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Collect every event until the channel closes.
pub async fn collect_until_closed(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
    })
    .await
    .expect("timed out waiting for the channel to close");
    seen
}

/// Events already queued, without waiting.
pub fn drain_ready(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// Drop heartbeat noise.
pub fn is_gameplay(event: &SessionEvent) -> bool {
    !matches!(event, SessionEvent::LatencyMeasured { .. })
}
