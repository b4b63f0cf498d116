//! Transport abstraction for the duel peer link.
//!
//! Two traits split the concern:
//!
//! - [`PeerNetwork`] hands out the local [`PeerId`], dials a remote identity
//!   and accepts incoming links. It is the only place identities come from.
//! - [`Transport`] is one established link: a bidirectional channel of
//!   complete JSON text messages. Framing is the implementation's job
//!   (WebSocket frames, in-process channels, WebRTC data channels).
//!
//! Both sides of a session hold at most one live [`Transport`] at a time;
//! the session loop enforces that, not the network.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use duel_link::error::DuelError;
//! use duel_link::transport::Transport;
//!
//! struct DataChannel { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for DataChannel {
//!     async fn send(&mut self, message: String) -> Result<(), DuelError> {
//!         // Write one JSON packet to the peer
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, DuelError>> {
//!         // Yield the next JSON packet, or None once the peer closed the link
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), DuelError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::DuelError;
use crate::protocol::PeerId;

/// One established, reliable and ordered link to the opponent.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the session loop polls
/// it inside `tokio::select!` next to timers and commands. Channel-backed
/// implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON packet to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::TransportSend`] if the link is broken, or
    /// [`DuelError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), DuelError>;

    /// Receive the next JSON packet from the peer.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: the link failed
    /// - `None`: the peer closed the link cleanly
    async fn recv(&mut self) -> Option<Result<String, DuelError>>;

    /// Close the link gracefully. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), DuelError>;
}

/// The substrate that allocates identities and produces [`Transport`]s.
///
/// A host calls [`open`](PeerNetwork::open) and then waits on
/// [`accept`](PeerNetwork::accept); a client calls `open` and later
/// [`connect`](PeerNetwork::connect) with the host's identity.
///
/// # Cancel Safety
///
/// [`accept`](PeerNetwork::accept) is polled inside `tokio::select!` and
/// **MUST** be cancel-safe.
#[async_trait]
pub trait PeerNetwork: Send + 'static {
    /// The link type this network produces.
    type Link: Transport;

    /// Acquire the local identity, optionally asking for a specific one.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::IdentityAcquisition`] when no identity can be
    /// allocated (offline, identity taken, listener bind failure).
    async fn open(&mut self, requested: Option<PeerId>) -> Result<PeerId, DuelError>;

    /// Dial `remote` and return the established link.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::Connect`] if `remote` is invalid or unreachable.
    async fn connect(&mut self, remote: &PeerId) -> Result<Self::Link, DuelError>;

    /// Wait for the next incoming link.
    ///
    /// Returns `None` once the network stops accepting (listener closed or
    /// never opened for incoming links).
    async fn accept(&mut self) -> Option<Result<(PeerId, Self::Link), DuelError>>;
}
