//! # Duel Link
//!
//! Serverless session layer for a two-player duel: one peer hosts, the other
//! dials the host's identity, and both exchange JSON packets over a single
//! reliable, ordered link.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`PeerNetwork`] and [`Transport`] for
//!   any backend; an in-memory network ships for tests and local play
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides [`WebSocketNetwork`]
//! - **Victim-side damage**: each side applies damage to itself and declares
//!   its own elimination, guarded by a death-latch
//! - **Event-driven**: local gameplay goes in as [`LocalEvent`]s, typed
//!   [`SessionEvent`]s come out on a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use duel_link::{DuelSession, MemoryHub, Role, SessionConfig, SessionEvent};
//!
//! # async fn example() -> duel_link::Result<()> {
//! let hub = MemoryHub::new();
//! let (host, mut events) =
//!     DuelSession::open(hub.network(), SessionConfig::new(Role::Host)).await?;
//! let (client, _client_events) =
//!     DuelSession::open(hub.network(), SessionConfig::new(Role::Client)).await?;
//! client.connect_to(host.local_id().clone())?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Connected { .. } => host.launch()?,
//!         SessionEvent::MatchEnded { winner, .. } => println!("{winner:?} wins"),
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod chat;
pub mod combat;
pub mod error;
pub mod event;
pub mod mirror;
pub mod protocol;
pub mod ready;
pub mod round;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod transport;
pub mod transports;
pub mod weapons;

// Re-export primary types for ergonomic imports.
pub use bridge::SessionSnapshot;
pub use error::{DuelError, Result};
pub use event::{ConnectionStatus, LocalEvent, SessionEvent};
pub use protocol::{Packet, PeerId, PlayerSnapshot, Role, Tracer, Vec3, WeaponKind};
pub use round::{MatchPhase, RoundState, Side};
pub use session::{DuelSession, SessionConfig};
pub use transport::{PeerNetwork, Transport};
pub use transports::{MemoryHub, MemoryLink, MemoryNetwork};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketLink, WebSocketNetwork};
