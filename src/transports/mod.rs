//! Peer network implementations.
//!
//! | Feature                | Network                |
//! |------------------------|------------------------|
//! | *(always)*             | [`MemoryNetwork`]      |
//! | `transport-websocket`  | [`WebSocketNetwork`]   |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), duel_link::DuelError> {
//! use duel_link::{PeerNetwork, WebSocketNetwork};
//!
//! let mut net = WebSocketNetwork::bind("127.0.0.1:0");
//! let me = net.open(None).await?;
//! println!("share this id with your opponent: {me}");
//! # Ok(())
//! # }
//! ```

pub mod memory;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use memory::{MemoryHub, MemoryLink, MemoryNetwork};

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketLink, WebSocketNetwork};
