//! Error types for the duel session layer.

use thiserror::Error;

use crate::protocol::{PeerId, Role};

/// Errors that can occur while opening or driving a duel session.
#[derive(Debug, Error)]
pub enum DuelError {
    /// Failed to send a packet through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a packet from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a packet.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session loop has exited; the handle can no longer queue commands.
    #[error("session is not running")]
    NotConnected,

    /// The peer network could not allocate a local identity (e.g. offline).
    #[error("could not acquire a peer identity: {0}")]
    IdentityAcquisition(String),

    /// The remote identity was invalid or unreachable.
    #[error("could not connect to {remote}: {reason}")]
    Connect {
        /// Identity the connection attempt targeted.
        remote: PeerId,
        /// Human-readable cause reported by the network.
        reason: String,
    },

    /// The operation is reserved for the other role.
    #[error("{operation} is not available to the {role} role")]
    WrongRole {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Role of the session that attempted it.
        role: Role,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for duel session operations.
pub type Result<T> = std::result::Result<T, DuelError>;
