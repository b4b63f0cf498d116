//! Typed local events crossing the session boundary.
//!
//! [`LocalEvent`]s flow in from the gameplay collaborators (physics, input,
//! the practice bot); [`SessionEvent`]s flow out to rendering, audio and UI.
//! Both are closed enums so consumers match them exhaustively.

use std::time::Duration;

use crate::chat::ChatMessage;
use crate::protocol::{PeerId, PlayerSnapshot, Tracer, WeaponKind};
use crate::round::{RoundState, Side};
use crate::stats::{KillFeedEntry, MatchStats};

/// Lifecycle of the single peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Something the local game simulation did.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    /// The local player's latest movement snapshot.
    PlayerMoved(PlayerSnapshot),
    /// The local weapon fired; `tracer` is drawn on the opponent's screen.
    ///
    /// With an empty magazine the trigger pull is a dry fire: no `SHOOT` is
    /// sent and no shot is counted.
    WeaponFired { tracer: Tracer, weapon: WeaponKind },
    /// The player finished reloading `weapon`.
    Reloaded(WeaponKind),
    /// Local hit detection says a shot connected with `target`.
    DamageDealt {
        target: PeerId,
        damage: u32,
        weapon: WeaponKind,
    },
    /// The local player took damage from a local source (practice bot).
    DamageTaken { damage: u32, weapon: WeaponKind },
    /// The player submitted a chat line.
    ChatSubmitted(String),
    /// The player toggled readiness in the lobby.
    ReadyToggled(bool),
    /// The host pressed "launch".
    LaunchRequested,
}

/// Something the UI, renderer or audio should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection status changed.
    StatusChanged(ConnectionStatus),
    /// The peer link is open.
    Connected { remote: PeerId },
    /// A connection attempt failed; the client may retry.
    ConnectFailed { remote: PeerId, reason: String },
    /// Draw the opponent's tracer.
    RemoteTracer(Tracer),
    /// The opponent's mirrored snapshot changed.
    RemoteSnapshot(PlayerSnapshot),
    /// Local health after applying damage or a reset.
    HealthChanged { health: u32 },
    /// Rounds left in `weapon` after a shot or a reload. A round reset
    /// refills every weapon without this event; see [`RoundReset`](Self::RoundReset).
    AmmoChanged { weapon: WeaponKind, remaining: u32 },
    /// The local player was eliminated this round.
    Eliminated { by: WeaponKind },
    /// Append to the kill feed.
    KillFeed(KillFeedEntry),
    /// Round decided.
    RoundEnded { winner: Side, score: RoundState },
    /// Match decided; no further rounds until a reset.
    MatchEnded {
        winner: Side,
        score: RoundState,
        stats: MatchStats,
    },
    /// The host started the match.
    MatchStarted,
    /// Round-scoped state was reset; collaborators respawn the player with
    /// full health and full magazines.
    RoundReset { round: u32 },
    /// Everything returned to the lobby.
    MatchReset,
    /// A chat line was appended (from the opponent or the session).
    ChatReceived(ChatMessage),
    /// The opponent's readiness changed.
    OpponentReady { is_ready: bool },
    /// Round-trip time measured from a PING/PONG pair.
    LatencyMeasured { rtt: Duration },
    /// The link is gone. Always the last event of a session.
    Disconnected { reason: Option<String> },
}
