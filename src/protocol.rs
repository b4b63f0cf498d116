//! Wire packets exchanged between the two peers of a duel.
//!
//! Every packet is a JSON text message, adjacently tagged as
//! `{"type": "<KIND>", "payload": {...}}`. Kind names are
//! `SCREAMING_SNAKE_CASE` and payload fields are `camelCase` so that both
//! peers agree on one exact shape; there is no version negotiation.
//!
//! Dispatch on the receiving side is an exhaustive `match` on [`Packet`].
//! Text that does not decode into a known kind is dropped by
//! [`Packet::decode`] rather than surfaced as an error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DuelError, Result};

// ── Identity and roles ──────────────────────────────────────────────

/// Opaque address of one session endpoint.
///
/// Assigned once by the [`PeerNetwork`](crate::transport::PeerNetwork) and
/// never changed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty identity, which no network accepts.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Fixed role of one side of the session.
///
/// The host originates `START` and `NEW_ROUND`; the client only reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Host,
    Client,
}

impl Role {
    /// The role held by the other side.
    pub fn opponent(self) -> Self {
        match self {
            Self::Host => Self::Client,
            Self::Client => Self::Host,
        }
    }

    /// Returns `true` for [`Role::Host`].
    pub fn is_host(self) -> bool {
        matches!(self, Self::Host)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Client => f.write_str("client"),
        }
    }
}

// ── Payload building blocks ─────────────────────────────────────────

/// A position, velocity or Euler rotation in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns `true` when no component is NaN or infinite.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Weapon families available to both players.
///
/// Static stats live in [`crate::weapons`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeaponKind {
    #[default]
    Rifle,
    Pistol,
    Knife,
    Sniper,
}

/// Coarse animation state used by the remote character model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimState {
    #[default]
    Idle,
    Walk,
    Run,
    Crouch,
    Jump,
}

/// Full movement snapshot of one player, sent about 20 times per second.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub position: Vec3,
    /// Camera Euler angles; `y` is body yaw, `x` is head pitch.
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub anim_state: AnimState,
    pub current_weapon: WeaponKind,
    pub is_firing: bool,
}

/// Visual bullet trace. Carries no authority over damage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracer {
    pub start: Vec3,
    pub end: Vec3,
    /// CSS-style colour string, e.g. `"#ef4444"`.
    pub color: String,
}

// ── Packets ─────────────────────────────────────────────────────────

/// Every message that can cross the peer link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Packet {
    /// Liveness check carrying the sender's clock in unix milliseconds.
    Ping { time: u64 },
    /// Echo of [`Packet::Ping`]'s `time`.
    Pong { time: u64 },
    /// Overwrites the receiver's mirror of the sender.
    PlayerUpdate(PlayerSnapshot),
    /// Sender fired; the receiver draws the tracer.
    Shoot(Tracer),
    /// Sender claims it damaged the receiver.
    Hit { damage: u32, weapon: WeaponKind },
    /// Sender declares it was eliminated by `weapon`.
    Kill { victim: PeerId, weapon: WeaponKind },
    /// Round outcome in role terms.
    RoundEnd { winner: Role },
    /// Host only: reset round-scoped state and play the next round.
    NewRound {},
    /// Host only: the match begins.
    Start {},
    /// Sender's readiness in the lobby.
    Ready { is_ready: bool },
    /// Free-text chat line.
    Chat { text: String },
}

impl Packet {
    /// Wire name of this packet's kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "PING",
            Self::Pong { .. } => "PONG",
            Self::PlayerUpdate(_) => "PLAYER_UPDATE",
            Self::Shoot(_) => "SHOOT",
            Self::Hit { .. } => "HIT",
            Self::Kill { .. } => "KILL",
            Self::RoundEnd { .. } => "ROUND_END",
            Self::NewRound {} => "NEW_ROUND",
            Self::Start {} => "START",
            Self::Ready { .. } => "READY",
            Self::Chat { .. } => "CHAT",
        }
    }

    /// Returns `true` for packets only the host may originate.
    pub fn is_host_only(&self) -> bool {
        matches!(self, Self::NewRound {} | Self::Start {})
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::Serialization`](crate::DuelError::Serialization)
    /// if a coordinate is NaN or infinite. `serde_json` would write those as
    /// `null`, which the peer then rejects as a malformed packet.
    pub fn encode(&self) -> Result<String> {
        if !self.coordinates_are_finite() {
            return Err(DuelError::Serialization(serde::ser::Error::custom(
                format!("non-finite coordinate in {} packet", self.kind()),
            )));
        }
        Ok(serde_json::to_string(self)?)
    }

    fn coordinates_are_finite(&self) -> bool {
        match self {
            Self::PlayerUpdate(snapshot) => {
                snapshot.position.is_finite()
                    && snapshot.rotation.is_finite()
                    && snapshot.velocity.is_finite()
            }
            Self::Shoot(tracer) => tracer.start.is_finite() && tracer.end.is_finite(),
            _ => true,
        }
    }

    /// Parse one wire message.
    ///
    /// Unknown kinds and malformed payloads yield `None`; the caller drops
    /// them without raising an error.
    pub fn decode(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(packet) => Some(packet),
            Err(e) => {
                tracing::debug!("dropping undecodable packet: {e}");
                None
            }
        }
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

    #[test]
    fn ready_uses_camel_case_payload() {
        let json = Packet::Ready { is_ready: true }.encode().unwrap();
        assert_eq!(json, r#"{"type":"READY","payload":{"isReady":true}}"#);
    }

    #[test]
    fn empty_payload_kinds_carry_an_object() {
        let json = Packet::NewRound {}.encode().unwrap();
        assert_eq!(json, r#"{"type":"NEW_ROUND","payload":{}}"#);
        assert_eq!(Packet::decode(&json), Some(Packet::NewRound {}));
    }

    #[test]
    fn round_end_winner_is_a_role() {
        let json = Packet::RoundEnd {
            winner: Role::Client,
        }
        .encode()
        .unwrap();
        assert!(json.contains(r#""winner":"CLIENT""#), "{json}");
    }

    #[test]
    fn player_update_field_names() {
        let value = serde_json::to_value(Packet::PlayerUpdate(PlayerSnapshot {
            current_weapon: WeaponKind::Sniper,
            is_firing: true,
            ..PlayerSnapshot::default()
        }))
        .unwrap();
        let payload = &value["payload"];
        assert_eq!(payload["currentWeapon"], "SNIPER");
        assert_eq!(payload["isFiring"], true);
        assert_eq!(payload["animState"], "idle");
        assert!(payload["position"].is_object());
    }

    #[test]
    fn unknown_kind_is_dropped() {
        assert_eq!(Packet::decode(r#"{"type":"TELEPORT","payload":{}}"#), None);
    }

    #[test]
    fn malformed_payload_is_dropped() {
        assert_eq!(
            Packet::decode(r#"{"type":"HIT","payload":{"damage":"lots"}}"#),
            None
        );
        assert_eq!(Packet::decode("not json"), None);
    }

    #[test]
    fn kind_matches_wire_tag() {
        let packets = [
            Packet::Ping { time: 1 },
            Packet::Hit {
                damage: 15,
                weapon: WeaponKind::Rifle,
            },
            Packet::Chat { text: "gg".into() },
            Packet::Start {},
        ];
        for packet in packets {
            let value = serde_json::to_value(&packet).unwrap();
            assert_eq!(value["type"], packet.kind());
        }
    }

    #[test]
    fn host_only_packets() {
        assert!(Packet::Start {}.is_host_only());
        assert!(Packet::NewRound {}.is_host_only());
        assert!(!Packet::Ready { is_ready: false }.is_host_only());
    }

    #[test]
    fn non_finite_coordinates_are_refused_at_encode() {
        let update = Packet::PlayerUpdate(PlayerSnapshot {
            velocity: Vec3::new(0.0, f32::NAN, 0.0),
            ..PlayerSnapshot::default()
        });
        assert!(matches!(update.encode(), Err(DuelError::Serialization(_))));

        let shot = Packet::Shoot(Tracer {
            start: Vec3::ZERO,
            end: Vec3::new(f32::INFINITY, 0.0, 0.0),
            color: "#3b82f6".into(),
        });
        let err = shot.encode().unwrap_err();
        assert!(err.to_string().contains("SHOOT"), "{err}");

        let fine = Packet::Shoot(Tracer {
            start: Vec3::ZERO,
            end: Vec3::new(0.0, 1.6, -100.0),
            color: "#3b82f6".into(),
        });
        assert!(fine.encode().is_ok());
    }

    #[test]
    fn role_opponent() {
        assert_eq!(Role::Host.opponent(), Role::Client);
        assert_eq!(Role::Client.opponent(), Role::Host);
        assert!(Role::Host.is_host());
    }

    #[test]
    fn peer_id_is_transparent() {
        let json = serde_json::to_string(&PeerId::from("abc")).unwrap();
        assert_eq!(json, r#""abc""#);
        assert!(PeerId::from("  ").is_empty());
    }
}
