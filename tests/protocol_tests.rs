#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for duel packets.
//!
//! Fixtures are written the way the opposite peer puts them on the wire, so
//! any drift in field names or tag casing breaks these tests before it
//! breaks a live match.

use duel_link::protocol::AnimState;
use duel_link::{Packet, PeerId, PlayerSnapshot, Role, Tracer, Vec3, WeaponKind};
use serde_json::json;

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

fn decode(value: serde_json::Value) -> Packet {
    Packet::decode(&value.to_string()).expect("fixture should decode")
}

fn encode(packet: &Packet) -> serde_json::Value {
    serde_json::from_str(&packet.encode().expect("encode")).expect("valid json")
}

// ════════════════════════════════════════════════════════════════════
// Fixtures from a peer
// ════════════════════════════════════════════════════════════════════

#[test]
fn player_update_fixture() {
    let packet = decode(json!({
        "type": "PLAYER_UPDATE",
        "payload": {
            "position": { "x": 1.5, "y": 1.6, "z": -3 },
            "rotation": { "x": 0, "y": 3.14, "z": 0 },
            "velocity": { "x": 0, "y": 0, "z": 5 },
            "animState": "run",
            "currentWeapon": "PISTOL",
            "isFiring": true
        }
    }));

    let Packet::PlayerUpdate(snapshot) = packet else {
        panic!("expected PLAYER_UPDATE, got {packet:?}");
    };
    assert_eq!(snapshot.position, Vec3::new(1.5, 1.6, -3.0));
    assert_eq!(snapshot.rotation.y, 3.14);
    assert_eq!(snapshot.anim_state, AnimState::Run);
    assert_eq!(snapshot.current_weapon, WeaponKind::Pistol);
    assert!(snapshot.is_firing);
}

#[test]
fn shoot_fixture() {
    let packet = decode(json!({
        "type": "SHOOT",
        "payload": {
            "start": { "x": 0, "y": 1.6, "z": 0 },
            "end": { "x": 0, "y": 1.6, "z": -100 },
            "color": "#3b82f6"
        }
    }));
    assert_eq!(
        packet,
        Packet::Shoot(Tracer {
            start: Vec3::new(0.0, 1.6, 0.0),
            end: Vec3::new(0.0, 1.6, -100.0),
            color: "#3b82f6".into(),
        })
    );
}

#[test]
fn combat_fixtures() {
    assert_eq!(
        decode(json!({ "type": "HIT", "payload": { "damage": 25, "weapon": "PISTOL" } })),
        Packet::Hit {
            damage: 25,
            weapon: WeaponKind::Pistol
        }
    );
    assert_eq!(
        decode(json!({ "type": "KILL", "payload": { "victim": "peer-7", "weapon": "KNIFE" } })),
        Packet::Kill {
            victim: PeerId::from("peer-7"),
            weapon: WeaponKind::Knife
        }
    );
    assert_eq!(
        decode(json!({ "type": "ROUND_END", "payload": { "winner": "HOST" } })),
        Packet::RoundEnd { winner: Role::Host }
    );
}

#[test]
fn lobby_fixtures() {
    assert_eq!(
        decode(json!({ "type": "READY", "payload": { "isReady": true } })),
        Packet::Ready { is_ready: true }
    );
    assert_eq!(
        decode(json!({ "type": "START", "payload": {} })),
        Packet::Start {}
    );
    assert_eq!(
        decode(json!({ "type": "NEW_ROUND", "payload": {} })),
        Packet::NewRound {}
    );
    assert_eq!(
        decode(json!({ "type": "CHAT", "payload": { "text": "gl hf" } })),
        Packet::Chat {
            text: "gl hf".into()
        }
    );
}

#[test]
fn heartbeat_fixtures() {
    assert_eq!(
        decode(json!({ "type": "PING", "payload": { "time": 1_700_000_000_000_u64 } })),
        Packet::Ping {
            time: 1_700_000_000_000
        }
    );
    assert_eq!(
        decode(json!({ "type": "PONG", "payload": { "time": 42 } })),
        Packet::Pong { time: 42 }
    );
}

// ════════════════════════════════════════════════════════════════════
// Outgoing shape
// ════════════════════════════════════════════════════════════════════

#[test]
fn kill_is_adjacently_tagged() {
    let value = encode(&Packet::Kill {
        victim: PeerId::from("me"),
        weapon: WeaponKind::Sniper,
    });
    assert_eq!(
        value,
        json!({ "type": "KILL", "payload": { "victim": "me", "weapon": "SNIPER" } })
    );
}

#[test]
fn player_update_uses_camel_case() {
    let value = encode(&Packet::PlayerUpdate(PlayerSnapshot {
        anim_state: AnimState::Crouch,
        current_weapon: WeaponKind::Knife,
        ..PlayerSnapshot::default()
    }));
    let payload = value["payload"].as_object().expect("payload object");
    let mut keys: Vec<_> = payload.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        [
            "animState",
            "currentWeapon",
            "isFiring",
            "position",
            "rotation",
            "velocity"
        ]
    );
    assert_eq!(payload["animState"], "crouch");
    assert_eq!(payload["currentWeapon"], "KNIFE");
}

#[test]
fn every_kind_has_a_payload_object() {
    let packets = [
        Packet::Ping { time: 0 },
        Packet::Pong { time: 0 },
        Packet::PlayerUpdate(PlayerSnapshot::default()),
        Packet::Shoot(Tracer {
            start: Vec3::ZERO,
            end: Vec3::ZERO,
            color: String::new(),
        }),
        Packet::Hit {
            damage: 0,
            weapon: WeaponKind::Rifle,
        },
        Packet::Kill {
            victim: PeerId::from("x"),
            weapon: WeaponKind::Rifle,
        },
        Packet::RoundEnd {
            winner: Role::Client,
        },
        Packet::NewRound {},
        Packet::Start {},
        Packet::Ready { is_ready: false },
        Packet::Chat {
            text: String::new(),
        },
    ];
    for packet in &packets {
        let value = encode(packet);
        assert_eq!(value["type"], packet.kind());
        assert!(value["payload"].is_object(), "{} payload", packet.kind());
    }
}

// ════════════════════════════════════════════════════════════════════
// Rejected input
// ════════════════════════════════════════════════════════════════════

#[test]
fn unknown_and_malformed_packets_are_dropped() {
    let rejects = [
        r#"{"type":"TELEPORT","payload":{"x":1}}"#,
        r#"{"type":"hit","payload":{"damage":10,"weapon":"RIFLE"}}"#,
        r#"{"type":"HIT","payload":{"damage":-5,"weapon":"RIFLE"}}"#,
        r#"{"type":"HIT","payload":{"damage":10,"weapon":"BAZOOKA"}}"#,
        r#"{"type":"READY","payload":{"is_ready":true}}"#,
        r#"{"type":"ROUND_END","payload":{"winner":"SPECTATOR"}}"#,
        r#"{"payload":{}}"#,
        r#"[]"#,
        "",
    ];
    for text in rejects {
        assert_eq!(Packet::decode(text), None, "should reject {text:?}");
    }
}
