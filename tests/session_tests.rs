#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end duel session tests over the in-memory network.
//!
//! Two kinds of opponent are used: a second real [`DuelSession`] (to check
//! both sides agree) and a hand-driven [`RawPeer`] (to check exactly which
//! packets a session puts on the wire).

mod common;

use std::time::Duration;

use common::{
    collect_until_closed, connected_duel, connected_duel_with, drain_ready, expect_event,
    is_gameplay, Duel, RawPeer,
};
use duel_link::chat::ChatSender;
use duel_link::{
    ConnectionStatus, DuelError, DuelSession, MatchPhase, MemoryHub, Packet, PlayerSnapshot, Role,
    RoundState, SessionConfig, SessionEvent, Side, Tracer, Vec3, WeaponKind,
};
use tokio::time::Instant;

// ── Helpers ─────────────────────────────────────────────────────────

/// The winner's session lands a lethal hit; wait until both sides recorded it.
async fn win_round(duel: &mut Duel, winner: Role) {
    match winner {
        Role::Host => {
            let target = duel.client.local_id().clone();
            duel.host
                .report_hit(target, 100, WeaponKind::Sniper)
                .unwrap();
        }
        Role::Client => {
            let target = duel.host.local_id().clone();
            duel.client
                .report_hit(target, 100, WeaponKind::Sniper)
                .unwrap();
        }
    }
    expect_event(&mut duel.host_events, |e| {
        matches!(e, SessionEvent::RoundEnded { .. })
    })
    .await;
    expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::RoundEnded { .. })
    })
    .await;
}

/// Wait until both sides reset into round `round`.
async fn both_reset_to(duel: &mut Duel, round: u32) {
    expect_event(&mut duel.host_events, |e| {
        matches!(e, SessionEvent::RoundReset { round: r } if *r == round)
    })
    .await;
    expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::RoundReset { round: r } if *r == round)
    })
    .await;
}

async fn launched_duel(host: SessionConfig, client: SessionConfig) -> Duel {
    let mut duel = connected_duel_with(host, client).await;
    duel.host.launch().unwrap();
    expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::MatchStarted)
    })
    .await;
    duel
}

fn score(local: u32, remote: u32) -> (u32, u32) {
    (local, remote)
}

fn counters(state: RoundState) -> (u32, u32) {
    (state.local_rounds_won, state.remote_rounds_won)
}

fn hit_for(damage: u32) -> Packet {
    Packet::Hit {
        damage,
        weapon: WeaponKind::Rifle,
    }
}

// ── Opening and connecting ──────────────────────────────────────────

#[tokio::test]
async fn open_fails_when_identity_unavailable() {
    let hub = MemoryHub::new();
    hub.set_offline(true);
    let err = DuelSession::open(hub.network(), SessionConfig::new(Role::Host))
        .await
        .unwrap_err();
    assert!(matches!(err, DuelError::IdentityAcquisition(_)), "{err}");
}

#[tokio::test]
async fn host_waits_connecting_client_waits_disconnected() {
    let hub = MemoryHub::new();
    let (host, _host_events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Host))
        .await
        .unwrap();
    let (client, _client_events) =
        DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
            .await
            .unwrap();

    assert_eq!(host.status().await, ConnectionStatus::Connecting);
    assert_eq!(client.status().await, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn host_listeners_first_hear_connecting() {
    let hub = MemoryHub::new();
    let (_host, mut host_events) =
        DuelSession::open(hub.network(), SessionConfig::new(Role::Host))
            .await
            .unwrap();
    let first = expect_event(&mut host_events, |_| true).await;
    assert_eq!(
        first,
        SessionEvent::StatusChanged(ConnectionStatus::Connecting)
    );
}

#[tokio::test]
async fn connect_failure_is_reported_and_retry_succeeds() {
    let hub = MemoryHub::new();
    let (host, mut host_events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Host))
        .await
        .unwrap();
    let (client, mut client_events) =
        DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
            .await
            .unwrap();

    client.connect_to("nobody-home").unwrap();
    let failed = expect_event(&mut client_events, |e| {
        matches!(e, SessionEvent::ConnectFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        SessionEvent::ConnectFailed { remote, .. } if remote.as_str() == "nobody-home"
    ));
    assert_eq!(client.status().await, ConnectionStatus::Disconnected);
    let snapshot = client.snapshot().await;
    assert!(snapshot
        .chat
        .iter()
        .any(|line| line.sender == ChatSender::System));

    client.connect_to(host.local_id().clone()).unwrap();
    expect_event(&mut host_events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    assert_eq!(client.remote_id().await.as_ref(), Some(host.local_id()));
}

#[tokio::test]
async fn host_keeps_first_opponent_and_refuses_others() {
    let mut duel = connected_duel().await;
    let (intruder, mut intruder_events) =
        DuelSession::open(duel.hub.network(), SessionConfig::new(Role::Client))
            .await
            .unwrap();

    intruder.connect_to(duel.host.local_id().clone()).unwrap();
    let events = collect_until_closed(&mut intruder_events).await;
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Disconnected { reason: None })
    );

    assert_eq!(
        duel.host.remote_id().await.as_ref(),
        Some(duel.client.local_id())
    );
    duel.client.send_chat("still here").unwrap();
    expect_event(&mut duel.host_events, |e| {
        matches!(e, SessionEvent::ChatReceived(m) if m.text == "still here")
    })
    .await;
}

// ── Wire behaviour against a scripted opponent ──────────────────────

#[tokio::test]
async fn greeting_is_ready_then_ping() {
    let hub = MemoryHub::new();
    let mut raw_host = RawPeer::open(&hub).await;
    let (client, _events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
        .await
        .unwrap();

    client.set_ready(true).unwrap();
    client.connect_to(raw_host.id.clone()).unwrap();
    let dialer = raw_host.accept().await;
    assert_eq!(&dialer, client.local_id());

    assert_eq!(
        raw_host.recv_any().await,
        Some(Packet::Ready { is_ready: true })
    );
    assert!(matches!(raw_host.recv_any().await, Some(Packet::Ping { .. })));
}

#[tokio::test]
async fn lethal_hits_send_exactly_one_kill_and_round_end() {
    let hub = MemoryHub::new();
    let mut raw_host = RawPeer::open(&hub).await;
    let (client, mut events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
        .await
        .unwrap();
    client.connect_to(raw_host.id.clone()).unwrap();
    let client_id = raw_host.accept().await;
    raw_host.collect_until_pong(1).await;

    raw_host.send(&Packet::Start {}).await;
    for damage in [40, 70, 70, 15] {
        raw_host
            .send(&Packet::Hit {
                damage,
                weapon: WeaponKind::Rifle,
            })
            .await;
    }
    let replies = raw_host.collect_until_pong(2).await;
    assert_eq!(
        replies,
        vec![
            Packet::Kill {
                victim: client_id,
                weapon: WeaponKind::Rifle,
            },
            Packet::RoundEnd { winner: Role::Host },
        ]
    );

    let health: Vec<_> = drain_ready(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::HealthChanged { health } => Some(health),
            _ => None,
        })
        .collect();
    assert_eq!(health, [100, 60, 0]);

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.health, 0);
    assert_eq!(counters(snapshot.score), score(0, 1));
    assert_eq!(snapshot.stats.deaths, 1);
}

#[tokio::test]
async fn simultaneous_kill_after_own_death_is_not_scored() {
    let hub = MemoryHub::new();
    let mut raw_host = RawPeer::open(&hub).await;
    let (client, _events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
        .await
        .unwrap();
    client.connect_to(raw_host.id.clone()).unwrap();
    raw_host.accept().await;
    raw_host.collect_until_pong(1).await;

    raw_host.send(&Packet::Start {}).await;
    raw_host.send(&hit_for(100)).await;
    // The host also went down in the same exchange and reports it.
    let host_id = raw_host.id.clone();
    raw_host
        .send(&Packet::Kill {
            victim: host_id,
            weapon: WeaponKind::Pistol,
        })
        .await;
    raw_host
        .send(&Packet::RoundEnd {
            winner: Role::Client,
        })
        .await;
    let replies = raw_host.collect_until_pong(2).await;
    assert_eq!(
        replies.iter().filter(|p| p.kind() == "ROUND_END").count(),
        1
    );

    let snapshot = client.snapshot().await;
    assert_eq!(counters(snapshot.score), score(0, 1));
    assert_eq!(snapshot.score.last_round_winner, Some(Side::Remote));
    assert_eq!(snapshot.stats.kills, 0);
    assert_eq!(snapshot.stats.deaths, 1);
}

#[tokio::test]
async fn round_end_claiming_the_senders_win_is_ignored() {
    let hub = MemoryHub::new();
    let mut raw_host = RawPeer::open(&hub).await;
    let (client, _events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
        .await
        .unwrap();
    client.connect_to(raw_host.id.clone()).unwrap();
    raw_host.accept().await;

    raw_host.send(&Packet::Start {}).await;
    raw_host.send(&Packet::RoundEnd { winner: Role::Host }).await;
    raw_host.collect_until_pong(5).await;

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.score, RoundState::default());
    assert_eq!(snapshot.phase, MatchPhase::Playing);
    assert_eq!(snapshot.health, 100);
}

#[tokio::test]
async fn empty_magazine_stops_tracers_until_reload() {
    let hub = MemoryHub::new();
    let mut raw_host = RawPeer::open(&hub).await;
    let (client, mut events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
        .await
        .unwrap();
    client.connect_to(raw_host.id.clone()).unwrap();
    raw_host.accept().await;
    raw_host.send(&Packet::Start {}).await;
    raw_host.collect_until_pong(6).await;

    let tracer = Tracer {
        start: Vec3::ZERO,
        end: Vec3::new(0.0, 0.0, -200.0),
        color: WeaponKind::Sniper.stats().color.to_string(),
    };
    for _ in 0..7 {
        client.fire(tracer.clone(), WeaponKind::Sniper).unwrap();
    }
    // Commands run in order, so the chat echo means every trigger pull was handled.
    client.send_chat("out").unwrap();
    expect_event(&mut events, |e| {
        matches!(e, SessionEvent::ChatReceived(m) if m.text == "out")
    })
    .await;
    let shots = raw_host.collect_until_pong(7).await;
    assert_eq!(shots.iter().filter(|p| p.kind() == "SHOOT").count(), 5);

    client.reload(WeaponKind::Sniper).unwrap();
    expect_event(&mut events, |e| {
        *e == SessionEvent::AmmoChanged {
            weapon: WeaponKind::Sniper,
            remaining: 5,
        }
    })
    .await;
    client.fire(tracer.clone(), WeaponKind::Sniper).unwrap();
    expect_event(&mut events, |e| {
        *e == SessionEvent::AmmoChanged {
            weapon: WeaponKind::Sniper,
            remaining: 4,
        }
    })
    .await;
    let shots = raw_host.collect_until_pong(8).await;
    assert_eq!(shots, vec![Packet::Shoot(tracer)]);

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.stats.shots_fired, 6);
    assert_eq!(snapshot.ammo.remaining(WeaponKind::Sniper), 4);
}

#[tokio::test]
async fn client_ignores_hits_before_start() {
    let hub = MemoryHub::new();
    let mut raw_host = RawPeer::open(&hub).await;
    let (client, _events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Client))
        .await
        .unwrap();
    client.connect_to(raw_host.id.clone()).unwrap();
    raw_host.accept().await;

    raw_host
        .send(&Packet::Hit {
            damage: 100,
            weapon: WeaponKind::Knife,
        })
        .await;
    let replies = raw_host.collect_until_pong(3).await;
    assert_eq!(replies, vec![Packet::Ready { is_ready: false }]);
    assert_eq!(client.snapshot().await.health, 100);
}

#[tokio::test]
async fn host_drops_start_and_new_round_from_client() {
    let hub = MemoryHub::new();
    let (host, _events) = DuelSession::open(hub.network(), SessionConfig::new(Role::Host))
        .await
        .unwrap();
    let mut raw_client = RawPeer::open(&hub).await;
    raw_client.connect(host.local_id()).await;

    raw_client.send(&Packet::Start {}).await;
    raw_client.send(&Packet::NewRound {}).await;
    raw_client.collect_until_pong(4).await;
    assert_eq!(host.snapshot().await.phase, MatchPhase::Lobby);
}

// ── Lobby ───────────────────────────────────────────────────────────

#[tokio::test]
async fn opponent_readiness_follows_latest_ready() {
    let mut duel = connected_duel().await;

    for value in [true, false, true] {
        duel.client.set_ready(value).unwrap();
        expect_event(&mut duel.host_events, |e| {
            *e == SessionEvent::OpponentReady { is_ready: value }
        })
        .await;
        assert_eq!(duel.host.snapshot().await.remote_ready, value);
    }
}

#[tokio::test]
async fn host_launch_ignores_readiness() {
    let mut duel = connected_duel().await;
    let before = duel.host.snapshot().await;
    assert!(!before.remote_ready);

    duel.host.launch().unwrap();
    expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::MatchStarted)
    })
    .await;
    assert_eq!(duel.host.snapshot().await.phase, MatchPhase::Playing);
    assert_eq!(duel.client.snapshot().await.phase, MatchPhase::Playing);
}

#[tokio::test]
async fn client_launch_is_rejected() {
    let duel = connected_duel().await;
    assert!(matches!(
        duel.client.launch(),
        Err(DuelError::WrongRole { .. })
    ));
}

// ── Live play ───────────────────────────────────────────────────────

#[tokio::test]
async fn movement_tracers_and_chat_reach_the_opponent() {
    let mut duel = connected_duel().await;

    let snapshot = PlayerSnapshot {
        position: Vec3::new(4.0, 1.6, -2.0),
        current_weapon: WeaponKind::Pistol,
        ..PlayerSnapshot::default()
    };
    duel.client.update_player(snapshot.clone()).unwrap();
    expect_event(&mut duel.host_events, |e| {
        *e == SessionEvent::RemoteSnapshot(snapshot.clone())
    })
    .await;
    assert_eq!(
        duel.host.snapshot().await.remote_player,
        Some(snapshot.clone())
    );

    let tracer = Tracer {
        start: Vec3::ZERO,
        end: Vec3::new(0.0, 0.0, -40.0),
        color: WeaponKind::Rifle.stats().color.to_string(),
    };
    duel.host.fire(tracer.clone(), WeaponKind::Rifle).unwrap();
    expect_event(&mut duel.client_events, |e| {
        *e == SessionEvent::RemoteTracer(tracer.clone())
    })
    .await;

    duel.host.send_chat("gl hf").unwrap();
    let line = expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::ChatReceived(m) if m.sender == ChatSender::Opponent)
    })
    .await;
    assert!(matches!(line, SessionEvent::ChatReceived(m) if m.text == "gl hf"));
}

#[tokio::test(start_paused = true)]
async fn round_loss_at_two_one_levels_then_host_restarts() {
    let mut duel = launched_duel(
        SessionConfig::new(Role::Host),
        SessionConfig::new(Role::Client),
    )
    .await;

    for (round, winner) in [(2, Role::Host), (3, Role::Host), (4, Role::Client)] {
        win_round(&mut duel, winner).await;
        both_reset_to(&mut duel, round).await;
    }
    assert_eq!(counters(duel.host.snapshot().await.score), score(2, 1));

    let decided = Instant::now();
    win_round(&mut duel, Role::Client).await;
    let host_view = duel.host.snapshot().await;
    assert_eq!(counters(host_view.score), score(2, 2));
    assert_eq!(host_view.score.match_winner, None);
    assert_eq!(host_view.phase, MatchPhase::RoundOver);

    both_reset_to(&mut duel, 5).await;
    assert!(decided.elapsed() >= Duration::from_secs(3));

    for side in [&duel.host, &duel.client] {
        let view = side.snapshot().await;
        assert_eq!(view.health, 100);
        assert_eq!(view.phase, MatchPhase::Playing);
        assert_eq!(view.score.last_round_winner, None);
    }
}

#[tokio::test(start_paused = true)]
async fn third_round_win_ends_match_without_new_round() {
    let mut duel = launched_duel(
        SessionConfig::new(Role::Host),
        SessionConfig::new(Role::Client),
    )
    .await;

    for (round, winner) in [
        (2, Role::Host),
        (3, Role::Client),
        (4, Role::Host),
        (5, Role::Client),
    ] {
        win_round(&mut duel, winner).await;
        both_reset_to(&mut duel, round).await;
    }

    win_round(&mut duel, Role::Host).await;
    let ended = expect_event(&mut duel.host_events, |e| {
        matches!(e, SessionEvent::MatchEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        SessionEvent::MatchEnded { winner: Side::Local, score, .. }
            if counters(score) == (3, 2)
    ));
    expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::MatchEnded { winner: Side::Remote, .. })
    })
    .await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let late: Vec<_> = drain_ready(&mut duel.client_events)
        .into_iter()
        .filter(is_gameplay)
        .collect();
    assert!(
        !late
            .iter()
            .any(|e| matches!(e, SessionEvent::RoundReset { .. })),
        "no round may follow a decided match: {late:?}"
    );

    let host_view = duel.host.snapshot().await;
    assert_eq!(host_view.phase, MatchPhase::MatchOver);
    assert_eq!(host_view.score.match_winner, Some(Side::Local));
    let client_view = duel.client.snapshot().await;
    assert_eq!(client_view.score.match_winner, Some(Side::Remote));
    assert_eq!(counters(client_view.score), score(2, 3));
}

#[tokio::test(start_paused = true)]
async fn return_to_lobby_cancels_pending_restart() {
    let mut duel = launched_duel(
        SessionConfig::new(Role::Host),
        SessionConfig::new(Role::Client),
    )
    .await;

    win_round(&mut duel, Role::Client).await;
    duel.host.return_to_lobby().unwrap();
    expect_event(&mut duel.host_events, |e| matches!(e, SessionEvent::MatchReset)).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!drain_ready(&mut duel.client_events)
        .iter()
        .any(|e| matches!(e, SessionEvent::RoundReset { .. })));

    let host_view = duel.host.snapshot().await;
    assert_eq!(host_view.phase, MatchPhase::Lobby);
    assert_eq!(host_view.score, RoundState::default());
}

#[tokio::test(start_paused = true)]
async fn custom_match_length_and_restart_delay() {
    let host = SessionConfig::new(Role::Host)
        .with_rounds_to_win(1)
        .with_round_restart_delay(Duration::from_millis(500));
    let client = SessionConfig::new(Role::Client).with_rounds_to_win(1);
    let mut duel = launched_duel(host, client).await;

    win_round(&mut duel, Role::Client).await;
    let ended = expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::MatchEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        SessionEvent::MatchEnded {
            winner: Side::Local,
            ..
        }
    ));
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn opponent_leaving_mid_round_returns_to_lobby() {
    let mut duel = connected_duel().await;
    duel.client.set_ready(true).unwrap();
    duel.host.set_ready(true).unwrap();
    expect_event(&mut duel.host_events, |e| {
        *e == SessionEvent::OpponentReady { is_ready: true }
    })
    .await;
    duel.host.launch().unwrap();
    expect_event(&mut duel.client_events, |e| {
        matches!(e, SessionEvent::MatchStarted)
    })
    .await;

    duel.client.shutdown().await;

    let events = collect_until_closed(&mut duel.host_events).await;
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Disconnected { reason: None })
    );
    assert!(events.contains(&SessionEvent::MatchReset));
    assert!(events.contains(&SessionEvent::StatusChanged(
        ConnectionStatus::Disconnected
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::ChatReceived(m) if m.sender == ChatSender::System
    )));

    let view = duel.host.snapshot().await;
    assert_eq!(view.status, ConnectionStatus::Disconnected);
    assert_eq!(view.phase, MatchPhase::Lobby);
    assert_eq!(view.score, RoundState::default());
    assert!(!view.local_ready && !view.remote_ready);
    assert_eq!(view.remote_player, None);
    assert!(!duel.host.is_running());
}

#[tokio::test]
async fn commands_after_disconnect_fail() {
    let mut duel = connected_duel().await;
    duel.host.shutdown().await;
    collect_until_closed(&mut duel.client_events).await;

    assert!(matches!(
        duel.client.send_chat("hello?"),
        Err(DuelError::NotConnected)
    ));
    assert!(matches!(
        duel.host.set_ready(true),
        Err(DuelError::NotConnected)
    ));
}

#[tokio::test]
async fn dropping_a_session_closes_the_link() {
    let mut duel = connected_duel().await;
    drop(duel.client);
    let events = collect_until_closed(&mut duel.host_events).await;
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Disconnected { reason: None })
    );
}
