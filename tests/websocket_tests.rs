#![cfg(feature = "transport-websocket")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Duel sessions over real loopback WebSocket sockets.

mod common;

use common::{collect_until_closed, expect_event};
use duel_link::{
    ConnectionStatus, DuelSession, Role, SessionConfig, SessionEvent, Side, WeaponKind,
    WebSocketNetwork,
};

async fn open_host(rounds_to_win: u32) -> (DuelSession, tokio::sync::mpsc::Receiver<SessionEvent>) {
    DuelSession::open(
        WebSocketNetwork::bind("127.0.0.1:0"),
        SessionConfig::new(Role::Host).with_rounds_to_win(rounds_to_win),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn sniper_shot_decides_a_single_round_match() {
    let (mut host, mut host_events) = open_host(1).await;
    let (mut client, mut client_events) = DuelSession::open(
        WebSocketNetwork::dialer(),
        SessionConfig::new(Role::Client),
    )
    .await
    .unwrap();
    assert!(host.local_id().as_str().starts_with("ws://127.0.0.1:"));

    client.connect_to(host.local_id().clone()).unwrap();
    let SessionEvent::Connected { remote } =
        expect_event(&mut host_events, |e| matches!(e, SessionEvent::Connected { .. })).await
    else {
        unreachable!()
    };
    expect_event(&mut client_events, |e| {
        matches!(e, SessionEvent::Connected { remote } if remote == host.local_id())
    })
    .await;

    client.set_ready(true).unwrap();
    expect_event(&mut host_events, |e| {
        matches!(e, SessionEvent::OpponentReady { is_ready: true })
    })
    .await;

    host.launch().unwrap();
    expect_event(&mut client_events, |e| matches!(e, SessionEvent::MatchStarted)).await;
    expect_event(&mut host_events, |e| matches!(e, SessionEvent::RoundReset { round: 1 })).await;

    host.report_hit(remote, 100, WeaponKind::Sniper).unwrap();

    let SessionEvent::MatchEnded { winner, score, .. } =
        expect_event(&mut client_events, |e| matches!(e, SessionEvent::MatchEnded { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(winner, Side::Remote);
    assert_eq!(score.remote_rounds_won, 1);

    let SessionEvent::MatchEnded { winner, stats, .. } =
        expect_event(&mut host_events, |e| matches!(e, SessionEvent::MatchEnded { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(winner, Side::Local);
    assert_eq!(stats.kills, 1);

    client.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn client_leaving_disconnects_the_host() {
    let (host, mut host_events) = open_host(3).await;
    let host_id = host.local_id().clone();
    let (mut client, mut client_events) = DuelSession::open(
        WebSocketNetwork::dialer(),
        SessionConfig::new(Role::Client),
    )
    .await
    .unwrap();

    client.connect_to(host_id).unwrap();
    expect_event(&mut host_events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    expect_event(&mut client_events, |e| matches!(e, SessionEvent::Connected { .. })).await;

    client.shutdown().await;

    let events = collect_until_closed(&mut host_events).await;
    assert!(
        events.contains(&SessionEvent::StatusChanged(ConnectionStatus::Disconnected)),
        "{events:?}"
    );
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Disconnected { .. })
    ));
}

#[tokio::test]
async fn dialing_a_closed_port_reports_connect_failure() {
    let (client, mut events) = DuelSession::open(
        WebSocketNetwork::dialer().with_handshake_timeout(std::time::Duration::from_secs(2)),
        SessionConfig::new(Role::Client),
    )
    .await
    .unwrap();

    client.connect_to("ws://127.0.0.1:1").unwrap();
    expect_event(&mut events, |e| matches!(e, SessionEvent::ConnectFailed { .. })).await;
}
