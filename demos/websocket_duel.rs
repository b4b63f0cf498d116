//! # WebSocket Duel Example
//!
//! One side of a duel over a real socket. Run it twice: once as the host
//! (listens for the opponent) and once as the client (dials the host's URL).
//!
//! The example plays a tiny scripted match: both players ready up, the host
//! launches, and each side fires its rifle at the other every half second
//! while the round is live. Chat lines typed on stdin are sent to the
//! opponent.
//!
//! ## Running
//!
//! ```sh
//! # Terminal 1
//! DUEL_ROLE=host DUEL_BIND=127.0.0.1:7777 cargo run --example websocket_duel
//!
//! # Terminal 2
//! DUEL_ROLE=client DUEL_HOST_URL=ws://127.0.0.1:7777 cargo run --example websocket_duel
//! ```
//!
//! | Variable          | Default                | Meaning                        |
//! |-------------------|------------------------|--------------------------------|
//! | `DUEL_ROLE`       | `host`                 | `host` or `client`             |
//! | `DUEL_BIND`       | `127.0.0.1:7777`       | host listen address            |
//! | `DUEL_HOST_URL`   | `ws://127.0.0.1:7777`  | URL the client dials           |
//! | `DUEL_NICKNAME`   | the role name          | local display name             |
//! | `DUEL_ROUNDS`     | `3`                    | round wins needed for the match|

use std::time::Duration;

use duel_link::{
    DuelSession, MatchPhase, PeerId, Role, SessionConfig, SessionEvent, Side, Tracer, Vec3,
    WebSocketNetwork, WeaponKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_BIND: &str = "127.0.0.1:7777";
const DEFAULT_HOST_URL: &str = "ws://127.0.0.1:7777";

/// Interval between scripted rifle shots.
const FIRE_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let role = match std::env::var("DUEL_ROLE").as_deref() {
        Ok("client") => Role::Client,
        _ => Role::Host,
    };
    let mut config = SessionConfig::new(role);
    if let Ok(nickname) = std::env::var("DUEL_NICKNAME") {
        config = config.with_nickname(nickname);
    }
    if let Some(rounds) = std::env::var("DUEL_ROUNDS")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config = config.with_rounds_to_win(rounds);
    }

    // ── Open ────────────────────────────────────────────────────────
    let network = match role {
        Role::Host => {
            let bind = std::env::var("DUEL_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
            WebSocketNetwork::bind(bind)
        }
        Role::Client => WebSocketNetwork::dialer(),
    };
    let (mut session, mut events) = DuelSession::open(network, config).await?;
    tracing::info!(
        "{} ready as {} ({})",
        session.nickname(),
        session.role(),
        session.local_id()
    );

    if role == Role::Client {
        let url = std::env::var("DUEL_HOST_URL").unwrap_or_else(|_| DEFAULT_HOST_URL.to_string());
        tracing::info!("Dialing {url}");
        session.connect_to(url)?;
    } else {
        tracing::info!("Waiting for an opponent on {}", session.local_id());
    }

    let mut opponent: Option<PeerId> = None;
    let mut playing = false;
    let mut trigger = tokio::time::interval(FIRE_INTERVAL);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            // Branch 1: session events
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    SessionEvent::Connected { remote } => {
                        tracing::info!("Connected to {remote}");
                        opponent = Some(remote);
                        session.set_ready(true)?;
                    }

                    SessionEvent::ConnectFailed { reason, .. } => {
                        tracing::error!("Could not reach the host: {reason}");
                        break;
                    }

                    SessionEvent::OpponentReady { is_ready } => {
                        tracing::info!("Opponent ready: {is_ready}");
                        if is_ready && role == Role::Host {
                            session.launch()?;
                        }
                    }

                    SessionEvent::RoundReset { round } => {
                        tracing::info!("Round {round}, fight!");
                        playing = true;
                    }

                    SessionEvent::HealthChanged { health } => {
                        tracing::info!("Health: {health}");
                    }

                    SessionEvent::RoundEnded { winner, score } => {
                        playing = false;
                        tracing::info!(
                            "Round to {}: {} - {}",
                            if winner == Side::Local { "you" } else { "opponent" },
                            score.local_rounds_won,
                            score.remote_rounds_won
                        );
                    }

                    SessionEvent::MatchEnded { winner, stats, .. } => {
                        tracing::info!(
                            "Match {}! shots {} / hits {} / kills {} / deaths {}",
                            if winner == Side::Local { "won" } else { "lost" },
                            stats.shots_fired,
                            stats.shots_hit,
                            stats.kills,
                            stats.deaths
                        );
                        break;
                    }

                    SessionEvent::AmmoChanged { weapon, remaining: 0 } => {
                        tracing::info!("{} empty, reloading", weapon.display_name());
                        session.reload(weapon)?;
                    }

                    SessionEvent::KillFeed(entry) => {
                        tracing::info!(
                            "{:?} eliminated {:?} with {}",
                            entry.killer,
                            entry.victim,
                            entry.weapon.display_name()
                        );
                    }

                    SessionEvent::ChatReceived(line) => {
                        tracing::info!("[{:?}] {}", line.sender, line.text);
                    }

                    SessionEvent::LatencyMeasured { rtt } => {
                        tracing::debug!("RTT {rtt:?}");
                    }

                    SessionEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("peer left"));
                        break;
                    }

                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            // Branch 2: scripted trigger pull
            _ = trigger.tick(), if playing => {
                let weapon = WeaponKind::Rifle;
                session.fire(
                    Tracer {
                        start: Vec3::new(0.0, 1.6, 0.0),
                        end: Vec3::new(0.0, 1.6, -weapon.stats().range),
                        color: weapon.stats().color.to_string(),
                    },
                    weapon,
                )?;
                if let Some(target) = opponent.clone() {
                    session.report_hit(target, weapon.stats().damage, weapon)?;
                }
                if session.snapshot().await.phase != MatchPhase::Playing {
                    playing = false;
                }
            }

            // Branch 3: chat from stdin
            line = stdin.next_line() => {
                match line {
                    Ok(Some(text)) => session.send_chat(text)?,
                    Ok(None) | Err(_) => {}
                }
            }

            // Branch 4: Ctrl+C
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.shutdown().await;
    tracing::info!("Session shut down. Goodbye!");
    Ok(())
}
