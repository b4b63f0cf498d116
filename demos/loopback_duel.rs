//! # Loopback Duel Example
//!
//! Plays a complete first-to-three match between two sessions in one
//! process, connected through the in-memory network:
//!
//! 1. Open a host and a client on a shared [`MemoryHub`]
//! 2. The client dials the host and signals readiness
//! 3. The host launches once its opponent is ready
//! 4. Each side takes turns landing a sniper shot until the match is decided
//! 5. Both sessions shut down
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_duel
//!
//! # Slow the round restart down to the in-game default:
//! DUEL_RESTART_MS=3000 RUST_LOG=debug cargo run --example loopback_duel
//! ```

use std::time::Duration;

use duel_link::{
    DuelSession, MemoryHub, PeerId, Role, SessionConfig, SessionEvent, Side, Tracer, Vec3,
    WeaponKind,
};
use tokio::sync::mpsc;

/// Restart delay when `DUEL_RESTART_MS` is not set.
const DEFAULT_RESTART_MS: u64 = 500;

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
    let restart_ms = std::env::var("DUEL_RESTART_MS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_RESTART_MS);

    let hub = MemoryHub::new();
    let (host, host_events) = DuelSession::open(
        hub.network(),
        SessionConfig::new(Role::Host)
            .with_nickname("Alice")
            .with_round_restart_delay(Duration::from_millis(restart_ms)),
    )
    .await?;
    let (client, client_events) = DuelSession::open(
        hub.network(),
        SessionConfig::new(Role::Client).with_nickname("Bob"),
    )
    .await?;
    tracing::info!("Host is {}, client is {}", host.local_id(), client.local_id());

    client.connect_to(host.local_id().clone())?;

    // Each side plays from its own task, like two separate processes would.
    let host_task = tokio::spawn(play(host, host_events));
    let client_task = tokio::spawn(play(client, client_events));
    let (host_result, client_result) = tokio::join!(host_task, client_task);
    host_result??;
    client_result??;

    tracing::info!("Match over. Goodbye!");
    Ok(())
}

/// Drive one side: ready up, launch (host), shoot on alternating rounds.
async fn play(
    mut session: DuelSession,
    mut events: mpsc::Receiver<SessionEvent>,
) -> Result<(), duel_link::DuelError> {
    let name = session.nickname().to_string();
    let mut opponent: Option<PeerId> = None;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected { remote } => {
                tracing::info!("[{name}] connected to {remote}");
                opponent = Some(remote);
                session.set_ready(true)?;
            }

            SessionEvent::OpponentReady { is_ready: true } if session.role().is_host() => {
                tracing::info!("[{name}] opponent ready, launching");
                session.launch()?;
            }

            SessionEvent::RoundReset { round } => {
                tracing::info!("[{name}] round {round}");
                // Hosts shoot on odd rounds, clients on even ones.
                let my_turn = (round % 2 == 1) == session.role().is_host();
                if let (true, Some(target)) = (my_turn, opponent.clone()) {
                    let weapon = WeaponKind::Sniper;
                    session.fire(
                        Tracer {
                            start: Vec3::new(0.0, 1.6, 0.0),
                            end: Vec3::new(0.0, 1.6, -weapon.stats().range),
                            color: weapon.stats().color.to_string(),
                        },
                        weapon,
                    )?;
                    session.report_hit(target, weapon.stats().damage, weapon)?;
                }
            }

            SessionEvent::RemoteTracer(tracer) => {
                tracing::debug!("[{name}] incoming tracer {tracer:?}");
            }

            SessionEvent::Eliminated { by } => {
                tracing::info!("[{name}] eliminated by {}", by.display_name());
            }

            SessionEvent::RoundEnded { winner, score } => {
                tracing::info!(
                    "[{name}] round to {winner:?}: {} - {}",
                    score.local_rounds_won,
                    score.remote_rounds_won
                );
            }

            SessionEvent::MatchEnded {
                winner,
                score,
                stats,
            } => {
                let verdict = if winner == Side::Local { "won" } else { "lost" };
                tracing::info!(
                    "[{name}] {verdict} the match {} - {} ({} kills, {:.0}% accuracy)",
                    score.local_rounds_won,
                    score.remote_rounds_won,
                    stats.kills,
                    stats.accuracy() * 100.0
                );
                break;
            }

            SessionEvent::Disconnected { reason } => {
                tracing::warn!(
                    "[{name}] disconnected: {}",
                    reason.as_deref().unwrap_or("peer left")
                );
                break;
            }

            other => tracing::debug!("[{name}] event: {other:?}"),
        }
    }

    session.shutdown().await;
    Ok(())
}
