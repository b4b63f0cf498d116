//! Local event bridge: the synchronous core of a session.
//!
//! [`Bridge`] owns every per-session component (round machine, vitals,
//! ready-check, remote mirror, chat, stats, restart timer) and exposes only
//! the operations that keep their invariants. Each operation records its
//! consequences in an outbox: packets to put on the wire, in order, and
//! [`SessionEvent`]s for the local collaborators. The session loop drains the
//! outbox after every step; nothing here performs I/O, so every rule can be
//! exercised without a runtime or a socket.

use std::mem;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chat::{unix_millis, ChatLog, ChatMessage, ChatSender};
use crate::combat::{DamageOutcome, Vitals, MAX_HEALTH};
use crate::error::{DuelError, Result};
use crate::event::{ConnectionStatus, LocalEvent, SessionEvent};
use crate::mirror::RemoteMirror;
use crate::protocol::{Packet, PeerId, PlayerSnapshot, Role, WeaponKind};
use crate::ready::ReadyCheck;
use crate::round::{MatchPhase, RoundMachine, RoundOutcome, RoundState, Side};
use crate::scheduler::RestartTimer;
use crate::stats::{KillFeed, KillFeedEntry, MatchStats};
use crate::weapons::Ammo;

/// Default delay between a decided round and the host's `NEW_ROUND`.
pub const DEFAULT_ROUND_RESTART_DELAY: Duration = Duration::from_secs(3);

/// Everything the bridge produced since the last drain.
#[derive(Debug, Default)]
pub struct Outbox {
    pub packets: Vec<Packet>,
    pub events: Vec<SessionEvent>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.events.is_empty()
    }
}

/// Point-in-time view of a session for UI polling.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub role: Role,
    pub status: ConnectionStatus,
    pub local_id: PeerId,
    pub remote_id: Option<PeerId>,
    pub phase: MatchPhase,
    pub round: u32,
    pub score: RoundState,
    pub health: u32,
    pub ammo: Ammo,
    pub local_ready: bool,
    pub remote_ready: bool,
    pub remote_player: Option<PlayerSnapshot>,
    pub stats: MatchStats,
    pub kill_feed: Vec<KillFeedEntry>,
    pub chat: Vec<ChatMessage>,
}

/// Session core. See the [module docs](self).
#[derive(Debug)]
pub struct Bridge {
    role: Role,
    local_id: PeerId,
    remote_id: Option<PeerId>,
    status: ConnectionStatus,
    rounds: RoundMachine,
    restart: RestartTimer,
    restart_delay: Duration,
    vitals: Vitals,
    ready: ReadyCheck,
    mirror: RemoteMirror,
    chat: ChatLog,
    kill_feed: KillFeed,
    stats: MatchStats,
    outbox: Outbox,
}

impl Bridge {
    /// A bridge in the lobby. A host starts out `Connecting` (waiting for
    /// its opponent); a client stays `Disconnected` until it dials.
    pub fn new(role: Role, local_id: PeerId) -> Self {
        Self {
            role,
            local_id,
            remote_id: None,
            status: if role.is_host() {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Disconnected
            },
            rounds: RoundMachine::default(),
            restart: RestartTimer::new(),
            restart_delay: DEFAULT_ROUND_RESTART_DELAY,
            vitals: Vitals::new(),
            ready: ReadyCheck::new(),
            mirror: RemoteMirror::new(),
            chat: ChatLog::default(),
            kill_feed: KillFeed::default(),
            stats: MatchStats::default(),
            outbox: Outbox::default(),
        }
    }

    #[must_use]
    pub fn with_rounds_to_win(mut self, rounds: u32) -> Self {
        self.rounds = RoundMachine::new(rounds);
        self
    }

    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    #[must_use]
    pub fn with_chat_history(mut self, lines: usize) -> Self {
        self.chat = ChatLog::new(lines);
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn remote_id(&self) -> Option<&PeerId> {
        self.remote_id.as_ref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn phase(&self) -> MatchPhase {
        self.rounds.phase()
    }

    pub fn score(&self) -> RoundState {
        self.rounds.score()
    }

    pub fn health(&self) -> u32 {
        self.vitals.health()
    }

    pub fn vitals(&self) -> &Vitals {
        &self.vitals
    }

    pub fn ready(&self) -> ReadyCheck {
        self.ready
    }

    pub fn mirror(&self) -> &RemoteMirror {
        &self.mirror
    }

    pub fn stats(&self) -> MatchStats {
        self.stats
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn kill_feed(&self) -> &KillFeed {
        &self.kill_feed
    }

    /// The pending round restart, polled by the session loop.
    pub fn restart_timer(&self) -> &RestartTimer {
        &self.restart
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let ready = self.ready;
        SessionSnapshot {
            role: self.role,
            status: self.status,
            local_id: self.local_id.clone(),
            remote_id: self.remote_id.clone(),
            phase: self.rounds.phase(),
            round: self.rounds.round_number(),
            score: self.rounds.score(),
            health: self.vitals.health(),
            ammo: self.vitals.ammo().clone(),
            local_ready: ready.local(),
            remote_ready: ready.remote(),
            remote_player: self.mirror.latest().cloned(),
            stats: self.stats,
            kill_feed: self.kill_feed.entries().copied().collect(),
            chat: self.chat.lines().cloned().collect(),
        }
    }

    /// Take everything produced since the last drain.
    pub fn drain(&mut self) -> Outbox {
        mem::take(&mut self.outbox)
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Report the starting status, so a host's listeners see `Connecting`
    /// before anything else.
    pub fn announce(&mut self) {
        if self.role.is_host() {
            self.emit(SessionEvent::StatusChanged(self.status));
        }
    }

    /// Mark a connection attempt in progress.
    pub fn connecting(&mut self) {
        self.set_status(ConnectionStatus::Connecting);
    }

    /// The link to `remote` just opened.
    ///
    /// Re-announces local readiness first: the UI may have toggled it before
    /// the channel finished opening. A liveness PING follows.
    pub fn connection_opened(&mut self, remote: PeerId) {
        info!(peer = %remote, role = %self.role, "peer link open");
        self.remote_id = Some(remote.clone());
        self.set_status(ConnectionStatus::Connected);
        self.send(Packet::Ready {
            is_ready: self.ready.local(),
        });
        self.send(Packet::Ping { time: unix_millis() });
        self.emit(SessionEvent::Connected {
            remote: remote.clone(),
        });
        self.system_chat(format!("Connected to {remote}"));
    }

    /// A dial attempt failed. The client may call `connect_to` again.
    pub fn connect_failed(&mut self, remote: PeerId, reason: String) {
        warn!(peer = %remote, "connect failed: {reason}");
        self.set_status(ConnectionStatus::Disconnected);
        self.system_chat(format!("Could not connect to {remote}: {reason}"));
        self.emit(SessionEvent::ConnectFailed { remote, reason });
    }

    /// The link closed or failed. Abandons any round in flight without a
    /// winner and returns everything to the lobby.
    pub fn connection_lost(&mut self, reason: Option<&str>) {
        info!(reason = reason.unwrap_or("closed by peer"), "peer link lost");
        self.system_chat(match reason {
            Some(reason) => format!("Connection lost: {reason}"),
            None => "Opponent disconnected".to_string(),
        });
        self.mirror.clear();
        self.return_to_lobby();
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Periodic heartbeat.
    pub fn heartbeat(&mut self) {
        self.send(Packet::Ping { time: unix_millis() });
    }

    // ── Local events ────────────────────────────────────────────────

    /// Apply one event raised by the local simulation.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::WrongRole`] when a client requests a launch.
    pub fn on_local(&mut self, event: LocalEvent) -> Result<()> {
        match event {
            LocalEvent::PlayerMoved(snapshot) => {
                self.send(Packet::PlayerUpdate(snapshot));
            }
            LocalEvent::WeaponFired { tracer, weapon } => {
                if !self.vitals.spend_round(weapon) {
                    debug!(?weapon, "dry fire, magazine empty");
                    return Ok(());
                }
                self.stats.shots_fired += 1;
                self.stats.last_weapon = Some(weapon);
                self.send(Packet::Shoot(tracer));
                self.emit(SessionEvent::AmmoChanged {
                    weapon,
                    remaining: self.vitals.ammo().remaining(weapon),
                });
            }
            LocalEvent::Reloaded(weapon) => {
                let remaining = self.vitals.reload(weapon);
                self.emit(SessionEvent::AmmoChanged { weapon, remaining });
            }
            LocalEvent::DamageDealt {
                target,
                damage,
                weapon,
            } => self.deal_damage(&target, damage, weapon),
            LocalEvent::DamageTaken { damage, weapon } => {
                if self.rounds.is_playing() {
                    self.take_damage(damage, weapon);
                }
            }
            LocalEvent::ChatSubmitted(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    let message = self.chat.push(ChatSender::Me, text);
                    self.send(Packet::Chat {
                        text: message.text.clone(),
                    });
                    self.emit(SessionEvent::ChatReceived(message));
                }
            }
            LocalEvent::ReadyToggled(is_ready) => {
                self.ready.set_local(is_ready);
                self.send(Packet::Ready { is_ready });
            }
            LocalEvent::LaunchRequested => self.launch()?,
        }
        Ok(())
    }

    /// Host only: begin the match regardless of readiness.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::WrongRole`] for a client.
    pub fn launch(&mut self) -> Result<()> {
        if !self.role.is_host() {
            return Err(DuelError::WrongRole {
                operation: "launch",
                role: self.role,
            });
        }
        if self.rounds.phase() == MatchPhase::MatchOver {
            self.return_to_lobby();
        }
        if !self.rounds.start() {
            debug!(phase = ?self.rounds.phase(), "launch ignored, match already running");
            return Ok(());
        }
        if !self.ready.both_ready() {
            debug!("launching without both players ready");
        }
        self.send(Packet::Start {});
        self.match_started();
        Ok(())
    }

    /// Explicit full reset back to the lobby.
    pub fn return_to_lobby(&mut self) {
        if self.restart.cancel() {
            debug!("pending round restart cancelled");
        }
        self.rounds.reset();
        self.ready.reset();
        self.vitals.reset_round();
        self.stats = MatchStats::default();
        self.kill_feed.clear();
        self.emit(SessionEvent::MatchReset);
    }

    /// The round-restart timer expired.
    pub fn restart_due(&mut self) {
        self.restart.cancel();
        if !self.role.is_host() {
            return;
        }
        if self.rounds.begin_next_round() {
            self.send(Packet::NewRound {});
            self.round_reset();
        }
    }

    // ── Inbound packets ─────────────────────────────────────────────

    /// Apply one packet received from the opponent.
    pub fn on_packet(&mut self, packet: Packet) {
        if packet.is_host_only() && self.role.is_host() {
            warn!(kind = packet.kind(), "ignoring host-only packet from client");
            return;
        }

        match packet {
            Packet::Ping { time } => self.send(Packet::Pong { time }),
            Packet::Pong { time } => {
                let rtt = Duration::from_millis(unix_millis().saturating_sub(time));
                self.emit(SessionEvent::LatencyMeasured { rtt });
            }
            Packet::PlayerUpdate(snapshot) => {
                self.mirror.overwrite(snapshot.clone());
                self.emit(SessionEvent::RemoteSnapshot(snapshot));
            }
            Packet::Shoot(tracer) => self.emit(SessionEvent::RemoteTracer(tracer)),
            Packet::Hit { damage, weapon } => {
                if self.rounds.is_playing() {
                    self.take_damage(damage, weapon);
                } else {
                    debug!(damage, "HIT outside a live round ignored");
                }
            }
            Packet::Kill { victim, weapon } => self.opponent_eliminated(&victim, weapon),
            Packet::RoundEnd { winner } => {
                let side = Side::of_role(winner, self.role);
                if side == Side::Remote {
                    // Only the loser of a round sends ROUND_END.
                    debug!(?winner, "ROUND_END naming its sender as winner ignored");
                    return;
                }
                match self.rounds.record_round(side) {
                    Some(outcome) => self.round_decided(outcome),
                    None => debug!(?side, "ROUND_END for an already decided round"),
                }
            }
            Packet::NewRound {} => {
                if self.rounds.begin_next_round() {
                    self.round_reset();
                } else {
                    debug!(phase = ?self.rounds.phase(), "NEW_ROUND ignored");
                }
            }
            Packet::Start {} => {
                // The host resets locally before relaunching; follow it.
                if self.rounds.phase() == MatchPhase::MatchOver {
                    self.return_to_lobby();
                }
                if self.rounds.start() {
                    self.match_started();
                } else {
                    debug!(phase = ?self.rounds.phase(), "START ignored");
                }
            }
            Packet::Ready { is_ready } => {
                self.ready.set_remote(is_ready);
                self.emit(SessionEvent::OpponentReady { is_ready });
            }
            Packet::Chat { text } => {
                let message = self.chat.push(ChatSender::Opponent, text);
                self.emit(SessionEvent::ChatReceived(message));
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn deal_damage(&mut self, target: &PeerId, damage: u32, weapon: WeaponKind) {
        if !self.rounds.is_playing() {
            debug!("damage dealt outside a live round ignored");
            return;
        }
        if self.remote_id.as_ref() != Some(target) {
            debug!(%target, "damage dealt to someone other than the opponent");
            return;
        }
        self.stats.shots_hit += 1;
        self.send(Packet::Hit { damage, weapon });
    }

    /// Victim-side damage application with the death-latch.
    fn take_damage(&mut self, damage: u32, weapon: WeaponKind) {
        match self.vitals.apply_damage(damage, weapon) {
            DamageOutcome::Ignored => {
                debug!(damage, "damage after death-latch ignored");
            }
            DamageOutcome::Wounded { health } => {
                self.emit(SessionEvent::HealthChanged { health });
            }
            DamageOutcome::Eliminated { killed_by } => {
                self.emit(SessionEvent::HealthChanged { health: 0 });
                self.emit(SessionEvent::Eliminated { by: killed_by });
                self.stats.deaths += 1;

                self.send(Packet::Kill {
                    victim: self.local_id.clone(),
                    weapon: killed_by,
                });
                self.send(Packet::RoundEnd {
                    winner: self.role.opponent(),
                });

                self.push_kill(Side::Remote, killed_by);
                if let Some(outcome) = self.rounds.record_round(Side::Remote) {
                    self.round_decided(outcome);
                }
            }
        }
    }

    fn opponent_eliminated(&mut self, victim: &PeerId, weapon: WeaponKind) {
        if self.remote_id.as_ref() != Some(victim) {
            warn!(%victim, "KILL names an unexpected victim");
        }
        match self.rounds.record_round(Side::Local) {
            Some(outcome) => {
                self.stats.kills += 1;
                self.push_kill(Side::Local, weapon);
                self.round_decided(outcome);
            }
            None => debug!("KILL for an already decided round"),
        }
    }

    fn push_kill(&mut self, killer: Side, weapon: WeaponKind) {
        let entry = KillFeedEntry {
            killer,
            victim: killer.opponent(),
            weapon,
        };
        self.kill_feed.push(entry);
        self.emit(SessionEvent::KillFeed(entry));
    }

    fn round_decided(&mut self, outcome: RoundOutcome) {
        info!(
            winner = ?outcome.winner,
            local = outcome.score.local_rounds_won,
            remote = outcome.score.remote_rounds_won,
            "round decided"
        );
        self.emit(SessionEvent::RoundEnded {
            winner: outcome.winner,
            score: outcome.score,
        });

        if outcome.match_over {
            self.restart.cancel();
            self.emit(SessionEvent::MatchEnded {
                winner: outcome.winner,
                score: outcome.score,
                stats: self.stats,
            });
        } else if self.role.is_host() {
            self.restart.arm(self.restart_delay);
        }
    }

    fn match_started(&mut self) {
        info!(role = %self.role, "match started");
        self.stats = MatchStats::default();
        self.kill_feed.clear();
        self.emit(SessionEvent::MatchStarted);
        self.round_reset();
    }

    fn round_reset(&mut self) {
        self.vitals.reset_round();
        self.emit(SessionEvent::HealthChanged { health: MAX_HEALTH });
        self.emit(SessionEvent::RoundReset {
            round: self.rounds.round_number(),
        });
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    fn system_chat(&mut self, text: String) {
        let message = self.chat.push(ChatSender::System, text);
        self.emit(SessionEvent::ChatReceived(message));
    }

    /// Queue a packet; dropped while no link is open.
    fn send(&mut self, packet: Packet) {
        if self.is_connected() {
            self.outbox.packets.push(packet);
        } else {
            debug!(kind = packet.kind(), "not connected, packet dropped");
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.outbox.events.push(event);
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
    use crate::protocol::{Tracer, Vec3};

    const HOST: &str = "host-peer";
    const CLIENT: &str = "client-peer";

    fn connected(role: Role) -> Bridge {
        let (local, remote) = match role {
            Role::Host => (HOST, CLIENT),
            Role::Client => (CLIENT, HOST),
        };
        let mut bridge = Bridge::new(role, local.into());
        bridge.connection_opened(remote.into());
        bridge.drain();
        bridge
    }

    fn playing(role: Role) -> Bridge {
        let mut bridge = connected(role);
        match role {
            Role::Host => bridge.launch().unwrap(),
            Role::Client => bridge.on_packet(Packet::Start {}),
        }
        bridge.drain();
        bridge
    }

    fn hit(damage: u32) -> Packet {
        Packet::Hit {
            damage,
            weapon: WeaponKind::Rifle,
        }
    }

    fn count(packets: &[Packet], kind: &str) -> usize {
        packets.iter().filter(|p| p.kind() == kind).count()
    }

    /// Drive `bridge` to the given score by alternating decided rounds.
    fn with_score(role: Role, local: u32, remote: u32) -> Bridge {
        let mut bridge = playing(role);
        let opponent_id = PeerId::from(match role {
            Role::Host => CLIENT,
            Role::Client => HOST,
        });
        for _ in 0..local {
            bridge.on_packet(Packet::Kill {
                victim: opponent_id.clone(),
                weapon: WeaponKind::Rifle,
            });
            advance_round(&mut bridge);
        }
        for _ in 0..remote {
            bridge.on_packet(hit(MAX_HEALTH));
            advance_round(&mut bridge);
        }
        bridge.drain();
        bridge
    }

    fn advance_round(bridge: &mut Bridge) {
        match bridge.role() {
            Role::Host => bridge.restart_due(),
            Role::Client => bridge.on_packet(Packet::NewRound {}),
        }
    }

    #[test]
    fn opening_sends_ready_then_ping() {
        let mut bridge = Bridge::new(Role::Client, CLIENT.into());
        bridge.on_local(LocalEvent::ReadyToggled(true)).unwrap();
        assert!(bridge.drain().packets.is_empty(), "nothing sent before open");

        bridge.connection_opened(HOST.into());
        let out = bridge.drain();
        assert_eq!(out.packets[0], Packet::Ready { is_ready: true });
        assert_eq!(out.packets[1].kind(), "PING");
        assert!(out
            .events
            .contains(&SessionEvent::StatusChanged(ConnectionStatus::Connected)));
    }

    #[test]
    fn announce_reports_host_waiting() {
        let mut host = Bridge::new(Role::Host, HOST.into());
        host.announce();
        assert_eq!(
            host.drain().events,
            vec![SessionEvent::StatusChanged(ConnectionStatus::Connecting)]
        );

        let mut client = Bridge::new(Role::Client, CLIENT.into());
        client.announce();
        assert!(client.drain().is_empty());
    }

    #[test]
    fn host_starts_connecting_client_disconnected() {
        assert_eq!(
            Bridge::new(Role::Host, HOST.into()).status(),
            ConnectionStatus::Connecting
        );
        assert_eq!(
            Bridge::new(Role::Client, CLIENT.into()).status(),
            ConnectionStatus::Disconnected
        );
    }

    #[test]
    fn ping_is_answered_with_echo() {
        let mut bridge = connected(Role::Client);
        bridge.on_packet(Packet::Ping { time: 1234 });
        assert_eq!(bridge.drain().packets, vec![Packet::Pong { time: 1234 }]);
    }

    #[test]
    fn remote_ready_follows_latest_packet() {
        let mut bridge = connected(Role::Host);
        for value in [true, false, false, true] {
            bridge.on_packet(Packet::Ready { is_ready: value });
            assert_eq!(bridge.ready().remote(), value);
        }
    }

    #[test]
    fn lethal_hits_send_one_kill_round_end_pair() {
        let mut bridge = playing(Role::Client);
        bridge.on_packet(hit(40));
        assert_eq!(bridge.health(), 60);
        bridge.on_packet(hit(70));
        bridge.on_packet(hit(70));
        bridge.on_packet(hit(15));
        assert_eq!(bridge.health(), 0);

        let out = bridge.drain();
        assert_eq!(count(&out.packets, "KILL"), 1);
        assert_eq!(count(&out.packets, "ROUND_END"), 1);
        assert_eq!(
            out.packets,
            vec![
                Packet::Kill {
                    victim: CLIENT.into(),
                    weapon: WeaponKind::Rifle
                },
                Packet::RoundEnd { winner: Role::Host },
            ]
        );
        assert_eq!(bridge.score().remote_rounds_won, 1);
    }

    #[test]
    fn host_starts_without_remote_ready() {
        let mut bridge = connected(Role::Host);
        assert!(!bridge.ready().remote());
        bridge.launch().unwrap();
        assert_eq!(bridge.phase(), MatchPhase::Playing);
        assert_eq!(bridge.drain().packets, vec![Packet::Start {}]);
    }

    #[test]
    fn client_cannot_launch() {
        let mut bridge = connected(Role::Client);
        let err = bridge.on_local(LocalEvent::LaunchRequested).unwrap_err();
        assert!(matches!(err, DuelError::WrongRole { .. }));
        assert_eq!(bridge.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn host_ignores_host_only_packets() {
        let mut bridge = connected(Role::Host);
        bridge.on_packet(Packet::Start {});
        assert_eq!(bridge.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn host_loss_at_two_one_schedules_new_round() {
        let mut bridge = with_score(Role::Host, 2, 1);
        bridge.on_packet(hit(MAX_HEALTH));
        let score = bridge.score();
        assert_eq!((score.local_rounds_won, score.remote_rounds_won), (2, 2));
        assert_eq!(score.match_winner, None);
        assert!(bridge.restart_timer().is_armed());
        bridge.drain();

        bridge.restart_due();
        let out = bridge.drain();
        assert_eq!(out.packets, vec![Packet::NewRound {}]);
        assert_eq!(bridge.health(), MAX_HEALTH);
        assert_eq!(bridge.score().last_round_winner, None);
        assert_eq!(bridge.phase(), MatchPhase::Playing);
    }

    #[test]
    fn client_never_schedules_restart() {
        let mut bridge = with_score(Role::Client, 0, 0);
        bridge.on_packet(hit(MAX_HEALTH));
        assert!(!bridge.restart_timer().is_armed());
        bridge.restart_due();
        assert_eq!(bridge.phase(), MatchPhase::RoundOver);
    }

    #[test]
    fn third_win_ends_match_without_new_round() {
        let mut bridge = with_score(Role::Host, 2, 2);
        bridge.on_packet(Packet::Kill {
            victim: CLIENT.into(),
            weapon: WeaponKind::Sniper,
        });
        let score = bridge.score();
        assert_eq!((score.local_rounds_won, score.remote_rounds_won), (3, 2));
        assert_eq!(score.match_winner, Some(Side::Local));
        assert!(!bridge.restart_timer().is_armed());

        let out = bridge.drain();
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, SessionEvent::MatchEnded { winner: Side::Local, .. })));

        bridge.restart_due();
        assert!(bridge.drain().packets.is_empty());
        assert_eq!(bridge.phase(), MatchPhase::MatchOver);
    }

    #[test]
    fn kill_and_round_end_count_once() {
        let mut bridge = playing(Role::Host);
        bridge.on_packet(Packet::Kill {
            victim: CLIENT.into(),
            weapon: WeaponKind::Pistol,
        });
        bridge.on_packet(Packet::RoundEnd { winner: Role::Host });
        assert_eq!(bridge.score().local_rounds_won, 1);
        assert_eq!(bridge.stats().kills, 1);
        assert_eq!(bridge.kill_feed().len(), 1);
    }

    #[test]
    fn opponent_kill_after_own_death_is_not_scored() {
        let mut bridge = playing(Role::Client);
        bridge.on_packet(hit(MAX_HEALTH));
        bridge.on_packet(Packet::Kill {
            victim: HOST.into(),
            weapon: WeaponKind::Sniper,
        });
        bridge.on_packet(Packet::RoundEnd {
            winner: Role::Client,
        });

        let score = bridge.score();
        assert_eq!((score.local_rounds_won, score.remote_rounds_won), (0, 1));
        assert_eq!(score.last_round_winner, Some(Side::Remote));
        assert_eq!(bridge.stats().kills, 0);
        assert_eq!(bridge.stats().deaths, 1);
        assert_eq!(bridge.kill_feed().len(), 1);
    }

    #[test]
    fn round_end_naming_its_sender_is_ignored() {
        let mut bridge = playing(Role::Client);
        bridge.on_packet(Packet::RoundEnd { winner: Role::Host });
        assert_eq!(bridge.score(), RoundState::default());
        assert_eq!(bridge.phase(), MatchPhase::Playing);
        assert!(bridge.drain().events.is_empty());
    }

    #[test]
    fn round_end_alone_decides_the_round() {
        let mut bridge = playing(Role::Client);
        bridge.on_packet(Packet::RoundEnd {
            winner: Role::Client,
        });
        assert_eq!(bridge.score().local_rounds_won, 1);
        assert_eq!(bridge.score().last_round_winner, Some(Side::Local));
    }

    #[test]
    fn no_score_change_after_match_over() {
        let mut bridge = with_score(Role::Client, 0, 2);
        bridge.on_packet(hit(MAX_HEALTH));
        assert_eq!(bridge.score().match_winner, Some(Side::Remote));
        bridge.on_packet(Packet::RoundEnd {
            winner: Role::Client,
        });
        bridge.on_packet(Packet::NewRound {});
        assert_eq!(bridge.score().local_rounds_won, 0);
        assert_eq!(bridge.score().remote_rounds_won, 3);
        assert_eq!(bridge.phase(), MatchPhase::MatchOver);
    }

    #[test]
    fn disconnect_mid_round_returns_to_lobby() {
        let mut bridge = with_score(Role::Host, 1, 1);
        bridge.on_packet(Packet::Ready { is_ready: true });
        bridge.on_local(LocalEvent::ReadyToggled(true)).unwrap();
        bridge.on_packet(hit(MAX_HEALTH));
        assert!(bridge.restart_timer().is_armed());

        bridge.connection_lost(None);
        assert_eq!(bridge.status(), ConnectionStatus::Disconnected);
        assert_eq!(bridge.phase(), MatchPhase::Lobby);
        assert_eq!(bridge.score(), RoundState::default());
        assert!(!bridge.ready().local() && !bridge.ready().remote());
        assert!(!bridge.restart_timer().is_armed());
        assert!(bridge
            .chat()
            .lines()
            .any(|line| line.sender == ChatSender::System));
    }

    #[test]
    fn reset_cancels_pending_restart() {
        let mut bridge = with_score(Role::Host, 0, 0);
        bridge.on_packet(hit(MAX_HEALTH));
        assert!(bridge.restart_timer().is_armed());
        bridge.return_to_lobby();
        assert!(!bridge.restart_timer().is_armed());
        bridge.drain();
        bridge.restart_due();
        assert!(bridge.drain().packets.is_empty());
        assert_eq!(bridge.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn outbound_forwarding_of_local_events() {
        let mut bridge = playing(Role::Host);
        bridge
            .on_local(LocalEvent::PlayerMoved(PlayerSnapshot::default()))
            .unwrap();
        bridge
            .on_local(LocalEvent::WeaponFired {
                tracer: Tracer {
                    start: Vec3::ZERO,
                    end: Vec3::new(0.0, 0.0, -50.0),
                    color: "#3b82f6".into(),
                },
                weapon: WeaponKind::Rifle,
            })
            .unwrap();
        bridge
            .on_local(LocalEvent::DamageDealt {
                target: CLIENT.into(),
                damage: 15,
                weapon: WeaponKind::Rifle,
            })
            .unwrap();
        bridge
            .on_local(LocalEvent::ChatSubmitted("  nice shot ".into()))
            .unwrap();
        bridge
            .on_local(LocalEvent::ChatSubmitted("   ".into()))
            .unwrap();

        let kinds: Vec<_> = bridge.drain().packets.iter().map(Packet::kind).collect();
        assert_eq!(kinds, ["PLAYER_UPDATE", "SHOOT", "HIT", "CHAT"]);
        assert_eq!(bridge.stats().shots_fired, 1);
        assert_eq!(bridge.stats().shots_hit, 1);
        assert_eq!(bridge.vitals().ammo().remaining(WeaponKind::Rifle), 29);
    }

    #[test]
    fn empty_magazine_fires_nothing() {
        let mut bridge = playing(Role::Host);
        let tracer = Tracer {
            start: Vec3::ZERO,
            end: Vec3::new(0.0, 0.0, -200.0),
            color: "#a855f7".into(),
        };
        for _ in 0..6 {
            bridge
                .on_local(LocalEvent::WeaponFired {
                    tracer: tracer.clone(),
                    weapon: WeaponKind::Sniper,
                })
                .unwrap();
        }

        let out = bridge.drain();
        assert_eq!(count(&out.packets, "SHOOT"), 5);
        assert_eq!(bridge.stats().shots_fired, 5);
        let remaining: Vec<_> = out
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::AmmoChanged { remaining, .. } => Some(*remaining),
                _ => None,
            })
            .collect();
        assert_eq!(remaining, [4, 3, 2, 1, 0]);
    }

    #[test]
    fn reload_refills_one_weapon() {
        let mut bridge = playing(Role::Host);
        let tracer = Tracer {
            start: Vec3::ZERO,
            end: Vec3::new(0.0, 0.0, -50.0),
            color: "#eab308".into(),
        };
        for weapon in [WeaponKind::Pistol, WeaponKind::Rifle] {
            bridge
                .on_local(LocalEvent::WeaponFired {
                    tracer: tracer.clone(),
                    weapon,
                })
                .unwrap();
        }
        bridge.drain();

        bridge
            .on_local(LocalEvent::Reloaded(WeaponKind::Pistol))
            .unwrap();
        let out = bridge.drain();
        assert!(out.packets.is_empty());
        assert_eq!(
            out.events,
            vec![SessionEvent::AmmoChanged {
                weapon: WeaponKind::Pistol,
                remaining: 12,
            }]
        );
        let ammo = bridge.snapshot().ammo;
        assert_eq!(ammo.remaining(WeaponKind::Pistol), 12);
        assert_eq!(ammo.remaining(WeaponKind::Rifle), 29);
    }

    #[test]
    fn damage_to_a_stranger_is_not_forwarded() {
        let mut bridge = playing(Role::Host);
        bridge
            .on_local(LocalEvent::DamageDealt {
                target: "practice-bot".into(),
                damage: 15,
                weapon: WeaponKind::Rifle,
            })
            .unwrap();
        assert!(bridge.drain().packets.is_empty());
    }

    #[test]
    fn inbound_events_reach_collaborators() {
        let mut bridge = connected(Role::Client);
        let snapshot = PlayerSnapshot {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..PlayerSnapshot::default()
        };
        bridge.on_packet(Packet::PlayerUpdate(snapshot.clone()));
        bridge.on_packet(Packet::Chat { text: "hi".into() });
        bridge.on_packet(Packet::Ready { is_ready: true });

        let out = bridge.drain();
        assert!(out
            .events
            .contains(&SessionEvent::RemoteSnapshot(snapshot.clone())));
        assert!(out
            .events
            .contains(&SessionEvent::OpponentReady { is_ready: true }));
        assert!(out.events.iter().any(|e| matches!(
            e,
            SessionEvent::ChatReceived(ChatMessage { sender: ChatSender::Opponent, text, .. }) if text == "hi"
        )));
        assert_eq!(bridge.mirror().latest(), Some(&snapshot));
    }

    #[test]
    fn hits_in_lobby_are_ignored() {
        let mut bridge = connected(Role::Client);
        bridge.on_packet(hit(MAX_HEALTH));
        assert_eq!(bridge.health(), MAX_HEALTH);
        assert!(bridge.drain().packets.is_empty());
    }

    #[test]
    fn client_follows_host_relaunch_after_match_over() {
        let mut bridge = with_score(Role::Client, 0, 2);
        bridge.on_packet(hit(MAX_HEALTH));
        assert_eq!(bridge.phase(), MatchPhase::MatchOver);

        bridge.on_packet(Packet::Start {});
        assert_eq!(bridge.phase(), MatchPhase::Playing);
        assert_eq!(bridge.score(), RoundState::default());
    }

    #[test]
    fn bot_damage_uses_the_same_latch() {
        let mut bridge = playing(Role::Host);
        bridge
            .on_local(LocalEvent::DamageTaken {
                damage: 60,
                weapon: WeaponKind::Rifle,
            })
            .unwrap();
        bridge
            .on_local(LocalEvent::DamageTaken {
                damage: 60,
                weapon: WeaponKind::Rifle,
            })
            .unwrap();
        bridge
            .on_local(LocalEvent::DamageTaken {
                damage: 60,
                weapon: WeaponKind::Rifle,
            })
            .unwrap();
        assert_eq!(bridge.stats().deaths, 1);
        assert_eq!(bridge.score().remote_rounds_won, 1);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut bridge = playing(Role::Host);
        bridge.on_packet(hit(30));
        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.health, 70);
        assert_eq!(snapshot.phase, MatchPhase::Playing);
        assert_eq!(snapshot.round, 1);
        assert_eq!(snapshot.remote_id, Some(CLIENT.into()));
        assert_eq!(snapshot.ammo, Ammo::full());
    }
}
