//! Async duel session: one peer link, one background loop.
//!
//! [`DuelSession`] is a thin handle that talks to a background session loop
//! over an unbounded MPSC channel. Events are emitted on a bounded channel
//! ([`tokio::sync::mpsc::Receiver<SessionEvent>`]) returned from
//! [`DuelSession::open`].
//!
//! Everything that mutates the duel (inbound packets, local commands, the
//! heartbeat, the round-restart timer) runs on that single loop, so no two
//! handlers ever overlap.
//!
//! # Example
//!
//! ```rust,ignore
//! let hub = MemoryHub::new();
//! let (host, mut host_events) =
//!     DuelSession::open(hub.network(), SessionConfig::new(Role::Host)).await?;
//! let (client, _client_events) =
//!     DuelSession::open(hub.network(), SessionConfig::new(Role::Client)).await?;
//!
//! client.connect_to(host.local_id().clone())?;
//!
//! while let Some(event) = host_events.recv().await {
//!     match event {
//!         SessionEvent::Connected { .. } => host.launch()?,
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, Outbox, SessionSnapshot, DEFAULT_ROUND_RESTART_DELAY};
use crate::chat::DEFAULT_CHAT_HISTORY;
use crate::error::{DuelError, Result};
use crate::event::{ConnectionStatus, LocalEvent, SessionEvent};
use crate::protocol::{Packet, PeerId, PlayerSnapshot, Role, Tracer, WeaponKind};
use crate::round::DEFAULT_ROUNDS_TO_WIN;
use crate::transport::{PeerNetwork, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between liveness PINGs.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Default time allowed for a client dial.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`DuelSession`].
///
/// Only the [`Role`] is required; everything else has a default.
///
/// # Example
///
/// ```
/// use duel_link::protocol::Role;
/// use duel_link::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new(Role::Host)
///     .with_nickname("Alice")
///     .with_rounds_to_win(5)
///     .with_idle_timeout(Duration::from_secs(10));
/// assert_eq!(config.rounds_to_win, 5);
/// assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Which end of the duel this process plays.
    pub role: Role,
    /// Display name shown locally. Never sent on the wire.
    pub nickname: String,
    /// Identity to request from the network. `None` lets the network pick.
    pub identity: Option<PeerId>,
    /// Interval between PINGs while a link is open.
    ///
    /// Defaults to **2 seconds**. Values below 10 ms are clamped.
    pub heartbeat_interval: Duration,
    /// Close the link when nothing has been received for this long.
    ///
    /// Defaults to `None` (never time out).
    pub idle_timeout: Option<Duration>,
    /// Delay between a decided round and the host's `NEW_ROUND`.
    ///
    /// Defaults to **3 seconds**.
    pub round_restart_delay: Duration,
    /// Round wins that end the match. Defaults to **3**, clamped to at least 1.
    pub rounds_to_win: u32,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) so the session loop never blocks. The `Disconnected` event is
    /// always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Chat lines kept in the session snapshot. Defaults to **50**.
    pub chat_history: usize,
    /// Time allowed for [`DuelSession::connect_to`] before it is reported
    /// as failed. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Timeout for the graceful shutdown.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the session loop
    /// immediately.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for `role` with default values.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            nickname: role.to_string(),
            identity: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: None,
            round_restart_delay: DEFAULT_ROUND_RESTART_DELAY,
            rounds_to_win: DEFAULT_ROUNDS_TO_WIN,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            chat_history: DEFAULT_CHAT_HISTORY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    /// Ask the network for a specific identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<PeerId>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_round_restart_delay(mut self, delay: Duration) -> Self {
        self.round_restart_delay = delay;
        self
    }

    #[must_use]
    pub fn with_rounds_to_win(mut self, rounds: u32) -> Self {
        self.rounds_to_win = rounds.max(1);
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_chat_history(mut self, lines: usize) -> Self {
        self.chat_history = lines.max(1);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Internal shared state between the session handle and the loop.
struct SessionState {
    running: AtomicBool,
    snapshot: Mutex<SessionSnapshot>,
}

/// Work queued by the handle for the session loop.
#[derive(Debug)]
enum Command {
    Local(LocalEvent),
    Connect(PeerId),
    ReturnToLobby,
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to a running duel session.
///
/// Created via [`DuelSession::open`], which acquires the local identity,
/// spawns the session loop and returns this handle together with an event
/// receiver.
///
/// All command methods return as soon as the command is queued; their
/// outcome arrives as [`SessionEvent`]s.
pub struct DuelSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<SessionState>,
    role: Role,
    local_id: PeerId,
    nickname: String,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl DuelSession {
    /// Acquire an identity from `network` and start the session loop.
    ///
    /// A host immediately begins accepting; a client stays idle until
    /// [`connect_to`](Self::connect_to).
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::IdentityAcquisition`] if the network cannot
    /// allocate an identity. Not retried.
    pub async fn open<N: PeerNetwork>(
        mut network: N,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let local_id = network.open(config.identity.clone()).await?;
        info!(
            id = %local_id,
            role = %config.role,
            nickname = %config.nickname,
            "duel session open"
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let bridge = Bridge::new(config.role, local_id.clone())
            .with_rounds_to_win(config.rounds_to_win)
            .with_restart_delay(config.round_restart_delay)
            .with_chat_history(config.chat_history);

        let state = Arc::new(SessionState {
            running: AtomicBool::new(true),
            snapshot: Mutex::new(bridge.snapshot()),
        });

        let timing = LoopTiming {
            heartbeat_interval: config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
            idle_timeout: config.idle_timeout,
            connect_timeout: config.connect_timeout,
        };

        let task = tokio::spawn(session_loop(
            network,
            bridge,
            timing,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let session = Self {
            cmd_tx,
            state,
            role: config.role,
            local_id,
            nickname: config.nickname,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        Ok((session, event_rx))
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Dial the host identified by `remote`. Client only.
    ///
    /// A failed dial is reported as [`SessionEvent::ConnectFailed`]; call
    /// again to retry.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::WrongRole`] for a host and
    /// [`DuelError::NotConnected`] if the session loop has exited.
    pub fn connect_to(&self, remote: impl Into<PeerId>) -> Result<()> {
        if self.role.is_host() {
            return Err(DuelError::WrongRole {
                operation: "connect_to",
                role: self.role,
            });
        }
        self.send(Command::Connect(remote.into()))
    }

    /// Forward one local gameplay event.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::WrongRole`] for a client's
    /// [`LocalEvent::LaunchRequested`] and [`DuelError::NotConnected`] if the
    /// session loop has exited.
    pub fn submit(&self, event: LocalEvent) -> Result<()> {
        if matches!(event, LocalEvent::LaunchRequested) && !self.role.is_host() {
            return Err(DuelError::WrongRole {
                operation: "launch",
                role: self.role,
            });
        }
        self.send(Command::Local(event))
    }

    /// Publish the local player's movement snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn update_player(&self, snapshot: PlayerSnapshot) -> Result<()> {
        self.submit(LocalEvent::PlayerMoved(snapshot))
    }

    /// Report a local shot so the opponent can draw its tracer. A shot with
    /// an empty magazine is dropped; see [`reload`](Self::reload).
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn fire(&self, tracer: Tracer, weapon: WeaponKind) -> Result<()> {
        self.submit(LocalEvent::WeaponFired { tracer, weapon })
    }

    /// Refill `weapon`'s magazine. Emits [`SessionEvent::AmmoChanged`].
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn reload(&self, weapon: WeaponKind) -> Result<()> {
        self.submit(LocalEvent::Reloaded(weapon))
    }

    /// Report that a local shot hit `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn report_hit(&self, target: PeerId, damage: u32, weapon: WeaponKind) -> Result<()> {
        self.submit(LocalEvent::DamageDealt {
            target,
            damage,
            weapon,
        })
    }

    /// Apply damage from a local source such as the practice bot.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn take_damage(&self, damage: u32, weapon: WeaponKind) -> Result<()> {
        self.submit(LocalEvent::DamageTaken { damage, weapon })
    }

    /// Send a chat line.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.submit(LocalEvent::ChatSubmitted(text.into()))
    }

    /// Toggle local readiness in the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn set_ready(&self, is_ready: bool) -> Result<()> {
        self.submit(LocalEvent::ReadyToggled(is_ready))
    }

    /// Start the match. Host only; readiness is not required.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::WrongRole`] for a client and
    /// [`DuelError::NotConnected`] if the session loop has exited.
    pub fn launch(&self) -> Result<()> {
        self.submit(LocalEvent::LaunchRequested)
    }

    /// Full reset back to the lobby. Cancels any pending round restart.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::NotConnected`] if the session loop has exited.
    pub fn return_to_lobby(&self) -> Result<()> {
        self.send(Command::ReturnToLobby)
    }

    /// Shut down the session, closing the link and stopping the loop.
    ///
    /// After calling this method, the event receiver yields `None` once the
    /// loop exits.
    pub async fn shutdown(&mut self) {
        debug!("DuelSession: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout; abort it if it does not exit in time.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    /// Identity assigned by the network at open time.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Returns `true` while the session loop is alive.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.snapshot.lock().await.status
    }

    pub async fn remote_id(&self) -> Option<PeerId> {
        self.state.snapshot.lock().await.remote_id.clone()
    }

    /// Copy of the state as of the loop's last step.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, command: Command) -> Result<()> {
        if !self.state.running.load(Ordering::Acquire) {
            return Err(DuelError::NotConnected);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| DuelError::NotConnected)
    }
}

impl std::fmt::Debug for DuelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuelSession")
            .field("role", &self.role)
            .field("local_id", &self.local_id)
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for DuelSession {
    fn drop(&mut self) {
        // No executor is available to drive a graceful close from `Drop`;
        // aborting drops the loop future and with it the link.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct LoopTiming {
    heartbeat_interval: Duration,
    idle_timeout: Option<Duration>,
    connect_timeout: Duration,
}

/// A dial in flight. It owns the network until it resolves, then hands it
/// back with the outcome.
type PendingDial<N> =
    Pin<Box<dyn Future<Output = (N, PeerId, Result<<N as PeerNetwork>::Link>)> + Send>>;

/// Whether the loop keeps going after a step.
enum Flow {
    Continue,
    /// Leave the loop; the value becomes the `Disconnected` reason.
    Exit(Option<String>),
}

/// Background loop that multiplexes commands, the peer link and timers via
/// `tokio::select!`.
///
/// Exits when:
/// - The shutdown signal fires or the handle is dropped
/// - The peer closes the link, or the link fails
/// - The idle timeout elapses
async fn session_loop<N: PeerNetwork>(
    network: N,
    mut bridge: Bridge,
    timing: LoopTiming,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<SessionEvent>,
    state: Arc<SessionState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(role = %bridge.role(), "session loop started");
    bridge.announce();
    flush_events(&mut bridge, &event_tx).await;

    let mut network = Some(network);
    let mut dialing: Option<PendingDial<N>> = None;
    let mut link: Option<N::Link> = None;
    let mut accepting = bridge.role().is_host();
    let mut last_seen = Instant::now();
    let mut heartbeat = tokio::time::interval(timing.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let idle_deadline = timing.idle_timeout.map(|timeout| last_seen + timeout);

        let mut flow = tokio::select! {
            // Branch 1: command from the handle
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Local(event)) => {
                    if let Err(e) = bridge.on_local(event) {
                        warn!("local event rejected: {e}");
                    }
                    Flow::Continue
                }
                Some(Command::Connect(remote)) => {
                    if link.is_some() {
                        warn!(peer = %remote, "already connected, ignoring connect request");
                    } else if dialing.is_some() {
                        warn!(peer = %remote, "dial already in progress, ignoring connect request");
                    } else if let Some(idle) = network.take() {
                        bridge.connecting();
                        dialing = Some(Box::pin(dial(idle, remote, timing.connect_timeout)));
                    }
                    Flow::Continue
                }
                Some(Command::ReturnToLobby) => {
                    bridge.return_to_lobby();
                    Flow::Continue
                }
                // Command channel closed: handle dropped.
                None => {
                    debug!("command channel closed, shutting down session loop");
                    Flow::Exit(Some("session shut down".into()))
                }
            },

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                Flow::Exit(Some("session shut down".into()))
            }

            // Branch 3: incoming link (host)
            accepted = accept_on(&mut network), if accepting => match accepted {
                Some(Ok((remote, mut new_link))) => {
                    if link.is_some() {
                        warn!(peer = %remote, "second connection refused, already in a duel");
                        let _ = new_link.close().await;
                    } else {
                        link = Some(new_link);
                        last_seen = Instant::now();
                        heartbeat.reset();
                        bridge.connection_opened(remote);
                    }
                    Flow::Continue
                }
                Some(Err(e)) => {
                    warn!("incoming connection failed: {e}");
                    Flow::Continue
                }
                None => {
                    debug!("network stopped accepting");
                    accepting = false;
                    Flow::Continue
                }
            },

            // Branch 4: outcome of a dial (client)
            (idle, remote, dialed) = wait_dial(&mut dialing), if dialing.is_some() => {
                dialing = None;
                network = Some(idle);
                match dialed {
                    Ok(new_link) => {
                        link = Some(new_link);
                        last_seen = Instant::now();
                        heartbeat.reset();
                        bridge.connection_opened(remote);
                    }
                    Err(e) => bridge.connect_failed(remote, e.to_string()),
                }
                Flow::Continue
            }

            // Branch 5: packet from the peer
            incoming = recv_from(&mut link), if link.is_some() => match incoming {
                Some(Ok(text)) => {
                    last_seen = Instant::now();
                    if let Some(packet) = Packet::decode(&text) {
                        debug!(kind = packet.kind(), "packet received");
                        bridge.on_packet(packet);
                    }
                    Flow::Continue
                }
                Some(Err(e)) => {
                    error!("transport receive error: {e}");
                    let reason = format!("transport receive error: {e}");
                    bridge.connection_lost(Some(&reason));
                    Flow::Exit(Some(reason))
                }
                // Link closed cleanly.
                None => {
                    debug!("link closed by peer");
                    bridge.connection_lost(None);
                    Flow::Exit(None)
                }
            },

            // Branch 6: heartbeat
            _ = heartbeat.tick(), if link.is_some() => {
                bridge.heartbeat();
                Flow::Continue
            }

            // Branch 7: round restart (host)
            _ = bridge.restart_timer().wait(), if bridge.restart_timer().is_armed() => {
                bridge.restart_due();
                Flow::Continue
            }

            // Branch 8: idle timeout
            _ = sleep_until(idle_deadline), if link.is_some() => {
                warn!("no traffic from peer, closing link");
                let reason = "peer timed out".to_string();
                bridge.connection_lost(Some(&reason));
                Flow::Exit(Some(reason))
            }
        };

        // Readers see the new state no later than the events describing it.
        publish(&bridge, &state).await;

        if let Err(e) = flush(&mut bridge, &mut link, &event_tx).await {
            error!("transport send error: {e}");
            let reason = format!("transport send error: {e}");
            bridge.connection_lost(Some(&reason));
            flow = Flow::Exit(Some(reason));
        }

        if let Flow::Exit(reason) = flow {
            break reason;
        }
    };

    if let Some(mut link) = link.take() {
        let _ = link.close().await;
    }
    // Anything queued by the final transition (reset events).
    publish(&bridge, &state).await;
    flush_events(&mut bridge, &event_tx).await;
    emit_disconnected(&event_tx, &state, reason).await;

    debug!("session loop exited");
}

async fn dial<N: PeerNetwork>(
    mut network: N,
    remote: PeerId,
    connect_timeout: Duration,
) -> (N, PeerId, Result<N::Link>) {
    debug!(peer = %remote, "dialing");
    let result = match tokio::time::timeout(connect_timeout, network.connect(&remote)).await {
        Ok(result) => result,
        Err(_) => Err(DuelError::Timeout),
    };
    (network, remote, result)
}

/// `accept` on the network; pending forever while a dial holds it.
async fn accept_on<N: PeerNetwork>(
    network: &mut Option<N>,
) -> Option<Result<(PeerId, N::Link)>> {
    match network {
        Some(network) => network.accept().await,
        None => std::future::pending().await,
    }
}

/// Completion of the pending dial; pending forever without one.
async fn wait_dial<F: Future + Unpin>(dialing: &mut Option<F>) -> F::Output {
    match dialing {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

/// `recv` on the open link; pending forever without one.
async fn recv_from<L: Transport>(link: &mut Option<L>) -> Option<Result<String>> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write queued packets to the link and queued events to the channel.
///
/// Packets are dropped when there is no link. Events are always emitted,
/// even when a send fails part-way.
async fn flush<L: Transport>(
    bridge: &mut Bridge,
    link: &mut Option<L>,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    let Outbox { packets, events } = bridge.drain();
    let mut result = Ok(());

    if let Some(link) = link.as_mut() {
        for packet in packets {
            match packet.encode() {
                Ok(json) => {
                    if let Err(e) = link.send(json).await {
                        result = Err(e);
                        break;
                    }
                }
                Err(e) => {
                    // Serialization errors are programming bugs; keep going.
                    error!("failed to serialize {} packet: {e}", packet.kind());
                }
            }
        }
    }

    for event in events {
        emit_event(event_tx, event).await;
    }
    result
}

async fn flush_events(bridge: &mut Bridge, event_tx: &mpsc::Sender<SessionEvent>) {
    for event in bridge.drain().events {
        emit_event(event_tx, event).await;
    }
}

async fn publish(bridge: &Bridge, state: &SessionState) {
    *state.snapshot.lock().await = bridge.snapshot();
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the session loop.
async fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final [`Disconnected`](SessionEvent::Disconnected) event.
///
/// Uses `send().await` rather than `try_send`: it is always the last event on
/// the channel and must never be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SessionEvent>,
    state: &SessionState,
    reason: Option<String>,
) {
    state.running.store(false, Ordering::Release);
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::round::MatchPhase;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    type Sent = Arc<StdMutex<Vec<String>>>;

    // ── Mock network ────────────────────────────────────────────────

    /// A link that records sent packets and replays scripted ones.
    struct MockLink {
        incoming: VecDeque<Option<Result<String>>>,
        sent: Sent,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockLink {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one scripted link, via `accept` for a host or `connect`
    /// for a client.
    struct MockNetwork {
        link: Option<MockLink>,
        fail_open: bool,
        /// `connect` never resolves.
        stall_connect: bool,
    }

    #[async_trait]
    impl PeerNetwork for MockNetwork {
        type Link = MockLink;

        async fn open(&mut self, requested: Option<PeerId>) -> Result<PeerId> {
            if self.fail_open {
                return Err(DuelError::IdentityAcquisition("offline".into()));
            }
            Ok(requested.unwrap_or_else(|| PeerId::from("mock-local")))
        }

        async fn connect(&mut self, remote: &PeerId) -> Result<MockLink> {
            if self.stall_connect {
                std::future::pending::<()>().await;
            }
            self.link.take().ok_or_else(|| DuelError::Connect {
                remote: remote.clone(),
                reason: "no such peer".into(),
            })
        }

        async fn accept(&mut self) -> Option<Result<(PeerId, MockLink)>> {
            match self.link.take() {
                Some(link) => Some(Ok((PeerId::from("mock-remote"), link))),
                None => std::future::pending().await,
            }
        }
    }

    fn mock(incoming: Vec<Option<Result<String>>>) -> (MockNetwork, Sent, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let link = MockLink {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let network = MockNetwork {
            link: Some(link),
            fail_open: false,
            stall_connect: false,
        };
        (network, sent, closed)
    }

    fn wire(packet: &Packet) -> Option<Result<String>> {
        Some(Ok(packet.encode().unwrap()))
    }

    fn sent_kinds(sent: &Sent) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .filter_map(|text| Packet::decode(text))
            .map(|packet| packet.kind().to_string())
            .collect()
    }

    async fn wait_for<F>(events: &mut mpsc::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn config_defaults() {
        let config = SessionConfig::new(Role::Client);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.round_restart_delay, Duration::from_secs(3));
        assert_eq!(config.rounds_to_win, 3);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.chat_history, 50);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.nickname, "client");
    }

    #[tokio::test]
    async fn config_builder_clamps() {
        let config = SessionConfig::new(Role::Host)
            .with_rounds_to_win(0)
            .with_event_channel_capacity(0)
            .with_chat_history(0)
            .with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.rounds_to_win, 1);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.chat_history, 1);
        assert_eq!(config.heartbeat_interval, MIN_HEARTBEAT_INTERVAL);
    }

    #[tokio::test]
    async fn open_failure_is_surfaced() {
        let network = MockNetwork {
            link: None,
            fail_open: true,
            stall_connect: false,
        };
        let err = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap_err();
        assert!(matches!(err, DuelError::IdentityAcquisition(_)));
    }

    #[tokio::test]
    async fn requested_identity_is_used() {
        let (network, _, _) = mock(vec![]);
        let config = SessionConfig::new(Role::Client).with_identity("blue-team");
        let (session, _events) = DuelSession::open(network, config).await.unwrap();
        assert_eq!(session.local_id().as_str(), "blue-team");
    }

    #[tokio::test]
    async fn host_accepts_and_greets_with_ready_then_ping() {
        let (network, sent, _) = mock(vec![]);
        let (host, mut events) = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap();

        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Connected {
                remote: "mock-remote".into()
            }
        );
        assert_eq!(host.status().await, ConnectionStatus::Connected);
        let kinds = sent_kinds(&sent);
        assert_eq!(kinds[0], "READY");
        assert_eq!(kinds[1], "PING");
    }

    #[tokio::test]
    async fn host_cannot_dial() {
        let (network, _, _) = mock(vec![]);
        let (host, _events) = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap();
        let err = host.connect_to("anyone").unwrap_err();
        assert!(matches!(err, DuelError::WrongRole { .. }));
    }

    #[tokio::test]
    async fn client_cannot_launch() {
        let (network, _, _) = mock(vec![]);
        let (client, _events) = DuelSession::open(network, SessionConfig::new(Role::Client))
            .await
            .unwrap();
        assert!(matches!(
            client.launch().unwrap_err(),
            DuelError::WrongRole { .. }
        ));
    }

    #[tokio::test]
    async fn failed_dial_reports_and_allows_retry() {
        let network = MockNetwork {
            link: None,
            fail_open: false,
            stall_connect: false,
        };
        let (client, mut events) = DuelSession::open(network, SessionConfig::new(Role::Client))
            .await
            .unwrap();

        client.connect_to("ghost").unwrap();
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::ConnectFailed { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::ConnectFailed { remote, .. } if remote.as_str() == "ghost"
        ));
        // Status settles back to Disconnected and the loop keeps running.
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);
        assert!(client.is_running());
        assert!(client.connect_to("ghost").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stays_responsive_while_dialing() {
        let network = MockNetwork {
            link: None,
            fail_open: false,
            stall_connect: true,
        };
        let config = SessionConfig::new(Role::Client).with_connect_timeout(Duration::from_secs(1));
        let (client, mut events) = DuelSession::open(network, config).await.unwrap();

        client.connect_to("slow-host").unwrap();
        wait_for(&mut events, |e| {
            *e == SessionEvent::StatusChanged(ConnectionStatus::Connecting)
        })
        .await;

        client.send_chat("anyone there?").unwrap();
        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ChatReceived(m) if m.text == "anyone there?")
        })
        .await;
        assert_eq!(client.status().await, ConnectionStatus::Connecting);

        // A second request while the first is in flight is ignored.
        client.connect_to("other-host").unwrap();
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::ConnectFailed { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::ConnectFailed { remote, .. } if remote.as_str() == "slow-host"
        ));
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);
        assert!(client.connect_to("slow-host").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_pending_dial() {
        let network = MockNetwork {
            link: None,
            fail_open: false,
            stall_connect: true,
        };
        let config = SessionConfig::new(Role::Client).with_connect_timeout(Duration::from_secs(60));
        let (mut client, mut events) = DuelSession::open(network, config).await.unwrap();

        client.connect_to("slow-host").unwrap();
        wait_for(&mut events, |e| {
            *e == SessionEvent::StatusChanged(ConnectionStatus::Connecting)
        })
        .await;

        client.shutdown().await;
        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(
            event,
            SessionEvent::Disconnected {
                reason: Some("session shut down".into())
            }
        );
    }

    #[tokio::test]
    async fn host_announces_connecting_first() {
        let network = MockNetwork {
            link: None,
            fail_open: false,
            stall_connect: false,
        };
        let (_host, mut events) = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::StatusChanged(ConnectionStatus::Connecting))
        );
    }

    #[tokio::test]
    async fn client_answers_ping_and_follows_start() {
        let (network, sent, _) = mock(vec![
            wire(&Packet::Ping { time: 42 }),
            wire(&Packet::Start {}),
        ]);
        let (client, mut events) = DuelSession::open(network, SessionConfig::new(Role::Client))
            .await
            .unwrap();
        client.connect_to("mock-host").unwrap();

        wait_for(&mut events, |e| matches!(e, SessionEvent::MatchStarted)).await;
        let pong = sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|text| Packet::decode(text))
            .find(|p| p.kind() == "PONG");
        assert_eq!(pong, Some(Packet::Pong { time: 42 }));
        assert_eq!(client.snapshot().await.phase, MatchPhase::Playing);
    }

    #[tokio::test]
    async fn unknown_packets_are_dropped() {
        let (network, _, _) = mock(vec![
            Some(Ok(r#"{"type":"TELEPORT","payload":{}}"#.into())),
            Some(Ok("not json".into())),
            wire(&Packet::Chat { text: "gg".into() }),
        ]);
        let (_host, mut events) = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap();

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ChatReceived(m) if m.text == "gg")
        })
        .await;
        assert!(matches!(event, SessionEvent::ChatReceived(_)));
    }

    #[tokio::test]
    async fn peer_close_resets_and_disconnects_last() {
        let (network, _, _) = mock(vec![wire(&Packet::Start {}), None]);
        let (client, mut events) = DuelSession::open(network, SessionConfig::new(Role::Client))
            .await
            .unwrap();
        client.connect_to("mock-host").unwrap();

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        assert_eq!(seen.last(), Some(&SessionEvent::Disconnected { reason: None }));
        assert!(seen.contains(&SessionEvent::MatchReset));
        assert!(!client.is_running());

        let snapshot = client.snapshot().await;
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.phase, MatchPhase::Lobby);
        assert!(matches!(
            client.send_chat("anyone?"),
            Err(DuelError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn receive_error_emits_disconnected_with_reason() {
        let (network, _, _) = mock(vec![Some(Err(DuelError::TransportReceive(
            "reset by peer".into(),
        )))]);
        let (_host, mut events) = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap();

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        match event {
            SessionEvent::Disconnected { reason: Some(reason) } => {
                assert!(reason.contains("reset by peer"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_closes_link_and_emits_disconnected() {
        let (network, _, closed) = mock(vec![]);
        let (mut host, mut events) = DuelSession::open(network, SessionConfig::new(Role::Host))
            .await
            .unwrap();
        wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        host.shutdown().await;
        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(
            event,
            SessionEvent::Disconnected {
                reason: Some("session shut down".into())
            }
        );
        assert!(closed.load(Ordering::Relaxed));
        assert!(!host.is_running());
        // Second shutdown is a no-op.
        host.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_while_connected() {
        let (network, sent, _) = mock(vec![]);
        let config = SessionConfig::new(Role::Host).with_heartbeat_interval(Duration::from_secs(2));
        let (_host, mut events) = DuelSession::open(network, config).await.unwrap();
        wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let pings = sent_kinds(&sent).iter().filter(|k| *k == "PING").count();
        // Greeting ping plus at least two heartbeats.
        assert!(pings >= 3, "expected heartbeats, saw {pings} pings");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_closes_silent_link() {
        let (network, _, closed) = mock(vec![]);
        let config = SessionConfig::new(Role::Host).with_idle_timeout(Duration::from_secs(5));
        let (_host, mut events) = DuelSession::open(network, config).await.unwrap();

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(
            event,
            SessionEvent::Disconnected {
                reason: Some("peer timed out".into())
            }
        );
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn small_event_channel_does_not_block_the_loop() {
        let chatter: Vec<_> = (0..20)
            .map(|i| wire(&Packet::Chat { text: format!("spam {i}") }))
            .chain(std::iter::once(None))
            .collect();
        let (network, _, _) = mock(chatter);
        let config = SessionConfig::new(Role::Host).with_event_channel_capacity(2);
        let (_host, mut events) = DuelSession::open(network, config).await.unwrap();

        // The loop drops what does not fit but still delivers Disconnected.
        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(event, SessionEvent::Disconnected { reason: None });
    }

    #[tokio::test]
    async fn debug_impl_for_session() {
        let (network, _, _) = mock(vec![]);
        let (session, _events) = DuelSession::open(network, SessionConfig::new(Role::Client))
            .await
            .unwrap();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("DuelSession"));
        assert!(rendered.contains("Client"));
    }
}
