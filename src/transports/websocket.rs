//! WebSocket peer network using `tokio-tungstenite`.
//!
//! The host binds a TCP listener; a background task accepts sockets and
//! upgrades each one to a WebSocket on its own task, queueing finished links
//! for [`accept`](PeerNetwork::accept). The host's [`PeerId`] is the
//! `ws://host:port` URL of that listener, which the client dials directly.
//! Both `ws://` and `wss://` remotes are supported when dialing; TLS is
//! handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is
//! enabled (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), duel_link::DuelError> {
//! use duel_link::{PeerNetwork, Transport, WebSocketNetwork};
//!
//! let mut host = WebSocketNetwork::bind("127.0.0.1:7777");
//! let host_id = host.open(None).await?;
//!
//! let mut client = WebSocketNetwork::dialer();
//! client.open(None).await?;
//! let mut link = client.connect(&host_id).await?;
//! link.send(r#"{"type":"PING","payload":{"time":0}}"#.to_string()).await?;
//! link.close().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::error::DuelError;
use crate::protocol::PeerId;
use crate::transport::{PeerNetwork, Transport};

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can wrap an existing stream via
/// [`WebSocketLink::from_stream`].
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time allowed for dialing and for the upgrade handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upgraded connections that may wait for `accept`.
const ACCEPT_BACKLOG: usize = 8;

type Accepted = Result<(PeerId, WebSocketLink), DuelError>;

/// A [`PeerNetwork`] that speaks WebSocket over TCP.
///
/// # Cancel Safety
///
/// [`accept`](PeerNetwork::accept) is cancel-safe: the handshake runs on a
/// background task, so dropping the future never loses a connection.
#[derive(Debug)]
pub struct WebSocketNetwork {
    bind_addr: Option<String>,
    incoming: Option<mpsc::Receiver<Accepted>>,
    acceptor: Option<JoinHandle<()>>,
    id: Option<PeerId>,
    handshake_timeout: Duration,
}

impl WebSocketNetwork {
    /// A hosting endpoint that will listen on `addr` once opened.
    pub fn bind(addr: impl Into<String>) -> Self {
        Self {
            bind_addr: Some(addr.into()),
            incoming: None,
            acceptor: None,
            id: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// A dial-only endpoint for the client role.
    pub fn dialer() -> Self {
        Self {
            bind_addr: None,
            incoming: None,
            acceptor: None,
            id: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the dial and upgrade timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl PeerNetwork for WebSocketNetwork {
    type Link = WebSocketLink;

    async fn open(&mut self, requested: Option<PeerId>) -> Result<PeerId, DuelError> {
        if let Some(id) = &self.id {
            return Ok(id.clone());
        }

        let id = match &self.bind_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr.as_str())
                    .await
                    .map_err(|e| DuelError::IdentityAcquisition(format!("bind {addr}: {e}")))?;
                let local = listener
                    .local_addr()
                    .map_err(|e| DuelError::IdentityAcquisition(e.to_string()))?;
                let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
                self.acceptor = Some(tokio::spawn(accept_loop(
                    listener,
                    tx,
                    self.handshake_timeout,
                )));
                self.incoming = Some(rx);
                // A requested identity is an advertised URL (e.g. behind NAT).
                requested.unwrap_or_else(|| PeerId::new(format!("ws://{local}")))
            }
            None => requested
                .unwrap_or_else(|| PeerId::new(format!("ws-dialer-{}", uuid::Uuid::new_v4()))),
        };

        tracing::info!(peer = %id, "WebSocket network opened");
        self.id = Some(id.clone());
        Ok(id)
    }

    async fn connect(&mut self, remote: &PeerId) -> Result<Self::Link, DuelError> {
        tracing::debug!(url = %remote, "dialing WebSocket peer");

        let dial = tokio_tungstenite::connect_async(remote.as_str());
        let (stream, _response) = tokio::time::timeout(self.handshake_timeout, dial)
            .await
            .map_err(|_| DuelError::Connect {
                remote: remote.clone(),
                reason: "timed out".into(),
            })?
            .map_err(|e| DuelError::Connect {
                remote: remote.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(url = %remote, "WebSocket peer link established");
        Ok(WebSocketLink::from_stream(stream))
    }

    async fn accept(&mut self) -> Option<Result<(PeerId, Self::Link), DuelError>> {
        self.incoming.as_mut()?.recv().await
    }
}

impl Drop for WebSocketNetwork {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

/// Accept TCP connections until aborted, upgrading each on its own task.
async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Accepted>,
    handshake_timeout: Duration,
) {
    loop {
        let (tcp, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                if tx.send(Err(DuelError::Io(e))).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            let accepted = upgrade(tcp, addr, handshake_timeout).await;
            if tx.send(accepted).await.is_err() {
                tracing::debug!(%addr, "network closed before the peer was accepted");
            }
        });
    }
}

async fn upgrade(tcp: TcpStream, addr: SocketAddr, handshake_timeout: Duration) -> Accepted {
    let handshake = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(tcp));
    let stream = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(DuelError::TransportReceive(e.to_string())),
        Err(_) => return Err(DuelError::Timeout),
    };

    tracing::info!(%addr, "accepted WebSocket peer");
    Ok((
        PeerId::new(format!("ws://{addr}")),
        WebSocketLink::from_stream(stream),
    ))
}

/// A [`Transport`] backed by one WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a message.
#[derive(Debug)]
pub struct WebSocketLink {
    stream: WsStream,
    closed: bool,
}

impl WebSocketLink {
    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketLink {
    async fn send(&mut self, message: String) -> Result<(), DuelError> {
        if self.closed {
            return Err(DuelError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| DuelError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, DuelError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(DuelError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the Pong reply itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), DuelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| DuelError::TransportSend(e.to_string()))
    }
}

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

    #[test]
    fn websocket_link_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketLink>();
        assert_send::<WebSocketNetwork>();
    }

    async fn connected_pair() -> (WebSocketLink, WebSocketLink) {
        let mut host = WebSocketNetwork::bind("127.0.0.1:0");
        let host_id = host.open(None).await.unwrap();
        let mut client = WebSocketNetwork::dialer();
        client.open(None).await.unwrap();

        let (dialed, accepted) = tokio::join!(client.connect(&host_id), host.accept());
        let (_, accepted) = accepted.unwrap().unwrap();
        (dialed.unwrap(), accepted)
    }

    #[tokio::test]
    async fn host_identity_is_a_ws_url() {
        let mut host = WebSocketNetwork::bind("127.0.0.1:0");
        let id = host.open(None).await.unwrap();
        assert!(id.as_str().starts_with("ws://127.0.0.1:"), "{id}");
    }

    #[tokio::test]
    async fn open_fails_for_unbindable_address() {
        let mut host = WebSocketNetwork::bind("not-an-address");
        let err = host.open(None).await.unwrap_err();
        assert!(matches!(err, DuelError::IdentityAcquisition(_)));
    }

    #[tokio::test]
    async fn dialer_never_accepts() {
        let mut client = WebSocketNetwork::dialer();
        client.open(None).await.unwrap();
        assert!(client.accept().await.is_none());
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let mut client = WebSocketNetwork::dialer();
        let err = client.connect(&"not-a-valid-url".into()).await.unwrap_err();
        assert!(matches!(err, DuelError::Connect { .. }));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let mut client = WebSocketNetwork::dialer();
        let err = client.connect(&"ws://127.0.0.1:1".into()).await.unwrap_err();
        assert!(matches!(err, DuelError::Connect { .. }));
    }

    #[tokio::test]
    async fn packets_flow_both_ways() {
        let (mut dialed, mut accepted) = connected_pair().await;

        dialed.send("from client".into()).await.unwrap();
        assert_eq!(accepted.recv().await.unwrap().unwrap(), "from client");

        accepted.send("from host".into()).await.unwrap();
        assert_eq!(dialed.recv().await.unwrap().unwrap(), "from host");
    }

    #[tokio::test]
    async fn dropped_accept_does_not_lose_a_slow_handshake() {
        let mut host = WebSocketNetwork::bind("127.0.0.1:0");
        let host_id = host.open(None).await.unwrap();
        let addr = host_id.as_str().trim_start_matches("ws://").to_string();

        // Connected at the TCP level, upgrade not started yet.
        let tcp = TcpStream::connect(&addr).await.unwrap();
        tokio::select! {
            _ = host.accept() => panic!("accepted before the handshake"),
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
        }

        let (dialed, accepted) = tokio::join!(
            tokio_tungstenite::client_async(host_id.as_str(), MaybeTlsStream::Plain(tcp)),
            host.accept()
        );
        let (stream, _response) = dialed.unwrap();
        let (_, mut accepted) = accepted.unwrap().unwrap();
        let mut dialed = WebSocketLink::from_stream(stream);

        dialed.send("late but here".into()).await.unwrap();
        assert_eq!(accepted.recv().await.unwrap().unwrap(), "late but here");
    }

    #[tokio::test]
    async fn close_is_seen_by_peer_and_idempotent() {
        let (mut dialed, mut accepted) = connected_pair().await;

        dialed.close().await.unwrap();
        dialed.close().await.unwrap();
        assert!(accepted.recv().await.is_none());

        let err = dialed.send("oops".into()).await.unwrap_err();
        assert!(matches!(err, DuelError::TransportClosed));
    }
}
