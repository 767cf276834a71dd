//! Duplex text-message transport abstraction.
//!
//! The protocol engine talks to one live connection through this trait. The
//! concrete `WebSocketTransport` is provided for real use; tests substitute
//! a `MockTransport` (see `tests/support`) so the engine's ordering and
//! reconnect logic can be exercised without a live socket.
//!
//! Grounded in the `Channel` trait of `channel/mod.rs` and the connect/
//! reconnect loop shape of `hub/command_channel.rs`, narrowed to the single
//! concern this crate owns: one open/closed duplex frame stream, nothing
//! about ActionCable subscriptions or peer routing.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Why an open connection ended.
#[derive(Debug, Clone)]
pub enum TransportClosed {
    /// The peer closed the connection cleanly.
    Closed,
    /// A transport-level error occurred.
    Error(String),
}

/// One live, bidirectional text-frame connection.
///
/// An open `Transport` is consumed by the engine's supervisor: it sends
/// frames with `send`, and polls `recv` in a loop until it returns `None`
/// terminates. There is no reconnect logic here — that is the
/// supervisor's job (spec §4.6); a `Transport` only knows about a single
/// connection attempt's lifetime.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame. Returns `Err` if the underlying connection has
    /// failed.
    async fn send(&mut self, frame: String) -> Result<(), TransportClosed>;

    /// Receive the next text frame, or `None` once the connection has
    /// closed, whether cleanly or due to a transport-level error; the two
    /// are not distinguished here; the supervisor (spec §4.6) treats both
    /// as a connection loss.
    async fn recv(&mut self) -> Option<String>;
}

/// Connects to an endpoint and returns a live `Transport` on success.
///
/// Implemented separately from `Transport` itself because connecting and
/// using a connection are different lifetimes: the supervisor retries
/// `connect` under backoff, but only ever holds one `Transport` at a time.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The concrete transport type this connector produces.
    type Transport: Transport;

    /// Attempt a single connection. No retrying; the supervisor owns
    /// backoff (spec §4.6).
    async fn connect(&self, endpoint: &str) -> Result<Self::Transport, String>;
}

/// WebSocket-backed transport, the crate's default real implementation.
pub struct WebSocketTransport {
    inner: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportClosed> {
        self.inner
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| TransportClosed::Error(e.to_string()))
    }

    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(text),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Ok(WsMessage::Binary(_) | WsMessage::Frame(_))) => continue,
                Some(Err(e)) => {
                    log::warn!("transport recv error: {e}");
                    return None;
                }
            }
        }
    }
}

/// Connector that dials a `ws://`/`wss://` endpoint via `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, endpoint: &str) -> Result<Self::Transport, String> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| e.to_string())?;
        Ok(WebSocketTransport { inner: stream })
    }
}
