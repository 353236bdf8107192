//! Socket primitives the connection manager drives
//!
//! The manager only needs "open a text-frame socket at this URL" plus a
//! stream of lifecycle events. Production uses tokio-tungstenite; tests plug
//! in an in-memory pair.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use stoat_core::{Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Lifecycle events reported by an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame (opaque to this layer)
    Message(String),
    /// A transport error. Never acted on directly; a `Closed` follows.
    Error(String),
    /// The socket is gone, cleanly or not
    Closed,
}

/// An open duplex text-frame connection
#[async_trait]
pub trait Socket: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Wait for the next lifecycle event.
    ///
    /// Must be cancel-safe: the manager races this against its outbound
    /// queue and the teardown signal.
    async fn next_event(&mut self) -> SocketEvent;

    async fn close(&mut self);
}

/// Opens sockets for the connection manager
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// `Ok` means the socket is open; `Err` is treated like an immediate close.
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(e.to_string()))?;

        debug!("WebSocket handshake complete: HTTP {}", response.status());

        Ok(Box::new(TungsteniteSocket {
            stream,
            failed: false,
        }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Set once the stream yielded an error; the next event is a synthetic close
    failed: bool,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream
            .send(Message::text(frame))
            .await
            .map_err(|e| Error::WebSocketError(e.to_string()))
    }

    async fn next_event(&mut self) -> SocketEvent {
        if self.failed {
            return SocketEvent::Closed;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Message(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return SocketEvent::Message(text),
                    Err(_) => debug!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the socket: {:?}", frame);
                    return SocketEvent::Closed;
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    // tungstenite does not promise a close after an error
                    self.failed = true;
                    return SocketEvent::Error(e.to_string());
                }
                None => return SocketEvent::Closed,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing socket: {}", e);
        }
    }
}
