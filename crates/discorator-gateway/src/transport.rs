//! Socket layer.
//!
//! [`Transport`] opens one bidirectional text-message connection per call.
//! The orchestrator never talks to tungstenite directly, so tests can swap
//! in an in-memory transport.

use crate::error::{GatewayError, TransportError};
use crate::protocol::GatewayFrame;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

/// Close code reported when the connection ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when a close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Something the remote end did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text message arrived.
    Text(String),
    /// The connection closed. No further events follow.
    Closed { code: u16, reason: String },
}

/// Opens connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`.
    async fn open(&self, url: &Url) -> Result<Connection, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one text message.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection with the given code.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Wait for the next event. Returns `Closed` once the connection ends.
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError>;
}

/// An open connection, split into halves.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    pub fn new(sink: impl FrameSink, stream: impl FrameStream) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

/// Shared write half.
///
/// The heartbeat task, the connection driver and `Gateway::send` all write
/// through the same sink; the lock keeps frames whole.
#[derive(Clone)]
pub struct Outbound {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
}

impl Outbound {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Encode and send a frame.
    pub async fn send(&self, frame: &GatewayFrame) -> Result<(), GatewayError> {
        let text = frame.encode()?;
        self.sink.lock().await.send_text(text).await?;
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.sink.lock().await.close(code, reason).await
    }
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Connection, TransportError> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::invalid_url(
                url.as_str(),
                "scheme must be ws or wss",
            ));
        }

        let (ws, response) = connect_async(url.as_str()).await?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        let (sink, stream) = ws.split();
        Ok(Connection::new(WsSink { inner: sink }, WsStream { inner: stream }))
    }
}

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    inner: SplitSink<WsConnection, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await.map_err(map_ws_error)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.inner.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            // Already gone is as good as closed
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct WsStream {
    inner: SplitStream<WsConnection>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(TransportEvent::Text(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(TransportEvent::Text(text)),
                    Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    return Ok(TransportEvent::Closed { code, reason });
                }
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) | None => {
                    return Ok(TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "Connection dropped".to_string(),
                    });
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

fn map_ws_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::WebSocket(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let url = Url::parse("https://gateway.example").unwrap();
        let result = WebSocketTransport::new().open(&url).await;
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
    }

    #[test]
    fn test_ws_error_mapping() {
        assert!(matches!(
            map_ws_error(WsError::ConnectionClosed),
            TransportError::Closed
        ));
        assert!(matches!(
            map_ws_error(WsError::Utf8),
            TransportError::WebSocket(_)
        ));
    }
}
