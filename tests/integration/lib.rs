//! An in-process gateway server for end-to-end tests.
//!
//! [`FakeGateway`] listens on 127.0.0.1 and hands each accepted WebSocket to
//! the test as a [`RemoteSocket`], which plays the platform side of the
//! protocol.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// How long a test waits for any single step before failing.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeGateway {
    listener: TcpListener,
    addr: SocketAddr,
}

impl FakeGateway {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    /// Entry address clients should connect to.
    pub fn entry_url(&self) -> String {
        format!("ws://{}/?v=10&encoding=json", self.addr)
    }

    /// A resume address on the same server, without a query.
    pub fn resume_url(&self) -> String {
        format!("ws://{}/resume", self.addr)
    }

    /// Accept the next connection and complete the WebSocket upgrade.
    pub async fn accept(&self) -> RemoteSocket {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("no connection arrived")
            .unwrap();

        let mut target = String::new();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            target = request.uri().to_string();
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        RemoteSocket { ws, target }
    }
}

/// The platform end of one client connection.
pub struct RemoteSocket {
    ws: WebSocketStream<TcpStream>,
    /// Request target of the upgrade, e.g. `/resume?v=10&encoding=json`.
    pub target: String,
}

impl RemoteSocket {
    pub async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    pub async fn hello(&mut self, interval_ms: u64) {
        self.send(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}))
            .await;
    }

    pub async fn dispatch(&mut self, t: &str, s: u64, d: Value) {
        self.send(json!({"op": 0, "t": t, "s": s, "d": d})).await;
    }

    pub async fn ready(&mut self, s: u64, session_id: &str, resume_url: &str) {
        self.dispatch(
            "READY",
            s,
            json!({"v": 10, "session_id": session_id, "resume_gateway_url": resume_url}),
        )
        .await;
    }

    pub async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }

    /// Next text frame as JSON. Panics if the socket ends first.
    pub async fn recv_frame(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket ended")
                .unwrap();
            match message {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Close(frame) => panic!("expected a frame, got close {:?}", frame),
                _ => continue,
            }
        }
    }

    /// Next frame with opcode `op`, skipping heartbeats.
    pub async fn recv_op(&mut self, op: u64) -> Value {
        loop {
            let frame = self.recv_frame().await;
            if frame["op"] == op {
                return frame;
            }
            assert_eq!(frame["op"], 1, "unexpected frame {}", frame);
        }
    }

    /// Close code the client sent, skipping any frames before it.
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            let next = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for close");
            match next {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }
}
