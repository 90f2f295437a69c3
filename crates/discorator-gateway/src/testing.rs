//! In-memory transport that lets tests play the remote gateway.

use crate::error::TransportError;
use crate::protocol::GatewayFrame;
use crate::transport::{Connection, FrameSink, FrameStream, Transport, TransportEvent, ABNORMAL_CLOSURE};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Something the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone)]
pub(crate) struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    failures: Arc<AtomicUsize>,
}

impl MockTransport {
    /// A transport plus the stream of remote ends it opens.
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                failures: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Make the next `count` opens fail.
    pub(crate) fn fail_next_opens(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &Url) -> Result<Connection, TransportError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::invalid_url(url.as_str(), "refused"));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            url: url.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        self.peers.send(peer).map_err(|_| TransportError::Closed)?;

        Ok(Connection::new(
            MockSink { tx: outbound_tx },
            MockStream { rx: inbound_rx },
        ))
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let _ = self.tx.send(Outgoing::Close {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        Ok(self.rx.recv().await.unwrap_or(TransportEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: "Peer dropped".to_string(),
        }))
    }
}

/// The remote end of one mock connection.
pub(crate) struct MockPeer {
    pub(crate) url: Url,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
}

impl MockPeer {
    pub(crate) fn send(&self, frame: Value) {
        let _ = self.inbound.send(TransportEvent::Text(frame.to_string()));
    }

    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.inbound.send(TransportEvent::Text(text.to_string()));
    }

    pub(crate) fn hello(&self, interval_ms: u64) {
        self.send(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}));
    }

    pub(crate) fn dispatch(&self, t: &str, s: u64, d: Value) {
        self.send(json!({"op": 0, "t": t, "s": s, "d": d}));
    }

    pub(crate) fn ready(&self, s: u64, session_id: &str, resume_url: &str) {
        self.dispatch(
            "READY",
            s,
            json!({"v": 10, "session_id": session_id, "resume_gateway_url": resume_url}),
        );
    }

    pub(crate) fn close(&self, code: u16) {
        let _ = self.inbound.send(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    pub(crate) async fn recv(&mut self) -> Option<Outgoing> {
        self.outbound.recv().await
    }

    pub(crate) fn try_recv(&mut self) -> Option<Outgoing> {
        self.outbound.try_recv().ok()
    }

    /// Next text frame. Panics on close.
    pub(crate) async fn recv_frame(&mut self) -> GatewayFrame {
        match self.recv().await {
            Some(Outgoing::Text(text)) => GatewayFrame::decode(&text).unwrap(),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    /// Next frame with opcode `op`, skipping heartbeats.
    pub(crate) async fn recv_op(&mut self, op: u8) -> GatewayFrame {
        loop {
            let frame = self.recv_frame().await;
            if frame.op == op {
                return frame;
            }
            assert_eq!(frame.op, 1, "unexpected frame {:?}", frame);
        }
    }

    /// Next close, skipping frames.
    pub(crate) async fn recv_close(&mut self) -> (u16, String) {
        loop {
            match self.recv().await {
                Some(Outgoing::Close { code, reason }) => return (code, reason),
                Some(Outgoing::Text(_)) => continue,
                None => panic!("connection ended without a close"),
            }
        }
    }
}
