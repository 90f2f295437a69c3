//! Per-connection read loop.
//!
//! One driver task runs per open transport. It reads frames in order,
//! feeds them to the dispatcher, applies the resulting directives, and
//! when the connection goes away either fails the handshake a caller is
//! waiting on or asks the orchestrator to reconnect.

use crate::dispatcher::Directive;
use crate::error::GatewayError;
use crate::gateway::{lifecycle, ConnectionStatus, Gate, Gateway};
use crate::heartbeat::{HeartbeatHandle, HeartbeatMonitor, HeartbeatScheduler};
use crate::policy::codes;
use crate::protocol::GatewayFrame;
use crate::transport::{FrameStream, Outbound, TransportEvent, ABNORMAL_CLOSURE};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Flow {
    Continue,
    /// Drop this connection as if it had closed with this code.
    Disconnect(u16),
}

pub(crate) struct ConnectionDriver {
    pub(crate) gateway: Gateway,
    pub(crate) id: u64,
    pub(crate) stream: Box<dyn FrameStream>,
    pub(crate) outbound: Outbound,
    pub(crate) cancel: CancellationToken,
    pub(crate) heartbeat: Arc<Mutex<Option<HeartbeatHandle>>>,
    pub(crate) monitor: Arc<HeartbeatMonitor>,
    /// Fulfilled on HELLO.
    pub(crate) hello: Option<Gate>,
    /// Fulfilled on READY or RESUMED.
    pub(crate) ready: Option<Gate>,
    pub(crate) zombie_tx: Option<mpsc::Sender<()>>,
    pub(crate) zombie_rx: mpsc::Receiver<()>,
}

impl ConnectionDriver {
    pub(crate) async fn run(mut self) {
        let (code, cause) = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Connection {} driver cancelled", self.id);
                    return;
                }
                Some(()) = self.zombie_rx.recv() => break (codes::HEARTBEAT_TIMEOUT, None),
                event = self.stream.next_event() => event,
            };

            if self.cancel.is_cancelled() {
                return;
            }

            match event {
                Ok(TransportEvent::Text(text)) => match self.handle_text(&text).await {
                    Flow::Continue => {}
                    Flow::Disconnect(code) => break (code, None),
                },
                Ok(TransportEvent::Closed { code, reason }) => {
                    lifecycle!(
                        self.verbose(),
                        "Gateway connection {} closed with {} ({})",
                        self.id,
                        code,
                        reason
                    );
                    break (code, None);
                }
                Err(e) => {
                    warn!("Gateway connection {} failed: {}", self.id, e);
                    break (ABNORMAL_CLOSURE, Some(GatewayError::Transport(e)));
                }
            }
        };

        self.disconnected(code, cause).await;
    }

    fn verbose(&self) -> bool {
        self.gateway.inner.options.verbose
    }

    async fn handle_text(&mut self, text: &str) -> Flow {
        let frame = match GatewayFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return Flow::Continue;
            }
        };

        let directive = match self.gateway.inner.dispatcher.dispatch(frame).await {
            Ok(directive) => directive,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return Flow::Continue;
            }
        };

        let session = &self.gateway.inner.session;
        match directive {
            Directive::None => Flow::Continue,
            Directive::Hello(interval) => {
                self.start_heartbeat(interval);
                if let Some(gate) = self.hello.take() {
                    let _ = gate.send(Ok(()));
                }
                Flow::Continue
            }
            Directive::Ready | Directive::Resumed => {
                session.set_alive(true);
                if self.cancel.is_cancelled() {
                    // Closed while this frame was in flight
                    session.set_alive(false);
                    return Flow::Continue;
                }
                self.gateway.reset_backoff();
                self.gateway.set_status(ConnectionStatus::Connected);
                lifecycle!(
                    self.verbose(),
                    "Gateway session {} {}",
                    session.session_id().unwrap_or_default(),
                    if directive == Directive::Ready { "ready" } else { "resumed" }
                );
                if let Some(gate) = self.ready.take() {
                    let _ = gate.send(Ok(()));
                }
                Flow::Continue
            }
            Directive::HeartbeatRequested => {
                let frame = GatewayFrame::heartbeat(session.sequence());
                match self.outbound.send(&frame).await {
                    Ok(()) => self.monitor.record_sent(),
                    Err(e) => debug!("Requested heartbeat failed: {}", e),
                }
                Flow::Continue
            }
            Directive::HeartbeatAck => {
                self.monitor.record_ack();
                Flow::Continue
            }
            Directive::Reconnect => {
                lifecycle!(self.verbose(), "Gateway requested a reconnect");
                Flow::Disconnect(codes::RECONNECT_REQUESTED)
            }
            Directive::InvalidSession { resumable } => {
                warn!("Gateway invalidated the session (resumable: {})", resumable);
                session.reset_identity();
                Flow::Disconnect(codes::SESSION_TIMED_OUT)
            }
        }
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        let Some(zombie) = self.zombie_tx.take() else {
            warn!("Ignoring repeated HELLO on connection {}", self.id);
            return;
        };

        let handle = HeartbeatScheduler::new(interval, self.gateway.inner.options.require_ack).spawn(
            self.outbound.clone(),
            Arc::clone(&self.gateway.inner.session),
            Arc::clone(&self.monitor),
            self.cancel.child_token(),
            zombie,
        );
        *self.heartbeat.lock() = Some(handle);
    }

    /// A gate someone is still waiting on.
    fn pending_gate(&mut self) -> Option<Gate> {
        [self.hello.take(), self.ready.take()]
            .into_iter()
            .flatten()
            .find(|gate| !gate.is_closed())
    }

    async fn disconnected(mut self, code: u16, cause: Option<GatewayError>) {
        // A caller mid-handshake owns the failure
        if let Some(gate) = self.pending_gate() {
            let cause = cause.unwrap_or_else(|| {
                let event = self.gateway.inner.policy.classify(code);
                if event.recoverable {
                    GatewayError::Recoverable {
                        code,
                        reason: event.reason,
                    }
                } else {
                    GatewayError::fatal(Some(code), event.reason)
                }
            });
            let _ = gate.send(Err(cause));
            return;
        }

        let gateway = self.gateway.clone();
        let id = self.id;
        // Release the stream before reconnecting
        drop(self);
        gateway.reconnect(id, code).await;
    }
}
