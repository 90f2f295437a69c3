//! Inbound frame processing.
//!
//! The dispatcher updates session metadata and feeds subscribers. Anything
//! that needs the transport (heartbeats, reconnects, readiness gates) is
//! handed back to the connection driver as a [`Directive`].

use crate::error::ProtocolError;
use crate::events::{DispatchedEvent, EventKind, EventPayload, EventRegistry, Interaction};
use crate::protocol::{GatewayFrame, HelloPayload, OpCode, ReadyPayload};
use crate::session::{ResumeInfo, Session};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Converts a raw dispatch payload into a richer one.
pub type PayloadTransform = Arc<dyn Fn(Value) -> Result<EventPayload, ProtocolError> + Send + Sync>;

/// What the connection driver should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    /// HELLO: start heartbeating at this interval.
    Hello(Duration),
    /// READY: the IDENTIFY handshake succeeded.
    Ready,
    /// RESUMED: the RESUME handshake succeeded.
    Resumed,
    /// The remote asked for a heartbeat right now.
    HeartbeatRequested,
    HeartbeatAck,
    /// The remote asked us to reconnect and resume.
    Reconnect,
    /// The session was invalidated.
    InvalidSession { resumable: bool },
}

pub struct Dispatcher {
    session: Arc<Session>,
    events: Arc<EventRegistry>,
    transforms: RwLock<HashMap<EventKind, PayloadTransform>>,
}

impl Dispatcher {
    /// Dispatcher with the built-in READY and INTERACTION_CREATE transforms.
    pub fn new(session: Arc<Session>, events: Arc<EventRegistry>) -> Self {
        let mut transforms: HashMap<EventKind, PayloadTransform> = HashMap::new();
        transforms.insert(
            EventKind::Ready,
            Arc::new(|d| {
                let ready: ReadyPayload = serde_json::from_value(d)
                    .map_err(|e| ProtocolError::unexpected("READY", e.to_string()))?;
                Ok(EventPayload::Ready(ready))
            }),
        );
        transforms.insert(
            EventKind::InteractionCreate,
            Arc::new(|d| {
                let interaction: Interaction = serde_json::from_value(d)
                    .map_err(|e| ProtocolError::unexpected("INTERACTION_CREATE", e.to_string()))?;
                Ok(EventPayload::Interaction(Box::new(interaction)))
            }),
        );

        Self {
            session,
            events,
            transforms: RwLock::new(transforms),
        }
    }

    /// Register or replace the transform for `kind`.
    pub fn set_transform<F>(&self, kind: impl Into<EventKind>, transform: F)
    where
        F: Fn(Value) -> Result<EventPayload, ProtocolError> + Send + Sync + 'static,
    {
        self.transforms.write().insert(kind.into(), Arc::new(transform));
    }

    /// Deliver `kind` as raw JSON.
    pub fn remove_transform(&self, kind: impl Into<EventKind>) -> bool {
        self.transforms.write().remove(&kind.into()).is_some()
    }

    /// Process one inbound frame.
    ///
    /// An error means the frame was dropped; the connection is unaffected.
    pub async fn dispatch(&self, frame: GatewayFrame) -> Result<Directive, ProtocolError> {
        let op = match frame.opcode() {
            Some(op) => op,
            None => {
                debug!("Ignoring frame with unknown opcode {}", frame.op);
                return Ok(Directive::None);
            }
        };

        match op {
            OpCode::Dispatch => self.dispatch_event(frame).await,
            OpCode::Hello => {
                let hello: HelloPayload = frame.payload("HELLO")?;
                if hello.heartbeat_interval == 0 {
                    return Err(ProtocolError::unexpected("HELLO", "heartbeat_interval is 0"));
                }
                Ok(Directive::Hello(Duration::from_millis(hello.heartbeat_interval)))
            }
            OpCode::Heartbeat => Ok(Directive::HeartbeatRequested),
            OpCode::HeartbeatAck => Ok(Directive::HeartbeatAck),
            OpCode::Reconnect => Ok(Directive::Reconnect),
            OpCode::InvalidSession => Ok(Directive::InvalidSession {
                resumable: frame.d.as_bool().unwrap_or(false),
            }),
            other => {
                debug!("Ignoring client-only opcode {}", other);
                Ok(Directive::None)
            }
        }
    }

    async fn dispatch_event(&self, frame: GatewayFrame) -> Result<Directive, ProtocolError> {
        let GatewayFrame { d, s, t, .. } = frame;
        let sequence = s.ok_or(ProtocolError::IncompleteDispatch("sequence"))?;
        let name = t.ok_or(ProtocolError::IncompleteDispatch("event name"))?;

        // Sequence first, so a payload that fails to transform still counts
        let sequence = self.session.observe_sequence(sequence);
        let kind = EventKind::from_name(&name);
        trace!("Dispatch {} (seq {})", kind, sequence);

        let directive = match kind {
            EventKind::Ready => {
                let ready: ReadyPayload = serde_json::from_value(d.clone())
                    .map_err(|e| ProtocolError::unexpected("READY", e.to_string()))?;
                self.session.establish(ResumeInfo {
                    session_id: ready.session_id,
                    resume_url: ready.resume_gateway_url,
                });
                Directive::Ready
            }
            EventKind::Resumed => Directive::Resumed,
            _ => Directive::None,
        };

        let transform = self.transforms.read().get(&kind).cloned();
        let payload = match transform {
            Some(transform) => transform(d)?,
            None => EventPayload::Raw(d),
        };

        self.events
            .emit(DispatchedEvent {
                kind,
                payload,
                sequence,
            })
            .await;

        Ok(directive)
    }
}
