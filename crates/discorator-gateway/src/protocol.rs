//! Gateway wire format.
//!
//! Every frame is a JSON text message `{op, d, s, t}`. Inbound frames are
//! decoded into [`GatewayFrame`]; outbound frames are built with the
//! constructors here so the payload shapes stay in one place.

use crate::error::ProtocolError;
use discorator_core::config::ConnectionProperties;
use discorator_core::{Intents, Token};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Gateway opcodes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// An event was dispatched.
    Dispatch,
    /// Keepalive, sent by either side.
    Heartbeat,
    /// Start a new session.
    Identify,
    /// Update the client's presence.
    PresenceUpdate,
    /// Join, leave or move between voice channels.
    VoiceStateUpdate,
    /// Continue a previous session.
    Resume,
    /// The remote asks the client to reconnect and resume.
    Reconnect,
    /// Request guild members.
    RequestGuildMembers,
    /// The session has been invalidated.
    InvalidSession,
    /// Sent on connect; carries the heartbeat interval.
    Hello,
    /// Acknowledges a heartbeat.
    HeartbeatAck,
}

impl OpCode {
    pub const fn code(self) -> u8 {
        match self {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OpCode::Dispatch),
            1 => Some(OpCode::Heartbeat),
            2 => Some(OpCode::Identify),
            3 => Some(OpCode::PresenceUpdate),
            4 => Some(OpCode::VoiceStateUpdate),
            6 => Some(OpCode::Resume),
            7 => Some(OpCode::Reconnect),
            8 => Some(OpCode::RequestGuildMembers),
            9 => Some(OpCode::InvalidSession),
            10 => Some(OpCode::Hello),
            11 => Some(OpCode::HeartbeatAck),
            _ => None,
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op.code()
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A single gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,

    #[serde(default)]
    pub d: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Build an outbound frame.
    pub fn new(op: impl Into<u8>, d: Value) -> Self {
        Self {
            op: op.into(),
            d,
            s: None,
            t: None,
        }
    }

    /// Decode an inbound text message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The known opcode, if any.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_code(self.op)
    }

    /// Keepalive carrying the last sequence number seen.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, sequence.map(Value::from).unwrap_or(Value::Null))
    }

    /// IDENTIFY for a fresh session.
    pub fn identify(token: &Token, intents: Intents, properties: &ConnectionProperties) -> Self {
        let payload = IdentifyPayload {
            token: token.expose(),
            intents: intents.bits(),
            properties,
        };
        Self::new(OpCode::Identify, to_value(&payload))
    }

    /// RESUME for an existing session.
    pub fn resume(token: &Token, session_id: &str, sequence: Option<u64>) -> Self {
        let payload = ResumePayload {
            token: token.expose(),
            session_id,
            seq: sequence,
        };
        Self::new(OpCode::Resume, to_value(&payload))
    }

    /// Deserialize the `d` field.
    pub fn payload<T: serde::de::DeserializeOwned>(&self, context: &str) -> Result<T, ProtocolError> {
        T::deserialize(&self.d).map_err(|e| ProtocolError::unexpected(context, e.to_string()))
    }
}

// Both payloads are plain structs of strings and integers
fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

/// IDENTIFY payload. Not `Debug`: it carries the token.
#[derive(Serialize)]
struct IdentifyPayload<'a> {
    token: &'a str,
    intents: u32,
    properties: &'a ConnectionProperties,
}

/// RESUME payload. Not `Debug`: it carries the token.
#[derive(Serialize)]
struct ResumePayload<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: Option<u64>,
}

/// HELLO payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HelloPayload {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// READY payload: the handshake succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,

    pub resume_gateway_url: String,

    /// Everything else READY carries (user, guilds, application, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
