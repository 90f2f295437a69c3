//! Gateway error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the socket layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The address could not be used for a connection.
    #[error("Invalid gateway url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected address.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The connection is already closed.
    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    /// Create an invalid url error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// A frame that could not be understood. Never fatal on its own.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or not a frame.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame parsed but its payload did not have the expected shape.
    #[error("Unexpected payload for {context}: {reason}")]
    UnexpectedPayload {
        /// What was being decoded.
        context: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A dispatch frame without an event name or sequence number.
    #[error("Dispatch frame missing {0}")]
    IncompleteDispatch(&'static str),
}

impl ProtocolError {
    /// Create an unexpected payload error.
    pub fn unexpected(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedPayload {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by the session orchestrator.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure while connecting or sending.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol failure. Only surfaced where a caller is waiting on a frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session cannot continue.
    #[error("Session failed: {reason}")]
    Fatal {
        /// Close code that ended the session, if one did.
        code: Option<u16>,
        /// Human-readable reason.
        reason: String,
    },

    /// The connection closed with a code that allows resuming.
    #[error("Connection closed ({code}): {reason}")]
    Recoverable {
        /// Close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },

    /// No transport is open.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called while a connection is already open.
    #[error("Already connected")]
    AlreadyConnected,

    /// The session was closed while an operation was in flight.
    #[error("Session closed")]
    Closed,

    /// The remote did not answer in time.
    #[error("Timed out after {timeout:?} waiting for {stage}")]
    HandshakeTimeout {
        /// The frame that never arrived.
        stage: &'static str,
        /// How long we waited.
        timeout: Duration,
    },

    /// Invalid construction parameters.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Create a fatal error.
    pub fn fatal(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            code,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if another attempt could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Recoverable { .. } | Self::HandshakeTimeout { .. }
        )
    }

    /// Check if this error ended the session for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// The close code attached to this error, if any.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Fatal { code, .. } => *code,
            Self::Recoverable { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Convert a failed handshake into the error `connect` reports.
    pub(crate) fn into_handshake_failure(self) -> Self {
        match self {
            Self::Recoverable { code, reason } => {
                Self::fatal(Some(code), format!("Handshake failed: {}", reason))
            }
            Self::HandshakeTimeout { .. } | Self::Protocol(_) => {
                Self::fatal(None, format!("Handshake failed: {}", self))
            }
            other => other,
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
