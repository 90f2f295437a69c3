//! # discorator-gateway
//!
//! Gateway session engine for Discorator.
//!
//! This crate keeps one logical session alive over a sequence of WebSocket
//! connections:
//!
//! - **Transport**: one bidirectional text connection per attempt
//! - **Dispatcher**: routes inbound frames by opcode and feeds subscribers
//! - **Heartbeat**: jittered first beat, fixed interval after, ACK tracking
//! - **Close policy**: decides which close codes can be resumed
//! - **Gateway**: connect, resume, close, and send
//!
//! ```no_run
//! use discorator_core::{Intents, Token};
//! use discorator_gateway::{DispatchedEvent, EventKind, Gateway};
//!
//! # async fn run() -> discorator_gateway::Result<()> {
//! let gateway = Gateway::builder(Token::new("Bot ..."))
//!     .intents(Intents::default())
//!     .build()?;
//!
//! gateway.on(EventKind::MessageCreate, |event: DispatchedEvent| async move {
//!     println!("message at {}", event.sequence);
//! });
//!
//! gateway.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod dispatcher;
mod driver;
pub mod error;
pub mod events;
pub mod gateway;
pub mod heartbeat;
pub mod policy;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backoff::ReconnectBackoff;
pub use dispatcher::{Directive, Dispatcher, PayloadTransform};
pub use error::{GatewayError, ProtocolError, Result, TransportError};
pub use events::{
    DispatchedEvent, EventHandler, EventKind, EventPayload, EventRegistry, HandlerId, Interaction,
    InteractionType,
};
pub use gateway::{ConnectionStatus, Gateway, GatewayBuilder};
pub use heartbeat::{HeartbeatMonitor, HeartbeatPhase, HeartbeatScheduler};
pub use policy::{codes, CloseEvent, ClosePolicy, CloseRule};
pub use protocol::{GatewayFrame, HelloPayload, OpCode, ReadyPayload};
pub use session::{ResumeInfo, Session};
pub use transport::{
    Connection, FrameSink, FrameStream, Outbound, Transport, TransportEvent, WebSocketTransport,
};
