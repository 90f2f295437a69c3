//! Session orchestrator.
//!
//! [`Gateway`] owns the session and runs the lifecycle: connect and
//! IDENTIFY, resume after a recoverable close, and close on request. Each
//! open connection gets a driver task (see `driver.rs`) that reads frames
//! and hands disconnects back here.
//!
//! `connect`, `resume` and `close` are serialized by a lifecycle lock, so
//! at most one connection attempt is in flight at a time.

use crate::backoff::ReconnectBackoff;
use crate::dispatcher::Dispatcher;
use crate::driver::ConnectionDriver;
use crate::error::{GatewayError, ProtocolError, Result, TransportError};
use crate::events::{DispatchedEvent, EventHandler, EventKind, EventPayload, EventRegistry, HandlerId};
use crate::heartbeat::{HeartbeatHandle, HeartbeatMonitor, HeartbeatPhase};
use crate::policy::{codes, ClosePolicy};
use crate::protocol::GatewayFrame;
use crate::session::{ResumeInfo, Session};
use crate::transport::{Outbound, Transport, WebSocketTransport};
use discorator_core::config::{ConnectionProperties, DEFAULT_GATEWAY_URL};
use discorator_core::{Config, Intents, Token};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Logs socket lifecycle at info when verbose, debug otherwise.
macro_rules! lifecycle {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}
pub(crate) use lifecycle;

/// Where the session is, as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Identifying,
    Connected,
    Resuming,
    Closed,
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Identifying => f.write_str("identifying"),
            Self::Connected => f.write_str("connected"),
            Self::Resuming => f.write_str("resuming"),
            Self::Closed => f.write_str("closed"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Connection settings resolved at build time.
#[derive(Debug, Clone)]
pub(crate) struct GatewayOptions {
    pub(crate) entry_url: Url,
    pub(crate) properties: ConnectionProperties,
    pub(crate) handshake_timeout: Duration,
    pub(crate) require_ack: bool,
    pub(crate) verbose: bool,
}

/// Readiness gate: fulfilled by the driver, awaited by the orchestrator.
pub(crate) type Gate = oneshot::Sender<Result<()>>;

/// The connection currently owned by the session.
pub(crate) struct ActiveConnection {
    id: u64,
    url: Url,
    outbound: Outbound,
    cancel: CancellationToken,
    heartbeat: Arc<Mutex<Option<HeartbeatHandle>>>,
    monitor: Arc<HeartbeatMonitor>,
}

impl ActiveConnection {
    /// Stop the driver and heartbeat, then close the socket.
    async fn shutdown(self, code: u16, reason: &str) {
        self.cancel.cancel();
        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        if let Err(e) = self.outbound.close(code, reason).await {
            debug!("Close of {} failed: {}", self.url, e);
        }
    }
}

/// What `open` hands back to the caller driving the handshake.
struct Handshake {
    outbound: Outbound,
    hello: oneshot::Receiver<Result<()>>,
    ready: oneshot::Receiver<Result<()>>,
}

pub(crate) struct Inner {
    pub(crate) options: GatewayOptions,
    pub(crate) session: Arc<Session>,
    pub(crate) events: Arc<EventRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) policy: ClosePolicy,
    transport: Arc<dyn Transport>,
    backoff: Mutex<ReconnectBackoff>,
    active: Mutex<Option<ActiveConnection>>,
    lifecycle: tokio::sync::Mutex<()>,
    /// Cancelled by `close`; parent of every connection's token.
    shutdown: Mutex<CancellationToken>,
    status: watch::Sender<ConnectionStatus>,
    next_connection_id: AtomicU64,
}

/// A gateway session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("entry_url", &self.inner.options.entry_url.as_str())
            .field("status", &self.status())
            .field("session_id", &self.session_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl Gateway {
    pub fn builder(token: Token) -> GatewayBuilder {
        GatewayBuilder::new(token)
    }

    /// Build a gateway entirely from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .account
            .resolved_token()
            .ok_or_else(|| GatewayError::config("No token configured"))?;
        GatewayBuilder::new(token).apply_config(config)?.build()
    }

    // ---- lifecycle -------------------------------------------------------

    /// Open a connection to the entry address and complete the IDENTIFY handshake.
    ///
    /// Returns once READY has been processed. Fails if a connection is
    /// already open, if the transport fails, or if the handshake does not
    /// complete.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.active.lock().is_some() {
            return Err(GatewayError::AlreadyConnected);
        }

        let previous = std::mem::replace(&mut *self.inner.shutdown.lock(), CancellationToken::new());
        previous.cancel();
        self.inner.session.reset_identity();
        self.inner.backoff.lock().reset();

        let url = self.inner.options.entry_url.clone();
        match self.identify(&url).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = e.into_handshake_failure();
                error!("Gateway connect failed: {}", e);
                self.abandon().await;
                self.set_status(ConnectionStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Reconnect after a close with `close_code`.
    ///
    /// Non-recoverable codes fail without opening anything. Otherwise the
    /// current connection is torn down and a RESUME is sent to the resume
    /// address, or a fresh IDENTIFY to the entry address if there is no
    /// session to resume. Returns once RESUME is sent, or once READY
    /// arrives for the IDENTIFY case.
    pub async fn resume(&self, close_code: u16) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        {
            // Resuming after close(false) starts a new lifetime
            let mut shutdown = self.inner.shutdown.lock();
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
        }
        let result = self.resume_locked(close_code).await;
        if let Err(e) = &result {
            self.set_status(ConnectionStatus::Failed(e.to_string()));
        }
        result
    }

    /// Close the session.
    ///
    /// With `invalidate` the socket is closed with 1000 and the session
    /// forgotten; without it the socket is closed with 1012 and the session
    /// can be resumed later. Safe to call when nothing is open.
    pub async fn close(&self, invalidate: bool) {
        self.inner.session.set_alive(false);
        // Before the lock, so an in-flight handshake gives up promptly
        self.inner.shutdown.lock().cancel();

        let _guard = self.inner.lifecycle.lock().await;
        let active = self.inner.active.lock().take();
        if let Some(active) = active {
            let (code, reason) = if invalidate {
                (codes::NORMAL, "Session invalidated")
            } else {
                (codes::SERVICE_RESTART, "Service restart")
            };
            lifecycle!(
                self.inner.options.verbose,
                "Closing gateway connection {} with {} ({})",
                active.id,
                code,
                reason
            );
            active.shutdown(code, reason).await;
        }
        // A driver mid-READY may have flipped it back before its token fired
        self.inner.session.set_alive(false);

        if invalidate {
            self.inner.session.reset_identity();
        }
        self.set_status(ConnectionStatus::Closed);
    }

    /// Send a frame on the current connection.
    pub async fn send(&self, op: impl Into<u8>, payload: Value) -> Result<()> {
        let outbound = self
            .inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.outbound.clone())
            .ok_or(GatewayError::NotConnected)?;
        outbound.send(&GatewayFrame::new(op, payload)).await
    }

    // ---- events ----------------------------------------------------------

    /// Call `handler` for every event of `kind`.
    pub fn on(&self, kind: impl Into<EventKind>, handler: impl EventHandler) -> HandlerId {
        self.inner.events.on(kind, handler)
    }

    /// Call `handler` for the next event of `kind` only.
    pub fn once(&self, kind: impl Into<EventKind>, handler: impl EventHandler) -> HandlerId {
        self.inner.events.once(kind, handler)
    }

    /// Remove every handler for `kind`.
    pub fn off(&self, kind: impl Into<EventKind>) -> usize {
        self.inner.events.off(kind)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.events.remove(id)
    }

    /// Receive every dispatched event.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchedEvent> {
        self.inner.events.subscribe()
    }

    /// Register or replace the payload transform for `kind`.
    pub fn set_transform<F>(&self, kind: impl Into<EventKind>, transform: F)
    where
        F: Fn(Value) -> std::result::Result<EventPayload, ProtocolError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_transform(kind, transform);
    }

    // ---- state -----------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch status changes, including failures in background reconnects.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.session.is_alive()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.inner.session.sequence()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.session_id()
    }

    pub fn resume_url(&self) -> Option<String> {
        self.inner.session.resume_url()
    }

    pub fn intents(&self) -> Intents {
        self.inner.session.intents()
    }

    pub fn policy(&self) -> &ClosePolicy {
        &self.inner.policy
    }

    /// Round trip of the last acknowledged heartbeat on the current connection.
    pub fn latency(&self) -> Option<Duration> {
        self.inner.active.lock().as_ref()?.monitor.latency()
    }

    pub fn heartbeat_phase(&self) -> Option<HeartbeatPhase> {
        self.inner.active.lock().as_ref().map(|a| a.monitor.phase())
    }

    // ---- internals -------------------------------------------------------

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        debug!("Gateway status: {}", status);
        self.inner.status.send_replace(status);
    }

    pub(crate) fn reset_backoff(&self) {
        self.inner.backoff.lock().reset();
    }

    fn is_current(&self, connection_id: Option<u64>) -> bool {
        self.inner.active.lock().as_ref().map(|a| a.id) == connection_id
    }

    async fn teardown(&self, code: u16, reason: &str) {
        let active = self.inner.active.lock().take();
        if let Some(active) = active {
            active.shutdown(code, reason).await;
        }
    }

    /// Drop whatever is open after a failed attempt.
    async fn abandon(&self) {
        self.inner.session.set_alive(false);
        self.teardown(codes::NORMAL, "Handshake failed").await;
    }

    /// Open a transport and start its driver.
    async fn open(&self, url: &Url) -> Result<Handshake> {
        let options = &self.inner.options;
        lifecycle!(options.verbose, "Opening gateway connection to {}", url);

        let shutdown = self.inner.shutdown.lock().clone();
        let connection = tokio::select! {
            _ = shutdown.cancelled() => return Err(GatewayError::Closed),
            opened = tokio::time::timeout(options.handshake_timeout, self.inner.transport.open(url)) => {
                match opened {
                    Ok(connection) => connection?,
                    Err(_) => {
                        return Err(GatewayError::HandshakeTimeout {
                            stage: "connection",
                            timeout: options.handshake_timeout,
                        })
                    }
                }
            }
        };

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let cancel = shutdown.child_token();
        let outbound = Outbound::new(connection.sink);
        let heartbeat = Arc::new(Mutex::new(None));
        let monitor = Arc::new(HeartbeatMonitor::new());
        let (hello_tx, hello_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (zombie_tx, zombie_rx) = mpsc::channel(1);

        let previous = self.inner.active.lock().replace(ActiveConnection {
            id,
            url: url.clone(),
            outbound: outbound.clone(),
            cancel: cancel.clone(),
            heartbeat: Arc::clone(&heartbeat),
            monitor: Arc::clone(&monitor),
        });
        if let Some(previous) = previous {
            warn!("Replacing connection {} that was still open", previous.id);
            previous.shutdown(codes::SERVICE_RESTART, "Service restart").await;
        }

        let driver = ConnectionDriver {
            gateway: self.clone(),
            id,
            stream: connection.stream,
            outbound: outbound.clone(),
            cancel,
            heartbeat,
            monitor,
            hello: Some(hello_tx),
            ready: Some(ready_tx),
            zombie_tx: Some(zombie_tx),
            zombie_rx,
        };
        tokio::spawn(driver.run());

        Ok(Handshake {
            outbound,
            hello: hello_rx,
            ready: ready_rx,
        })
    }

    async fn await_gate(&self, gate: oneshot::Receiver<Result<()>>, stage: &'static str) -> Result<()> {
        let shutdown = self.inner.shutdown.lock().clone();
        let timeout = self.inner.options.handshake_timeout;
        tokio::select! {
            _ = shutdown.cancelled() => Err(GatewayError::Closed),
            outcome = tokio::time::timeout(timeout, gate) => match outcome {
                Err(_) => Err(GatewayError::HandshakeTimeout { stage, timeout }),
                Ok(Err(_)) => Err(GatewayError::Transport(TransportError::Closed)),
                Ok(Ok(result)) => result,
            },
        }
    }

    /// Full handshake: HELLO, IDENTIFY, READY.
    async fn identify(&self, url: &Url) -> Result<()> {
        self.set_status(ConnectionStatus::Connecting);
        let handshake = self.open(url).await?;
        self.await_gate(handshake.hello, "HELLO").await?;

        self.set_status(ConnectionStatus::Identifying);
        let session = &self.inner.session;
        let frame = GatewayFrame::identify(session.token(), session.intents(), &self.inner.options.properties);
        handshake.outbound.send(&frame).await?;
        lifecycle!(self.inner.options.verbose, "Sent IDENTIFY with intents {}", session.intents());

        self.await_gate(handshake.ready, "READY").await
    }

    /// HELLO, then RESUME. Does not wait for RESUMED.
    async fn resume_at(&self, info: &ResumeInfo) -> Result<()> {
        let url = self.resume_target(&info.resume_url);
        let Handshake {
            outbound, hello, ready,
        } = self.open(&url).await?;
        // Nobody waits for RESUMED, so a close after HELLO must reach the reconnect path
        drop(ready);
        self.await_gate(hello, "HELLO").await?;

        let session = &self.inner.session;
        let sequence = session.sequence();
        let frame = GatewayFrame::resume(session.token(), &info.session_id, sequence);
        outbound.send(&frame).await?;
        lifecycle!(
            self.inner.options.verbose,
            "Sent RESUME for session {} at sequence {:?}",
            info.session_id,
            sequence
        );
        Ok(())
    }

    /// The resume address, carrying the entry address's query if it has none.
    fn resume_target(&self, resume_url: &str) -> Url {
        let entry = &self.inner.options.entry_url;
        match Url::parse(resume_url) {
            Ok(mut url) if matches!(url.scheme(), "ws" | "wss") => {
                if url.query().is_none() {
                    url.set_query(entry.query());
                }
                url
            }
            Ok(_) | Err(_) => {
                warn!("Unusable resume url '{}', resuming at the entry url", resume_url);
                entry.clone()
            }
        }
    }

    /// Caller must hold the lifecycle lock.
    async fn resume_locked(&self, close_code: u16) -> Result<()> {
        let event = self.inner.policy.classify(close_code);
        if !event.recoverable {
            error!(
                "Close code {} is not recoverable: {}",
                close_code, event.reason
            );
            self.inner.session.set_alive(false);
            self.teardown(codes::NORMAL, "Session failed").await;
            return Err(GatewayError::fatal(Some(close_code), event.reason));
        }

        lifecycle!(
            self.inner.options.verbose,
            "Resuming after close code {} ({})",
            close_code,
            event.reason
        );
        self.set_status(ConnectionStatus::Resuming);

        let (code, reason) = if close_code == codes::HEARTBEAT_TIMEOUT {
            (codes::HEARTBEAT_TIMEOUT, "Heartbeat ACK not received")
        } else {
            (codes::SERVICE_RESTART, "Service restart")
        };
        self.teardown(code, reason).await;

        let result = match self.inner.session.resume_info() {
            Some(info) => self.resume_at(&info).await,
            None => {
                debug!("No session to resume, identifying at the entry url");
                let url = self.inner.options.entry_url.clone();
                self.identify(&url).await
            }
        };

        if result.is_err() {
            self.abandon().await;
        }
        result
    }

    /// Reconnect on behalf of a driver whose connection went away.
    ///
    /// Boxed: this future is part of the driver task, which `open` spawns.
    pub(crate) fn reconnect(&self, connection_id: u64, close_code: u16) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let shutdown = self.inner.shutdown.lock().clone();
            let recoverable = self.inner.policy.classify(close_code).recoverable;
            let mut expected = Some(connection_id);

            loop {
                if recoverable {
                    let delay = self.inner.backoff.lock().next_delay();
                    let Some(delay) = delay else {
                        let reason = "Too many consecutive reconnects";
                        error!("{}, giving up", reason);
                        let _guard = self.inner.lifecycle.lock().await;
                        if !shutdown.is_cancelled() && self.is_current(expected) {
                            self.abandon().await;
                            self.set_status(ConnectionStatus::Failed(reason.to_string()));
                        }
                        return;
                    };
                    if !delay.is_zero() {
                        info!("Reconnecting in {:?}", delay);
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }

                let _guard = self.inner.lifecycle.lock().await;
                // Closed, or someone else already replaced this connection
                if shutdown.is_cancelled() || !self.is_current(expected) {
                    debug!("Skipping reconnect for connection {}", connection_id);
                    return;
                }

                match self.resume_locked(close_code).await {
                    Ok(()) => return,
                    Err(e) if shutdown.is_cancelled() => {
                        debug!("Reconnect abandoned after close: {}", e);
                        return;
                    }
                    Err(e) if e.is_retriable() => {
                        warn!("Reconnect attempt failed: {}", e);
                        expected = None;
                    }
                    Err(e) => {
                        error!("Gateway session failed: {}", e);
                        self.set_status(ConnectionStatus::Failed(e.to_string()));
                        return;
                    }
                }
            }
        })
    }
}

/// Builds a [`Gateway`].
pub struct GatewayBuilder {
    token: Token,
    intents: Intents,
    entry_url: String,
    properties: ConnectionProperties,
    handshake_timeout: Duration,
    require_ack: bool,
    verbose: bool,
    intent_warnings: bool,
    policy: ClosePolicy,
    backoff: ReconnectBackoff,
    transport: Option<Arc<dyn Transport>>,
}

impl GatewayBuilder {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            intents: Intents::default(),
            entry_url: DEFAULT_GATEWAY_URL.to_string(),
            properties: ConnectionProperties::default(),
            handshake_timeout: Duration::from_secs(30),
            require_ack: true,
            verbose: false,
            intent_warnings: true,
            policy: ClosePolicy::default(),
            backoff: ReconnectBackoff::default(),
            transport: None,
        }
    }

    /// Take every setting except the token from `config`.
    pub fn apply_config(mut self, config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| GatewayError::config(e.to_string()))?;

        let gateway = &config.gateway;
        self.intents = gateway.intents;
        self.entry_url = gateway.url.clone();
        self.properties = gateway.properties.clone();
        self.handshake_timeout = Duration::from_secs(gateway.handshake_timeout_secs);
        self.verbose = gateway.verbose;
        self.intent_warnings = !gateway.suppress_intent_warnings;
        self.require_ack = config.heartbeat.require_ack;
        self.policy = ClosePolicy::from_config(&config.reconnect)
            .map_err(|e| GatewayError::config(e.to_string()))?;
        self.backoff = ReconnectBackoff::from_config(&config.reconnect.backoff);
        Ok(self)
    }

    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    pub fn entry_url(mut self, url: impl Into<String>) -> Self {
        self.entry_url = url.into();
        self
    }

    pub fn properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn require_ack(mut self, require_ack: bool) -> Self {
        self.require_ack = require_ack;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn intent_warnings(mut self, enabled: bool) -> Self {
        self.intent_warnings = enabled;
        self
    }

    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Use a custom transport instead of WebSockets.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> Result<Gateway> {
        if self.token.is_empty() {
            return Err(GatewayError::config("Token cannot be empty"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(GatewayError::config("Handshake timeout must be greater than 0"));
        }
        let entry_url = Url::parse(&self.entry_url)
            .map_err(|e| GatewayError::config(format!("Invalid gateway url '{}': {}", self.entry_url, e)))?;
        if !matches!(entry_url.scheme(), "ws" | "wss") {
            return Err(GatewayError::config(format!(
                "Gateway url must use ws or wss, got '{}'",
                entry_url.scheme()
            )));
        }

        let session = Arc::new(Session::new(self.token, self.intents));
        let events = Arc::new(if self.intent_warnings {
            EventRegistry::with_intent_check(self.intents)
        } else {
            EventRegistry::new()
        });
        let dispatcher = Dispatcher::new(Arc::clone(&session), Arc::clone(&events));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new()));
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        Ok(Gateway {
            inner: Arc::new(Inner {
                options: GatewayOptions {
                    entry_url,
                    properties: self.properties,
                    handshake_timeout: self.handshake_timeout,
                    require_ack: self.require_ack,
                    verbose: self.verbose,
                },
                session,
                events,
                dispatcher,
                policy: self.policy,
                transport,
                backoff: Mutex::new(self.backoff),
                active: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                shutdown: Mutex::new(CancellationToken::new()),
                status,
                next_connection_id: AtomicU64::new(1),
            }),
        })
    }
}
