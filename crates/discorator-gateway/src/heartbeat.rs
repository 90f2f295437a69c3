//! Periodic keepalive.
//!
//! One scheduler runs per connection. The first beat fires after a random
//! fraction of the interval, then every interval after that, until the
//! connection's cancellation token fires or the session stops being alive.

use crate::protocol::GatewayFrame;
use crate::session::Session;
use crate::transport::Outbound;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where a scheduler is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    Idle,
    /// Waiting out the jittered first delay.
    Waiting,
    Beating,
    Stopped,
}

/// ACK bookkeeping shared between the scheduler and the connection driver.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    awaiting_ack: AtomicBool,
    last_sent: Mutex<Option<Instant>>,
    latency: Mutex<Option<Duration>>,
    phase: Mutex<HeartbeatPhase>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            awaiting_ack: AtomicBool::new(false),
            last_sent: Mutex::new(None),
            latency: Mutex::new(None),
            phase: Mutex::new(HeartbeatPhase::Idle),
        }
    }

    pub(crate) fn record_sent(&self) {
        *self.last_sent.lock() = Some(Instant::now());
        self.awaiting_ack.store(true, Ordering::SeqCst);
    }

    pub(crate) fn record_ack(&self) {
        self.awaiting_ack.store(false, Ordering::SeqCst);
        if let Some(sent) = *self.last_sent.lock() {
            *self.latency.lock() = Some(sent.elapsed());
        }
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack.load(Ordering::SeqCst)
    }

    /// Round trip of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    pub fn phase(&self) -> HeartbeatPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: HeartbeatPhase) {
        *self.phase.lock() = phase;
    }
}

/// Sends heartbeats on one connection.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    interval: Duration,
    require_ack: bool,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration, require_ack: bool) -> Self {
        Self {
            interval,
            require_ack,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delay before the first beat, uniform in `[0, interval)`.
    pub fn initial_delay(&self) -> Duration {
        let millis = self.interval.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..millis))
    }

    /// Start beating in the background.
    ///
    /// A missed ACK is reported once on `zombie` and ends the task.
    pub fn spawn(
        self,
        outbound: Outbound,
        session: Arc<Session>,
        monitor: Arc<HeartbeatMonitor>,
        cancel: CancellationToken,
        zombie: mpsc::Sender<()>,
    ) -> HeartbeatHandle {
        let first = self.initial_delay();
        debug!(
            "Heartbeating every {:?}, first beat in {:?}",
            self.interval, first
        );

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            self.run(first, outbound, session, &monitor, task_cancel, zombie)
                .await;
            monitor.set_phase(HeartbeatPhase::Stopped);
        });

        HeartbeatHandle { cancel, task }
    }

    async fn run(
        self,
        first: Duration,
        outbound: Outbound,
        session: Arc<Session>,
        monitor: &HeartbeatMonitor,
        cancel: CancellationToken,
        zombie: mpsc::Sender<()>,
    ) {
        monitor.set_phase(HeartbeatPhase::Waiting);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(first) => {}
        }
        monitor.set_phase(HeartbeatPhase::Beating);

        let mut was_alive = false;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            // Not alive yet is fine during the handshake; alive and then not means closed
            if session.is_alive() {
                was_alive = true;
            } else if was_alive {
                debug!("Session no longer alive, stopping heartbeat");
                return;
            }

            if self.require_ack && monitor.is_awaiting_ack() {
                warn!("Previous heartbeat was never acknowledged");
                let _ = zombie.try_send(());
                return;
            }

            let frame = GatewayFrame::heartbeat(session.sequence());
            if let Err(e) = outbound.send(&frame).await {
                // The driver sees the close and decides what to do
                debug!("Heartbeat send failed: {}", e);
                return;
            }
            monitor.record_sent();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Stops a running scheduler.
#[derive(Debug)]
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Cancel and wait for the task to finish. No beat is sent after this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Heartbeat task panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::transport::Transport;
    use discorator_core::{Intents, Token};
    use url::Url;

    async fn setup() -> (Outbound, crate::testing::MockPeer, Arc<Session>) {
        let (transport, mut peers) = MockTransport::new();
        let url = Url::parse("wss://gateway.test").unwrap();
        let connection = transport.open(&url).await.unwrap();
        let peer = peers.recv().await.unwrap();
        let session = Arc::new(Session::new(Token::new("Bot abc"), Intents::default()));
        (Outbound::new(connection.sink), peer, session)
    }

    #[test]
    fn test_initial_delay_within_interval() {
        let scheduler = HeartbeatScheduler::new(Duration::from_millis(1_000), true);
        for _ in 0..100 {
            assert!(scheduler.initial_delay() < Duration::from_millis(1_000));
        }
        assert_eq!(
            HeartbeatScheduler::new(Duration::ZERO, true).initial_delay(),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_at_interval_with_current_sequence() {
        let (outbound, mut peer, session) = setup().await;
        let monitor = Arc::new(HeartbeatMonitor::new());
        let (zombie_tx, _zombie_rx) = mpsc::channel(1);
        let interval = Duration::from_millis(41_250);

        let start = Instant::now();
        let handle = HeartbeatScheduler::new(interval, false).spawn(
            outbound,
            Arc::clone(&session),
            Arc::clone(&monitor),
            CancellationToken::new(),
            zombie_tx,
        );

        let first = peer.recv_frame().await;
        let first_at = Instant::now();
        assert_eq!(first.op, 1);
        assert!(first.d.is_null());
        assert!(first_at - start < interval);

        session.observe_sequence(12);
        let second = peer.recv_frame().await;
        assert_eq!(second.d, 12);
        let gap = Instant::now() - first_at;
        assert!(gap >= interval && gap < interval + Duration::from_millis(5));

        handle.stop().await;
        assert_eq!(monitor.phase(), HeartbeatPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_beats_after_stop() {
        let (outbound, mut peer, session) = setup().await;
        let (zombie_tx, _zombie_rx) = mpsc::channel(1);
        let handle = HeartbeatScheduler::new(Duration::from_millis(1_000), false).spawn(
            outbound,
            session,
            Arc::new(HeartbeatMonitor::new()),
            CancellationToken::new(),
            zombie_tx,
        );

        peer.recv_frame().await;
        handle.stop().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ack_signals_zombie() {
        let (outbound, mut peer, session) = setup().await;
        let monitor = Arc::new(HeartbeatMonitor::new());
        let (zombie_tx, mut zombie_rx) = mpsc::channel(1);
        let handle = HeartbeatScheduler::new(Duration::from_millis(1_000), true).spawn(
            outbound,
            session,
            Arc::clone(&monitor),
            CancellationToken::new(),
            zombie_tx,
        );

        peer.recv_frame().await;
        assert!(monitor.is_awaiting_ack());
        assert_eq!(zombie_rx.recv().await, Some(()));
        assert!(peer.try_recv().is_none());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_keeps_beating_and_records_latency() {
        let (outbound, mut peer, session) = setup().await;
        let monitor = Arc::new(HeartbeatMonitor::new());
        let (zombie_tx, mut zombie_rx) = mpsc::channel(1);
        let handle = HeartbeatScheduler::new(Duration::from_millis(1_000), true).spawn(
            outbound,
            session,
            Arc::clone(&monitor),
            CancellationToken::new(),
            zombie_tx,
        );

        for _ in 0..3 {
            peer.recv_frame().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            monitor.record_ack();
        }
        assert!(zombie_rx.try_recv().is_err());
        let latency = monitor.latency().unwrap();
        assert!(latency >= Duration::from_millis(20));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_session_closes() {
        let (outbound, mut peer, session) = setup().await;
        session.set_alive(true);
        let (zombie_tx, _zombie_rx) = mpsc::channel(1);
        let monitor = Arc::new(HeartbeatMonitor::new());
        let handle = HeartbeatScheduler::new(Duration::from_millis(1_000), false).spawn(
            outbound,
            Arc::clone(&session),
            Arc::clone(&monitor),
            CancellationToken::new(),
            zombie_tx,
        );

        peer.recv_frame().await;
        session.set_alive(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.is_finished());
        assert_eq!(monitor.phase(), HeartbeatPhase::Stopped);
    }
}
