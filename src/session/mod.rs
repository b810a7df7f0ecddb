//! BMC session management: one connection, one command at a time.
//!
//! [`BmcSession`] is the single authority for everything that touches the
//! BMC. It owns:
//!
//! - the **connection lifecycle** — connect, run startup probes, settle,
//!   mark Ready; on any transport failure drop to Disconnected and
//!   reconnect forever (capped exponential backoff between consecutive
//!   failed attempts, immediate retry after an established session drops);
//! - the **command queue** — FIFO, deduplicating, drained by a single
//!   worker so at most one command is ever in flight on the transport;
//! - the **state cache** — last-known power and UID indicator state,
//!   written only by the worker and the startup probes;
//! - the **poller** — re-queries both domains on a fixed interval so the
//!   cache stays fresh between user requests.
//!
//! ## Concurrency
//!
//! Three background tasks (connection, worker, poller) are spawned by
//! [`BmcSession::start`] and aborted by [`BmcSession::stop`]. HTTP handlers
//! only enqueue entries and read the cache; they never touch the transport.
//! The queue is a mutex-guarded `VecDeque` plus a `Notify` so the worker
//! wakes on enqueue without waiting out its tick.

pub mod command;
pub mod interpret;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BmcConfig, PollerConfig};
use crate::transport::{BmcTransport, TransportError, TransportSession};
use command::{
    BmcCommand, CommandError, CommandOutcome, CommandResult, IndicatorState, PowerState,
    QueueEntry, SessionStatus,
};
use interpret::{interpret, Interpretation};

/// Worker wake interval. Enqueues wake the worker immediately; the tick
/// bounds how long a Ready transition can go unnoticed.
const WORKER_TICK: Duration = Duration::from_millis(200);

/// Added on top of twice the poll base delay to form the poll interval.
const POLL_MARGIN: Duration = Duration::from_millis(500);

/// Cloneable handle to the BMC session. All clones share the same state.
#[derive(Clone)]
pub struct BmcSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn BmcTransport>,
    bmc: BmcConfig,
    poll_interval: Duration,
    status: RwLock<SessionStatus>,
    power: RwLock<PowerState>,
    indicator: RwLock<IndicatorState>,
    queue: Mutex<QueueState>,
    conn: Mutex<Option<Box<dyn TransportSession>>>,
    /// Wakes the worker on enqueue and on Ready.
    wake: Notify,
    /// Wakes the connection task when the worker detects a dead transport.
    disconnected: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    in_flight: Option<BmcCommand>,
}

impl QueueState {
    /// Pending means queued or currently executing.
    fn is_pending(&self, command: BmcCommand) -> bool {
        self.in_flight == Some(command) || self.entries.iter().any(|e| e.command == command)
    }
}

impl BmcSession {
    #[must_use]
    pub fn new(transport: Arc<dyn BmcTransport>, bmc: BmcConfig, poller: PollerConfig) -> Self {
        let poll_interval = Duration::from_millis(poller.base_delay_ms) * 2 + POLL_MARGIN;
        Self {
            inner: Arc::new(SessionInner {
                transport,
                bmc,
                poll_interval,
                status: RwLock::new(SessionStatus::Disconnected),
                power: RwLock::new(PowerState::default()),
                indicator: RwLock::new(IndicatorState::default()),
                queue: Mutex::new(QueueState::default()),
                conn: Mutex::new(None),
                wake: Notify::new(),
                disconnected: Notify::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the connection, worker, and poller tasks.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(connection_task(self.inner.clone())));
        tasks.push(tokio::spawn(worker_task(self.inner.clone())));
        tasks.push(tokio::spawn(poller_task(self.inner.clone())));
    }

    /// Abort the background tasks, fail anything still queued, and close
    /// the transport.
    pub async fn stop(&self) {
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inner.set_status(SessionStatus::Disconnected).await;
        self.inner.fail_pending(&CommandError::SessionLost).await;
        if let Some(mut session) = self.inner.conn.lock().await.take() {
            session.close().await;
        }
    }

    pub async fn status(&self) -> SessionStatus {
        *self.inner.status.read().await
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.is_ready().await
    }

    /// Last-known server power state. May lag the device by up to one
    /// poll interval.
    pub async fn power(&self) -> PowerState {
        *self.inner.power.read().await
    }

    /// Last-known UID indicator state.
    pub async fn indicator(&self) -> IndicatorState {
        *self.inner.indicator.read().await
    }

    /// Number of queued entries, excluding any in-flight command.
    pub async fn queue_depth(&self) -> usize {
        self.inner.queue.lock().await.entries.len()
    }

    /// User-originated command. Rejects before enqueueing when the session
    /// is not Ready, when the cache already matches a transition's target,
    /// or when the identical transition is already pending. On success the
    /// returned receiver resolves once the worker has run the command.
    pub async fn submit(
        &self,
        command: BmcCommand,
    ) -> Result<oneshot::Receiver<CommandResult>, CommandError> {
        let inner = &self.inner;
        if !inner.is_ready().await {
            return Err(CommandError::NotConnected);
        }
        if let Some(target) = command.target_on() {
            if inner.cached_is_on(command).await == target {
                return Err(CommandError::AlreadyInState);
            }
        }

        let mut queue = inner.queue.lock().await;
        if !command.is_query() && queue.is_pending(command) {
            return Err(CommandError::AlreadyQueued);
        }
        let (entry, rx) = QueueEntry::with_reply(command);
        queue.entries.push_back(entry);
        drop(queue);

        inner.wake.notify_one();
        Ok(rx)
    }

    /// Poller-originated query: coalesced against pending duplicates,
    /// fire-and-forget.
    pub async fn enqueue_poll(&self, command: BmcCommand) {
        self.inner.enqueue_poll(command).await;
    }
}

impl SessionInner {
    async fn is_ready(&self) -> bool {
        *self.status.read().await == SessionStatus::Ready
    }

    async fn set_status(&self, status: SessionStatus) {
        let mut current = self.status.write().await;
        if *current != status {
            debug!("session status {} → {}", current.as_str(), status.as_str());
            *current = status;
        }
    }

    async fn cached_is_on(&self, command: BmcCommand) -> bool {
        if command.is_power_domain() {
            self.power.read().await.is_on()
        } else {
            self.indicator.read().await.is_on()
        }
    }

    async fn enqueue_poll(&self, command: BmcCommand) {
        if !self.is_ready().await {
            return;
        }
        let mut queue = self.queue.lock().await;
        if queue.is_pending(command) {
            return;
        }
        queue.entries.push_back(QueueEntry::fire_and_forget(command));
        drop(queue);
        self.wake.notify_one();
    }

    /// Resolve every queued entry with `err` and empty the queue.
    async fn fail_pending(&self, err: &CommandError) {
        let drained: Vec<QueueEntry> = {
            let mut queue = self.queue.lock().await;
            queue.entries.drain(..).collect()
        };
        for entry in drained {
            entry.resolve(Err(err.clone()));
        }
    }

    /// Interpret a response, apply any confirmed state to the cache, and
    /// map it to the caller-facing result.
    async fn apply_response(&self, command: BmcCommand, raw: &str) -> CommandResult {
        match interpret(command, raw) {
            Interpretation::Confirmed(on) => {
                if command.is_power_domain() {
                    let state = PowerState::from_on(on);
                    *self.power.write().await = state;
                    Ok(CommandOutcome::Power(state))
                } else {
                    let state = IndicatorState::from_on(on);
                    *self.indicator.write().await = state;
                    Ok(CommandOutcome::Indicator(state))
                }
            }
            Interpretation::Redundant => Err(CommandError::RedundantOnDevice),
            Interpretation::Unrecognized => {
                warn!(
                    "unrecognized response to {}: {:?}",
                    command.device_command(),
                    truncate(raw, 120)
                );
                Err(CommandError::UnrecognizedResponse(truncate(raw, 120)))
            }
        }
    }

    /// Run one queued command against the transport. Any transport failure
    /// (including the exec timeout) is treated as a lost session.
    async fn execute(&self, entry: QueueEntry) {
        let command = entry.command;

        // The cache may have caught up since enqueue time.
        if let Some(target) = command.target_on() {
            if self.cached_is_on(command).await == target {
                entry.resolve(Err(CommandError::AlreadyInState));
                return;
            }
        }

        let mut conn = self.conn.lock().await;
        let Some(session) = conn.as_mut() else {
            entry.resolve(Err(CommandError::SessionLost));
            return;
        };

        match exec_with_timeout(session.as_mut(), command, self.bmc.exec_timeout_ms).await {
            Ok(raw) => {
                drop(conn);
                debug!("{}: {:?}", command.device_command(), truncate(&raw, 80));
                let result = self.apply_response(command, &raw).await;
                entry.resolve(result);
            }
            Err(e) => {
                warn!("{} failed: {e}", command.device_command());
                if let Some(mut session) = conn.take() {
                    session.close().await;
                }
                drop(conn);
                entry.resolve(Err(CommandError::SessionLost));
                self.mark_disconnected().await;
            }
        }
    }

    async fn mark_disconnected(&self) {
        self.set_status(SessionStatus::Disconnected).await;
        self.fail_pending(&CommandError::SessionLost).await;
        self.disconnected.notify_one();
    }

    /// Pop and execute entries until the queue is empty or the session
    /// stops being Ready. At most one command runs at a time.
    async fn drain_queue(&self) {
        loop {
            if !self.is_ready().await {
                return;
            }
            let entry = {
                let mut queue = self.queue.lock().await;
                let Some(entry) = queue.entries.pop_front() else {
                    return;
                };
                queue.in_flight = Some(entry.command);
                entry
            };
            self.execute(entry).await;
            self.queue.lock().await.in_flight = None;
        }
    }
}

async fn exec_with_timeout(
    session: &mut dyn TransportSession,
    command: BmcCommand,
    timeout_ms: u64,
) -> Result<String, TransportError> {
    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        session.exec(command.device_command()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout_ms)),
    }
}

/// Connect, reconnect forever. Backoff doubles between consecutive failed
/// attempts and resets once a connection is established; a drop of an
/// established session reconnects immediately.
async fn connection_task(inner: Arc<SessionInner>) {
    let initial = Duration::from_millis(inner.bmc.reconnect_delay_ms);
    let max = Duration::from_millis(inner.bmc.reconnect_max_delay_ms);
    let mut delay = initial;

    loop {
        inner.set_status(SessionStatus::Connecting).await;
        match establish(&inner).await {
            Ok(()) => {
                delay = initial;
                inner.set_status(SessionStatus::Ready).await;
                inner.wake.notify_one();
                info!("BMC session ready");
                inner.disconnected.notified().await;
                info!("BMC session lost, reconnecting");
            }
            Err(e) => {
                inner.set_status(SessionStatus::Disconnected).await;
                warn!(
                    "BMC connect failed: {e}, retrying in {:.1}s",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max);
            }
        }
    }
}

/// One connection attempt: dial, probe both domains so the cache reflects
/// the device before anyone can query it, then let the controller settle.
async fn establish(inner: &SessionInner) -> Result<(), TransportError> {
    info!("connecting to BMC at {}:{}", inner.bmc.host, inner.bmc.port);
    let mut session = inner.transport.connect().await?;

    for probe in [BmcCommand::QueryPower, BmcCommand::QueryIndicator] {
        let raw = exec_with_timeout(session.as_mut(), probe, inner.bmc.exec_timeout_ms).await?;
        // Interpretation failures are not fatal here — the device answered,
        // the cache just keeps its previous value.
        let _ = inner.apply_response(probe, &raw).await;
    }

    *inner.conn.lock().await = Some(session);
    tokio::time::sleep(Duration::from_millis(inner.bmc.settle_ms)).await;
    Ok(())
}

/// Single consumer of the queue: woken by enqueues and Ready transitions,
/// with a fixed tick as a backstop.
async fn worker_task(inner: Arc<SessionInner>) {
    let mut tick = tokio::time::interval(WORKER_TICK);
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            () = inner.wake.notified() => {}
        }
        inner.drain_queue().await;
    }
}

/// Keeps the cache fresh: every interval, queue a power and an indicator
/// query. Never waits for results; duplicates coalesce at the queue.
async fn poller_task(inner: Arc<SessionInner>) {
    let mut ticker = tokio::time::interval(inner.poll_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        inner.enqueue_poll(BmcCommand::QueryPower).await;
        inner.enqueue_poll(BmcCommand::QueryIndicator).await;
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use std::sync::atomic::Ordering;

    fn test_bmc_config() -> BmcConfig {
        BmcConfig {
            host: "bmc.test".into(),
            port: 22,
            username: "admin".into(),
            password: "secret".into(),
            settle_ms: 1,
            exec_timeout_ms: 500,
            reconnect_delay_ms: 5,
            reconnect_max_delay_ms: 50,
        }
    }

    fn test_session(fake: &FakeTransport) -> BmcSession {
        BmcSession::new(
            Arc::new(fake.clone()),
            test_bmc_config(),
            PollerConfig { base_delay_ms: 50 },
        )
    }

    fn healthy_fake() -> FakeTransport {
        let fake = FakeTransport::new();
        fake.state.respond("power", "Server Power: Off\r\n");
        fake.state.respond("uid", "Unit ID: Off\r\n");
        fake
    }

    async fn wait_ready(session: &BmcSession) {
        for _ in 0..200 {
            if session.is_ready().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never became ready");
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test]
    async fn test_startup_probes_populate_cache() {
        let fake = FakeTransport::new();
        fake.state.respond("power", "Server Power: On\r\n");
        fake.state.respond("uid", "Unit ID: On\r\n");
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        assert!(session.power().await.is_on());
        assert!(session.indicator().await.is_on());
        assert_eq!(
            fake.state.executed_commands(),
            vec!["power".to_string(), "uid".to_string()]
        );
        session.stop().await;
    }

    #[tokio::test]
    async fn test_not_ready_rejects_submissions() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        // never started — status stays Disconnected
        assert_eq!(session.status().await, SessionStatus::Disconnected);
        let err = session.submit(BmcCommand::PowerOn).await.unwrap_err();
        assert_eq!(err, CommandError::NotConnected);
    }

    #[tokio::test]
    async fn test_fifo_order_and_single_flight() {
        let fake = healthy_fake();
        fake.state.respond("power on", "Server powering on\r\n");
        fake.state.respond("uid on", "COMMAND COMPLETE\r\n");
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        let rx1 = session.submit(BmcCommand::PowerOn).await.unwrap();
        let rx2 = session.submit(BmcCommand::IndicatorOn).await.unwrap();
        let rx3 = session.submit(BmcCommand::QueryPower).await.unwrap();

        rx1.await.unwrap().unwrap();
        rx2.await.unwrap().unwrap();
        rx3.await.unwrap().unwrap();

        assert_eq!(
            fake.state.executed_commands(),
            vec!["power", "uid", "power on", "uid on", "power"]
        );
        assert!(!fake.state.overlapped.load(Ordering::SeqCst));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_idempotence_precheck_skips_device() {
        let fake = FakeTransport::new();
        fake.state.respond("power", "Server Power: On\r\n");
        fake.state.respond("uid", "Unit ID: Off\r\n");
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        let before = fake.state.executed_commands().len();
        let err = session.submit(BmcCommand::PowerOn).await.unwrap_err();
        assert_eq!(err, CommandError::AlreadyInState);
        settle(50).await;
        assert_eq!(fake.state.executed_commands().len(), before);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_transition_rejected_while_pending() {
        let fake = healthy_fake();
        fake.state.respond("power on", "Server powering on\r\n");
        fake.state.set_exec_delay(Duration::from_millis(100));
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        let _rx = session.submit(BmcCommand::PowerOn).await.unwrap();
        let err = session.submit(BmcCommand::PowerOn).await.unwrap_err();
        assert_eq!(err, CommandError::AlreadyQueued);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_confirmed_transition_updates_cache() {
        let fake = healthy_fake();
        fake.state.respond("power on", "Server powering on ....\r\n");
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        let rx = session.submit(BmcCommand::PowerOn).await.unwrap();
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome, CommandOutcome::Power(PowerState::On));
        assert!(session.power().await.is_on());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_device_redundancy_leaves_cache_alone() {
        // Cache says On (so "power off" passes the pre-check) but the
        // device disagrees and reports the transition redundant.
        let fake = FakeTransport::new();
        fake.state.respond("power", "Server Power: On\r\n");
        fake.state.respond("uid", "Unit ID: Off\r\n");
        fake.state.respond("power off", "Server power already off.\r\n");
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        let rx = session.submit(BmcCommand::PowerOff).await.unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err, CommandError::RedundantOnDevice);
        assert!(session.power().await.is_on());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_unrecognized_response_surfaces_and_preserves_cache() {
        let fake = healthy_fake();
        fake.state.respond("power on", "FLAGRANT SYSTEM ERROR\r\n");
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        let rx = session.submit(BmcCommand::PowerOn).await.unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::UnrecognizedResponse(_)));
        assert!(!session.power().await.is_on());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_query_updates_cache() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        fake.state.respond("power", "Server Power: On\r\n");
        let rx = session.submit(BmcCommand::QueryPower).await.unwrap();
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome, CommandOutcome::Power(PowerState::On));
        assert!(session.power().await.is_on());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_mid_flight_fails_entry_and_reconnects() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;
        assert_eq!(fake.state.connects.load(Ordering::SeqCst), 1);

        fake.state.fail_execs.store(1, Ordering::SeqCst);
        let rx = session.submit(BmcCommand::QueryPower).await.unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err, CommandError::SessionLost);

        // Reconnection is automatic and unbounded — wait for Ready again.
        wait_ready(&session).await;
        assert!(fake.state.connects.load(Ordering::SeqCst) >= 2);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_pending_entries_dropped_on_disconnect() {
        let fake = healthy_fake();
        fake.state.set_exec_delay(Duration::from_millis(50));
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;

        fake.state.fail_execs.store(1, Ordering::SeqCst);
        let rx1 = session.submit(BmcCommand::PowerOn).await.unwrap();
        let rx2 = session.submit(BmcCommand::IndicatorOn).await.unwrap();

        assert_eq!(rx1.await.unwrap().unwrap_err(), CommandError::SessionLost);
        assert_eq!(rx2.await.unwrap().unwrap_err(), CommandError::SessionLost);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_connect_failures_back_off_and_recover() {
        let fake = healthy_fake();
        fake.state.fail_connects.store(3, Ordering::SeqCst);
        let session = test_session(&fake);
        session.start().await;

        wait_ready(&session).await;
        assert_eq!(fake.state.connects.load(Ordering::SeqCst), 1);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_poller_coalesces_duplicate_queries() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        // Not started: no worker drains the queue, so pending entries stay.
        session.inner.set_status(SessionStatus::Ready).await;

        session.enqueue_poll(BmcCommand::QueryPower).await;
        session.enqueue_poll(BmcCommand::QueryPower).await;
        assert_eq!(session.queue_depth().await, 1);

        session.enqueue_poll(BmcCommand::QueryIndicator).await;
        session.enqueue_poll(BmcCommand::QueryIndicator).await;
        assert_eq!(session.queue_depth().await, 2);
    }

    #[tokio::test]
    async fn test_poller_refreshes_cache_in_background() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        session.start().await;
        wait_ready(&session).await;
        assert!(!session.power().await.is_on());

        // Device state changes behind our back; the poller should pick it
        // up within one interval (2×50ms base + 500ms margin).
        fake.state.respond("power", "Server Power: On\r\n");
        for _ in 0..200 {
            if session.power().await.is_on() {
                break;
            }
            settle(10).await;
        }
        assert!(session.power().await.is_on());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_dequeue_recheck_resolves_stale_entries() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        session.inner.set_status(SessionStatus::Ready).await;

        // Enqueue while cache is Off, then flip the cache before any worker
        // runs — the dequeue-time re-check must resolve without a round trip.
        let (entry, rx) = QueueEntry::with_reply(BmcCommand::PowerOn);
        session.inner.queue.lock().await.entries.push_back(entry);
        *session.inner.power.write().await = PowerState::On;

        session.inner.drain_queue().await;
        assert_eq!(
            rx.await.unwrap().unwrap_err(),
            CommandError::AlreadyInState
        );
        assert!(fake.state.executed_commands().is_empty());
    }

    #[tokio::test]
    async fn test_stop_fails_pending_entries() {
        let fake = healthy_fake();
        let session = test_session(&fake);
        session.inner.set_status(SessionStatus::Ready).await;
        let rx = session.submit(BmcCommand::PowerOn).await.unwrap();

        session.stop().await;
        assert_eq!(rx.await.unwrap().unwrap_err(), CommandError::SessionLost);
        assert!(!session.is_ready().await);
    }
}
