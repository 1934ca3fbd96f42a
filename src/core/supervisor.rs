//! # Supervisor: owns one relay session at a time.
//!
//! The [`Supervisor`] owns the backend factory, the lifecycle [`Bus`], the
//! metrics registry and the state watch channel. `start()` drives the session
//! on the caller's task until `stop()` is called.
//!
//! ## High-level architecture
//! ```text
//! start()
//!   ├─ validate config, claim the session slot (else AlreadyRunning)
//!   ├─ metrics.reset()
//!   ├─ ControlLoop::launch()      Starting → build → subscribe → start
//!   │     └─ Err → Failed, RelayError::Startup   (unless retry_initial_start)
//!   ├─ MetricsReporter::spawn(session.child_token())
//!   ├─ ControlLoop::run()         until the session token is cancelled
//!   │     ├─ Signal from EventDispatcher → state machine
//!   │     └─ Control from ReconnectTask  → schedule / respawn / confirm
//!   └─ ControlLoop::shutdown()    Stopped, cancel reconnect, stop backend (≤ grace)
//!
//! stop()  ──► session token.cancel()          (sync, idempotent)
//! ```
//!
//! ## Rules
//! - All mutations of state, backend, generation and backoff happen in the control loop.
//! - `stop()` never blocks; `start()` returns once teardown is complete.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use relayvisor::{
//!     BackendKind, LogWriter, ProcessOptions, RelayBackendFactory, RelayConfig, SinkEndpoint,
//!     SourceEndpoint, Supervisor, SupervisorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = RelayConfig {
//!         source: SourceEndpoint { url: "rtsp://localhost:8554/cam1".into() },
//!         sink: SinkEndpoint { host: "127.0.0.1".into(), port: 9999, stream_id: None },
//!     };
//!     let factory = RelayBackendFactory::new(relay, BackendKind::Process, ProcessOptions::default())?;
//!     let sup = Supervisor::builder(SupervisorConfig::default(), factory)
//!         .with_subscribers(vec![Arc::new(LogWriter::new())])
//!         .build();
//!
//!     let stopper = sup.clone();
//!     tokio::spawn(async move {
//!         let _ = relayvisor::wait_for_shutdown_signal().await;
//!         stopper.stop();
//!     });
//!     sup.start().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::builder::SupervisorBuilder;
use super::control::ControlLoop;
use super::state::PipelineState;
use crate::backend::BackendFactory;
use crate::config::SupervisorConfig;
use crate::error::RelayError;
use crate::events::{Bus, Event};
use crate::metrics::{MetricsRegistry, MetricsReporter, MetricsSnapshot};

/// Releases the session slot when `start()` returns or its future is dropped.
struct SessionGuard<'a, F: BackendFactory>(&'a Supervisor<F>);

impl<F: BackendFactory> Drop for SessionGuard<'_, F> {
    fn drop(&mut self) {
        self.0.close_session();
    }
}

/// Stream-relay supervisor.
pub struct Supervisor<F: BackendFactory> {
    pub(super) cfg: SupervisorConfig,
    pub(super) factory: F,
    pub(super) bus: Bus,
    pub(super) metrics: Arc<MetricsRegistry>,
    pub(super) state: watch::Sender<PipelineState>,
    pub(super) reconnect_tasks: Arc<AtomicUsize>,
    session: Mutex<Option<CancellationToken>>,
    stop_pending: AtomicBool,
}

impl<F: BackendFactory> Supervisor<F> {
    /// Returns a builder for a supervisor using `factory` for every (re)start.
    pub fn builder(cfg: SupervisorConfig, factory: F) -> SupervisorBuilder<F> {
        SupervisorBuilder::new(cfg, factory)
    }

    pub(super) fn new_internal(cfg: SupervisorConfig, factory: F, bus: Bus) -> Self {
        let (state, _) = watch::channel(PipelineState::Stopped);
        Self {
            cfg,
            factory,
            bus,
            metrics: Arc::new(MetricsRegistry::new()),
            state,
            reconnect_tasks: Arc::new(AtomicUsize::new(0)),
            session: Mutex::new(None),
            stop_pending: AtomicBool::new(false),
        }
    }

    /// Runs one relay session until [`stop`](Self::stop) is called.
    ///
    /// ### Errors
    /// - [`RelayError::Config`] when the supervisor configuration is invalid;
    /// - [`RelayError::AlreadyRunning`] when a session is already active;
    /// - [`RelayError::Startup`] when the first backend fails to build or start
    ///   (state is left at `Failed`).
    pub async fn start(&self) -> Result<(), RelayError> {
        self.cfg.validate()?;
        let Some(token) = self.open_session()? else {
            tracing::info!("stop was requested before start, not starting");
            return Ok(());
        };
        let _session = SessionGuard(self);
        self.run_session(token).await
    }

    /// Requests the active session to stop. Idempotent; never blocks.
    ///
    /// Without an open session the request is kept, and the next
    /// [`start`](Self::start) returns `Ok(())` without building a backend.
    pub fn stop(&self) {
        let slot = self.session_slot();
        match slot.as_ref() {
            Some(token) => {
                if !token.is_cancelled() {
                    tracing::info!("stop requested");
                }
                token.cancel();
            }
            None => self.stop_pending.store(true, Ordering::SeqCst),
        }
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver observing every state change.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Consistent copy of the relay metrics.
    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// Receiver for lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Number of reconnection tasks the control loop currently tracks (0 or 1).
    pub fn reconnect_tasks(&self) -> usize {
        self.reconnect_tasks.load(Ordering::SeqCst)
    }

    /// Returns `true` while a session is active.
    pub fn is_running(&self) -> bool {
        self.session_slot().is_some()
    }

    async fn run_session(&self, token: CancellationToken) -> Result<(), RelayError> {
        self.metrics.reset().await;

        let mut ctl = ControlLoop::new(self, token.clone());
        ctl.launch().await?;

        let reporter = self
            .cfg
            .report_period()
            .map(|period| MetricsReporter::new(self.metrics.clone(), period).spawn(token.child_token()));

        ctl.run().await;
        ctl.shutdown().await;

        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
        Ok(())
    }

    /// Claims the session slot; `None` consumes a stop issued before the session opened.
    fn open_session(&self) -> Result<Option<CancellationToken>, RelayError> {
        let mut slot = self.session_slot();
        if slot.is_some() {
            return Err(RelayError::AlreadyRunning);
        }
        if self.stop_pending.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(Some(token))
    }

    fn close_session(&self) {
        if let Some(token) = self.session_slot().take() {
            token.cancel();
        }
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::backend::fake::{FakeFactory, Script};
    use crate::backend::{BackendEvent, Endpoint};
    use crate::error::BackendError;
    use crate::events::EventKind;

    const LONG: Duration = Duration::from_secs(600);

    fn cfg() -> SupervisorConfig {
        SupervisorConfig {
            report_interval: Duration::ZERO,
            ..SupervisorConfig::default()
        }
    }

    fn supervisor(cfg: SupervisorConfig, factory: FakeFactory) -> Arc<Supervisor<FakeFactory>> {
        Supervisor::builder(cfg, factory).build()
    }

    fn spawn(sup: &Arc<Supervisor<FakeFactory>>) -> JoinHandle<Result<(), RelayError>> {
        let sup = sup.clone();
        tokio::spawn(async move { sup.start().await })
    }

    async fn until_state(sup: &Supervisor<FakeFactory>, target: PipelineState) {
        let mut rx = sup.watch_state();
        timeout(LONG, rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .map(|_| ())
            .expect("state channel closed");
    }

    async fn next_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
        timeout(LONG, async {
            loop {
                let ev = rx.recv().await.expect("bus closed");
                if ev.kind == kind {
                    return ev;
                }
            }
        })
        .await
        .expect("event not observed")
    }

    /// Lets every ready task run without reaching the next backoff timer.
    async fn quiesce() {
        sleep(Duration::from_millis(10)).await;
    }

    fn error(message: &str, endpoint: Option<Endpoint>) -> BackendEvent {
        BackendEvent::Error {
            message: message.into(),
            endpoint,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_healthy_start() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let run = spawn(&sup);

        until_state(&sup, PipelineState::Running).await;
        let m = sup.metrics().await;
        assert_eq!(m.state, PipelineState::Running);
        assert_eq!(m.total_reconnects, 0);
        assert_eq!(m.last_error, None);
        assert!(sup.is_running());
        assert!(matches!(sup.start().await, Err(RelayError::AlreadyRunning)));

        sup.stop();
        run.await.unwrap().unwrap();
        assert_eq!(sup.state(), PipelineState::Stopped);
        assert_eq!(probe.builds(), 1);
        assert!(!sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_releases_backend_once() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        sup.stop();
        sup.stop();
        run.await.unwrap().unwrap();
        sup.stop();

        assert_eq!(probe.stops(), 1);
        assert_eq!(sup.state(), PipelineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_once_then_recover() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let mut events = sup.subscribe();
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        assert!(probe.sink(0).emit(error("srt: connection setup failure", Some(Endpoint::Sink))));

        let mut states = Vec::new();
        while states.len() < 4 {
            states.push(next_event(&mut events, EventKind::StateChanged).await.state.unwrap());
        }
        assert_eq!(
            states,
            vec![
                PipelineState::Starting,
                PipelineState::Running,
                PipelineState::Reconnecting,
                PipelineState::Running,
            ]
        );

        sleep(Duration::from_secs(10)).await;
        assert_eq!(sup.reconnect_tasks(), 0);
        let m = sup.metrics().await;
        assert_eq!(m.total_reconnects, 1);
        assert_eq!(m.sink_reconnects, 1);
        assert_eq!(m.source_reconnects, 0);
        assert_eq!(m.last_error.as_deref(), Some("srt: connection setup failure"));

        // stale generation is ignored
        assert!(!probe.sink(0).emit(BackendEvent::EndOfStream));
        quiesce().await;
        assert_eq!(sup.state(), PipelineState::Running);

        // backoff was reset by the recovery
        let mut events = sup.subscribe();
        assert!(probe.sink(1).emit(error("rtsp: 503", Some(Endpoint::Source))));
        let scheduled = next_event(&mut events, EventKind::ReconnectScheduled).await;
        assert_eq!(scheduled.attempt, Some(1));
        assert_eq!(scheduled.delay_ms, Some(1000));

        until_state(&sup, PipelineState::Running).await;
        sup.stop();
        run.await.unwrap().unwrap();
        assert_eq!(sup.metrics().await.source_reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_across_failed_attempts() {
        let factory = FakeFactory::new(
            vec![
                Script::healthy(),
                Script::failing(),
                Script::failing(),
                Script::failing(),
                Script::failing(),
            ],
            Script::healthy(),
        );
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let mut events = sup.subscribe();
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        let started = tokio::time::Instant::now();
        assert!(probe.sink(0).emit(BackendEvent::EndOfStream));

        let mut delays = Vec::new();
        let mut attempts = Vec::new();
        while delays.len() < 5 {
            let ev = next_event(&mut events, EventKind::ReconnectScheduled).await;
            delays.push(ev.delay_ms.unwrap());
            attempts.push(ev.attempt.unwrap());
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);

        until_state(&sup, PipelineState::Running).await;
        assert!(started.elapsed() >= Duration::from_secs(31));
        let m = sup.metrics().await;
        assert_eq!(m.total_reconnects, 5);
        assert_eq!(m.last_error.as_deref(), Some("failed to start backend: scripted start failure"));

        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_storm_spawns_single_reconnect() {
        let factory = FakeFactory::new(vec![Script::healthy()], Script::silent());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        let first = probe.sink(0);
        for i in 0..5 {
            first.emit(error(&format!("storm {i}"), None));
        }
        first.emit(BackendEvent::EndOfStream);
        quiesce().await;

        assert_eq!(sup.state(), PipelineState::Reconnecting);
        assert_eq!(sup.reconnect_tasks(), 1);
        assert_eq!(sup.metrics().await.last_error.as_deref(), Some("storm 0"));

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(probe.builds(), 2);
        let candidate = probe.sink(1);
        for _ in 0..3 {
            candidate.emit(error("candidate died", None));
        }
        quiesce().await;
        assert_eq!(sup.state(), PipelineState::Reconnecting);
        assert_eq!(sup.reconnect_tasks(), 1);
        assert_eq!(probe.stops(), 2);

        until_state(&sup, PipelineState::Running).await;
        quiesce().await;
        assert_eq!(sup.reconnect_tasks(), 0);
        assert_eq!(probe.builds(), 3);
        assert_eq!(sup.metrics().await.total_reconnects, 2);

        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_candidate_is_retried() {
        let factory = FakeFactory::new(vec![Script::healthy(), Script::dead()], Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let mut events = sup.subscribe();
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        probe.sink(0).emit(error("rtsp: connection reset", Some(Endpoint::Source)));
        let first = next_event(&mut events, EventKind::ReconnectScheduled).await;
        assert_eq!(first.delay_ms, Some(1000));

        // the dead candidate fails its liveness check after the settle interval
        let second = next_event(&mut events, EventKind::ReconnectScheduled).await;
        assert_eq!(second.delay_ms, Some(2000));
        assert_eq!(
            sup.metrics().await.last_error.as_deref(),
            Some("backend not alive after settle interval")
        );

        until_state(&sup, PipelineState::Running).await;
        let m = sup.metrics().await;
        assert_eq!(m.total_reconnects, 2);
        assert_eq!(m.source_reconnects, 2);
        assert_eq!(probe.builds(), 3);

        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_is_kept() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);

        sup.stop();
        timeout(LONG, sup.start())
            .await
            .expect("start did not return")
            .unwrap();
        assert_eq!(sup.state(), PipelineState::Stopped);
        assert_eq!(probe.builds(), 0);
        assert!(!sup.is_running());

        // the pending stop is consumed once
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;
        sup.stop();
        run.await.unwrap().unwrap();
        assert_eq!(probe.builds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_reconnect_releases_slot_immediately() {
        let factory = FakeFactory::new(vec![Script::healthy()], Script::silent());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let mut events = sup.subscribe();
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        probe.sink(0).emit(error("rtsp: timeout", Some(Endpoint::Source)));
        next_event(&mut events, EventKind::ReconnectConfirmed).await;
        assert_eq!(sup.reconnect_tasks(), 0);

        // a failure right after confirmation gets exactly one new task
        probe.sink(1).emit(error("rtsp: timeout", Some(Endpoint::Source)));
        quiesce().await;
        assert_eq!(sup.state(), PipelineState::Reconnecting);
        assert_eq!(sup.reconnect_tasks(), 1);

        sup.stop();
        run.await.unwrap().unwrap();
        assert_eq!(sup.reconnect_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        probe.sink(0).emit(BackendEvent::EndOfStream);
        quiesce().await;
        assert_eq!(sup.state(), PipelineState::Reconnecting);
        assert_eq!(sup.metrics().await.last_error.as_deref(), Some("end of stream"));

        sup.stop();
        run.await.unwrap().unwrap();
        assert_eq!(sup.state(), PipelineState::Stopped);
        assert_eq!(sup.reconnect_tasks(), 0);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.builds(), 1);
        assert_eq!(probe.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_is_informational() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let mut events = sup.subscribe();
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        probe.sink(0).emit(BackendEvent::Warning {
            message: "non-monotonic DTS".into(),
        });
        let ev = next_event(&mut events, EventKind::BackendWarning).await;
        assert_eq!(ev.reason.as_deref(), Some("non-monotonic DTS"));
        assert_eq!(sup.state(), PipelineState::Running);
        assert_eq!(sup.reconnect_tasks(), 0);

        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_reset_between_sessions() {
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);
        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;

        probe.sink(0).emit(error("boom", None));
        quiesce().await;
        until_state(&sup, PipelineState::Running).await;
        assert_eq!(sup.metrics().await.total_reconnects, 1);
        sup.stop();
        run.await.unwrap().unwrap();

        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;
        let m = sup.metrics().await;
        assert_eq!(m.total_reconnects, 0);
        assert_eq!(m.last_error, None);
        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_start_failure_is_fatal() {
        let factory = FakeFactory::new(vec![Script::failing()], Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg(), factory);

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, RelayError::Startup(BackendError::Start { .. })));
        assert_eq!(err.as_label(), "relay_startup");
        assert_eq!(sup.state(), PipelineState::Failed);
        assert_eq!(sup.reconnect_tasks(), 0);
        assert!(!sup.is_running());
        assert!(sup.metrics().await.last_error.is_some());
        assert_eq!(probe.builds(), 1);
        assert_eq!(probe.stops(), 1);

        let run = spawn(&sup);
        until_state(&sup, PipelineState::Running).await;
        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_initial_start() {
        let cfg = SupervisorConfig {
            retry_initial_start: true,
            ..cfg()
        };
        let factory = FakeFactory::new(vec![Script::failing()], Script::healthy());
        let sup = supervisor(cfg, factory);
        let mut events = sup.subscribe();
        let run = spawn(&sup);

        until_state(&sup, PipelineState::Running).await;
        let mut states = Vec::new();
        while states.len() < 3 {
            states.push(next_event(&mut events, EventKind::StateChanged).await.state.unwrap());
        }
        assert_eq!(
            states,
            vec![
                PipelineState::Starting,
                PipelineState::Reconnecting,
                PipelineState::Running,
            ]
        );
        assert_eq!(sup.metrics().await.total_reconnects, 1);

        sup.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_initial_start_keeps_construction_errors_fatal() {
        let cfg = SupervisorConfig {
            retry_initial_start: true,
            ..cfg()
        };
        let sup = supervisor(cfg, FakeFactory::new(vec![Script::broken()], Script::healthy()));

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, RelayError::Startup(BackendError::Build { .. })));
        assert_eq!(sup.state(), PipelineState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected() {
        let mut cfg = cfg();
        cfg.backoff.factor = 0.5;
        let factory = FakeFactory::new(Vec::new(), Script::healthy());
        let probe = factory.probe();
        let sup = supervisor(cfg, factory);

        assert!(matches!(sup.start().await, Err(RelayError::Config(_))));
        assert_eq!(probe.builds(), 0);
        assert_eq!(sup.state(), PipelineState::Stopped);
    }
}
