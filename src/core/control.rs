//! # Control loop: the single mutation point of a relay session.
//!
//! Owns the active backend handle, the generation counter, the backoff state
//! and the reconnection slot. Reacts to two inputs:
//!
//! ```text
//! EventDispatcher::next() ─► Signal
//!   Error / EndOfStream ─► Reconnecting, stop handle, ensure one ReconnectTask
//!   BecameHealthy       ─► Running, backoff.reset()
//!   Warning             ─► publish only
//!
//! control_rx.recv() ─► Control (from ReconnectTask)
//!   Schedule            ─► backoff.next_delay()
//!   Respawn             ─► total_reconnects += 1, stop old, build + start new
//!   Confirm(gen)        ─► is_alive() on gen; alive → clear slot (+ Running)
//! ```
//!
//! ## Rules
//! - A handle is stopped (and its generation retired) before its successor is built.
//! - The reconnection slot is cleared here, at the moment liveness is confirmed.
//! - Once the session token is cancelled no further signal or request is handled.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{EventDispatcher, Signal, SignalKind};
use super::reconnect::{Control, LiveGuard, ReconnectTask};
use super::state::PipelineState;
use super::supervisor::Supervisor;
use crate::backend::{Backend, BackendFactory, Endpoint};
use crate::error::{BackendError, RelayError};
use crate::events::{Event, EventKind};
use crate::policies::Backoff;

struct Active<B> {
    generation: u64,
    backend: B,
}

struct ReconnectSlot {
    token: CancellationToken,
    join: JoinHandle<()>,
    _live: LiveGuard,
}

pub(super) struct ControlLoop<'a, F: BackendFactory> {
    sup: &'a Supervisor<F>,
    token: CancellationToken,
    state: PipelineState,
    dispatcher: EventDispatcher,
    backoff: Backoff,
    generation: u64,
    active: Option<Active<F::Backend>>,
    reconnect: Option<ReconnectSlot>,
    last_cause: Option<Endpoint>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

impl<'a, F: BackendFactory> ControlLoop<'a, F> {
    pub(super) fn new(sup: &'a Supervisor<F>, token: CancellationToken) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            sup,
            token,
            state: sup.state(),
            dispatcher: EventDispatcher::new(),
            backoff: Backoff::new(sup.cfg.backoff.clone()),
            generation: 0,
            active: None,
            reconnect: None,
            last_cause: None,
            control_tx,
            control_rx,
        }
    }

    /// Starts the first backend of the session.
    pub(super) async fn launch(&mut self) -> Result<(), RelayError> {
        self.transition(PipelineState::Starting).await;
        match self.spawn_backend().await {
            Ok(_) => Ok(()),
            Err(e) if self.sup.cfg.retry_initial_start && e.is_retryable() => {
                tracing::warn!(error = %e, "initial start failed, entering reconnection");
                self.sup.metrics.record_error(e.to_string()).await;
                self.transition(PipelineState::Reconnecting).await;
                self.ensure_reconnect();
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, label = e.as_label(), "relay failed to start");
                self.sup.metrics.record_error(e.to_string()).await;
                self.transition(PipelineState::Failed).await;
                Err(RelayError::Startup(e))
            }
        }
    }

    /// Handles signals and reconnection requests until the session token is cancelled.
    pub(super) async fn run(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                Some(signal) = self.dispatcher.next() => self.on_signal(signal).await,
                Some(msg) = self.control_rx.recv() => self.on_control(msg).await,
            }
        }
    }

    /// Tears the session down: Stopped, reconnection cancelled, backend stopped.
    pub(super) async fn shutdown(&mut self) {
        self.sup.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.transition(PipelineState::Stopped).await;

        if let Some(slot) = self.reconnect.take() {
            slot.token.cancel();
            if let Err(e) = slot.join.await {
                tracing::warn!(error = %e, "reconnection task ended abnormally");
            }
        }
        self.release_active().await;
    }

    async fn on_signal(&mut self, signal: Signal) {
        let generation = signal.generation;
        match signal.kind {
            SignalKind::Error { reason, endpoint } => {
                self.sup.bus.publish(
                    Event::new(EventKind::BackendFailed)
                        .with_generation(generation)
                        .with_endpoint(endpoint)
                        .with_reason(reason.as_str()),
                );
                self.on_failure(reason, endpoint).await;
            }
            SignalKind::EndOfStream => {
                self.sup
                    .bus
                    .publish(Event::new(EventKind::EndOfStream).with_generation(generation));
                self.on_failure("end of stream".to_string(), None).await;
            }
            SignalKind::BecameHealthy => {
                self.sup
                    .bus
                    .publish(Event::new(EventKind::BackendHealthy).with_generation(generation));
                self.mark_running().await;
            }
            SignalKind::Warning { reason } => {
                tracing::debug!(generation, %reason, "backend warning");
                self.sup.bus.publish(
                    Event::new(EventKind::BackendWarning)
                        .with_generation(generation)
                        .with_reason(reason),
                );
            }
        }
    }

    async fn on_failure(&mut self, reason: String, cause: Option<Endpoint>) {
        tracing::warn!(
            generation = self.generation,
            endpoint = cause.map(|c| c.as_str()).unwrap_or("unknown"),
            %reason,
            "relay failure"
        );
        self.sup.metrics.record_error(reason).await;
        self.last_cause = cause;
        self.transition(PipelineState::Reconnecting).await;
        self.release_active().await;
        self.ensure_reconnect();
    }

    async fn on_control(&mut self, msg: Control) {
        match msg {
            Control::Schedule { reply } => {
                let delay = self.backoff.next_delay();
                let attempt = self.backoff.attempts();
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
                self.sup.bus.publish(
                    Event::new(EventKind::ReconnectScheduled)
                        .with_attempt(attempt)
                        .with_delay(delay),
                );
                let _ = reply.send(delay);
            }
            Control::Respawn { reply } => {
                self.sup.metrics.record_reconnect(self.last_cause).await;
                let generation = match self.spawn_backend().await {
                    Ok(generation) => Some(generation),
                    Err(e) => {
                        tracing::warn!(error = %e, "reconnection attempt failed to start");
                        self.sup.metrics.record_error(e.to_string()).await;
                        None
                    }
                };
                let _ = reply.send(generation);
            }
            Control::Confirm { generation, reply } => {
                let alive = match self.active.as_mut() {
                    Some(active) if active.generation == generation => {
                        active.backend.is_alive().await
                    }
                    _ => false,
                };
                if alive {
                    self.reconnect = None;
                    self.sup
                        .bus
                        .publish(Event::new(EventKind::ReconnectConfirmed).with_generation(generation));
                    self.mark_running().await;
                } else if self.active.as_ref().is_some_and(|a| a.generation == generation) {
                    self.sup
                        .metrics
                        .record_error("backend not alive after settle interval")
                        .await;
                    self.release_active().await;
                }
                let _ = reply.send(alive);
            }
        }
    }

    /// First liveness confirmation after a failure: `Running` and a fresh backoff.
    async fn mark_running(&mut self) {
        if self.state == PipelineState::Running {
            return;
        }
        self.backoff.reset();
        self.last_cause = None;
        self.transition(PipelineState::Running).await;
    }

    /// Stops the current handle (if any), then builds, subscribes and starts a new one.
    async fn spawn_backend(&mut self) -> Result<u64, BackendError> {
        self.release_active().await;

        self.generation += 1;
        let generation = self.generation;
        let mut backend = self.sup.factory.build()?;
        backend.subscribe(self.dispatcher.sink(generation));
        self.dispatcher.activate(generation);
        self.sup.bus.publish(
            Event::new(EventKind::BackendStarting)
                .with_generation(generation)
                .with_backend(backend.kind()),
        );

        if let Err(e) = backend.start().await {
            self.dispatcher.retire();
            self.sup.bus.publish(
                Event::new(EventKind::BackendFailed)
                    .with_generation(generation)
                    .with_reason(e.to_string()),
            );
            if let Err(stop_err) = backend.stop(self.sup.cfg.grace).await {
                tracing::warn!(generation, error = %stop_err, "failed to release backend after start failure");
            }
            return Err(e);
        }
        self.active = Some(Active {
            generation,
            backend,
        });
        Ok(generation)
    }

    /// Retires and stops the active handle. Stop failures are logged, never propagated.
    async fn release_active(&mut self) {
        let Some(Active {
            generation,
            mut backend,
        }) = self.active.take()
        else {
            return;
        };
        self.dispatcher.retire();
        if let Err(e) = backend.stop(self.sup.cfg.grace).await {
            tracing::warn!(generation, error = %e, "backend did not stop cleanly");
            self.sup.bus.publish(
                Event::new(EventKind::BackendForceStopped)
                    .with_generation(generation)
                    .with_reason(e.to_string()),
            );
        }
    }

    /// Spawns a reconnection task unless one is already in progress.
    fn ensure_reconnect(&mut self) {
        if self
            .reconnect
            .as_ref()
            .is_some_and(|slot| !slot.join.is_finished())
        {
            tracing::debug!("reconnection already in progress");
            return;
        }
        self.reconnect = None;
        let token = self.token.child_token();
        let task = ReconnectTask::new(self.control_tx.clone(), self.sup.cfg.settle, token.clone());
        let join = tokio::spawn(task.run());
        self.reconnect = Some(ReconnectSlot {
            token,
            join,
            _live: LiveGuard::enter(&self.sup.reconnect_tasks),
        });
    }

    async fn transition(&mut self, next: PipelineState) {
        let prev = self.state;
        if prev == next {
            return;
        }
        self.state = next;
        self.sup.state.send_replace(next);
        self.sup.metrics.set_state(next).await;
        tracing::info!(prev = %prev, state = %next, "pipeline state changed");
        self.sup
            .bus
            .publish(Event::new(EventKind::StateChanged).with_transition(prev, next));
    }
}

impl<F: BackendFactory> Drop for ControlLoop<'_, F> {
    fn drop(&mut self) {
        if let Some(slot) = self.reconnect.take() {
            slot.token.cancel();
        }
    }
}
