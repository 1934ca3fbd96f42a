//! # LogWriter: lifecycle events as `tracing` records.
//!
//! Renders every [`Event`] on target `relayvisor::events`, with the event's
//! metadata as structured fields:
//!
//! ```text
//! INFO  state changed prev=starting state=running
//! WARN  backend failed generation=3 endpoint=sink reason="Connection refused"
//! INFO  reconnect scheduled attempt=2 delay_ms=2000
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "relayvisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let generation = e.generation.unwrap_or_default();
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::StateChanged => {
                tracing::info!(
                    target: TARGET,
                    prev = %e.prev_state.unwrap_or_default(),
                    state = %e.state.unwrap_or_default(),
                    "state changed"
                );
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: TARGET, "shutdown requested");
            }
            EventKind::BackendStarting => {
                tracing::info!(
                    target: TARGET,
                    generation,
                    backend = e.backend.map(|b| b.as_str()).unwrap_or("unknown"),
                    "starting backend"
                );
            }
            EventKind::BackendHealthy => {
                tracing::info!(target: TARGET, generation, "backend healthy");
            }
            EventKind::BackendFailed => {
                tracing::warn!(
                    target: TARGET,
                    generation,
                    endpoint = e.endpoint.map(|ep| ep.as_str()).unwrap_or("unknown"),
                    reason,
                    "backend failed"
                );
            }
            EventKind::EndOfStream => {
                tracing::warn!(target: TARGET, generation, "end of stream");
            }
            EventKind::BackendWarning => {
                tracing::debug!(target: TARGET, generation, reason, "backend warning");
            }
            EventKind::BackendForceStopped => {
                tracing::warn!(target: TARGET, generation, reason, "backend force-stopped");
            }
            EventKind::ReconnectScheduled => {
                tracing::info!(
                    target: TARGET,
                    attempt = e.attempt.unwrap_or_default(),
                    delay_ms = e.delay_ms.unwrap_or_default(),
                    "reconnect scheduled"
                );
            }
            EventKind::ReconnectConfirmed => {
                tracing::info!(target: TARGET, generation, "reconnect confirmed");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(
                    target: TARGET,
                    subscriber = e.subscriber.unwrap_or("unknown"),
                    reason,
                    "subscriber overflow"
                );
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(
                    target: TARGET,
                    subscriber = e.subscriber.unwrap_or("unknown"),
                    reason,
                    "subscriber panicked"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
