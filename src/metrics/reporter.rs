//! # Periodic status reporter.
//!
//! Emits one `info` record on target [`STATUS_TARGET`] per period, first one
//! after a full period, and only while the relay is `Running`:
//!
//! ```text
//! state=running uptime=12.3s reconnects=4
//! ```
//!
//! The reporter only reads the registry; it runs on a child token of the
//! session and exits when that token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{MetricsRegistry, MetricsSnapshot};
use crate::core::PipelineState;

/// `tracing` target of status lines.
pub const STATUS_TARGET: &str = "relayvisor::status";

/// Renders the status line, `None` unless the relay is running.
///
/// ```
/// use std::time::Duration;
/// use relayvisor::{status_line, MetricsSnapshot, PipelineState};
///
/// let snap = MetricsSnapshot {
///     source_reconnects: 1,
///     sink_reconnects: 3,
///     total_reconnects: 4,
///     uptime: Duration::from_millis(12_340),
///     last_error: None,
///     state: PipelineState::Running,
/// };
/// assert_eq!(status_line(&snap).as_deref(), Some("state=running uptime=12.3s reconnects=4"));
/// ```
pub fn status_line(snapshot: &MetricsSnapshot) -> Option<String> {
    if snapshot.state != PipelineState::Running {
        return None;
    }
    Some(format!(
        "state={} uptime={:.1}s reconnects={}",
        snapshot.state,
        snapshot.uptime.as_secs_f64(),
        snapshot.total_reconnects
    ))
}

/// Periodic status line emitter.
pub struct MetricsReporter {
    registry: Arc<MetricsRegistry>,
    period: Duration,
}

impl MetricsReporter {
    /// Creates a reporter; `period` must be non-zero.
    pub fn new(registry: Arc<MetricsRegistry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Spawns the reporter loop.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let snapshot = self.registry.snapshot().await;
            if let Some(line) = status_line(&snapshot) {
                tracing::info!(
                    target: STATUS_TARGET,
                    uptime_secs = snapshot.uptime.as_secs(),
                    reconnects = snapshot.total_reconnects,
                    source_reconnects = snapshot.source_reconnects,
                    sink_reconnects = snapshot.sink_reconnects,
                    "{line}"
                );
            }
        }
    }
}
