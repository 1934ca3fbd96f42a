//! # Metrics registry.
//!
//! All fields live behind a single [`RwLock`] so a snapshot never mixes values
//! from two different updates. Uptime is measured with [`tokio::time::Instant`]
//! and therefore follows paused test clocks.

use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::backend::Endpoint;
use crate::core::PipelineState;

#[derive(Debug)]
struct Metrics {
    source_reconnects: u64,
    sink_reconnects: u64,
    total_reconnects: u64,
    uptime_start: Instant,
    last_error: Option<String>,
    state: PipelineState,
}

impl Metrics {
    fn new(state: PipelineState) -> Self {
        Self {
            source_reconnects: 0,
            sink_reconnects: 0,
            total_reconnects: 0,
            uptime_start: Instant::now(),
            last_error: None,
            state,
        }
    }
}

/// Point-in-time copy of the relay metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Reconnection attempts caused by ingest-side failures.
    pub source_reconnects: u64,
    /// Reconnection attempts caused by egress-side failures.
    pub sink_reconnects: u64,
    /// All reconnection attempts of the session.
    pub total_reconnects: u64,
    /// Time since the session started.
    pub uptime: Duration,
    /// Most recent failure description.
    pub last_error: Option<String>,
    /// State at snapshot time.
    pub state: PipelineState,
}

/// Shared, lock-protected metrics store.
#[derive(Debug)]
pub struct MetricsRegistry {
    inner: RwLock<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Creates an empty registry in state `Stopped`.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Metrics::new(PipelineState::Stopped)),
        }
    }

    /// Zeroes counters, clears the last error and restarts uptime.
    ///
    /// The state is left untouched.
    pub async fn reset(&self) {
        let mut m = self.inner.write().await;
        let state = m.state;
        *m = Metrics::new(state);
    }

    /// Mirrors the supervisor state.
    pub async fn set_state(&self, state: PipelineState) {
        self.inner.write().await.state = state;
    }

    /// Counts one reconnection attempt, attributed to `cause` when known.
    pub async fn record_reconnect(&self, cause: Option<Endpoint>) {
        let mut m = self.inner.write().await;
        m.total_reconnects += 1;
        match cause {
            Some(Endpoint::Source) => m.source_reconnects += 1,
            Some(Endpoint::Sink) => m.sink_reconnects += 1,
            None => {}
        }
    }

    /// Replaces the last error.
    pub async fn record_error(&self, error: impl Into<String>) {
        self.inner.write().await.last_error = Some(error.into());
    }

    /// Returns a consistent copy of all fields.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let m = self.inner.read().await;
        MetricsSnapshot {
            source_reconnects: m.source_reconnects,
            sink_reconnects: m.sink_reconnects,
            total_reconnects: m.total_reconnects,
            uptime: m.uptime_start.elapsed(),
            last_error: m.last_error.clone(),
            state: m.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_record_and_snapshot() {
        let registry = MetricsRegistry::new();
        registry.set_state(PipelineState::Reconnecting).await;
        registry.record_reconnect(Some(Endpoint::Source)).await;
        registry.record_reconnect(Some(Endpoint::Sink)).await;
        registry.record_reconnect(None).await;
        registry.record_error("first").await;
        registry.record_error("second").await;
        tokio::time::advance(Duration::from_secs(12)).await;

        let snap = registry.snapshot().await;
        assert_eq!(snap.total_reconnects, 3);
        assert_eq!(snap.source_reconnects, 1);
        assert_eq!(snap.sink_reconnects, 1);
        assert_eq!(snap.last_error.as_deref(), Some("second"));
        assert_eq!(snap.state, PipelineState::Reconnecting);
        assert_eq!(snap.uptime, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_keeps_state() {
        let registry = MetricsRegistry::new();
        registry.set_state(PipelineState::Running).await;
        registry.record_reconnect(Some(Endpoint::Sink)).await;
        registry.record_error("boom").await;
        tokio::time::advance(Duration::from_secs(5)).await;

        registry.reset().await;
        let snap = registry.snapshot().await;
        assert_eq!(snap.total_reconnects, 0);
        assert_eq!(snap.sink_reconnects, 0);
        assert_eq!(snap.last_error, None);
        assert_eq!(snap.uptime, Duration::ZERO);
        assert_eq!(snap.state, PipelineState::Running);
    }
}
