//! # Relay pipeline state.
//!
//! [`PipelineState`] is written only by the supervisor control loop and read
//! everywhere else (metrics snapshots, status reporter, `watch` receivers).
//!
//! ```text
//!            start()                 became-healthy
//! Stopped ──────────► Starting ───────────────────────► Running
//!                        │                               │   ▲
//!          start failed  │              error / EOS      │   │ became-healthy
//!                        ▼                               ▼   │
//!                      Failed                      Reconnecting
//!
//! any state ── stop() ──► Stopped
//! ```

use std::fmt;

/// Lifecycle state of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// No session is active.
    #[default]
    Stopped,
    /// First backend of the session is being started.
    Starting,
    /// The active backend reported it is healthy.
    Running,
    /// A failure was observed; a reconnection task is restoring the relay.
    Reconnecting,
    /// The first start of the session failed.
    Failed,
}

impl PipelineState {
    /// Returns a short stable label for logs/metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Reconnecting => "reconnecting",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
