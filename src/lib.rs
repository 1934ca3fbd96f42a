//! # relayvisor
//!
//! **Relayvisor** keeps a live RTSP stream flowing into an SRT listener and
//! restores it on its own when either side drops.
//!
//! The relay itself is an opaque backend (an in-process GStreamer pipeline or
//! an ffmpeg child process). The crate starts it, watches it, and rebuilds it
//! after failures with exponential backoff, while keeping metrics and state
//! consistent for outside observers.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  RelayConfig ──► RelayBackendFactory (variant chosen once by the capability probe)
//!                        │ build() per (re)start
//!                        ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                      │
//! │  - ControlLoop   (state, active backend, generation, backoff)    │
//! │  - EventDispatcher (per-generation sinks → Signals)              │
//! │  - ReconnectTask (≤ 1, talks to the loop over a control channel) │
//! │  - MetricsRegistry + MetricsReporter                             │
//! └──────┬───────────────────────────────────────────────┬───────────┘
//!        │ start / stop / is_alive                       │ publish(Event)
//!        ▼                                               ▼
//!  ┌──────────────────────────┐               ┌──────────────────────┐
//!  │ Backend handle (gen = N) │               │ Bus (broadcast)      │
//!  │  NativeBackend | Process │               └──────────┬───────────┘
//!  └────────────┬─────────────┘                          ▼
//!               │ EventSink::emit(BackendEvent)      SubscriberSet
//!               └──────────► EventDispatcher        (LogWriter, ...)
//! ```
//!
//! ### Lifecycle
//! ```text
//! start() ─► Starting ─► build + start gen 1
//!              ├─ start failed      ─► Failed, RelayError::Startup
//!              └─ became-healthy    ─► Running
//!
//! Running ── error / EOS ─► Reconnecting ─► stop gen N, spawn ReconnectTask
//!   ReconnectTask loop {
//!     delay = backoff.next_delay(); sleep(delay)
//!     respawn gen N+1 (total_reconnects += 1)
//!     sleep(settle); confirm is_alive(gen N+1) ─► alive: Running, backoff.reset()
//!   }
//!
//! stop() ─► Stopped, cancel ReconnectTask, stop backend (≤ grace, then forced)
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                          |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Run, watch and restore one relay session.                | [`Supervisor`], [`PipelineState`]           |
//! | **Backends**      | Native pipeline or external process, chosen once.        | [`Backend`], [`BackendFactory`], [`RelayBackendFactory`] |
//! | **Policies**      | Deterministic exponential backoff.                       | [`BackoffPolicy`], [`Backoff`]              |
//! | **Metrics**       | Reconnect counters, last error, uptime, status line.     | [`MetricsSnapshot`], [`MetricsReporter`]    |
//! | **Subscriber API**| Hook into lifecycle events.                              | [`Subscribe`], [`LogWriter`]                |
//! | **Errors**        | Typed errors with stable labels.                         | [`RelayError`], [`BackendError`], [`ConfigError`] |
//!
//! ## Optional features
//! - `gstreamer`: enables [`NativeBackend`] (requires the GStreamer runtime and its SRT plugin).

mod backend;
mod config;
mod core;
mod error;
mod events;
mod metrics;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use backend::{
    locate_tool, native_available, pipeline_description, resolve_backend, Backend, BackendChoice,
    BackendEvent, BackendFactory, BackendKind, Endpoint, ProcessBackend, ProcessOptions,
    ProcessSpec, RelayBackend, RelayBackendFactory,
};
#[cfg(feature = "gstreamer")]
pub use backend::NativeBackend;
pub use config::{RelayConfig, SinkEndpoint, SourceEndpoint, SupervisorConfig};
pub use core::{
    stop_on_signal, wait_for_shutdown_signal, EventDispatcher, EventSink, PipelineState, Signal,
    SignalKind, Supervisor, SupervisorBuilder,
};
pub use error::{BackendError, ConfigError, RelayError};
pub use events::{Bus, Event, EventKind};
pub use metrics::{status_line, MetricsRegistry, MetricsReporter, MetricsSnapshot, STATUS_TARGET};
pub use policies::{Backoff, BackoffPolicy};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
