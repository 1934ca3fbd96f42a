//! # Lifecycle events emitted by the relay supervisor.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **State events**: pipeline state transitions and shutdown
//! - **Backend events**: one backend handle starting, becoming healthy, failing
//! - **Reconnect events**: backoff scheduling and liveness confirmation
//!
//! The [`Event`] struct carries additional metadata such as timestamps, backend
//! generation, reasons, and backoff delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use relayvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ReconnectScheduled)
//!     .with_generation(3)
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(4));
//!
//! assert_eq!(ev.kind, EventKind::ReconnectScheduled);
//! assert_eq!(ev.delay_ms, Some(4000));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::backend::{BackendKind, Endpoint};
use crate::core::PipelineState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === State events ===
    /// Pipeline state changed.
    ///
    /// Sets:
    /// - `prev_state`, `state`
    StateChanged,

    /// Stop requested; the session is shutting down.
    ShutdownRequested,

    // === Backend events ===
    /// A fresh backend handle is being started.
    ///
    /// Sets:
    /// - `generation`, `backend`
    BackendStarting,

    /// The active handle reported it is healthy.
    ///
    /// Sets:
    /// - `generation`
    BackendHealthy,

    /// The active handle failed to start or reported an error.
    ///
    /// Sets:
    /// - `generation`, `reason`
    /// - `endpoint`: side the failure is attributed to (if known)
    BackendFailed,

    /// The active handle reported end of stream.
    ///
    /// Sets:
    /// - `generation`
    EndOfStream,

    /// Non-fatal diagnostic from the active handle.
    ///
    /// Sets:
    /// - `generation`, `reason`
    BackendWarning,

    /// A handle had to be forced down or failed to stop.
    ///
    /// Sets:
    /// - `generation`, `reason`
    BackendForceStopped,

    // === Reconnect events ===
    /// Next reconnection attempt scheduled.
    ///
    /// Sets:
    /// - `attempt`: attempt number since the last reset (1-based)
    /// - `delay_ms`: delay before the attempt
    ReconnectScheduled,

    /// The reconnected handle was confirmed alive after the settle interval.
    ///
    /// Sets:
    /// - `generation`
    ReconnectConfirmed,
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Generation of the backend handle involved.
    pub generation: Option<u64>,
    /// Variant of the backend handle involved.
    pub backend: Option<BackendKind>,
    /// New state (state events).
    pub state: Option<PipelineState>,
    /// Previous state (state events).
    pub prev_state: Option<PipelineState>,
    /// Reconnection attempt number.
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Side of the relay a failure is attributed to.
    pub endpoint: Option<Endpoint>,
    /// Subscriber name (subscriber events).
    pub subscriber: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            generation: None,
            backend: None,
            state: None,
            prev_state: None,
            attempt: None,
            delay_ms: None,
            reason: None,
            endpoint: None,
            subscriber: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a backend generation.
    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Attaches a backend variant.
    #[inline]
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    /// Attaches a state transition.
    #[inline]
    pub fn with_transition(mut self, prev: PipelineState, next: PipelineState) -> Self {
        self.prev_state = Some(prev);
        self.state = Some(next);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches the failing side, if known.
    #[inline]
    pub fn with_endpoint(mut self, endpoint: Option<Endpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"));
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
