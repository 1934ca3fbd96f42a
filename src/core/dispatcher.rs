//! # Event dispatcher: raw backend events → supervisor signals.
//!
//! Every backend handle gets an [`EventSink`] tagged with its generation. All
//! sinks feed one FIFO channel, so per-handle order is preserved.
//!
//! ```text
//! handle gen=3 ── sink(3).emit(ev) ─┐
//! handle gen=2 ── sink(2).emit(ev) ─┼─► mpsc ─► EventDispatcher::next() ─► Signal
//!    (retired: dropped at the sink) │             drops gen != active
//! ```
//!
//! ## Rules
//! - Only the active generation is forwarded; stale events are discarded both
//!   before enqueue and when dequeued.
//! - `Playing` becomes `BecameHealthy` at most once per generation.
//! - `Exited { code: 0 }` is end-of-stream, any other exit is an error.
//! - `Info` is logged at debug level and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::{BackendEvent, Endpoint};

/// Generation value meaning "no active handle".
const NO_GENERATION: u64 = 0;

struct Envelope {
    generation: u64,
    event: BackendEvent,
}

/// Per-generation event sink handed to a backend.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    active: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    /// Generation this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` while this sink's generation is the active one.
    pub fn is_current(&self) -> bool {
        self.active.load(Ordering::Acquire) == self.generation
    }

    /// Queues an event; returns `false` if it was discarded.
    pub fn emit(&self, event: BackendEvent) -> bool {
        if !self.is_current() {
            tracing::trace!(generation = self.generation, ?event, "discarding event from retired backend");
            return false;
        }
        self.tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("current", &self.is_current())
            .finish()
    }
}

/// Normalized supervisor-level signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    /// The handle failed.
    Error {
        /// Human-readable reason.
        reason: String,
        /// Side the failure is attributed to.
        endpoint: Option<Endpoint>,
    },
    /// The input ended.
    EndOfStream,
    /// The handle reached its active state.
    BecameHealthy,
    /// Informational diagnostic.
    Warning {
        /// Diagnostic text.
        reason: String,
    },
}

/// Signal tagged with the generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Generation of the originating handle.
    pub generation: u64,
    /// What happened.
    pub kind: SignalKind,
}

/// Receiving side, owned by the supervisor control loop.
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    active: Arc<AtomicU64>,
    healthy_seen: bool,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no active generation.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            active: Arc::new(AtomicU64::new(NO_GENERATION)),
            healthy_seen: false,
        }
    }

    /// Creates a sink for `generation`; it forwards nothing until activated.
    pub fn sink(&self, generation: u64) -> EventSink {
        EventSink {
            generation,
            active: self.active.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Makes `generation` the only one whose events are forwarded.
    pub fn activate(&mut self, generation: u64) {
        self.active.store(generation, Ordering::Release);
        self.healthy_seen = false;
    }

    /// Stops forwarding events from every generation.
    pub fn retire(&mut self) {
        self.active.store(NO_GENERATION, Ordering::Release);
    }

    /// Currently forwarded generation.
    pub fn active(&self) -> Option<u64> {
        match self.active.load(Ordering::Acquire) {
            NO_GENERATION => None,
            generation => Some(generation),
        }
    }

    /// Waits for the next signal of the active generation.
    ///
    /// Cancel-safe: no signal is lost if the future is dropped.
    pub async fn next(&mut self) -> Option<Signal> {
        loop {
            let envelope = self.rx.recv().await?;
            if Some(envelope.generation) != self.active() {
                tracing::trace!(generation = envelope.generation, "dropping stale backend event");
                continue;
            }
            if let Some(kind) = self.normalize(envelope.event) {
                return Some(Signal {
                    generation: envelope.generation,
                    kind,
                });
            }
        }
    }

    fn normalize(&mut self, event: BackendEvent) -> Option<SignalKind> {
        match event {
            BackendEvent::Error { message, endpoint } => Some(SignalKind::Error {
                reason: message,
                endpoint,
            }),
            BackendEvent::Warning { message } => Some(SignalKind::Warning { reason: message }),
            BackendEvent::Info { message } => {
                tracing::debug!(%message, "backend info");
                None
            }
            BackendEvent::EndOfStream | BackendEvent::Exited { code: Some(0), .. } => {
                Some(SignalKind::EndOfStream)
            }
            BackendEvent::Exited { code, detail } => {
                let endpoint = detail.as_deref().and_then(Endpoint::classify);
                let mut reason = match code {
                    Some(code) => format!("process exited with status {code}"),
                    None => "process terminated by signal".to_string(),
                };
                if let Some(detail) = detail {
                    reason.push_str(": ");
                    reason.push_str(&detail);
                }
                Some(SignalKind::Error { reason, endpoint })
            }
            BackendEvent::Playing => {
                if self.healthy_seen {
                    None
                } else {
                    self.healthy_seen = true;
                    Some(SignalKind::BecameHealthy)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn try_next(d: &mut EventDispatcher) -> Option<Signal> {
        tokio::time::timeout(Duration::from_millis(50), d.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_inactive_sink_is_discarded() {
        let mut d = EventDispatcher::new();
        let sink = d.sink(1);
        assert!(!sink.emit(BackendEvent::EndOfStream));

        d.activate(1);
        assert!(sink.emit(BackendEvent::EndOfStream));
        assert_eq!(
            try_next(&mut d).await,
            Some(Signal {
                generation: 1,
                kind: SignalKind::EndOfStream
            })
        );
    }

    #[tokio::test]
    async fn test_queued_stale_events_dropped_on_receive() {
        let mut d = EventDispatcher::new();
        let old = d.sink(1);
        d.activate(1);
        assert!(old.emit(BackendEvent::Error {
            message: "boom".into(),
            endpoint: None
        }));

        let new = d.sink(2);
        d.activate(2);
        assert!(!old.emit(BackendEvent::EndOfStream));
        assert!(new.emit(BackendEvent::Playing));

        let signal = try_next(&mut d).await.unwrap();
        assert_eq!(signal.generation, 2);
        assert_eq!(signal.kind, SignalKind::BecameHealthy);
        assert_eq!(try_next(&mut d).await, None);
    }

    #[tokio::test]
    async fn test_healthy_once_per_generation() {
        let mut d = EventDispatcher::new();
        let first = d.sink(1);
        d.activate(1);
        first.emit(BackendEvent::Playing);
        first.emit(BackendEvent::Playing);
        assert_eq!(try_next(&mut d).await.unwrap().kind, SignalKind::BecameHealthy);
        assert_eq!(try_next(&mut d).await, None);

        let second = d.sink(2);
        d.activate(2);
        second.emit(BackendEvent::Playing);
        assert_eq!(try_next(&mut d).await.unwrap().kind, SignalKind::BecameHealthy);
    }

    #[tokio::test]
    async fn test_exit_normalization_preserves_order() {
        let mut d = EventDispatcher::new();
        let sink = d.sink(7);
        d.activate(7);
        sink.emit(BackendEvent::Info { message: "ignored".into() });
        sink.emit(BackendEvent::Warning { message: "late frame".into() });
        sink.emit(BackendEvent::Exited {
            code: Some(1),
            detail: Some("rtsp://cam/1: 401 Unauthorized".into()),
        });
        sink.emit(BackendEvent::Exited { code: Some(0), detail: None });
        sink.emit(BackendEvent::Exited { code: None, detail: None });

        assert_eq!(
            try_next(&mut d).await.unwrap().kind,
            SignalKind::Warning { reason: "late frame".into() }
        );
        assert_eq!(
            try_next(&mut d).await.unwrap().kind,
            SignalKind::Error {
                reason: "process exited with status 1: rtsp://cam/1: 401 Unauthorized".into(),
                endpoint: Some(Endpoint::Source),
            }
        );
        assert_eq!(try_next(&mut d).await.unwrap().kind, SignalKind::EndOfStream);
        assert_eq!(
            try_next(&mut d).await.unwrap().kind,
            SignalKind::Error {
                reason: "process terminated by signal".into(),
                endpoint: None,
            }
        );
    }

    #[test]
    fn test_retire_clears_active() {
        let mut d = EventDispatcher::new();
        assert_eq!(d.active(), None);
        d.activate(3);
        assert_eq!(d.active(), Some(3));
        d.retire();
        assert_eq!(d.active(), None);
        assert!(!d.sink(3).is_current());
    }
}
