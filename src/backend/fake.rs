//! Scripted backend for supervisor tests.
//!
//! Every `build()` pops the next [`Script`] (or reuses the fallback) and records
//! the handle's sink in a shared [`Probe`], so tests can inject events into any
//! generation and count builds/stops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Backend, BackendEvent, BackendFactory, BackendKind};
use crate::core::EventSink;
use crate::error::BackendError;

/// Behaviour of one scripted handle.
#[derive(Debug, Clone)]
pub struct Script {
    pub start_ok: bool,
    pub retryable: bool,
    pub alive: bool,
    pub on_start: Vec<BackendEvent>,
}

impl Script {
    /// Starts, reports healthy right away and stays alive.
    pub fn healthy() -> Self {
        Self {
            start_ok: true,
            retryable: true,
            alive: true,
            on_start: vec![BackendEvent::Playing],
        }
    }

    /// Starts and stays alive but never reports healthy on its own.
    pub fn silent() -> Self {
        Self {
            on_start: Vec::new(),
            ..Self::healthy()
        }
    }

    /// Starts, then is dead by the time liveness is checked.
    pub fn dead() -> Self {
        Self {
            alive: false,
            on_start: Vec::new(),
            ..Self::healthy()
        }
    }

    /// `start()` fails with a retryable error.
    pub fn failing() -> Self {
        Self {
            start_ok: false,
            alive: false,
            on_start: Vec::new(),
            ..Self::healthy()
        }
    }

    /// `start()` fails with a construction-class error.
    pub fn broken() -> Self {
        Self {
            retryable: false,
            ..Self::failing()
        }
    }
}

/// Shared record of what the supervisor did with the handles.
#[derive(Default)]
pub struct Probe {
    builds: AtomicUsize,
    stops: AtomicUsize,
    sinks: Mutex<Vec<EventSink>>,
}

impl Probe {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Total `stop()` calls across all handles.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Sink of the `index`-th built handle (0-based).
    pub fn sink(&self, index: usize) -> EventSink {
        self.sinks.lock().unwrap()[index].clone()
    }
}

pub struct FakeFactory {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    probe: Arc<Probe>,
}

impl FakeFactory {
    pub fn new(scripts: impl IntoIterator<Item = Script>, fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            fallback,
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn probe(&self) -> Arc<Probe> {
        self.probe.clone()
    }
}

impl BackendFactory for FakeFactory {
    type Backend = FakeBackend;

    fn build(&self) -> Result<FakeBackend, BackendError> {
        self.probe.builds.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(FakeBackend {
            script,
            probe: self.probe.clone(),
            sink: None,
            started: false,
            stopped: false,
        })
    }
}

pub struct FakeBackend {
    script: Script,
    probe: Arc<Probe>,
    sink: Option<EventSink>,
    started: bool,
    stopped: bool,
}

#[async_trait]
impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    fn subscribe(&mut self, sink: EventSink) {
        self.probe.sinks.lock().unwrap().push(sink.clone());
        self.sink = Some(sink);
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        if !self.script.start_ok {
            return Err(if self.script.retryable {
                BackendError::Start {
                    reason: "scripted start failure".into(),
                }
            } else {
                BackendError::Build {
                    reason: "scripted build failure".into(),
                }
            });
        }
        self.started = true;
        if let Some(sink) = &self.sink {
            for event in self.script.on_start.clone() {
                sink.emit(event);
            }
        }
        Ok(())
    }

    async fn stop(&mut self, _grace: Duration) -> Result<(), BackendError> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped = true;
        Ok(())
    }

    async fn is_alive(&mut self) -> bool {
        self.started && !self.stopped && self.script.alive
    }
}
