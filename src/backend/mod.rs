//! # Backend handles: the opaque units that actually move the stream.
//!
//! A backend handle represents **one** attempt to run the relay. The supervisor
//! builds a fresh handle through a [`BackendFactory`] for every (re)start,
//! subscribes it to the event dispatcher, starts it, and stops it before a
//! successor is built.
//!
//! ## Variants
//! ```text
//!                  capability probe (once)
//!                           │
//!              ┌────────────┴─────────────┐
//!              ▼                          ▼
//!     NativeBackend (gstreamer)     ProcessBackend (ffmpeg child)
//!     bus watcher task              liveness monitor + stderr reader
//!              │                          │
//!              └──── EventSink::emit(BackendEvent) ────► EventDispatcher
//! ```
//!
//! ## Rules
//! - `stop()` is safe to call repeatedly and after a failed `start()`.
//! - A stopped handle never delivers further events.
//! - Handles are never reused across attempts.

mod capability;
#[cfg(test)]
pub(crate) mod fake;
#[cfg(feature = "gstreamer")]
mod native;
mod pipeline;
mod process;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::core::EventSink;
use crate::error::BackendError;

pub use capability::{locate_tool, native_available, resolve_backend, BackendChoice};
#[cfg(feature = "gstreamer")]
pub use native::NativeBackend;
pub use pipeline::pipeline_description;
pub use process::{ProcessBackend, ProcessOptions, ProcessSpec};

/// Which transport implementation a handle uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process GStreamer pipeline.
    Native,
    /// External ffmpeg child process.
    Process,
}

impl BackendKind {
    /// Returns a short stable label for logs/metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Process => "process",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the relay a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Ingest (RTSP) side.
    Source,
    /// Egress (SRT) side.
    Sink,
}

impl Endpoint {
    /// Attributes a free-form diagnostic to one side of the relay.
    ///
    /// Returns `None` when the text mentions neither protocol, or both.
    ///
    /// ```
    /// use relayvisor::Endpoint;
    ///
    /// assert_eq!(Endpoint::classify("rtsp://cam/1: Connection refused"), Some(Endpoint::Source));
    /// assert_eq!(Endpoint::classify("SRT handshake timeout"), Some(Endpoint::Sink));
    /// assert_eq!(Endpoint::classify("out of memory"), None);
    /// ```
    pub fn classify(text: &str) -> Option<Endpoint> {
        let lower = text.to_ascii_lowercase();
        match (lower.contains("rtsp"), lower.contains("srt")) {
            (true, false) => Some(Endpoint::Source),
            (false, true) => Some(Endpoint::Sink),
            _ => None,
        }
    }

    /// Returns a short stable label for logs/metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Source => "source",
            Endpoint::Sink => "sink",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw notification produced by a backend.
///
/// The event dispatcher normalizes these into supervisor signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Transport error.
    Error {
        /// Diagnostic message.
        message: String,
        /// Side the error is attributed to, if known.
        endpoint: Option<Endpoint>,
    },
    /// Non-fatal diagnostic.
    Warning {
        /// Diagnostic message.
        message: String,
    },
    /// Informational message.
    Info {
        /// Diagnostic message.
        message: String,
    },
    /// The input ended.
    EndOfStream,
    /// The backend reached its active state.
    Playing,
    /// The child process exited while it was expected to run.
    Exited {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Last diagnostic line the process printed.
        detail: Option<String>,
    },
}

/// # One attempt to run the relay.
///
/// All methods take `&mut self`: a handle is owned exclusively by the
/// supervisor control loop.
#[async_trait]
pub trait Backend: Send + 'static {
    /// Variant of this handle.
    fn kind(&self) -> BackendKind;

    /// Registers the sink that receives this handle's events.
    ///
    /// Called once, before [`start`](Backend::start).
    fn subscribe(&mut self, sink: EventSink);

    /// Transitions the handle to its active state.
    async fn start(&mut self) -> Result<(), BackendError>;

    /// Stops the handle, waiting at most `grace` before forcing termination.
    ///
    /// Returns an error when the handle had to be forced or failed to stop;
    /// resources are released either way.
    async fn stop(&mut self, grace: Duration) -> Result<(), BackendError>;

    /// Returns `true` while the handle is running.
    async fn is_alive(&mut self) -> bool;
}

/// # Builds fresh backend handles.
///
/// Selected once when the supervisor is constructed.
pub trait BackendFactory: Send + Sync + 'static {
    /// Handle type produced by this factory.
    type Backend: Backend;

    /// Builds a new, not yet started handle.
    fn build(&self) -> Result<Self::Backend, BackendError>;
}

/// Handle produced by [`RelayBackendFactory`].
pub enum RelayBackend {
    /// GStreamer pipeline.
    #[cfg(feature = "gstreamer")]
    Native(NativeBackend),
    /// ffmpeg child process.
    Process(ProcessBackend),
}

#[async_trait]
impl Backend for RelayBackend {
    fn kind(&self) -> BackendKind {
        match self {
            #[cfg(feature = "gstreamer")]
            RelayBackend::Native(b) => b.kind(),
            RelayBackend::Process(b) => b.kind(),
        }
    }

    fn subscribe(&mut self, sink: EventSink) {
        match self {
            #[cfg(feature = "gstreamer")]
            RelayBackend::Native(b) => b.subscribe(sink),
            RelayBackend::Process(b) => b.subscribe(sink),
        }
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        match self {
            #[cfg(feature = "gstreamer")]
            RelayBackend::Native(b) => b.start().await,
            RelayBackend::Process(b) => b.start().await,
        }
    }

    async fn stop(&mut self, grace: Duration) -> Result<(), BackendError> {
        match self {
            #[cfg(feature = "gstreamer")]
            RelayBackend::Native(b) => b.stop(grace).await,
            RelayBackend::Process(b) => b.stop(grace).await,
        }
    }

    async fn is_alive(&mut self) -> bool {
        match self {
            #[cfg(feature = "gstreamer")]
            RelayBackend::Native(b) => b.is_alive().await,
            RelayBackend::Process(b) => b.is_alive().await,
        }
    }
}

/// Factory for the two production variants.
///
/// The variant is fixed at construction; required capabilities are checked
/// here so a missing plugin or executable surfaces as a construction error.
#[derive(Debug, Clone)]
pub struct RelayBackendFactory {
    relay: RelayConfig,
    kind: BackendKind,
    process: Option<ProcessSpec>,
    options: ProcessOptions,
}

impl RelayBackendFactory {
    /// Creates a factory for `kind`.
    ///
    /// ### Errors
    /// - [`BackendError::Unsupported`] when `kind` is `Native` and the crate was
    ///   built without the `gstreamer` feature;
    /// - [`BackendError::ToolMissing`] when `kind` is `Process` and the ffmpeg
    ///   executable cannot be located.
    pub fn new(
        relay: RelayConfig,
        kind: BackendKind,
        options: ProcessOptions,
    ) -> Result<Self, BackendError> {
        let process = match kind {
            BackendKind::Process => {
                let program = locate_tool(&options.program)?;
                Some(ProcessSpec::ffmpeg(program, &relay))
            }
            BackendKind::Native => {
                if !cfg!(feature = "gstreamer") {
                    return Err(BackendError::Unsupported {
                        kind,
                        reason: "built without the `gstreamer` feature".into(),
                    });
                }
                None
            }
        };
        Ok(Self {
            relay,
            kind,
            process,
            options,
        })
    }

    /// Variant this factory builds.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Endpoints every handle is built with.
    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    /// Command line of the process variant, `None` for the native variant.
    pub fn process_spec(&self) -> Option<&ProcessSpec> {
        self.process.as_ref()
    }
}

impl BackendFactory for RelayBackendFactory {
    type Backend = RelayBackend;

    fn build(&self) -> Result<RelayBackend, BackendError> {
        match self.kind {
            BackendKind::Process => {
                let spec = self.process.clone().ok_or_else(|| BackendError::Build {
                    reason: "process command line was not prepared".into(),
                })?;
                Ok(RelayBackend::Process(ProcessBackend::new(
                    spec,
                    self.options.clone(),
                )))
            }
            #[cfg(feature = "gstreamer")]
            BackendKind::Native => Ok(RelayBackend::Native(NativeBackend::new(&self.relay)?)),
            #[cfg(not(feature = "gstreamer"))]
            BackendKind::Native => Err(BackendError::Unsupported {
                kind: BackendKind::Native,
                reason: "built without the `gstreamer` feature".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SinkEndpoint, SourceEndpoint};

    fn relay() -> RelayConfig {
        RelayConfig {
            source: SourceEndpoint {
                url: "rtsp://cam:8554/cam1".into(),
            },
            sink: SinkEndpoint {
                host: "gw".into(),
                port: 9000,
                stream_id: None,
            },
        }
    }

    #[test]
    fn test_endpoint_classify_ambiguous() {
        assert_eq!(Endpoint::classify("rtsp to srt relay failed"), None);
    }

    #[test]
    fn test_missing_tool_is_construction_error() {
        let options = ProcessOptions {
            program: "/nonexistent/relayvisor-ffmpeg".into(),
            ..ProcessOptions::default()
        };
        let err = RelayBackendFactory::new(relay(), BackendKind::Process, options).unwrap_err();
        assert_eq!(err.as_label(), "backend_tool_missing");
        assert!(!err.is_retryable());
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn test_native_without_feature_is_unsupported() {
        let err = RelayBackendFactory::new(relay(), BackendKind::Native, ProcessOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unsupported {
                kind: BackendKind::Native,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_factory_builds_fresh_handles() {
        let options = ProcessOptions {
            program: "sh".into(),
            ..ProcessOptions::default()
        };
        let factory = RelayBackendFactory::new(relay(), BackendKind::Process, options).unwrap();
        let spec = factory.process_spec().unwrap();
        assert!(spec.args.contains(&"srt://gw:9000?mode=caller".to_string()));

        let a = factory.build().unwrap();
        let b = factory.build().unwrap();
        assert_eq!(a.kind(), BackendKind::Process);
        assert_eq!(b.kind(), BackendKind::Process);
    }
}
