//! Error types used by the relay runtime and its backends.
//!
//! - [`RelayError`] errors surfaced to the caller of `Supervisor::start()`;
//! - [`BackendError`] errors raised by a single backend handle;
//! - [`ConfigError`] invalid endpoint or runtime settings.
//!
//! Only the fatal-construction path reaches the caller. Transient transport
//! failures are absorbed by the supervisor and only show up in metrics.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendKind;

/// # Errors produced by the supervisor entry points.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration rejected before any backend was built.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The first backend of the session could not be built or started.
    #[error("relay failed to start: {0}")]
    Startup(#[source] BackendError),

    /// `start()` was called while a session was already active.
    #[error("relay session already running")]
    AlreadyRunning,
}

impl RelayError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use relayvisor::RelayError;
    ///
    /// assert_eq!(RelayError::AlreadyRunning.as_label(), "relay_already_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "relay_config",
            RelayError::Startup(_) => "relay_startup",
            RelayError::AlreadyRunning => "relay_already_running",
        }
    }
}

/// # Errors produced by backend handles.
///
/// Construction errors ([`Unsupported`](BackendError::Unsupported),
/// [`Build`](BackendError::Build), [`ToolMissing`](BackendError::ToolMissing))
/// mean the relay cannot work with the current configuration. Everything else
/// describes one failed attempt and is safe to retry.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackendError {
    /// The requested variant is not compiled in or not available on this host.
    #[error("{kind} backend is not available: {reason}")]
    Unsupported {
        /// Requested backend variant.
        kind: BackendKind,
        /// Why it cannot be used.
        reason: String,
    },

    /// A required external executable could not be located.
    #[error("required tool `{tool}` not found: {reason}")]
    ToolMissing {
        /// Executable name.
        tool: String,
        /// Lookup failure.
        reason: String,
    },

    /// Backend object could not be constructed (e.g. pipeline description rejected).
    #[error("failed to build backend: {reason}")]
    Build {
        /// Underlying error message.
        reason: String,
    },

    /// Child process could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Backend refused to transition to its active state.
    #[error("failed to start backend: {reason}")]
    Start {
        /// Underlying error message.
        reason: String,
    },

    /// Backend did not stop within the grace period and was forcibly terminated.
    #[error("backend did not stop within {grace:?}; forced termination")]
    StopTimeout {
        /// Grace period that elapsed.
        grace: Duration,
    },

    /// Backend reported an error while stopping.
    #[error("failed to stop backend: {reason}")]
    Stop {
        /// Underlying error message.
        reason: String,
    },
}

impl BackendError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BackendError::Unsupported { .. } => "backend_unsupported",
            BackendError::ToolMissing { .. } => "backend_tool_missing",
            BackendError::Build { .. } => "backend_build",
            BackendError::Spawn { .. } => "backend_spawn",
            BackendError::Start { .. } => "backend_start",
            BackendError::StopTimeout { .. } => "backend_stop_timeout",
            BackendError::Stop { .. } => "backend_stop",
        }
    }

    /// Indicates whether a later attempt may succeed without a configuration change.
    ///
    /// # Example
    /// ```
    /// use relayvisor::BackendError;
    ///
    /// let transient = BackendError::Start { reason: "connection refused".into() };
    /// assert!(transient.is_retryable());
    ///
    /// let fatal = BackendError::Build { reason: "no element \"srtsink\"".into() };
    /// assert!(!fatal.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Spawn { .. }
                | BackendError::Start { .. }
                | BackendError::StopTimeout { .. }
                | BackendError::Stop { .. }
        )
    }
}

/// # Invalid relay configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Ingest URL is empty or does not use a supported scheme.
    #[error("invalid source url `{url}`: {reason}")]
    SourceUrl {
        /// Offending value.
        url: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Egress host is empty or contains URI delimiters.
    #[error("invalid sink host `{0}`")]
    SinkHost(String),

    /// Egress port is zero.
    #[error("sink port must be non-zero")]
    SinkPort,

    /// Stream id contains characters that cannot be carried in the SRT URI.
    #[error("invalid sink stream id `{0}`")]
    SinkStreamId(String),

    /// A supervisor setting is out of range.
    #[error("invalid setting `{name}`: {reason}")]
    Setting {
        /// Setting name.
        name: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
