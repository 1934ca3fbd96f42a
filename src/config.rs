//! # Relay configuration.
//!
//! - [`SupervisorConfig`] timing knobs of the supervisor runtime;
//! - [`RelayConfig`] the ingest and egress endpoints handed to every backend.
//!
//! ## Sentinel values
//! - `report_interval = 0s` → status reporter disabled
//! - `SinkEndpoint::stream_id = Some("")` → treated as no stream id
//!
//! Stream ids end up inside a quoted `srtsink uri="…"` and a URI query, so
//! whitespace, quotes and `&` are rejected by [`RelayConfig::validate`].

use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::BackoffPolicy;

/// Runtime configuration for the supervisor.
///
/// ## Field semantics
/// - `backoff`: delay growth between reconnection attempts
/// - `settle`: wait after a reconnect before trusting `is_alive()`
/// - `grace`: maximum wait for a backend to stop before it is killed
/// - `report_interval`: status line period (`0s` = disabled)
/// - `bus_capacity`: lifecycle event ring buffer size (min 1)
/// - `retry_initial_start`: route a retryable first-start failure into the
///   reconnection loop instead of failing `start()`
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Reconnection backoff constants.
    pub backoff: BackoffPolicy,
    /// Settle interval after a reconnection start.
    pub settle: Duration,
    /// Stop grace period per backend.
    pub grace: Duration,
    /// Period of the status reporter.
    pub report_interval: Duration,
    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
    /// Retry a transient failure of the very first start.
    pub retry_initial_start: bool,
}

impl SupervisorConfig {
    /// Returns the reporter period, `None` when reporting is disabled.
    #[inline]
    pub fn report_period(&self) -> Option<Duration> {
        if self.report_interval == Duration::ZERO {
            None
        } else {
            Some(self.report_interval)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Rejects settings that would break the backoff invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff.factor.is_finite() || self.backoff.factor < 1.0 {
            return Err(ConfigError::Setting {
                name: "backoff.factor",
                reason: "must be a finite value >= 1.0",
            });
        }
        if self.backoff.max.is_zero() {
            return Err(ConfigError::Setting {
                name: "backoff.max",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `backoff = 1s × 2.0 up to 60s`
    /// - `settle = 5s`
    /// - `grace = 5s`
    /// - `report_interval = 30s`
    /// - `bus_capacity = 1024`
    /// - `retry_initial_start = false`
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            settle: Duration::from_secs(5),
            grace: Duration::from_secs(5),
            report_interval: Duration::from_secs(30),
            bus_capacity: 1024,
            retry_initial_start: false,
        }
    }
}

/// Ingest side of the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEndpoint {
    /// RTSP locator, e.g. `rtsp://camera:8554/cam1`.
    pub url: String,
}

/// Egress side of the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkEndpoint {
    /// SRT listener host.
    pub host: String,
    /// SRT listener port.
    pub port: u16,
    /// Optional SRT stream identity (e.g. `publish:live`).
    pub stream_id: Option<String>,
}

impl SinkEndpoint {
    /// Stream id with empty values filtered out.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref().filter(|s| !s.is_empty())
    }

    /// SRT caller URI understood by both `srtsink` and ffmpeg.
    ///
    /// ```
    /// use relayvisor::SinkEndpoint;
    ///
    /// let sink = SinkEndpoint { host: "10.0.0.5".into(), port: 9999, stream_id: Some("publish:live".into()) };
    /// assert_eq!(sink.srt_uri(), "srt://10.0.0.5:9999?mode=caller&streamid=publish:live");
    /// ```
    pub fn srt_uri(&self) -> String {
        let mut uri = format!("srt://{}:{}?mode=caller", self.host, self.port);
        if let Some(id) = self.stream_id() {
            uri.push_str("&streamid=");
            uri.push_str(id);
        }
        uri
    }
}

/// Endpoints handed to every backend built by the supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Where the stream is pulled from.
    pub source: SourceEndpoint,
    /// Where the stream is pushed to.
    pub sink: SinkEndpoint,
}

impl RelayConfig {
    /// Validates both endpoints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.source.url.trim();
        if url.is_empty() {
            return Err(ConfigError::SourceUrl {
                url: self.source.url.clone(),
                reason: "must not be empty",
            });
        }
        if !(url.starts_with("rtsp://") || url.starts_with("rtsps://")) {
            return Err(ConfigError::SourceUrl {
                url: self.source.url.clone(),
                reason: "expected an rtsp:// or rtsps:// url",
            });
        }
        if url.chars().any(|c| c.is_whitespace() || c == '"') {
            return Err(ConfigError::SourceUrl {
                url: self.source.url.clone(),
                reason: "must not contain whitespace or quotes",
            });
        }

        let host = &self.sink.host;
        if host.is_empty()
            || host
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '&' | '#'))
        {
            return Err(ConfigError::SinkHost(host.clone()));
        }
        if self.sink.port == 0 {
            return Err(ConfigError::SinkPort);
        }
        if let Some(id) = self.sink.stream_id() {
            if id
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '&'))
            {
                return Err(ConfigError::SinkStreamId(id.to_string()));
            }
        }
        Ok(())
    }
}
