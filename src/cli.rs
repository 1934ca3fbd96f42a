use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use relayvisor::{
    BackendChoice, BackoffPolicy, ConfigError, ProcessOptions, RelayConfig, SinkEndpoint,
    SourceEndpoint, SupervisorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "relayvisor")]
#[command(author, version, about = "Self-healing RTSP to SRT stream relay")]
pub struct Cli {
    /// RTSP stream to pull from
    #[arg(long, env = "RTSP_URL", default_value = "rtsp://localhost:8554/cam1")]
    pub rtsp_url: String,

    /// SRT listener host to push to
    #[arg(long, env = "SRT_HOST", default_value = "127.0.0.1")]
    pub srt_host: String,

    /// SRT listener port
    #[arg(long, env = "SRT_PORT", default_value_t = 9999)]
    pub srt_port: u16,

    /// SRT stream id (empty = none)
    #[arg(long, env = "SRT_STREAMID")]
    pub srt_streamid: Option<String>,

    /// Relay backend: auto, native or process
    #[arg(long, env = "RELAY_BACKEND", default_value = "auto")]
    pub backend: BackendChoice,

    /// ffmpeg executable used by the process backend
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// First reconnection delay, in seconds
    #[arg(long, default_value_t = 1.0)]
    pub backoff_initial: f64,

    /// Reconnection delay cap, in seconds
    #[arg(long, default_value_t = 60.0)]
    pub backoff_max: f64,

    /// Reconnection delay growth factor
    #[arg(long, default_value_t = 2.0)]
    pub backoff_factor: f64,

    /// Wait after a reconnect before checking liveness, in seconds
    #[arg(long, default_value_t = 5.0)]
    pub settle: f64,

    /// Maximum wait for a backend to stop, in seconds
    #[arg(long, default_value_t = 5.0)]
    pub grace: f64,

    /// Status line period in seconds (0 disables it)
    #[arg(long, default_value_t = 30.0)]
    pub report_interval: f64,

    /// Treat a transient failure of the first start like any later failure
    #[arg(long)]
    pub retry_initial_start: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            source: SourceEndpoint {
                url: self.rtsp_url.clone(),
            },
            sink: SinkEndpoint {
                host: self.srt_host.clone(),
                port: self.srt_port,
                stream_id: self.srt_streamid.clone().filter(|s| !s.is_empty()),
            },
        }
    }

    pub fn supervisor_config(&self) -> Result<SupervisorConfig, ConfigError> {
        let cfg = SupervisorConfig {
            backoff: BackoffPolicy {
                first: seconds("backoff-initial", self.backoff_initial)?,
                max: seconds("backoff-max", self.backoff_max)?,
                factor: self.backoff_factor,
            },
            settle: seconds("settle", self.settle)?,
            grace: seconds("grace", self.grace)?,
            report_interval: seconds("report-interval", self.report_interval)?,
            retry_initial_start: self.retry_initial_start,
            ..SupervisorConfig::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            program: self.ffmpeg.clone(),
            ..ProcessOptions::default()
        }
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::Setting {
        name,
        reason: "must be a finite, non-negative number of seconds",
    })
}
