//! # External process backend.
//!
//! Runs the relay as a child process (ffmpeg by default) and turns its
//! lifecycle into backend events.
//!
//! ```text
//! start()
//!   ├─ spawn child (stdin/stdout null, stderr piped, kill_on_drop)
//!   ├─ stderr reader ── Warning{line} ...      ──┐
//!   └─ monitor (every poll_interval):            │ returns last line
//!        running ≥ healthy_after → Playing (once)│
//!        exited                  → Exited{code, detail} ◄┘
//!
//! stop(grace)
//!   cancel monitor + reader → SIGTERM → wait ≤ grace → kill
//! ```
//!
//! ## Rules
//! - Nothing is emitted once `stop()` has begun.
//! - `stop()` on a handle that never spawned, already exited or was already
//!   stopped is a no-op.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendEvent, BackendKind};
use crate::config::RelayConfig;
use crate::core::EventSink;
use crate::error::BackendError;

/// How long the monitor waits for the stderr reader to drain after an exit.
const STDERR_DRAIN: Duration = Duration::from_millis(250);

/// Tuning of the process backend.
///
/// ## Field semantics
/// - `program`: executable name or path, resolved with `which`
/// - `poll_interval`: liveness poll period of the monitor
/// - `healthy_after`: uptime after which the child is reported healthy
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Executable to run.
    pub program: PathBuf,
    /// Liveness poll period.
    pub poll_interval: Duration,
    /// Uptime required before `Playing` is emitted.
    pub healthy_after: Duration,
}

impl Default for ProcessOptions {
    /// Default options:
    ///
    /// - `program = "ffmpeg"`
    /// - `poll_interval = 1s`
    /// - `healthy_after = 3s`
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            poll_interval: Duration::from_secs(1),
            healthy_after: Duration::from_secs(3),
        }
    }
}

/// Program and argument list of the child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Creates a spec for an arbitrary command.
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// ffmpeg remux of the RTSP source into MPEG-TS over SRT.
    ///
    /// ```
    /// use relayvisor::{ProcessSpec, RelayConfig, SinkEndpoint, SourceEndpoint};
    ///
    /// let relay = RelayConfig {
    ///     source: SourceEndpoint { url: "rtsp://cam/1".into() },
    ///     sink: SinkEndpoint { host: "gw".into(), port: 9999, stream_id: None },
    /// };
    /// let spec = ProcessSpec::ffmpeg("ffmpeg", &relay);
    /// assert_eq!(spec.args.last().unwrap(), "srt://gw:9999?mode=caller");
    /// ```
    pub fn ffmpeg(program: impl Into<PathBuf>, relay: &RelayConfig) -> Self {
        Self::new(
            program,
            [
                "-nostdin",
                "-hide_banner",
                "-loglevel",
                "warning",
                "-rtsp_transport",
                "tcp",
                "-i",
                relay.source.url.as_str(),
                "-c",
                "copy",
                "-f",
                "mpegts",
            ]
            .into_iter()
            .map(String::from)
            .chain(std::iter::once(relay.sink.srt_uri())),
        )
    }

    /// Renders the command line for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Backend handle backed by one child process.
pub struct ProcessBackend {
    spec: ProcessSpec,
    options: ProcessOptions,
    sink: Option<EventSink>,
    child: Option<Arc<Mutex<Child>>>,
    cancel: Option<CancellationToken>,
    spawned: bool,
}

impl ProcessBackend {
    /// Creates a handle; nothing is spawned until [`start`](Backend::start).
    pub fn new(spec: ProcessSpec, options: ProcessOptions) -> Self {
        Self {
            spec,
            options,
            sink: None,
            child: None,
            cancel: None,
            spawned: false,
        }
    }

    /// Command this handle runs.
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    fn subscribe(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        if self.spawned {
            return Err(BackendError::Start {
                reason: "process handle already started".into(),
            });
        }
        self.spawned = true;

        tracing::debug!(command = %self.spec.command_line(), "spawning relay process");
        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.spec.program.display().to_string(),
                source,
            })?;
        tracing::debug!(pid = child.id(), "relay process spawned");

        let token = CancellationToken::new();
        let reader = child.stderr.take().map(|stderr| {
            tokio::spawn(drain_stderr(stderr, self.sink.clone(), token.clone()))
        });
        let child = Arc::new(Mutex::new(child));
        tokio::spawn(monitor(
            child.clone(),
            self.sink.clone(),
            reader,
            self.options.clone(),
            token.clone(),
        ));

        self.child = Some(child);
        self.cancel = Some(token);
        Ok(())
    }

    async fn stop(&mut self, grace: Duration) -> Result<(), BackendError> {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let mut child = child.lock().await;

        match child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "try_wait failed before stop"),
        }

        terminate(&mut child);
        match time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "relay process stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                Err(BackendError::Stop {
                    reason: e.to_string(),
                })
            }
            Err(_elapsed) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill relay process");
                }
                Err(BackendError::StopTimeout { grace })
            }
        }
    }

    async fn is_alive(&mut self) -> bool {
        let Some(child) = &self.child else {
            return false;
        };
        matches!(child.lock().await.try_wait(), Ok(None))
    }
}

/// Asks the child to exit gracefully.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                tracing::debug!(error = %e, pid, "SIGTERM failed, killing");
                let _ = child.start_kill();
            }
        }
        Err(_) => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Forwards stderr lines as warnings; returns the last non-empty line at EOF.
///
/// Lines are decoded lossily so the pipe stays drained whatever the child prints.
async fn drain_stderr(
    stderr: ChildStderr,
    sink: Option<EventSink>,
    token: CancellationToken,
) -> Option<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut last = None;
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&buf);
                let line = decoded.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(sink) = &sink {
                    sink.emit(BackendEvent::Warning {
                        message: line.to_string(),
                    });
                }
                last = Some(line.to_string());
            }
            Err(e) => {
                tracing::debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
    last
}

async fn monitor(
    child: Arc<Mutex<Child>>,
    sink: Option<EventSink>,
    mut reader: Option<JoinHandle<Option<String>>>,
    options: ProcessOptions,
    token: CancellationToken,
) {
    let started = Instant::now();
    let mut healthy = false;
    let mut ticker = time::interval(options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let status = child.lock().await.try_wait();
        match status {
            Ok(None) => {
                if !healthy && started.elapsed() >= options.healthy_after {
                    healthy = true;
                    emit(&sink, &token, BackendEvent::Playing);
                }
            }
            Ok(Some(status)) => {
                let detail = match reader.as_mut() {
                    Some(handle) => match time::timeout(STDERR_DRAIN, handle).await {
                        Ok(Ok(line)) => line,
                        _ => None,
                    },
                    None => None,
                };
                tracing::debug!(%status, "relay process exited");
                emit(
                    &sink,
                    &token,
                    BackendEvent::Exited {
                        code: status.code(),
                        detail,
                    },
                );
                return;
            }
            Err(e) => {
                emit(
                    &sink,
                    &token,
                    BackendEvent::Error {
                        message: format!("failed to poll relay process: {e}"),
                        endpoint: None,
                    },
                );
                return;
            }
        }
    }
}

fn emit(sink: &Option<EventSink>, token: &CancellationToken, event: BackendEvent) {
    if token.is_cancelled() {
        return;
    }
    if let Some(sink) = sink {
        sink.emit(event);
    }
}
