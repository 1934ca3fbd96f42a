//! # Shutdown adapter: OS signals → `Supervisor::stop()`.
//!
//! The library installs no signal handlers on its own; the binary (or any
//! embedding application) calls [`stop_on_signal`] once.
//!
//! ## Signals
//! **Unix platforms:** `SIGINT`, `SIGTERM`, `SIGQUIT`
//!
//! **Other platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`]

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::supervisor::Supervisor;
use crate::backend::BackendFactory;

/// Waits for a termination signal.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::info!(signal = name, "termination signal received");
    Ok(())
}

/// Waits for a termination signal.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = "ctrl-c", "termination signal received");
    Ok(())
}

/// Spawns a task that stops `sup` on the first termination signal.
///
/// If signal registration fails the error is logged and the task exits; the
/// supervisor can still be stopped programmatically.
pub fn stop_on_signal<F: BackendFactory>(sup: Arc<Supervisor<F>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => sup.stop(),
            Err(e) => tracing::warn!(error = %e, "failed to install signal handlers"),
        }
    })
}
