//! # Reconnection task.
//!
//! Spawned by the control loop when a failure is observed and no reconnection
//! is in progress. It never touches supervisor state itself: every step is a
//! request over the control channel, answered through a oneshot.
//!
//! ```text
//! loop {
//!   ├─► Schedule            → delay = backoff.next_delay()
//!   ├─► sleep(delay)          (cancellable)
//!   ├─► Respawn             → Some(generation) | None (build/start failed → loop)
//!   ├─► sleep(settle)         (cancellable)
//!   └─► Confirm(generation) → true  → exit (slot already cleared by the loop)
//!                             false → loop
//! }
//! ```
//!
//! ## Rules
//! - At most one task exists per session; the control loop owns its slot and
//!   the [`LiveGuard`] counting it, so the count drops when the slot is cleared.
//! - Every wait races the task token; cancellation exits without a further request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Requests from the reconnection task to the control loop.
pub(crate) enum Control {
    /// Ask for the next backoff delay.
    Schedule { reply: oneshot::Sender<Duration> },
    /// Stop the current handle (if any), build and start a fresh one.
    Respawn { reply: oneshot::Sender<Option<u64>> },
    /// Check that `generation` is still current and alive.
    Confirm {
        generation: u64,
        reply: oneshot::Sender<bool>,
    },
}

/// Counts occupied reconnection slots; decremented when the slot is released.
pub(crate) struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct ReconnectTask {
    link: mpsc::UnboundedSender<Control>,
    settle: Duration,
    token: CancellationToken,
}

impl ReconnectTask {
    pub(crate) fn new(
        link: mpsc::UnboundedSender<Control>,
        settle: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            link,
            settle,
            token,
        }
    }

    pub(crate) async fn run(self) {
        loop {
            let Some(delay) = self.request(|reply| Control::Schedule { reply }).await else {
                break;
            };
            if !self.pause(delay).await {
                break;
            }

            let generation = match self.request(|reply| Control::Respawn { reply }).await {
                Some(Some(generation)) => generation,
                Some(None) => continue,
                None => break,
            };
            if !self.pause(self.settle).await {
                break;
            }

            match self
                .request(|reply| Control::Confirm { generation, reply })
                .await
            {
                Some(false) => continue,
                Some(true) | None => break,
            }
        }
    }

    /// Sends a request and waits for the reply; `None` on cancellation or a closed loop.
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Control) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.link.send(make(tx)).ok()?;
        tokio::select! {
            _ = self.token.cancelled() => None,
            reply = rx => reply.ok(),
        }
    }

    /// Sleeps for `d`; returns `false` if cancelled first.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }
}
