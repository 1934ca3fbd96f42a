use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use super::supervisor::Supervisor;
use crate::backend::BackendFactory;
use crate::config::SupervisorConfig;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Supervisor`] with optional subscribers.
pub struct SupervisorBuilder<F: BackendFactory> {
    cfg: SupervisorConfig,
    factory: F,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<F: BackendFactory> SupervisorBuilder<F> {
    /// Creates a new builder with the given configuration and backend factory.
    pub fn new(cfg: SupervisorConfig, factory: F) -> Self {
        Self {
            cfg,
            factory,
            subscribers: Vec::new(),
        }
    }

    /// Sets lifecycle event subscribers.
    ///
    /// Subscribers receive events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor.
    ///
    /// With subscribers configured this spawns their workers and the bus
    /// listener, so it must run inside a tokio runtime.
    pub fn build(self) -> Arc<Supervisor<F>> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        if !self.subscribers.is_empty() {
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(&bus, subs);
        }
        Arc::new(Supervisor::new_internal(self.cfg, self.factory, bus))
    }
}

/// Forwards every bus event to the subscriber set.
fn subscriber_listener(bus: &Bus, subs: SubscriberSet) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => subs.emit(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        subs.shutdown().await;
    });
}
