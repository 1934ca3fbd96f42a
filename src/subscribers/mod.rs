//! # Lifecycle event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! control loop ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                                      │
//!                                                   ┌──────────┬───────┴──┬─────┐
//!                                                   ▼          ▼          ▼     ▼
//!                                               LogWriter   Metrics    Custom  ...
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use relayvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct OutageAlert;
//!
//! #[async_trait]
//! impl Subscribe for OutageAlert {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::BackendFailed {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "outage-alert" }
//! }
//! ```

mod log;
mod subscribe;
mod subscriber_set;

pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
