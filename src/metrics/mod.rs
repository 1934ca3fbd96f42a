//! Relay metrics.
//!
//! ## Contents
//! - [`MetricsRegistry`] counters, last error and state behind one lock
//! - [`MetricsSnapshot`] consistent copy with derived uptime
//! - [`MetricsReporter`] periodic status line while the relay is running
//!
//! ```text
//! control loop ── reset / set_state / record_* ──► MetricsRegistry
//!                                                      │ snapshot()
//!                          ┌───────────────────────────┼───────────────┐
//!                          ▼                           ▼               ▼
//!                  MetricsReporter (every N s)   Supervisor::metrics()  callers
//! ```

mod registry;
mod reporter;

pub use registry::{MetricsRegistry, MetricsSnapshot};
pub use reporter::{status_line, MetricsReporter, STATUS_TARGET};
