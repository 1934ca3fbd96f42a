//! Runtime core: supervision of one relay session.
//!
//! The public API from this module is [`Supervisor`] (plus its builder), the
//! [`PipelineState`] it exposes, the event plumbing handed to backends, and the
//! shutdown adapter.
//!
//! Internal modules:
//! - [`supervisor`]: session slot, accessors, `start()` / `stop()`;
//! - [`control`]: the control loop owning state, backend, generation and backoff;
//! - [`reconnect`]: the single reconnection task driven over a control channel;
//! - [`dispatcher`]: per-generation sinks and raw event normalization;
//! - [`shutdown`]: OS signal → `stop()` adapter.

mod builder;
mod control;
mod dispatcher;
mod reconnect;
mod shutdown;
mod state;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use dispatcher::{EventDispatcher, EventSink, Signal, SignalKind};
pub use shutdown::{stop_on_signal, wait_for_shutdown_signal};
pub use state::PipelineState;
pub use supervisor::Supervisor;
