//! Reconnection policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] constants that shape retry delays (first / factor / max)
//! - [`Backoff`] running state handing out successive delays
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { backoff: BackoffPolicy, .. }
//!      └─► control loop owns Backoff::new(policy):
//!           - next_delay() when the reconnection task asks for a schedule
//!           - reset() when the backend reports it became healthy
//! ```

mod backoff;

pub use backoff::{Backoff, BackoffPolicy};
