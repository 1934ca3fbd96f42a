//! # Backoff policy for reconnection attempts.
//!
//! [`BackoffPolicy`] holds the constants that shape retry delays:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor.
//!
//! [`Backoff`] is the running state built from a policy. Every call to
//! [`Backoff::next_delay`] hands out the current delay and then grows it by
//! `factor`, clamped to `max`. [`Backoff::reset`] brings it back to `first`.
//!
//! The type performs no I/O and never sleeps; the reconnection task is
//! responsible for waiting the returned duration.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use relayvisor::{Backoff, BackoffPolicy};
//!
//! let mut backoff = Backoff::new(BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//! });
//!
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(2));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(4));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Retry backoff constants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay handed out by the first call after a reset.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` keeps delays non-decreasing).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 1s`;
    /// - `max = 60s`;
    /// - `factor = 2.0`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Initial delay clamped to the cap.
    #[inline]
    pub fn initial(&self) -> Duration {
        self.first.min(self.max)
    }

    /// Computes the delay that follows `current`.
    ///
    /// The result is `current × factor`, clamped to `[initial, max]`.
    /// Non-finite or negative products collapse to `max`.
    pub fn grow(&self, current: Duration) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let unclamped = current.as_secs_f64() * self.factor;

        let next = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };
        next.max(self.initial())
    }
}

/// Running backoff state.
///
/// ### Invariants
/// - `policy.initial() <= current <= policy.max`
/// - `current` never decreases between two resets (for `factor >= 1.0`)
/// - `attempts` counts `next_delay` calls since the last reset
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Creates a fresh state positioned at the policy's initial delay.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial(),
            attempts: 0,
            policy,
        }
    }

    /// Returns the delay to wait now and advances the state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.policy.grow(self.current);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Restores the initial delay and clears the attempt counter.
    pub fn reset(&mut self) {
        self.current = self.policy.initial();
        self.attempts = 0;
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will return.
    #[inline]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Number of delays handed out since the last reset.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Policy this state was built from.
    #[inline]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
