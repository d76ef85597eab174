//! Token bucket with per-tier refill policies.
//!
//! Two refill laws are supported:
//! - **Fixed window**: tokens snap back to full capacity at each window
//!   boundary. Availability is a step function. Used for the IP and
//!   reseller tiers.
//! - **Greedy**: tokens accrue continuously at `capacity / window` per unit
//!   time, capped at capacity. Availability recovers linearly. Used for the
//!   user tier.
//!
//! Buckets use [`tokio::time::Instant`] so tests can drive the clock with
//! `tokio::time::advance`.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Result, WardenError};

/// Refill law applied when time passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillPolicy {
    /// Hard reset to full capacity at each window boundary.
    FixedWindow,
    /// Continuous accrual at `capacity / window` per unit time.
    Greedy,
}

/// Sizing and refill rule for one tier of caller.
#[derive(Debug, Clone, Copy)]
pub struct TierSpec {
    /// Maximum tokens (requests admitted per window).
    pub capacity: u32,

    /// Refill window.
    pub window: Duration,

    /// Refill law for this tier.
    pub policy: RefillPolicy,
}

impl TierSpec {
    pub fn new(capacity: u32, window: Duration, policy: RefillPolicy) -> Self {
        Self {
            capacity,
            window,
            policy,
        }
    }
}

/// A single token-bucket counter.
///
/// Not internally synchronized; the store wraps each bucket in a mutex so
/// `try_consume` is atomic per key.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens.
    capacity: u32,

    /// Refill window.
    window: Duration,

    /// Refill law.
    policy: RefillPolicy,

    /// Current available tokens, in `[0, capacity]`. Fractional accrual for
    /// the greedy policy; whole consumption only.
    tokens: f64,

    /// Greedy: last accrual time. Fixed window: start of the current window.
    refreshed_at: Instant,
}

impl TokenBucket {
    /// Create a full bucket for the given tier.
    ///
    /// A zero capacity or window is a configuration error; callers treat it
    /// as a rejection (fail closed), never as an unlimited bucket.
    pub fn new(spec: &TierSpec) -> Result<Self> {
        if spec.capacity == 0 || spec.window.is_zero() {
            return Err(WardenError::configuration(format!(
                "invalid tier spec: capacity={} window={:?}",
                spec.capacity, spec.window
            )));
        }

        Ok(Self {
            capacity: spec.capacity,
            window: spec.window,
            policy: spec.policy,
            tokens: spec.capacity as f64,
            refreshed_at: Instant::now(),
        })
    }

    /// Atomically attempt to remove `n` tokens. Never leaves the balance
    /// negative.
    pub fn try_consume(&mut self, n: u32) -> bool {
        self.refill();

        let needed = n as f64;
        if self.tokens >= needed {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Remaining whole tokens after applying any pending refill.
    pub fn available(&mut self) -> u64 {
        self.refill();
        self.tokens as u64
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Apply elapsed time according to the tier's refill law.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refreshed_at);

        match self.policy {
            RefillPolicy::FixedWindow => {
                if elapsed >= self.window {
                    self.tokens = self.capacity as f64;
                    // Advance to the most recent window boundary, not to
                    // `now`, so the next reset lands on schedule. The
                    // remainder is strictly shorter than the window, so the
                    // narrowing cast cannot truncate.
                    let into_window = elapsed.as_nanos() % self.window.as_nanos();
                    self.refreshed_at = now - Duration::from_nanos(into_window as u64);
                }
            }
            RefillPolicy::Greedy => {
                let rate = self.capacity as f64 / self.window.as_secs_f64();
                let accrued = elapsed.as_secs_f64() * rate;
                self.tokens = (self.tokens + accrued).min(self.capacity as f64);
                self.refreshed_at = now;
            }
        }
    }
}
