//! Background eviction of idle rate-limit state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::limiter::RateLimiter;

/// Spawn the reaper task.
///
/// Runs [`RateLimiter::evict_idle`] on a fixed interval, bounding memory
/// for limiter state. Eviction works key by key against the same sharded
/// maps the request path uses, so live traffic is never stalled behind a
/// full sweep; a concurrent check on an evicted key transparently recreates
/// a fresh bucket.
pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let evicted = limiter.evict_idle();
            debug!(evicted, "Reaper pass complete");
        }
    })
}
