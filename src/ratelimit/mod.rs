//! Layered request rate limiting: token buckets keyed by IP and user,
//! violation escalation to the blacklist, and idle-state reaping.

pub mod access;
pub mod bucket;
pub mod limiter;
pub mod reaper;
pub mod store;
pub mod violations;

pub use access::{IpAccessList, MemoryAccessList, TokenRateLimiter, UnlimitedTokens};
pub use bucket::{RefillPolicy, TierSpec, TokenBucket};
pub use limiter::{RateLimiter, Role};
pub use store::KeyedBucketStore;
pub use violations::ViolationTracker;
