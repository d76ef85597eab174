//! # Warden
//!
//! Layered request admission control for the VPN backend API.
//!
//! ## Architecture
//!
//! - **Rate limiter**: token buckets keyed by client IP and user id, with
//!   per-tier refill policies (hard window reset for IP and reseller
//!   tiers, continuous refill for the user tier)
//! - **Violation escalation**: consecutive over-limit IPs are reported to
//!   the external blacklist, exactly once per threshold crossing
//! - **Reaper**: a background task that evicts idle bucket, violation, and
//!   timestamp state, bounding memory
//! - **Admission middleware**: the request boundary that sequences the
//!   whitelist/blacklist, IP-tier, user-tier, and token-tier checks
//!
//! All state is in-memory and per-process; admission checks are
//! non-blocking and never perform I/O. Collaborators (the IP allow/deny
//! list and the token-tier limiter) are constructor-supplied traits.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod telemetry;

pub use error::{ErrorCode, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AdmissionConfig, Config, TierLimit};
    pub use crate::error::{ErrorCode, Result, WardenError};
    pub use crate::middleware::{AdmissionLayer, Principal, Subject};
    pub use crate::ratelimit::{
        IpAccessList, MemoryAccessList, RateLimiter, RefillPolicy, Role, TierSpec,
        TokenRateLimiter, UnlimitedTokens,
    };
}
