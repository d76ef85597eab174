//! External collaborators consumed by admission control.
//!
//! The allow/deny list and the token-tier limiter live elsewhere in the
//! backend; admission control only consumes these seams. Methods are
//! synchronous by contract: implementations must answer from local state,
//! never from the network, since they sit on the per-request hot path.

use dashmap::DashSet;

use crate::error::Result;

/// IP allow/deny list service.
///
/// Failures from this collaborator propagate out of the filter: a broken
/// deny list is too important to mask.
pub trait IpAccessList: Send + Sync {
    fn is_whitelisted(&self, ip: &str) -> Result<bool>;

    fn is_blacklisted(&self, ip: &str) -> Result<bool>;

    /// Permanently deny `ip`. Invoked by violation escalation.
    fn add_to_blacklist(&self, ip: &str) -> Result<()>;
}

/// Bearer-token tier rate limiter.
pub trait TokenRateLimiter: Send + Sync {
    fn is_allowed(&self, token: &str, role: &str) -> bool;
}

/// In-memory [`IpAccessList`] used by the demo server and tests.
#[derive(Default)]
pub struct MemoryAccessList {
    whitelist: DashSet<String>,
    blacklist: DashSet<String>,
}

impl MemoryAccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn whitelist(&self, ip: impl Into<String>) {
        self.whitelist.insert(ip.into());
    }

    pub fn blacklist(&self, ip: impl Into<String>) {
        self.blacklist.insert(ip.into());
    }
}

impl IpAccessList for MemoryAccessList {
    fn is_whitelisted(&self, ip: &str) -> Result<bool> {
        Ok(self.whitelist.contains(ip))
    }

    fn is_blacklisted(&self, ip: &str) -> Result<bool> {
        Ok(self.blacklist.contains(ip))
    }

    fn add_to_blacklist(&self, ip: &str) -> Result<()> {
        self.blacklist.insert(ip.to_string());
        Ok(())
    }
}

/// Token-tier limiter that admits everything. Stand-in for deployments
/// where the token tier is enforced elsewhere.
pub struct UnlimitedTokens;

impl TokenRateLimiter for UnlimitedTokens {
    fn is_allowed(&self, _token: &str, _role: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_list_round_trip() {
        let list = MemoryAccessList::new();

        assert!(!list.is_blacklisted("1.2.3.4").unwrap());
        list.add_to_blacklist("1.2.3.4").unwrap();
        assert!(list.is_blacklisted("1.2.3.4").unwrap());

        list.whitelist("10.0.0.1");
        assert!(list.is_whitelisted("10.0.0.1").unwrap());
        assert!(!list.is_whitelisted("1.2.3.4").unwrap());
    }
}
