//! Rate-limiter orchestration.
//!
//! Ties bucket lookup, violation tracking, and blacklist escalation
//! together behind two boolean entry points, `allow_for_ip` and
//! `allow_for_user`. No exception crosses this boundary: any internal
//! failure is logged and resolved as a rejection (fail closed).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, warn};

use super::access::IpAccessList;
use super::bucket::{RefillPolicy, TierSpec};
use super::store::KeyedBucketStore;
use super::violations::ViolationTracker;
use crate::config::AdmissionConfig;
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller roles recognized by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Unconditionally bypasses user-tier limiting.
    Admin,
    /// Reseller accounts, sized by the reseller tier.
    Reseller,
    /// Regular accounts, sized by the user tier.
    User,
    /// Trusted service-to-service callers.
    Server,
}

impl Role {
    /// Parse a role string as supplied by the principal source. Accepts an
    /// optional `ROLE_` prefix.
    pub fn parse(role: &str) -> Option<Self> {
        let name = role.strip_prefix("ROLE_").unwrap_or(role);
        if name.eq_ignore_ascii_case("admin") {
            Some(Self::Admin)
        } else if name.eq_ignore_ascii_case("reseller") {
            Some(Self::Reseller)
        } else if name.eq_ignore_ascii_case("user") {
            Some(Self::User)
        } else if name.eq_ignore_ascii_case("server") {
            Some(Self::Server)
        } else {
            None
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rate Limiter
// ═══════════════════════════════════════════════════════════════════════════════

/// Layered rate limiter over per-IP and per-user token buckets.
///
/// Owns its stores; each instance is fully isolated, so tests construct
/// their own rather than sharing process-wide state.
pub struct RateLimiter {
    ip_tier: TierSpec,
    reseller_tier: TierSpec,
    user_tier: TierSpec,
    idle_eviction: Duration,

    ip_buckets: KeyedBucketStore,
    user_buckets: KeyedBucketStore,
    violations: ViolationTracker,

    access_list: Arc<dyn IpAccessList>,
}

impl RateLimiter {
    /// Build a limiter from validated configuration.
    ///
    /// The IP and reseller tiers reset at window boundaries; the user tier
    /// refills continuously.
    pub fn new(config: &AdmissionConfig, access_list: Arc<dyn IpAccessList>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            ip_tier: TierSpec::new(config.ip.capacity, config.ip.window, RefillPolicy::FixedWindow),
            reseller_tier: TierSpec::new(
                config.reseller.capacity,
                config.reseller.window,
                RefillPolicy::FixedWindow,
            ),
            user_tier: TierSpec::new(config.user.capacity, config.user.window, RefillPolicy::Greedy),
            idle_eviction: config.idle_eviction,
            ip_buckets: KeyedBucketStore::new(),
            user_buckets: KeyedBucketStore::new(),
            violations: ViolationTracker::new(config.blacklist_threshold),
            access_list,
        })
    }

    /// Check the IP tier for one request from `ip`.
    ///
    /// Success forgives any accumulated violations; failure records one and
    /// may escalate the IP to the blacklist collaborator.
    pub fn allow_for_ip(&self, ip: &str) -> bool {
        let allowed = match self.consume(&self.ip_buckets, ip, &self.ip_tier) {
            Ok(allowed) => allowed,
            Err(e) => {
                e.log();
                false
            }
        };

        if allowed {
            self.violations.record_success(ip);
        } else {
            self.record_violation(ip);
        }

        counter!(
            "warden_admission_total",
            "tier" => "ip",
            "allowed" => allowed.to_string(),
        )
        .increment(1);

        allowed
    }

    /// Check the user tier for one request from `user_id` with `role`.
    ///
    /// Admins and trusted servers bypass. An unrecognized role is a
    /// configuration error and rejects; no default tier is assumed. User
    /// failures never escalate to the blacklist: that is an IP-level
    /// concept.
    pub fn allow_for_user(&self, user_id: &str, role: &str) -> bool {
        let allowed = match Role::parse(role) {
            Some(Role::Admin) | Some(Role::Server) => true,
            Some(Role::Reseller) => self.consume_user(user_id, &self.reseller_tier),
            Some(Role::User) => self.consume_user(user_id, &self.user_tier),
            None => {
                error!(role, user_id, "Unrecognized role, rejecting");
                false
            }
        };

        counter!(
            "warden_admission_total",
            "tier" => "user",
            "allowed" => allowed.to_string(),
        )
        .increment(1);

        allowed
    }

    /// Remaining tokens for an IP key, for diagnostics. Does not create a
    /// bucket or refresh its last-access time.
    pub fn probe_ip(&self, ip: &str) -> Option<u64> {
        self.ip_buckets.get(ip).map(|bucket| bucket.lock().available())
    }

    /// Remaining tokens for a user key, for diagnostics.
    pub fn probe_user(&self, user_id: &str) -> Option<u64> {
        self.user_buckets
            .get(user_id)
            .map(|bucket| bucket.lock().available())
    }

    /// Current consecutive-violation count for an IP.
    pub fn violation_count(&self, ip: &str) -> u32 {
        self.violations.count(ip)
    }

    /// Evict every key idle longer than the configured window from all
    /// three stores. Returns the number of evicted keys.
    pub fn evict_idle(&self) -> usize {
        let mut evicted = 0;

        for ip in self.ip_buckets.idle_keys(self.idle_eviction) {
            self.ip_buckets.evict(&ip);
            self.violations.clear(&ip);
            evicted += 1;
        }

        for user in self.user_buckets.idle_keys(self.idle_eviction) {
            self.user_buckets.evict(&user);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, "Evicted idle rate-limit entries");
            counter!("warden_reaper_evictions_total").increment(evicted as u64);
        }
        evicted
    }

    fn consume(&self, store: &KeyedBucketStore, key: &str, tier: &TierSpec) -> Result<bool> {
        let bucket = store.get_or_create(key, tier)?;
        let allowed = bucket.lock().try_consume(1);
        Ok(allowed)
    }

    fn consume_user(&self, user_id: &str, tier: &TierSpec) -> bool {
        match self.consume(&self.user_buckets, user_id, tier) {
            Ok(allowed) => allowed,
            Err(e) => {
                e.log();
                false
            }
        }
    }

    fn record_violation(&self, ip: &str) {
        if !self.violations.record_failure(ip) {
            return;
        }

        warn!(ip, "Violation threshold reached, blacklisting");
        counter!("warden_blacklist_escalations_total").increment(1);

        // Escalation side effects must not turn into an exception on the
        // admission path; a failed add is logged and retried at the next
        // threshold crossing.
        if let Err(e) = self.access_list.add_to_blacklist(ip) {
            error!(ip, error = %e, "Failed to report IP to blacklist");
        }

        // Local state for the key is cleared; the blacklist now owns it.
        self.ip_buckets.evict(ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierLimit;
    use crate::ratelimit::access::MemoryAccessList;

    fn config() -> AdmissionConfig {
        AdmissionConfig {
            ip: TierLimit { capacity: 3, window: Duration::from_secs(10) },
            reseller: TierLimit { capacity: 5, window: Duration::from_secs(10) },
            user: TierLimit { capacity: 4, window: Duration::from_secs(10) },
            blacklist_threshold: 3,
            ..AdmissionConfig::default()
        }
    }

    fn limiter() -> (RateLimiter, Arc<MemoryAccessList>) {
        let access = Arc::new(MemoryAccessList::new());
        let limiter = RateLimiter::new(&config(), access.clone()).unwrap();
        (limiter, access)
    }

    #[test]
    fn role_parsing() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("ROLE_RESELLER"), Some(Role::Reseller));
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("SERVER"), Some(Role::Server));
        assert_eq!(Role::parse("SUPERUSER"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ip_tier_enforces_capacity() {
        let (limiter, _) = limiter();

        for _ in 0..3 {
            assert!(limiter.allow_for_ip("1.2.3.4"));
        }
        assert!(!limiter.allow_for_ip("1.2.3.4"));
        assert_eq!(limiter.probe_ip("1.2.3.4"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn ip_window_resets() {
        let (limiter, _) = limiter();

        for _ in 0..3 {
            assert!(limiter.allow_for_ip("1.2.3.4"));
        }
        assert!(!limiter.allow_for_ip("1.2.3.4"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.allow_for_ip("1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_violations() {
        let (limiter, _) = limiter();

        for _ in 0..3 {
            limiter.allow_for_ip("1.2.3.4");
        }
        limiter.allow_for_ip("1.2.3.4");
        limiter.allow_for_ip("1.2.3.4");
        assert_eq!(limiter.violation_count("1.2.3.4"), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.allow_for_ip("1.2.3.4"));
        assert_eq!(limiter.violation_count("1.2.3.4"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_failures_blacklist_the_ip() {
        let (limiter, access) = limiter();

        for _ in 0..3 {
            assert!(limiter.allow_for_ip("6.6.6.6"));
        }

        // threshold - 1 failures: not blacklisted yet.
        limiter.allow_for_ip("6.6.6.6");
        limiter.allow_for_ip("6.6.6.6");
        assert!(!access.is_blacklisted("6.6.6.6").unwrap());

        // threshold-th failure escalates and clears local state.
        limiter.allow_for_ip("6.6.6.6");
        assert!(access.is_blacklisted("6.6.6.6").unwrap());
        assert_eq!(limiter.violation_count("6.6.6.6"), 0);
        assert_eq!(limiter.probe_ip("6.6.6.6"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn admin_bypasses_user_tier() {
        let (limiter, _) = limiter();

        for _ in 0..100 {
            assert!(limiter.allow_for_user("alice", "ADMIN"));
        }
        assert_eq!(limiter.probe_user("alice"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn server_role_bypasses_user_tier() {
        let (limiter, _) = limiter();

        // Trusted service callers are admitted without a bucket, same as
        // admins, even when the filter above did not short-circuit them.
        for _ in 0..100 {
            assert!(limiter.allow_for_user("gateway", "SERVER"));
        }
        assert_eq!(limiter.probe_user("gateway"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn user_tier_enforces_capacity() {
        let (limiter, _) = limiter();

        for _ in 0..4 {
            assert!(limiter.allow_for_user("bob", "USER"));
        }
        assert!(!limiter.allow_for_user("bob", "USER"));
    }

    #[tokio::test(start_paused = true)]
    async fn user_tier_refills_continuously() {
        let (limiter, _) = limiter();

        for _ in 0..4 {
            assert!(limiter.allow_for_user("bob", "USER"));
        }
        assert!(!limiter.allow_for_user("bob", "USER"));

        // 4 tokens per 10s: one token back after 2.5s.
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert!(limiter.allow_for_user("bob", "USER"));
        assert!(!limiter.allow_for_user("bob", "USER"));
    }

    #[tokio::test(start_paused = true)]
    async fn reseller_tier_is_separate_from_user_tier() {
        let (limiter, _) = limiter();

        for _ in 0..5 {
            assert!(limiter.allow_for_user("acme", "RESELLER"));
        }
        assert!(!limiter.allow_for_user("acme", "RESELLER"));
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_role_rejects() {
        let (limiter, _) = limiter();
        assert!(!limiter.allow_for_user("mallory", "SUPERUSER"));
    }

    #[tokio::test(start_paused = true)]
    async fn user_failures_never_escalate() {
        let (limiter, access) = limiter();

        for _ in 0..50 {
            limiter.allow_for_user("bob", "USER");
        }
        assert!(!access.is_blacklisted("bob").unwrap());
        assert_eq!(limiter.violation_count("bob"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_clears_all_stores() {
        let (limiter, _) = limiter();

        limiter.allow_for_ip("1.2.3.4");
        limiter.allow_for_user("bob", "USER");
        for _ in 0..4 {
            limiter.allow_for_ip("5.5.5.5");
        }
        assert_eq!(limiter.violation_count("5.5.5.5"), 1);

        tokio::time::advance(Duration::from_secs(601)).await;
        // A late arrival keeps its key alive.
        limiter.allow_for_ip("9.9.9.9");

        let evicted = limiter.evict_idle();
        assert_eq!(evicted, 3);
        assert_eq!(limiter.probe_ip("1.2.3.4"), None);
        assert_eq!(limiter.probe_user("bob"), None);
        assert_eq!(limiter.violation_count("5.5.5.5"), 0);
        assert!(limiter.probe_ip("9.9.9.9").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_admissions_never_exceed_capacity() {
        // High threshold: escalation would clear the bucket mid-test.
        let config = AdmissionConfig {
            blacklist_threshold: 1000,
            ..config()
        };
        let access = Arc::new(MemoryAccessList::new());
        let limiter = Arc::new(RateLimiter::new(&config, access).unwrap());
        let mut handles = Vec::new();

        for _ in 0..64 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.allow_for_ip("7.7.7.7") }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }
}
