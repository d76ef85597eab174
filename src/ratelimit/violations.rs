//! Per-IP violation counting and escalation.

use dashmap::DashMap;

/// Counts consecutive failed admission checks per IP.
///
/// Escalation is monotonic and self-healing: the count grows by exactly one
/// per failed check, crossing the threshold reports escalation exactly once
/// and clears the entry, and a single successful check forgives the IP
/// entirely.
pub struct ViolationTracker {
    counts: DashMap<String, u32>,
    threshold: u32,
}

impl ViolationTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: DashMap::new(),
            threshold,
        }
    }

    /// Record a failed admission check for `ip`.
    ///
    /// Returns `true` on the check that reaches the threshold; the entry is
    /// cleared so the caller escalates exactly once.
    pub fn record_failure(&self, ip: &str) -> bool {
        let crossed = {
            let mut count = self.counts.entry(ip.to_string()).or_insert(0);
            *count += 1;
            // Equality, not >=: under concurrent failures only one caller
            // observes the threshold value.
            *count == self.threshold
        };

        if crossed {
            self.counts.remove(ip);
        }
        crossed
    }

    /// Forgive `ip` after a successful admission check. No-op when no entry
    /// exists.
    pub fn record_success(&self, ip: &str) {
        self.counts.remove(ip);
    }

    /// Drop the entry for `ip`, if any. Used by the reaper.
    pub fn clear(&self, ip: &str) {
        self.counts.remove(ip);
    }

    /// Current consecutive-failure count for `ip`.
    pub fn count(&self, ip: &str) -> u32 {
        self.counts.get(ip).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// Number of IPs with a live entry.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
