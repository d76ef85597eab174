//! Concurrent keyed bucket storage.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::bucket::{TierSpec, TokenBucket};
use crate::error::Result;

/// Concurrent mapping from an identity key (IP literal, user id) to its
/// bucket, with a last-access timestamp per key.
///
/// Buckets are created lazily on first use with compute-if-absent semantics:
/// two threads racing on the same unseen key construct exactly one bucket.
/// Every lookup, hit or creation, refreshes the key's last-access time.
pub struct KeyedBucketStore {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    last_access: DashMap<String, Instant>,
}

impl KeyedBucketStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            last_access: DashMap::new(),
        }
    }

    /// Look up the bucket for `key`, creating it from `spec` on first use.
    ///
    /// Construction failure (invalid tier spec) propagates so the caller can
    /// fail closed; no half-initialized entry is left behind.
    pub fn get_or_create(&self, key: &str, spec: &TierSpec) -> Result<Arc<Mutex<TokenBucket>>> {
        let bucket = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let bucket = Arc::new(Mutex::new(TokenBucket::new(spec)?));
                entry.insert(bucket.clone());
                bucket
            }
        };

        self.last_access.insert(key.to_string(), Instant::now());
        Ok(bucket)
    }

    /// Peek at an existing bucket without creating one or refreshing its
    /// last-access time.
    pub fn get(&self, key: &str) -> Option<Arc<Mutex<TokenBucket>>> {
        self.buckets.get(key).map(|entry| entry.value().clone())
    }

    /// Remove the timestamp and bucket for `key`.
    ///
    /// The timestamp goes first. A lookup racing the two removals can then
    /// leave at worst an orphaned timestamp, which the next idle sweep
    /// reclaims; the reverse order could strand a live bucket with no
    /// timestamp, invisible to `idle_keys` forever.
    pub fn evict(&self, key: &str) -> bool {
        self.last_access.remove(key);
        self.buckets.remove(key).is_some()
    }

    /// Keys whose last access is older than `idle`.
    pub fn idle_keys(&self, idle: Duration) -> Vec<String> {
        let now = Instant::now();
        self.last_access
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > idle)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Whether `key` currently has a bucket.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }
}

impl Default for KeyedBucketStore {
    fn default() -> Self {
        Self::new()
    }
}
