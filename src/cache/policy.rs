//! Cache usage policy and expiry arithmetic.

use crate::config::Config;
use std::time::{Duration, SystemTime};

/// How a request may use the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheUsage {
    /// Read fresh entries, write successful responses back.
    #[default]
    ReadWrite,
    /// Never touch the network; serve whatever the cache holds.
    CacheOnly,
    /// Bypass the cache entirely.
    NoCache,
}

/// Expiry policy applied to cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub usage: CacheUsage,
    /// Entries older than this are expired. The default never expires.
    pub max_age: Duration,
    /// Treat every entry as expired regardless of age.
    pub force_expire: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            usage: CacheUsage::ReadWrite,
            max_age: Duration::MAX,
            force_expire: false,
        }
    }
}

impl CachePolicy {
    pub fn cache_only() -> Self {
        Self {
            usage: CacheUsage::CacheOnly,
            ..Default::default()
        }
    }

    pub fn no_cache() -> Self {
        Self {
            usage: CacheUsage::NoCache,
            ..Default::default()
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_force_expire(mut self, force_expire: bool) -> Self {
        self.force_expire = force_expire;
        self
    }

    /// True when an entry stamped at `entry_time` has outlived
    /// `max_age` (or expiry is forced).
    pub fn is_expired(&self, entry_time: SystemTime) -> bool {
        if self.force_expire {
            return true;
        }
        match SystemTime::now().duration_since(entry_time) {
            Ok(age) => age > self.max_age,
            // entry stamped in the future; treat as fresh
            Err(_) => false,
        }
    }
}

/// True when stored metadata demands revalidation on every read: a
/// `cache-control` header whose value contains `no-cache`. Such an
/// entry may be cached but is expired on every lookup.
pub fn must_revalidate(metadata: &Config) -> bool {
    metadata
        .get("cache-control")
        .map(|v| v.contains("no-cache"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_never_expires() {
        let policy = CachePolicy::default();
        let old = SystemTime::now() - Duration::from_secs(10 * 365 * 24 * 3600);
        assert!(!policy.is_expired(old));
    }

    #[test]
    fn test_max_age_expiry() {
        let policy = CachePolicy::default().with_max_age(Duration::from_secs(60));
        let fresh = SystemTime::now() - Duration::from_secs(30);
        let stale = SystemTime::now() - Duration::from_secs(120);
        assert!(!policy.is_expired(fresh));
        assert!(policy.is_expired(stale));
    }

    #[test]
    fn test_force_expire_overrides_age() {
        let policy = CachePolicy::default().with_force_expire(true);
        assert!(policy.is_expired(SystemTime::now()));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let policy = CachePolicy::default().with_max_age(Duration::from_secs(1));
        let future = SystemTime::now() + Duration::from_secs(3600);
        assert!(!policy.is_expired(future));
    }

    #[test]
    fn test_must_revalidate_on_no_cache() {
        let mut meta = Config::new("response-headers");
        assert!(!must_revalidate(&meta));
        meta.set("cache-control", "max-age=0, no-cache");
        assert!(must_revalidate(&meta));
        meta.set("cache-control", "public, max-age=60");
        assert!(!must_revalidate(&meta));
    }
}
