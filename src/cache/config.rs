//! Result cache configuration.
//!
//! Controls entry lifetimes, freshness and revalidation locking via the
//! `[cache]` section of `alphafeed.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

// Default values for cache configuration
const DEFAULT_ENTRY_TTL_SECS: u64 = 300;
const DEFAULT_SOFT_TTL_SECS: u64 = 60;
const DEFAULT_LOCK_TTL_SECS: u64 = 30;
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 256;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Hard expiry of a cached ranking.
    pub entry_ttl: Duration,
    /// Age after which a cached ranking is served stale and revalidated.
    pub soft_ttl: Duration,
    /// Lifetime of a revalidation lock if its holder never releases it.
    pub lock_ttl: Duration,
    /// Maximum rankings kept by the in-memory store. Revalidation locks are
    /// held separately and do not count against it.
    pub memory_entry_limit: usize,
    /// Upper bound on waiting for in-flight revalidations at shutdown.
    pub shutdown_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(DEFAULT_ENTRY_TTL_SECS),
            soft_ttl: Duration::from_secs(DEFAULT_SOFT_TTL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            entry_ttl: settings.entry_ttl,
            soft_ttl: settings.soft_ttl,
            lock_ttl: settings.lock_ttl,
            memory_entry_limit: settings.memory_entry_limit,
            shutdown_grace: settings.shutdown_grace,
        }
    }
}

impl CacheConfig {
    /// Returns the memory entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// True once an entry of the given age should be refreshed.
    pub fn is_stale(&self, age: Duration) -> bool {
        age >= self.soft_ttl
    }
}
