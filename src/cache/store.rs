//! Cache storage seam and the in-process implementation.
//!
//! A store is passive: it keeps what it is given until expiry and reports an
//! entry's age. Freshness decisions belong to the caller.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::trending::TrendingItem;

use super::config::CacheConfig;
use super::keys::is_lock_key;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("failed to encode cache payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache payload: {0}")]
    Decode(#[source] serde_json::Error),
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(payload: String, ttl: Duration) -> Self {
        let created_at = OffsetDateTime::now_utc();
        Self {
            payload,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Time since the entry was written; zero if the clock went backwards.
    pub fn age(&self) -> Duration {
        duration_between(self.created_at, OffsetDateTime::now_utc())
    }

    /// Time left until hard expiry; zero once expired.
    pub fn remaining(&self) -> Duration {
        duration_between(OffsetDateTime::now_utc(), self.expires_at)
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

fn duration_between(from: OffsetDateTime, to: OffsetDateTime) -> Duration {
    Duration::try_from(to - from).unwrap_or(Duration::ZERO)
}

/// Key/value store with expiry and an atomic set-if-absent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the entry unless it is missing or expired.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Writes or overwrites an entry with a fresh TTL.
    async fn put(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError>;

    /// Writes only if no unexpired entry exists. Returns whether it wrote.
    async fn set_if_absent(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes `key` only while its payload is still `token`. Returns whether
    /// it deleted.
    async fn release(&self, key: &str, token: &str) -> Result<bool, CacheError>;

    /// Drops expired entries and returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

pub fn encode_items(items: &[TrendingItem]) -> Result<String, CacheError> {
    serde_json::to_string(items).map_err(CacheError::Encode)
}

pub fn decode_items(payload: &str) -> Result<Vec<TrendingItem>, CacheError> {
    serde_json::from_str(payload).map_err(CacheError::Decode)
}

/// Store for a single process. Rankings live in an LRU bounded by
/// `memory_entry_limit`; lock entries are kept apart so that a burst of
/// rankings never evicts a live lock.
pub struct MemoryCacheStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
    locks: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_entry_limit_non_zero())),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len() + mutex_lock(&self.locks, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live(entry: Option<&CacheEntry>, now: OffsetDateTime) -> Option<&CacheEntry> {
    entry.filter(|entry| !entry.is_expired_at(now))
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = OffsetDateTime::now_utc();
        if is_lock_key(key) {
            let locks = mutex_lock(&self.locks, SOURCE, "get");
            return Ok(live(locks.get(key), now).cloned());
        }

        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => true,
            Some(entry) => return Ok(Some(entry.clone())),
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(payload, ttl);
        if is_lock_key(key) {
            mutex_lock(&self.locks, SOURCE, "put").insert(key.to_string(), entry);
        } else {
            mutex_lock(&self.entries, SOURCE, "put").put(key.to_string(), entry);
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = OffsetDateTime::now_utc();
        if is_lock_key(key) {
            let mut locks = mutex_lock(&self.locks, SOURCE, "set_if_absent");
            if live(locks.get(key), now).is_some() {
                return Ok(false);
            }
            locks.insert(key.to_string(), CacheEntry::new(payload, ttl));
            return Ok(true);
        }

        let mut entries = mutex_lock(&self.entries, SOURCE, "set_if_absent");
        if live(entries.peek(key), now).is_some() {
            return Ok(false);
        }
        entries.put(key.to_string(), CacheEntry::new(payload, ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if is_lock_key(key) {
            mutex_lock(&self.locks, SOURCE, "delete").remove(key);
        } else {
            mutex_lock(&self.entries, SOURCE, "delete").pop(key);
        }
        Ok(())
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, CacheError> {
        let now = OffsetDateTime::now_utc();
        if is_lock_key(key) {
            let mut locks = mutex_lock(&self.locks, SOURCE, "release");
            if live(locks.get(key), now).is_some_and(|entry| entry.payload == token) {
                locks.remove(key);
                return Ok(true);
            }
            return Ok(false);
        }

        let mut entries = mutex_lock(&self.entries, SOURCE, "release");
        if live(entries.peek(key), now).is_some_and(|entry| entry.payload == token) {
            entries.pop(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = OffsetDateTime::now_utc();
        let mut purged = 0u64;

        let mut entries = mutex_lock(&self.entries, SOURCE, "purge_expired");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        purged += expired.len() as u64;
        drop(entries);

        let mut locks = mutex_lock(&self.locks, SOURCE, "purge_expired");
        let before = locks.len();
        locks.retain(|_, entry| !entry.is_expired_at(now));
        purged += (before - locks.len()) as u64;

        Ok(purged)
    }
}
