//! Canonical cache keys.
//!
//! Keys are plain strings so that every store (in-memory or shared) agrees on
//! them byte for byte.

use std::fmt;

use crate::domain::trending::TrendingQuery;

const TRENDING_PREFIX: &str = "trending_tokens";
const LOCK_SUFFIX: &str = ":lock";

/// Key of a cached ranking:
/// `trending_tokens:{window_secs}:{limit}:{sort_field}:{sort_order}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn trending(query: &TrendingQuery) -> Self {
        Self(format!(
            "{TRENDING_PREFIX}:{}:{}:{}:{}",
            query.window.as_secs(),
            query.limit,
            query.sort_field.as_str(),
            query.sort_order.as_str(),
        ))
    }

    /// Key of the revalidation lock guarding this entry.
    pub fn lock_key(&self) -> String {
        format!("{}{LOCK_SUFFIX}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether `key` names a revalidation lock rather than a ranking.
pub(crate) fn is_lock_key(key: &str) -> bool {
    key.ends_with(LOCK_SUFFIX)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
