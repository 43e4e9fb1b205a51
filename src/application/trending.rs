//! Read path for `/trending_tokens`: access policy, cache lookup and
//! stale-while-revalidate.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{error, instrument, warn};

use crate::application::ranking::{RankingEngine, RankingError};
use crate::cache::{
    CacheConfig, CacheKey, CacheStore, RevalidationCoordinator, decode_items, encode_items,
};
use crate::domain::trending::{SortField, SortOrder, TimeWindow, TrendingItem, TrendingQuery};
use crate::infra::telemetry::metric;

/// Access tier forwarded by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewerTier {
    #[default]
    Guest,
    Premium,
}

/// Raw query parameters as received on the wire.
#[derive(Debug, Clone, Default)]
pub struct TrendingParams {
    pub time_window: Option<String>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendingPolicy {
    pub default_window: TimeWindow,
    pub default_limit: u32,
    pub max_limit: u32,
    pub guest_limit: u32,
    pub guest_window: TimeWindow,
}

impl Default for TrendingPolicy {
    fn default() -> Self {
        Self {
            default_window: TimeWindow::hours(24),
            default_limit: 10,
            max_limit: 100,
            guest_limit: 3,
            guest_window: TimeWindow::days(7),
        }
    }
}

impl From<&crate::config::TrendingSettings> for TrendingPolicy {
    fn from(settings: &crate::config::TrendingSettings) -> Self {
        Self {
            default_limit: settings.default_limit,
            max_limit: settings.max_limit,
            guest_limit: settings.guest_limit,
            guest_window: TimeWindow::from_secs(settings.guest_window.as_secs()),
            ..Self::default()
        }
    }
}

impl TrendingPolicy {
    /// Parses the parameters, then applies the tier's limits. Clamping
    /// happens before the cache key is derived, so guests and premium
    /// viewers never share an entry for different effective queries.
    pub fn resolve(&self, params: &TrendingParams, tier: ViewerTier) -> TrendingQuery {
        let window = params
            .time_window
            .as_deref()
            .map_or(self.default_window, TimeWindow::parse);
        let limit = params.limit.unwrap_or(i64::from(self.default_limit));
        let sort_field = SortField::parse_or_default(params.sort_by.as_deref());
        let sort_order = SortOrder::parse_or_default(params.sort_order.as_deref());

        let (window, limit) = match tier {
            ViewerTier::Premium => {
                let max = i64::from(self.max_limit.max(1));
                (window, u32::try_from(limit.clamp(1, max)).unwrap_or(1))
            }
            ViewerTier::Guest => (self.guest_window, self.guest_limit),
        };

        TrendingQuery {
            window,
            limit,
            sort_field,
            sort_order,
        }
    }
}

pub struct TrendingService {
    engine: Arc<RankingEngine>,
    store: Arc<dyn CacheStore>,
    coordinator: Arc<RevalidationCoordinator>,
    config: CacheConfig,
}

impl TrendingService {
    pub fn new(
        engine: Arc<RankingEngine>,
        store: Arc<dyn CacheStore>,
        coordinator: Arc<RevalidationCoordinator>,
        config: CacheConfig,
    ) -> Self {
        Self {
            engine,
            store,
            coordinator,
            config,
        }
    }

    /// Ranked items for `query`. Never fails: a broken cache reads as a miss
    /// and a failed computation yields an empty list.
    #[instrument(skip(self), fields(key))]
    pub async fn rank(&self, query: TrendingQuery) -> Vec<TrendingItem> {
        let key = CacheKey::trending(&query);
        tracing::Span::current().record("key", key.as_str());

        if let Some(items) = self.read_cached(&key, &query).await {
            return items;
        }

        counter!(metric::TRENDING_CACHE_MISS).increment(1);
        match refresh(&self.engine, self.store.as_ref(), &key, &query, self.config.entry_ttl).await
        {
            Ok(items) => items,
            Err(err) => {
                error!(
                    target: "alphafeed::trending",
                    key = %key,
                    error = %err,
                    "ranking failed; serving empty list"
                );
                Vec::new()
            }
        }
    }

    async fn read_cached(&self, key: &CacheKey, query: &TrendingQuery) -> Option<Vec<TrendingItem>> {
        let entry = match self.store.get(key.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    target: "alphafeed::trending",
                    key = %key,
                    error = %err,
                    "cache read failed; computing directly"
                );
                return None;
            }
        };

        let items = match decode_items(&entry.payload) {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    target: "alphafeed::trending",
                    key = %key,
                    error = %err,
                    "discarding undecodable cache entry"
                );
                return None;
            }
        };

        if self.config.is_stale(entry.age()) {
            counter!(metric::TRENDING_CACHE_STALE).increment(1);
            self.coordinator.revalidate(key.clone(), *query);
        } else {
            counter!(metric::TRENDING_CACHE_HIT).increment(1);
        }
        Some(items)
    }
}

/// Computes the ranking and stores it under `key`. The write is best-effort:
/// a cache failure is logged and the computed items are still returned.
pub(crate) async fn refresh(
    engine: &RankingEngine,
    store: &dyn CacheStore,
    key: &CacheKey,
    query: &TrendingQuery,
    ttl: Duration,
) -> Result<Vec<TrendingItem>, RankingError> {
    let items = engine.compute(query).await?;

    let stored = match encode_items(&items) {
        Ok(payload) => store.put(key.as_str(), payload, ttl).await,
        Err(err) => Err(err),
    };
    if let Err(err) = stored {
        warn!(
            target: "alphafeed::trending",
            key = %key,
            error = %err,
            "failed to store ranking in cache"
        );
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(window: &str, limit: i64) -> TrendingParams {
        TrendingParams {
            time_window: Some(window.into()),
            limit: Some(limit),
            sort_by: Some("h24_volume".into()),
            sort_order: Some("asc".into()),
        }
    }

    #[test]
    fn defaults_apply_when_parameters_missing() {
        let query = TrendingPolicy::default().resolve(&TrendingParams::default(), ViewerTier::Premium);
        assert_eq!(query.window, TimeWindow::hours(24));
        assert_eq!(query.limit, 10);
        assert_eq!(query.sort_field, SortField::MentionCount);
        assert_eq!(query.sort_order, SortOrder::Desc);
    }

    #[test]
    fn guests_are_pinned_to_guest_shape() {
        let query = TrendingPolicy::default().resolve(&params("1h", 50), ViewerTier::Guest);
        assert_eq!(query.window, TimeWindow::days(7));
        assert_eq!(query.limit, 3);
        assert_eq!(query.sort_field, SortField::H24Volume);
        assert_eq!(query.sort_order, SortOrder::Asc);
    }

    #[test]
    fn premium_limit_is_clamped() {
        let policy = TrendingPolicy::default();
        assert_eq!(policy.resolve(&params("1h", 0), ViewerTier::Premium).limit, 1);
        assert_eq!(policy.resolve(&params("1h", -7), ViewerTier::Premium).limit, 1);
        assert_eq!(policy.resolve(&params("1h", 5000), ViewerTier::Premium).limit, 100);
        assert_eq!(policy.resolve(&params("1h", 25), ViewerTier::Premium).limit, 25);
    }

    #[test]
    fn guest_and_premium_use_distinct_keys() {
        let policy = TrendingPolicy::default();
        let nominal = params("24h", 10);
        let guest = CacheKey::trending(&policy.resolve(&nominal, ViewerTier::Guest));
        let premium = CacheKey::trending(&policy.resolve(&nominal, ViewerTier::Premium));
        assert_ne!(guest, premium);
    }
}
