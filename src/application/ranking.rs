use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::histogram;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::application::enrichment::EnrichmentClient;
use crate::application::repos::{MentionsRepo, RepoError};
use crate::domain::trending::{TrendingItem, TrendingQuery, sort_by_market_field};
use crate::infra::telemetry::metric;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("mention store failed: {0}")]
    Repo(#[from] RepoError),
}

/// Composes mention aggregates with market data into the ranked list.
pub struct RankingEngine {
    mentions: Arc<dyn MentionsRepo>,
    enrichment: Arc<EnrichmentClient>,
}

impl RankingEngine {
    pub fn new(mentions: Arc<dyn MentionsRepo>, enrichment: Arc<EnrichmentClient>) -> Self {
        Self {
            mentions,
            enrichment,
        }
    }

    #[instrument(
        skip(self),
        fields(
            window_secs = query.window.as_secs(),
            limit = query.limit,
            sort_by = query.sort_field.as_str(),
            sort_order = query.sort_order.as_str()
        )
    )]
    pub async fn compute(&self, query: &TrendingQuery) -> Result<Vec<TrendingItem>, RankingError> {
        let started = Instant::now();

        let aggregates = self
            .mentions
            .aggregate(query.window, query.limit, query.aggregate_order())
            .await?;

        let lookups = aggregates.iter().map(|aggregate| async move {
            match aggregate.address.as_deref() {
                Some(address) => self.enrichment.fetch(address).await.into_market(),
                None => None,
            }
        });
        let markets = join_all(lookups).await;

        let mut items: Vec<TrendingItem> = aggregates
            .into_iter()
            .zip(markets)
            .map(|(aggregate, market)| TrendingItem::from_aggregate(aggregate, market))
            .collect();
        sort_by_market_field(&mut items, query.sort_field, query.sort_order);
        items.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(metric::TRENDING_COMPUTE_MS).record(elapsed_ms);
        debug!(
            target: "alphafeed::ranking",
            items = items.len(),
            elapsed_ms,
            "ranking computed"
        );
        Ok(items)
    }
}
