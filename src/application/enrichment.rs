//! Best-effort market data for ranked items.
//!
//! Provider failures never reach the ranking pass: they become
//! [`Enrichment::Absent`] here. Answers (including "not listed") are cached
//! per address for a short horizon; failures are not.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::lock::mutex_lock;
use crate::domain::trending::MarketData;
use crate::infra::telemetry::metric;

const SOURCE: &str = "application::enrichment";

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data request failed: {0}")]
    Transport(String),
    #[error("market data provider answered with status {status}")]
    Status { status: u16 },
    #[error("market data response could not be decoded: {0}")]
    Decode(String),
}

/// Lookup of current market attributes by item address.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// `Ok(None)` means the provider has no listing for the address.
    async fn lookup(&self, address: &str) -> Result<Option<MarketData>, MarketDataError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    Present(MarketData),
    Absent,
}

impl Enrichment {
    pub fn into_market(self) -> Option<MarketData> {
        match self {
            Enrichment::Present(data) => Some(data),
            Enrichment::Absent => None,
        }
    }
}

struct CachedLookup {
    fetched_at: Instant,
    data: Option<MarketData>,
}

pub struct EnrichmentClient {
    source: Option<Arc<dyn MarketDataSource>>,
    ttl: Duration,
    cache: Mutex<LruCache<String, CachedLookup>>,
}

impl EnrichmentClient {
    pub fn new(source: Arc<dyn MarketDataSource>, ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            source: Some(source),
            ttl,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// A client that never calls out; every item stays unenriched.
    pub fn disabled() -> Self {
        Self {
            source: None,
            ttl: Duration::ZERO,
            cache: Mutex::new(LruCache::new(NonZeroUsize::MIN)),
        }
    }

    pub async fn fetch(&self, address: &str) -> Enrichment {
        let Some(source) = self.source.as_ref() else {
            return Enrichment::Absent;
        };

        if let Some(data) = self.cached(address) {
            counter!(metric::ENRICHMENT_HIT).increment(1);
            return to_enrichment(data);
        }
        counter!(metric::ENRICHMENT_MISS).increment(1);

        match source.lookup(address).await {
            Ok(data) => {
                if data.is_none() {
                    debug!(
                        target: "alphafeed::enrichment",
                        address,
                        "provider has no listing for address"
                    );
                }
                mutex_lock(&self.cache, SOURCE, "store").put(
                    address.to_string(),
                    CachedLookup {
                        fetched_at: Instant::now(),
                        data: data.clone(),
                    },
                );
                to_enrichment(data)
            }
            Err(err) => {
                counter!(metric::ENRICHMENT_FAILURE).increment(1);
                warn!(
                    target: "alphafeed::enrichment",
                    address,
                    error = %err,
                    "market data lookup failed; item stays unenriched"
                );
                Enrichment::Absent
            }
        }
    }

    fn cached(&self, address: &str) -> Option<Option<MarketData>> {
        let mut cache = mutex_lock(&self.cache, SOURCE, "lookup");
        match cache.get(address) {
            Some(hit) if hit.fetched_at.elapsed() < self.ttl => return Some(hit.data.clone()),
            Some(_) => {}
            None => return None,
        }
        cache.pop(address);
        None
    }
}

fn to_enrichment(data: Option<MarketData>) -> Enrichment {
    data.map_or(Enrichment::Absent, Enrichment::Present)
}
