#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use alphafeed::application::enrichment::{EnrichmentClient, MarketDataError, MarketDataSource};
use alphafeed::application::mentions::MentionService;
use alphafeed::application::ranking::RankingEngine;
use alphafeed::application::repos::{MentionsRepo, RepoError};
use alphafeed::application::trending::{TrendingPolicy, TrendingService};
use alphafeed::cache::{
    CacheConfig, CacheEntry, CacheError, CacheStore, MemoryCacheStore, RevalidationCoordinator,
};
use alphafeed::domain::mentions::{AggregateOrder, Mention, MentionAggregate, MentionInput, NewMention};
use alphafeed::domain::trending::{MarketData, TimeWindow};
use alphafeed::infra::http::HttpState;
use alphafeed::infra::memory::MemoryMentionsRepo;

/// Mention store double that counts ranking passes and can be made to fail
/// or stall on demand.
#[derive(Default)]
pub struct CountingRepo {
    inner: MemoryMentionsRepo,
    aggregate_calls: AtomicUsize,
    failing: AtomicBool,
    delay_ms: std::sync::atomic::AtomicU64,
}

impl CountingRepo {
    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl MentionsRepo for CountingRepo {
    async fn record_mention(&self, mention: NewMention) -> Result<Mention, RepoError> {
        self.inner.record_mention(mention).await
    }

    async fn aggregate(
        &self,
        window: TimeWindow,
        limit: u32,
        order: AggregateOrder,
    ) -> Result<Vec<MentionAggregate>, RepoError> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        self.inner.aggregate(window, limit, order).await
    }

    async fn resolve_network(&self, ticker: &str) -> Result<Option<String>, RepoError> {
        self.inner.resolve_network(ticker).await
    }

    async fn ping(&self) -> Result<(), RepoError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }
}

/// Market data double keyed by address.
#[derive(Default)]
pub struct StubMarket {
    listings: HashMap<String, MarketData>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl StubMarket {
    pub fn with_listing(mut self, address: &str, data: MarketData) -> Self {
        self.listings.insert(address.to_string(), data);
        self
    }

    pub fn failing_for(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for StubMarket {
    async fn lookup(&self, address: &str) -> Result<Option<MarketData>, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(address) {
            return Err(MarketDataError::Status { status: 502 });
        }
        Ok(self.listings.get(address).cloned())
    }
}

/// Cache store double over a [`MemoryCacheStore`] whose reads, writes and
/// lock attempts can each be made to fail.
pub struct FailingStore {
    inner: Arc<MemoryCacheStore>,
    reads: AtomicBool,
    writes: AtomicBool,
    locks: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryCacheStore>) -> Self {
        Self {
            inner,
            reads: AtomicBool::new(false),
            writes: AtomicBool::new(false),
            locks: AtomicBool::new(false),
        }
    }

    pub fn fail_reads(&self, failing: bool) {
        self.reads.store(failing, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, failing: bool) {
        self.writes.store(failing, Ordering::SeqCst);
    }

    pub fn fail_locks(&self, failing: bool) {
        self.locks.store(failing, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), CacheError> {
        if flag.load(Ordering::SeqCst) {
            return Err(CacheError::backend(format!("{op} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Self::check(&self.reads, "get")?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        Self::check(&self.writes, "put")?;
        self.inner.put(key, payload, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        Self::check(&self.locks, "set_if_absent")?;
        self.inner.set_if_absent(key, payload, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, CacheError> {
        self.inner.release(key, token).await
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        self.inner.purge_expired().await
    }
}

pub fn market(pair: &str, price: f64, change: f64, volume: f64) -> MarketData {
    MarketData {
        pair: pair.to_string(),
        price: Some(price),
        h24_change: Some(change),
        h24_volume: Some(volume),
    }
}

pub fn mention_input(
    ticker: &str,
    network: &str,
    address: Option<&str>,
    at: OffsetDateTime,
) -> MentionInput {
    MentionInput {
        token_ticker: Some(ticker.to_string()),
        network: Some(network.to_string()),
        token_address: address.map(str::to_string),
        channel_name: Some("alpha-room".to_string()),
        message_url: Some(format!("https://t.me/alpha/{ticker}")),
        date: Some(at.format(&Rfc3339).expect("format timestamp")),
        ..MentionInput::default()
    }
}

/// Stores `count` mentions of one item, spaced a minute apart ending
/// `minutes_ago` minutes before now.
pub async fn seed(
    repo: &dyn MentionsRepo,
    ticker: &str,
    network: &str,
    address: Option<&str>,
    count: usize,
    minutes_ago: i64,
) {
    let newest = OffsetDateTime::now_utc() - time::Duration::minutes(minutes_ago);
    for offset in 0..count {
        let at = newest - time::Duration::minutes(offset as i64);
        let mention = mention_input(ticker, network, address, at)
            .validate()
            .expect("valid mention");
        repo.record_mention(mention).await.expect("store mention");
    }
}

pub struct Harness {
    pub repo: Arc<CountingRepo>,
    pub market: Arc<StubMarket>,
    pub store: Arc<MemoryCacheStore>,
    /// What the service and coordinator talk to; wraps `store`.
    pub faults: Arc<FailingStore>,
    pub coordinator: Arc<RevalidationCoordinator>,
    pub service: Arc<TrendingService>,
    pub mentions: Arc<MentionService>,
}

impl Harness {
    pub fn new(config: CacheConfig, market: StubMarket) -> Self {
        let repo = Arc::new(CountingRepo::default());
        let market = Arc::new(market);
        let enrichment = Arc::new(EnrichmentClient::new(
            market.clone(),
            Duration::from_secs(120),
            std::num::NonZeroUsize::new(64).expect("non-zero"),
        ));
        let engine = Arc::new(RankingEngine::new(repo.clone(), enrichment));
        let store = Arc::new(MemoryCacheStore::new(&config));
        let faults = Arc::new(FailingStore::new(store.clone()));
        let coordinator = Arc::new(RevalidationCoordinator::new(
            engine.clone(),
            faults.clone(),
            config.clone(),
        ));
        let service = Arc::new(TrendingService::new(
            engine,
            faults.clone(),
            coordinator.clone(),
            config,
        ));
        let mentions = Arc::new(MentionService::new(repo.clone()));
        Self {
            repo,
            market,
            store,
            faults,
            coordinator,
            service,
            mentions,
        }
    }

    pub fn http_state(&self) -> HttpState {
        HttpState {
            trending: self.service.clone(),
            mentions: self.mentions.clone(),
            policy: TrendingPolicy::default(),
        }
    }

    /// Waits until no revalidation is running, failing after a few seconds.
    pub async fn settle(&self) {
        for _ in 0..200 {
            if self.coordinator.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("revalidations did not settle");
    }
}
