//! Background refresh of stale rankings.
//!
//! At most one refresh per key runs in this process (tracked in a registry of
//! task handles) and at most one across processes (guarded by a lock entry in
//! the shared store). A lock is only ever released by the worker whose token
//! it holds. Shutdown cancels everything still running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::ranking::RankingEngine;
use crate::application::trending::refresh;
use crate::domain::trending::TrendingQuery;
use crate::infra::telemetry::metric;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::store::{CacheError, CacheStore};

/// Result of trying to take the cross-process revalidation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another worker holds the lock. Not an error.
    Contended,
}

/// What happened to a revalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidation {
    Spawned,
    AlreadyRunning,
    ShuttingDown,
}

/// A running refresh and the lock token it writes.
struct InFlight {
    handle: JoinHandle<()>,
    token: String,
}

type Registry = DashMap<CacheKey, InFlight>;

struct Shared {
    engine: Arc<RankingEngine>,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    in_flight: Registry,
    closed: AtomicBool,
}

pub struct RevalidationCoordinator {
    shared: Arc<Shared>,
}

impl RevalidationCoordinator {
    pub fn new(engine: Arc<RankingEngine>, store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                store,
                config,
                in_flight: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Starts a background refresh of `key` unless one is already running
    /// here or the coordinator is shutting down. Never blocks on the refresh.
    pub fn revalidate(&self, key: CacheKey, query: TrendingQuery) -> Revalidation {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Revalidation::ShuttingDown;
        }

        match self.shared.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                counter!(metric::REVALIDATION_SKIPPED).increment(1);
                debug!(
                    target: "alphafeed::cache::revalidate",
                    key = %key,
                    "revalidation already in flight"
                );
                Revalidation::AlreadyRunning
            }
            Entry::Vacant(vacant) => {
                // Checked again under the shard lock so shutdown cannot miss a task.
                if self.shared.closed.load(Ordering::SeqCst) {
                    return Revalidation::ShuttingDown;
                }
                let shared = Arc::clone(&self.shared);
                let token = Uuid::new_v4().to_string();
                let handle = tokio::spawn(run(shared, key, query, token.clone()));
                vacant.insert(InFlight { handle, token });
                Revalidation::Spawned
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.shared.in_flight.contains_key(key)
    }

    /// Refuses new work, cancels every running refresh and waits up to
    /// `grace` for them to wind down. Afterwards each cancelled refresh's lock
    /// is released if it still carries that refresh's token; locks taken by
    /// other workers stay. Returns the number of cancelled refreshes.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.shared.closed.store(true, Ordering::SeqCst);

        let keys: Vec<CacheKey> = self
            .shared
            .in_flight
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut cancelled = Vec::with_capacity(keys.len());
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((key, InFlight { handle, token })) = self.shared.in_flight.remove(&key) {
                handle.abort();
                cancelled.push((key, token));
                handles.push(handle);
            }
        }

        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            warn!(
                target: "alphafeed::cache::revalidate",
                grace_ms = grace.as_millis() as u64,
                "revalidation tasks did not stop within the grace period"
            );
        }

        for (key, token) in &cancelled {
            release_lock(self.shared.store.as_ref(), key, token).await;
        }

        info!(
            target: "alphafeed::cache::revalidate",
            cancelled = cancelled.len(),
            "revalidation coordinator stopped"
        );
        cancelled.len()
    }
}

/// Removes the registry entry when the task ends, including on abort.
struct Registration {
    shared: Arc<Shared>,
    key: CacheKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.in_flight.remove(&self.key);
    }
}

async fn acquire_lock(
    store: &dyn CacheStore,
    lock_key: &str,
    token: &str,
    ttl: Duration,
) -> Result<LockOutcome, CacheError> {
    if store.set_if_absent(lock_key, token.to_string(), ttl).await? {
        Ok(LockOutcome::Acquired)
    } else {
        Ok(LockOutcome::Contended)
    }
}

/// Deletes the lock of `key` if it still holds `token`.
async fn release_lock(store: &dyn CacheStore, key: &CacheKey, token: &str) {
    match store.release(&key.lock_key(), token).await {
        Ok(true) => {}
        Ok(false) => debug!(
            target: "alphafeed::cache::revalidate",
            key = %key,
            "revalidation lock not ours to release"
        ),
        Err(err) => warn!(
            target: "alphafeed::cache::revalidate",
            key = %key,
            error = %err,
            "failed to release revalidation lock"
        ),
    }
}

async fn run(shared: Arc<Shared>, key: CacheKey, query: TrendingQuery, token: String) {
    let registration = Registration {
        shared: Arc::clone(&shared),
        key,
    };
    let key = &registration.key;
    let lock_key = key.lock_key();

    match acquire_lock(shared.store.as_ref(), &lock_key, &token, shared.config.lock_ttl).await {
        Ok(LockOutcome::Acquired) => {}
        Ok(LockOutcome::Contended) => {
            counter!(metric::REVALIDATION_SKIPPED).increment(1);
            debug!(
                target: "alphafeed::cache::revalidate",
                key = %key,
                "revalidation lock held elsewhere"
            );
            return;
        }
        Err(err) => {
            counter!(metric::REVALIDATION_SKIPPED).increment(1);
            warn!(
                target: "alphafeed::cache::revalidate",
                key = %key,
                error = %err,
                "could not take revalidation lock"
            );
            return;
        }
    }

    counter!(metric::REVALIDATION_STARTED).increment(1);
    match refresh(
        &shared.engine,
        shared.store.as_ref(),
        key,
        &query,
        shared.config.entry_ttl,
    )
    .await
    {
        Ok(items) => debug!(
            target: "alphafeed::cache::revalidate",
            key = %key,
            items = items.len(),
            "revalidation finished"
        ),
        Err(err) => {
            counter!(metric::REVALIDATION_FAILED).increment(1);
            warn!(
                target: "alphafeed::cache::revalidate",
                key = %key,
                error = %err,
                "revalidation failed; keeping previous entry"
            );
        }
    }

    release_lock(shared.store.as_ref(), key, &token).await;
}
