//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::mentions::{AggregateOrder, Mention, MentionAggregate, NewMention};
use crate::domain::trending::TimeWindow;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Append-only log of alpha-call mentions.
#[async_trait]
pub trait MentionsRepo: Send + Sync {
    async fn record_mention(&self, mention: NewMention) -> Result<Mention, RepoError>;

    /// Groups mentions observed within `window` of now, ordered by `order`
    /// and truncated to `limit` groups.
    async fn aggregate(
        &self,
        window: TimeWindow,
        limit: u32,
        order: AggregateOrder,
    ) -> Result<Vec<MentionAggregate>, RepoError>;

    async fn resolve_network(&self, ticker: &str) -> Result<Option<String>, RepoError>;

    /// Cheap round trip used by the health endpoint.
    async fn ping(&self) -> Result<(), RepoError>;
}
