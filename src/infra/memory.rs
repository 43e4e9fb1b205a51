//! In-process mention store with the same grouping rules as Postgres.
//!
//! Backs tests and local runs without a database.

use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{MentionsRepo, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::mentions::{
    AggregateOrder, Mention, MentionAggregate, NewMention, aggregate_mentions,
    most_frequent_network,
};
use crate::domain::trending::TimeWindow;

const SOURCE: &str = "infra::memory";

#[derive(Default)]
pub struct MemoryMentionsRepo {
    mentions: RwLock<Vec<Mention>>,
    next_id: AtomicI64,
}

impl MemoryMentionsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.mentions, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MentionsRepo for MemoryMentionsRepo {
    async fn record_mention(&self, mention: NewMention) -> Result<Mention, RepoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = Mention::from_new(id, mention);
        rw_write(&self.mentions, SOURCE, "record_mention").push(stored.clone());
        Ok(stored)
    }

    async fn aggregate(
        &self,
        window: TimeWindow,
        limit: u32,
        order: AggregateOrder,
    ) -> Result<Vec<MentionAggregate>, RepoError> {
        let since = window.since(OffsetDateTime::now_utc());
        let mentions = rw_read(&self.mentions, SOURCE, "aggregate");
        Ok(aggregate_mentions(
            mentions.iter(),
            since,
            usize::try_from(limit).unwrap_or(usize::MAX),
            order,
        ))
    }

    async fn resolve_network(&self, ticker: &str) -> Result<Option<String>, RepoError> {
        let mentions = rw_read(&self.mentions, SOURCE, "resolve_network");
        Ok(most_frequent_network(mentions.iter(), ticker))
    }

    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mentions::MentionInput;
    use time::Duration;

    fn new_mention(ticker: &str, minutes_ago: i64) -> NewMention {
        let at = OffsetDateTime::now_utc() - Duration::minutes(minutes_ago);
        MentionInput {
            token_ticker: Some(ticker.into()),
            network: Some("eth".into()),
            token_address: Some(format!("0x{ticker}")),
            channel_name: Some("alpha-room".into()),
            message_url: Some("https://t.me/alpha/1".into()),
            date: Some(at.format(&time::format_description::well_known::Rfc3339).unwrap()),
            ..MentionInput::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let repo = MemoryMentionsRepo::new();
        let first = repo.record_mention(new_mention("ABC", 1)).await.unwrap();
        let second = repo.record_mention(new_mention("ABC", 1)).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn larger_windows_never_lose_counts() {
        let repo = MemoryMentionsRepo::new();
        for minutes in [1, 30, 90, 600, 3000] {
            repo.record_mention(new_mention("ABC", minutes)).await.unwrap();
        }
        let mut previous = 0;
        for window in [TimeWindow::hours(1), TimeWindow::hours(2), TimeWindow::days(1), TimeWindow::days(7)] {
            let rows = repo
                .aggregate(window, 10, AggregateOrder::default())
                .await
                .unwrap();
            let count = rows.first().map_or(0, |r| r.mention_count);
            assert!(count >= previous);
            previous = count;
        }
        assert_eq!(previous, 5);
    }
}
