use std::sync::Arc;

use tracing::{info, instrument};

use crate::application::error::AppError;
use crate::application::repos::MentionsRepo;
use crate::domain::mentions::{Mention, MentionInput};

/// Ingestion boundary: validates mentions before they reach the store.
pub struct MentionService {
    repo: Arc<dyn MentionsRepo>,
}

impl MentionService {
    pub fn new(repo: Arc<dyn MentionsRepo>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, input))]
    pub async fn record(&self, input: MentionInput) -> Result<Mention, AppError> {
        let mention = input.validate()?;
        let stored = self.repo.record_mention(mention).await?;
        info!(
            target: "alphafeed::mentions",
            id = stored.id,
            ticker = %stored.ticker,
            network = %stored.network,
            channel = %stored.channel,
            "mention recorded"
        );
        Ok(stored)
    }

    pub async fn resolve_network(&self, ticker: &str) -> Result<Option<String>, AppError> {
        Ok(self.repo.resolve_network(ticker).await?)
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        Ok(self.repo.ping().await?)
    }
}
