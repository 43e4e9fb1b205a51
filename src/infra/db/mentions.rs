use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{
    application::repos::{MentionsRepo, RepoError},
    domain::mentions::{AggregateField, AggregateOrder, Mention, MentionAggregate, NewMention},
    domain::trending::{SortOrder, TimeWindow},
};

use super::util::{from_naive_utc, to_naive_utc};
use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct AggregateRow {
    token_ticker: String,
    network: String,
    token_address: Option<String>,
    token_name: Option<String>,
    token_image: Option<String>,
    mention_count: i64,
    latest_date: PrimitiveDateTime,
}

impl From<AggregateRow> for MentionAggregate {
    fn from(row: AggregateRow) -> Self {
        Self {
            ticker: row.token_ticker,
            network: row.network,
            address: row.token_address,
            name: row.token_name,
            image: row.token_image,
            mention_count: row.mention_count,
            latest_at: from_naive_utc(row.latest_date),
        }
    }
}

fn push_order_by(qb: &mut QueryBuilder<'_, sqlx::Postgres>, order: AggregateOrder) {
    let (dir, nulls) = match order.order {
        SortOrder::Asc => ("ASC", "NULLS FIRST"),
        SortOrder::Desc => ("DESC", "NULLS LAST"),
    };
    let (first, second) = match order.field {
        AggregateField::MentionCount => ("mention_count", "latest_date"),
        AggregateField::LatestDate => ("latest_date", "mention_count"),
    };
    // Byte-wise collation keeps tie-breaks identical to the in-memory store.
    qb.push(format!(
        " ORDER BY {first} {dir}, {second} {dir}, \
         token_ticker COLLATE \"C\" {dir}, network COLLATE \"C\" {dir}, \
         token_address COLLATE \"C\" {dir} {nulls}"
    ));
}

#[async_trait]
impl MentionsRepo for PostgresRepositories {
    async fn record_mention(&self, mention: NewMention) -> Result<Mention, RepoError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO alpha_calls (
                token_ticker, token_address, token_name, token_image, network,
                additional_info, channel_name, message_url, date, long_term
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&mention.ticker)
        .bind(&mention.address)
        .bind(&mention.name)
        .bind(&mention.image)
        .bind(&mention.network)
        .bind(&mention.note)
        .bind(&mention.channel)
        .bind(&mention.message_url)
        .bind(to_naive_utc(mention.observed_at))
        .bind(mention.long_term)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Mention::from_new(id, mention))
    }

    async fn aggregate(
        &self,
        window: TimeWindow,
        limit: u32,
        order: AggregateOrder,
    ) -> Result<Vec<MentionAggregate>, RepoError> {
        let since = to_naive_utc(window.since(OffsetDateTime::now_utc()));

        let mut qb = QueryBuilder::new(
            r#"
            SELECT
                token_ticker,
                network,
                token_address,
                (ARRAY_AGG(token_name ORDER BY date DESC, id DESC)
                    FILTER (WHERE token_name IS NOT NULL))[1] AS token_name,
                (ARRAY_AGG(token_image ORDER BY date DESC, id DESC)
                    FILTER (WHERE token_image IS NOT NULL))[1] AS token_image,
                COUNT(*) AS mention_count,
                MAX(date) AS latest_date
            FROM alpha_calls
            WHERE date > "#,
        );
        qb.push_bind(since);
        qb.push(" GROUP BY token_ticker, network, token_address");
        push_order_by(&mut qb, order);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<AggregateRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(MentionAggregate::from).collect())
    }

    async fn resolve_network(&self, ticker: &str) -> Result<Option<String>, RepoError> {
        sqlx::query_scalar(
            r#"
            SELECT network
            FROM alpha_calls
            WHERE token_ticker = $1
            GROUP BY network
            ORDER BY COUNT(*) DESC, network COLLATE "C" ASC
            LIMIT 1
            "#,
        )
        .bind(ticker)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn ping(&self) -> Result<(), RepoError> {
        self.health_check().await.map_err(map_sqlx_error)
    }
}
