//! Alpha-call mentions: validation of incoming records and the grouping rules
//! shared by every mention store.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::well_known::Rfc3339};

use crate::domain::error::DomainError;
use crate::domain::trending::SortOrder;

pub const MAX_TICKER_LEN: usize = 20;
pub const MAX_NETWORK_LEN: usize = 50;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_CHANNEL_LEN: usize = 100;

/// Mention payload as handed over by the ingestion collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MentionInput {
    pub token_ticker: Option<String>,
    pub network: Option<String>,
    pub token_address: Option<String>,
    pub token_name: Option<String>,
    pub token_image: Option<String>,
    pub additional_info: Option<String>,
    pub channel_name: Option<String>,
    pub message_url: Option<String>,
    pub date: Option<String>,
    #[serde(default)]
    pub long_term: bool,
}

/// A validated mention that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMention {
    pub ticker: String,
    pub network: String,
    pub address: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub note: Option<String>,
    pub channel: String,
    pub message_url: String,
    /// Always expressed in UTC.
    pub observed_at: OffsetDateTime,
    pub long_term: bool,
}

/// A stored mention. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mention {
    pub id: i64,
    #[serde(rename = "token_ticker")]
    pub ticker: String,
    pub network: String,
    #[serde(rename = "token_address")]
    pub address: Option<String>,
    #[serde(rename = "token_name")]
    pub name: Option<String>,
    #[serde(rename = "token_image")]
    pub image: Option<String>,
    #[serde(rename = "additional_info")]
    pub note: Option<String>,
    #[serde(rename = "channel_name")]
    pub channel: String,
    pub message_url: String,
    #[serde(rename = "date", with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub long_term: bool,
}

impl Mention {
    pub fn from_new(id: i64, new: NewMention) -> Self {
        Self {
            id,
            ticker: new.ticker,
            network: new.network,
            address: new.address,
            name: new.name,
            image: new.image,
            note: new.note,
            channel: new.channel,
            message_url: new.message_url,
            observed_at: new.observed_at,
            long_term: new.long_term,
        }
    }
}

impl MentionInput {
    pub fn validate(self) -> Result<NewMention, DomainError> {
        let ticker = required("token_ticker", self.token_ticker, Some(MAX_TICKER_LEN))?;
        let network = required("network", self.network, Some(MAX_NETWORK_LEN))?;
        let channel = required("channel_name", self.channel_name, Some(MAX_CHANNEL_LEN))?;
        let message_url = required("message_url", self.message_url, None)?;
        let raw_date = required("date", self.date, None)?;
        let observed_at = parse_observed_at(&raw_date)?;

        let name = optional(self.token_name);
        if let Some(name) = name.as_deref()
            && name.chars().count() > MAX_NAME_LEN
        {
            return Err(DomainError::too_long("token_name", MAX_NAME_LEN));
        }

        Ok(NewMention {
            ticker,
            network,
            address: optional(self.token_address),
            name,
            image: optional(self.token_image),
            note: optional(self.additional_info),
            channel,
            message_url,
            observed_at,
            long_term: self.long_term,
        })
    }
}

fn required(
    field: &'static str,
    value: Option<String>,
    max: Option<usize>,
) -> Result<String, DomainError> {
    let value = optional(value).ok_or(DomainError::missing(field))?;
    if let Some(max) = max
        && value.chars().count() > max
    {
        return Err(DomainError::too_long(field, max));
    }
    Ok(value)
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses an observation timestamp and normalises it to UTC.
///
/// RFC 3339 values keep their offset until conversion; naive date-times are
/// taken to already be UTC.
pub fn parse_observed_at(raw: &str) -> Result<OffsetDateTime, DomainError> {
    let raw = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(parsed.to_offset(UtcOffset::UTC));
    }

    PrimitiveDateTime::parse(
        raw,
        time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            time::macros::format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"
            ),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            time::macros::format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"
            ),
        )
    })
    .map(PrimitiveDateTime::assume_utc)
    .map_err(|_| DomainError::validation(format!("date `{raw}` is not a recognised timestamp")))
}

/// One row of the grouped mention view.
#[derive(Debug, Clone, PartialEq)]
pub struct MentionAggregate {
    pub ticker: String,
    pub network: String,
    pub address: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub mention_count: i64,
    pub latest_at: OffsetDateTime,
}

/// Orderings a mention store can apply before truncating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateField {
    MentionCount,
    LatestDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregateOrder {
    pub field: AggregateField,
    pub order: SortOrder,
}

impl AggregateOrder {
    pub const fn new(field: AggregateField, order: SortOrder) -> Self {
        Self { field, order }
    }

    /// Compares two groups in ascending terms, then flips for `desc`.
    ///
    /// The identity triple breaks ties so that `asc` is always the exact
    /// reverse of `desc`. Absent addresses compare below present ones.
    pub fn compare(&self, a: &MentionAggregate, b: &MentionAggregate) -> Ordering {
        let primary = match self.field {
            AggregateField::MentionCount => a
                .mention_count
                .cmp(&b.mention_count)
                .then(a.latest_at.cmp(&b.latest_at)),
            AggregateField::LatestDate => a
                .latest_at
                .cmp(&b.latest_at)
                .then(a.mention_count.cmp(&b.mention_count)),
        };
        let ascending = primary
            .then_with(|| a.ticker.cmp(&b.ticker))
            .then_with(|| a.network.cmp(&b.network))
            .then_with(|| a.address.cmp(&b.address));
        match self.order {
            SortOrder::Asc => ascending,
            SortOrder::Desc => ascending.reverse(),
        }
    }
}

impl Default for AggregateOrder {
    fn default() -> Self {
        Self::new(AggregateField::MentionCount, SortOrder::Desc)
    }
}

type GroupKey = (String, String, Option<String>);

struct GroupState {
    count: i64,
    latest_at: OffsetDateTime,
    name: Option<(OffsetDateTime, i64, String)>,
    image: Option<(OffsetDateTime, i64, String)>,
}

fn newer(
    slot: &mut Option<(OffsetDateTime, i64, String)>,
    at: OffsetDateTime,
    id: i64,
    value: Option<&String>,
) {
    let Some(value) = value else { return };
    let replace = match slot {
        Some((seen_at, seen_id, _)) => (at, id) > (*seen_at, *seen_id),
        None => true,
    };
    if replace {
        *slot = Some((at, id, value.clone()));
    }
}

/// Groups mentions observed strictly after `since`.
///
/// Mirrors the SQL aggregate: count per identity, latest timestamp, and the
/// most recently observed non-null name and image.
pub fn aggregate_mentions<'a>(
    mentions: impl IntoIterator<Item = &'a Mention>,
    since: OffsetDateTime,
    limit: usize,
    order: AggregateOrder,
) -> Vec<MentionAggregate> {
    let mut groups: HashMap<GroupKey, GroupState> = HashMap::new();
    for mention in mentions {
        if mention.observed_at <= since {
            continue;
        }
        let key = (
            mention.ticker.clone(),
            mention.network.clone(),
            mention.address.clone(),
        );
        let state = groups.entry(key).or_insert(GroupState {
            count: 0,
            latest_at: mention.observed_at,
            name: None,
            image: None,
        });
        state.count += 1;
        if mention.observed_at > state.latest_at {
            state.latest_at = mention.observed_at;
        }
        newer(
            &mut state.name,
            mention.observed_at,
            mention.id,
            mention.name.as_ref(),
        );
        newer(
            &mut state.image,
            mention.observed_at,
            mention.id,
            mention.image.as_ref(),
        );
    }

    let mut rows: Vec<MentionAggregate> = groups
        .into_iter()
        .map(|((ticker, network, address), state)| MentionAggregate {
            ticker,
            network,
            address,
            name: state.name.map(|(_, _, v)| v),
            image: state.image.map(|(_, _, v)| v),
            mention_count: state.count,
            latest_at: state.latest_at,
        })
        .collect();
    rows.sort_by(|a, b| order.compare(a, b));
    rows.truncate(limit);
    rows
}

/// Most frequent network recorded for `ticker`; ties go to the
/// lexicographically smallest network.
pub fn most_frequent_network<'a>(
    mentions: impl IntoIterator<Item = &'a Mention>,
    ticker: &str,
) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for mention in mentions {
        if mention.ticker == ticker {
            *counts.entry(mention.network.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(net_a, count_a), (net_b, count_b)| {
            count_a.cmp(count_b).then_with(|| net_b.cmp(net_a))
        })
        .map(|(network, _)| network.to_string())
}
