//! Trending query shape and the ranked item served to callers.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::mentions::{AggregateField, AggregateOrder, MentionAggregate};

const SECS_PER_HOUR: u64 = 60 * 60;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Window applied when `time_window` cannot be parsed.
pub const FALLBACK_WINDOW: TimeWindow = TimeWindow::from_secs(3 * SECS_PER_DAY);

/// Look-back duration for aggregation, kept at whole-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeWindow {
    secs: u64,
}

impl TimeWindow {
    pub const fn from_secs(secs: u64) -> Self {
        Self { secs }
    }

    pub const fn hours(hours: u64) -> Self {
        Self::from_secs(hours * SECS_PER_HOUR)
    }

    pub const fn days(days: u64) -> Self {
        Self::from_secs(days * SECS_PER_DAY)
    }

    pub const fn as_secs(&self) -> u64 {
        self.secs
    }

    pub const fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    /// Parses `<N>h` or `<N>d` with a positive integer `N`.
    ///
    /// Anything else, including zero, negative and overflowing values,
    /// yields [`FALLBACK_WINDOW`].
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or(FALLBACK_WINDOW)
    }

    fn try_parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (digits, unit) = if let Some(digits) = raw.strip_suffix('h') {
            (digits, SECS_PER_HOUR)
        } else if let Some(digits) = raw.strip_suffix('d') {
            (digits, SECS_PER_DAY)
        } else {
            return None;
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let count: u64 = digits.parse().ok()?;
        if count == 0 {
            return None;
        }
        count.checked_mul(unit).map(Self::from_secs)
    }

    /// Earliest instant (exclusive) covered by the window.
    pub fn since(&self, now: OffsetDateTime) -> OffsetDateTime {
        let secs = i64::try_from(self.secs).unwrap_or(i64::MAX);
        now.checked_sub(time::Duration::seconds(secs))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    MentionCount,
    LatestDate,
    Price,
    H24Change,
    H24Volume,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "mention_count" => Some(Self::MentionCount),
            "latest_date" => Some(Self::LatestDate),
            "price" => Some(Self::Price),
            "h24_change" => Some(Self::H24Change),
            "h24_volume" => Some(Self::H24Volume),
            _ => None,
        }
    }

    /// Unknown or missing values fall back to `mention_count`.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or(Self::MentionCount)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MentionCount => "mention_count",
            Self::LatestDate => "latest_date",
            Self::Price => "price",
            Self::H24Change => "h24_change",
            Self::H24Volume => "h24_volume",
        }
    }

    /// Fields the mention store can order by itself.
    pub fn store_field(&self) -> Option<AggregateField> {
        match self {
            Self::MentionCount => Some(AggregateField::MentionCount),
            Self::LatestDate => Some(AggregateField::LatestDate),
            Self::Price | Self::H24Change | Self::H24Volume => None,
        }
    }

    fn market_value(&self, market: &MarketData) -> Option<f64> {
        match self {
            Self::Price => market.price,
            Self::H24Change => market.h24_change,
            Self::H24Volume => market.h24_volume,
            Self::MentionCount | Self::LatestDate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    /// Unknown or missing values fall back to `desc`.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// A fully resolved trending query. Two queries share a cache entry iff they
/// are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrendingQuery {
    pub window: TimeWindow,
    pub limit: u32,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl TrendingQuery {
    /// Store-side ordering: the requested one for store-native fields and
    /// `mention_count desc` when the final order depends on market data.
    pub fn aggregate_order(&self) -> AggregateOrder {
        match self.sort_field.store_field() {
            Some(field) => AggregateOrder::new(field, self.sort_order),
            None => AggregateOrder::default(),
        }
    }
}

/// Market attributes for an item's first listed trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub pair: String,
    pub price: Option<f64>,
    #[serde(rename = "24h_change")]
    pub h24_change: Option<f64>,
    #[serde(rename = "24h_volume")]
    pub h24_volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingItem {
    #[serde(rename = "token_ticker")]
    pub ticker: String,
    pub network: String,
    #[serde(rename = "token_address")]
    pub address: Option<String>,
    #[serde(rename = "token_name")]
    pub name: Option<String>,
    #[serde(rename = "token_image")]
    pub image: Option<String>,
    pub mention_count: i64,
    #[serde(rename = "latest_date", with = "time::serde::rfc3339")]
    pub latest_at: OffsetDateTime,
    #[serde(flatten)]
    pub market: Option<MarketData>,
}

impl TrendingItem {
    pub fn from_aggregate(aggregate: MentionAggregate, market: Option<MarketData>) -> Self {
        Self {
            ticker: aggregate.ticker,
            network: aggregate.network,
            address: aggregate.address,
            name: aggregate.name,
            image: aggregate.image,
            mention_count: aggregate.mention_count,
            latest_at: aggregate.latest_at,
            market,
        }
    }

    fn market_value(&self, field: SortField) -> Option<f64> {
        self.market.as_ref().and_then(|m| field.market_value(m))
    }
}

/// Stable re-sort by a market-data field.
///
/// A missing value compares below every present one, so such items end up
/// last under `desc` and first under `asc`. Equal keys keep their incoming
/// relative order in both directions.
pub fn sort_by_market_field(items: &mut [TrendingItem], field: SortField, order: SortOrder) {
    if field.store_field().is_some() {
        return;
    }
    let compare = |a: &TrendingItem, b: &TrendingItem| -> Ordering {
        match (a.market_value(field), b.market_value(field)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    };
    match order {
        SortOrder::Asc => items.sort_by(compare),
        SortOrder::Desc => items.sort_by(|a, b| compare(b, a)),
    }
}
