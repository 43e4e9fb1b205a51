//! DexScreener market data adapter.
//!
//! Uses `GET {base}/latest/dex/tokens/{address}` and reads the first pair.
//! No retries: the enrichment client treats every failure as a soft one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::application::enrichment::{MarketDataError, MarketDataSource};
use crate::domain::trending::MarketData;
use crate::infra::error::InfraError;

pub const DEFAULT_BASE_URL: &str = "https://api.dexscreener.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokensResponse {
    #[serde(default)]
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
struct DexPair {
    #[serde(rename = "baseToken")]
    base_token: DexToken,
    #[serde(rename = "quoteToken")]
    quote_token: DexToken,
    #[serde(rename = "priceUsd", default)]
    price_usd: Option<String>,
    #[serde(rename = "priceChange", default)]
    price_change: Option<DexWindow>,
    #[serde(default)]
    volume: Option<DexWindow>,
}

#[derive(Debug, Deserialize)]
struct DexToken {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct DexWindow {
    #[serde(default)]
    h24: Option<f64>,
}

impl From<DexPair> for MarketData {
    fn from(pair: DexPair) -> Self {
        // A pair without a USD quote reports price 0.
        let price = match pair.price_usd.as_deref() {
            Some(raw) => raw.trim().parse::<f64>().ok(),
            None => Some(0.0),
        };
        Self {
            pair: format!("{}/{}", pair.base_token.symbol, pair.quote_token.symbol),
            price,
            h24_change: pair.price_change.and_then(|w| w.h24),
            h24_volume: pair.volume.and_then(|w| w.h24),
        }
    }
}

pub struct DexScreenerSource {
    client: Client,
    base_url: Url,
}

impl DexScreenerSource {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, InfraError> {
        if base_url.cannot_be_a_base() {
            return Err(InfraError::configuration(format!(
                "enrichment base url `{base_url}` cannot carry a path"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("alphafeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(InfraError::http_client)?;
        Ok(Self { client, base_url })
    }

    fn token_url(&self, address: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["latest", "dex", "tokens", address]);
        }
        url
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerSource {
    async fn lookup(&self, address: &str) -> Result<Option<MarketData>, MarketDataError> {
        let response = self
            .client
            .get(self.token_url(address))
            .send()
            .await
            .map_err(|err| MarketDataError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Status {
                status: status.as_u16(),
            });
        }

        let body: TokensResponse = response
            .json()
            .await
            .map_err(|err| MarketDataError::Decode(err.to_string()))?;

        Ok(body
            .pairs
            .and_then(|pairs| pairs.into_iter().next())
            .map(MarketData::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str) -> DexScreenerSource {
        DexScreenerSource::new(Url::parse(base).unwrap(), DEFAULT_TIMEOUT).unwrap()
    }

    #[test]
    fn token_url_appends_escaped_address() {
        let source = source("https://api.dexscreener.com/");
        assert_eq!(
            source.token_url("0xAAA").as_str(),
            "https://api.dexscreener.com/latest/dex/tokens/0xAAA"
        );
        assert_eq!(
            source.token_url("a/b").as_str(),
            "https://api.dexscreener.com/latest/dex/tokens/a%2Fb"
        );
    }

    #[test]
    fn token_url_keeps_base_path_prefix() {
        let source = source("http://127.0.0.1:9000/proxy");
        assert_eq!(
            source.token_url("0xAAA").as_str(),
            "http://127.0.0.1:9000/proxy/latest/dex/tokens/0xAAA"
        );
    }

    #[test]
    fn first_pair_maps_to_market_data() {
        let body: TokensResponse = serde_json::from_str(
            r#"{"schemaVersion":"1.0.0","pairs":[
                {"baseToken":{"symbol":"ABC","address":"0xAAA"},"quoteToken":{"symbol":"WETH"},
                 "priceUsd":"0.0125","priceChange":{"h1":1.0,"h24":-4.5},"volume":{"h24":120000.5}},
                {"baseToken":{"symbol":"ABC"},"quoteToken":{"symbol":"USDC"},"priceUsd":"9"}
            ]}"#,
        )
        .unwrap();
        let market = MarketData::from(body.pairs.unwrap().into_iter().next().unwrap());
        assert_eq!(market.pair, "ABC/WETH");
        assert_eq!(market.price, Some(0.0125));
        assert_eq!(market.h24_change, Some(-4.5));
        assert_eq!(market.h24_volume, Some(120000.5));
    }

    #[test]
    fn missing_usd_price_reads_as_zero() {
        let pair: DexPair = serde_json::from_str(
            r#"{"baseToken":{"symbol":"ABC"},"quoteToken":{"symbol":"SOL"}}"#,
        )
        .unwrap();
        let market = MarketData::from(pair);
        assert_eq!(market.price, Some(0.0));
        assert_eq!(market.h24_volume, None);
    }

    #[test]
    fn null_pairs_mean_not_listed() {
        let body: TokensResponse =
            serde_json::from_str(r#"{"schemaVersion":"1.0.0","pairs":null}"#).unwrap();
        assert!(body.pairs.is_none());
    }
}
