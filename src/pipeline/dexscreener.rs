//! DexScreener market data
//!
//! Endpoint: `{base_url}/tokens/v1/{chain_id}/{addr1,addr2,...}`
//! Returns an array of trading pairs; a token may appear in several pairs.

use super::types::{MarketDataSample, TokenMarketUpdate};
use crate::config::DexScreenerSettings;
use crate::rpc::{check_status, ClientError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Batched market data lookup by token address
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn pairs_for_tokens(&self, addresses: &[String]) -> Result<Vec<DexScreenerPair>, ClientError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexScreenerPair {
    pub base_token: PairToken,
    pub price_native: Option<String>,
    pub price_usd: Option<String>,
    pub liquidity: Option<Liquidity>,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    pub pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairToken {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

impl DexScreenerPair {
    pub fn to_market_update(&self, timestamp: i64) -> TokenMarketUpdate {
        let symbol = Some(self.base_token.symbol.clone()).filter(|s| !s.is_empty());

        TokenMarketUpdate {
            symbol,
            market_cap: self.market_cap,
            pair_created_at: self.pair_created_at,
            sample: MarketDataSample {
                timestamp,
                market_cap: self.market_cap,
                fdv: self.fdv,
                liquidity_usd: self.liquidity.as_ref().and_then(|l| l.usd),
                price_native: self.price_native.clone(),
                price_usd: self.price_usd.clone(),
                contract_address: self.base_token.address.clone(),
            },
        }
    }
}

/// Keep the first pair per requested base token, drop pairs nobody asked for
pub fn select_pairs(requested: &[String], pairs: Vec<DexScreenerPair>) -> Vec<DexScreenerPair> {
    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();

    pairs
        .into_iter()
        .filter(|pair| {
            let address = pair.base_token.address.as_str();
            wanted.contains(address) && seen.insert(address.to_string())
        })
        .collect()
}

#[derive(Clone)]
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
    chain_id: String,
}

impl DexScreenerClient {
    pub fn new(settings: &DexScreenerSettings, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            chain_id: settings.chain_id.clone(),
        })
    }

    fn tokens_url(&self, addresses: &[String]) -> String {
        format!(
            "{}/tokens/v1/{}/{}",
            self.base_url,
            self.chain_id,
            addresses.join(",")
        )
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerClient {
    async fn pairs_for_tokens(&self, addresses: &[String]) -> Result<Vec<DexScreenerPair>, ClientError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self.client.get(self.tokens_url(addresses)).send().await?;
        let resp = check_status(resp).await?;

        let pairs: Vec<DexScreenerPair> = resp.json().await?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS: &str = r#"[
        {"chainId":"solana","dexId":"raydium","pairAddress":"P1",
         "baseToken":{"address":"TOKEN_A","name":"Alpha","symbol":"ALP"},
         "quoteToken":{"address":"So11111111111111111111111111111111111111112","name":"Wrapped SOL","symbol":"SOL"},
         "priceNative":"0.0000012","priceUsd":"0.00025",
         "liquidity":{"usd":12000.5,"base":1000,"quote":20.1},
         "fdv":250000,"marketCap":250000,"pairCreatedAt":1700000000000},
        {"chainId":"solana","dexId":"orca","pairAddress":"P2",
         "baseToken":{"address":"TOKEN_A","name":"Alpha","symbol":"ALP"},
         "priceUsd":"0.00026","marketCap":260000},
        {"chainId":"solana","dexId":"raydium","pairAddress":"P3",
         "baseToken":{"address":"UNASKED","name":"Nope","symbol":"NO"}}
    ]"#;

    #[test]
    fn test_pair_decoding_and_update() {
        let pairs: Vec<DexScreenerPair> = serde_json::from_str(PAIRS).unwrap();
        assert_eq!(pairs.len(), 3);

        let update = pairs[0].to_market_update(42);
        assert_eq!(update.symbol.as_deref(), Some("ALP"));
        assert_eq!(update.market_cap, Some(250000.0));
        assert_eq!(update.pair_created_at, Some(1_700_000_000_000));
        assert_eq!(update.sample.liquidity_usd, Some(12000.5));
        assert_eq!(update.sample.price_native.as_deref(), Some("0.0000012"));
        assert_eq!(update.sample.contract_address, "TOKEN_A");
        assert_eq!(update.sample.timestamp, 42);
    }

    #[test]
    fn test_select_pairs_dedupes_and_filters() {
        let pairs: Vec<DexScreenerPair> = serde_json::from_str(PAIRS).unwrap();
        let requested = vec!["TOKEN_A".to_string(), "TOKEN_B".to_string()];

        let selected = select_pairs(&requested, pairs);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].market_cap, Some(250000.0));
    }

    #[test]
    fn test_tokens_url() {
        let settings = DexScreenerSettings {
            base_url: "https://api.dexscreener.com/".to_string(),
            chain_id: "solana".to_string(),
        };
        let client = DexScreenerClient::new(&settings, Duration::from_secs(1)).unwrap();

        let url = client.tokens_url(&["A".to_string(), "B".to_string()]);
        assert_eq!(url, "https://api.dexscreener.com/tokens/v1/solana/A,B");
    }

    #[tokio::test]
    #[ignore] // Run only when testing with live API
    async fn test_live_lookup() {
        let settings = DexScreenerSettings {
            base_url: "https://api.dexscreener.com".to_string(),
            chain_id: "solana".to_string(),
        };
        let client = DexScreenerClient::new(&settings, Duration::from_secs(10)).unwrap();

        // USDC mint address (known to exist)
        let mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string();
        let pairs = client.pairs_for_tokens(&[mint.clone()]).await.unwrap();
        assert!(pairs.iter().any(|p| p.base_token.address == mint));
    }
}
