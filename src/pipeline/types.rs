//! Persisted records
//!
//! All timestamps are unix milliseconds.

use serde::{Deserialize, Serialize};

/// A feed transaction that contained the migration marker
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub id: i64,
    pub signature: String,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub id: i64,
    pub contract_address: String,
    pub created_at: i64,
    pub last_processed_at: Option<i64>,
    pub symbol: Option<String>,
    pub market_cap: Option<f64>,
    pub pair_created_at: Option<i64>,
}

/// One market data observation for a token
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataSample {
    pub timestamp: i64,
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub price_native: Option<String>,
    pub price_usd: Option<String>,
    pub contract_address: String,
}

/// Attributes refreshed on the token row alongside a new sample
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMarketUpdate {
    pub symbol: Option<String>,
    pub market_cap: Option<f64>,
    pub pair_created_at: Option<i64>,
    pub sample: MarketDataSample,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountDetails {
    pub quantity_sol: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapOrder {
    pub id: i64,
    pub created_at: i64,
    pub executed_at: Option<i64>,
    pub from_token: String,
    pub to_token: String,
    pub amount_details: Option<AmountDetails>,
    /// Exit policy as stored; a JSON `null` is normalised to `None`
    pub rules: Option<String>,
    pub tx_hash: Option<String>,
}

/// Order as written by an external actor or the startup order file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSwapOrder {
    pub from_token: String,
    pub to_token: String,
    #[serde(default)]
    pub amount_details: Option<AmountDetails>,
    #[serde(default)]
    pub rules: Option<serde_json::Value>,
}

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub tokens: usize,
    pub market_data: usize,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
