//! Jupiter swap API
//!
//! - `GET  {base}/swap/v1/quote?inputMint&outputMint&amount&slippageBps`
//! - `POST {base}/swap/v1/swap` with the quote echoed back; returns an
//!   unsigned base64 transaction

use crate::rpc::{check_status, ClientError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Smallest unit of the input mint
    pub amount: u64,
    pub slippage_bps: u16,
}

/// A priced route, kept whole so it can be sent back to build the swap
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub input_mint: String,
    pub in_amount: String,
    pub output_mint: String,
    pub out_amount: String,
    #[serde(default)]
    pub route_plan: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    quote_response: &'a Quote,
    user_public_key: &'a str,
    dynamic_compute_unit_limit: bool,
    dynamic_slippage: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: Option<String>,
}

#[async_trait]
pub trait SwapVenue: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ClientError>;

    /// Unsigned base64 transaction, `None` if the venue built nothing
    async fn build_swap(&self, quote: &Quote, user_pubkey: &str)
        -> Result<Option<String>, ClientError>;
}

#[derive(Clone)]
pub struct JupiterClient {
    client: reqwest::Client,
    base_url: String,
}

impl JupiterClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SwapVenue for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ClientError> {
        let url = format!("{}/swap/v1/quote", self.base_url);
        let query = [
            ("inputMint", request.input_mint.clone()),
            ("outputMint", request.output_mint.clone()),
            ("amount", request.amount.to_string()),
            ("slippageBps", request.slippage_bps.to_string()),
        ];

        let resp = self.client.get(url).query(&query).send().await?;
        let resp = check_status(resp).await?;

        Ok(resp.json().await?)
    }

    async fn build_swap(
        &self,
        quote: &Quote,
        user_pubkey: &str,
    ) -> Result<Option<String>, ClientError> {
        let url = format!("{}/swap/v1/swap", self.base_url);
        let body = SwapRequest {
            quote_response: quote,
            user_public_key: user_pubkey,
            dynamic_compute_unit_limit: true,
            dynamic_slippage: true,
        };

        let resp = self.client.post(url).json(&body).send().await?;
        let resp = check_status(resp).await?;

        let swap: SwapResponse = resp.json().await?;
        Ok(swap.swap_transaction.filter(|tx| !tx.is_empty()))
    }
}
