//! Helius client
//!
//! Two surfaces share one `reqwest::Client`:
//! - the enhanced transactions API (`POST {api_url}/transactions`) for batched
//!   parsed-transaction lookup
//! - the JSON-RPC endpoint for `getBalance`, `getTokenAccountsByOwner` and
//!   `sendTransaction`

use super::{check_status, BalanceSource, ClientError, TransactionDetailSource, TransactionSubmitter};
use crate::config::HeliusConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInstruction {
    #[serde(default)]
    pub program_id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTransaction {
    pub signature: String,
    #[serde(default)]
    pub instructions: Vec<ParsedInstruction>,
}

#[derive(Serialize)]
struct ParsedTransactionsRequest<'a> {
    transactions: &'a [String],
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct TokenAccount {
    account: TokenAccountData,
}

#[derive(Debug, Deserialize)]
struct TokenAccountData {
    data: ParsedAccountData,
}

#[derive(Debug, Deserialize)]
struct ParsedAccountData {
    parsed: ParsedTokenAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedTokenAccount {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAccountInfo {
    token_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
    amount: String,
}

fn unwrap_rpc<T>(method: &str, response: RpcResponse<T>) -> Result<T, ClientError> {
    if let Some(err) = response.error {
        return Err(ClientError::Rpc(format!(
            "{} failed ({}): {}",
            method, err.code, err.message
        )));
    }

    response
        .result
        .ok_or_else(|| ClientError::Decode(format!("{} returned no result", method)))
}

/// Sum raw token amounts across every account the owner holds for a mint
fn sum_token_amounts(accounts: &[TokenAccount]) -> Result<u64, ClientError> {
    accounts.iter().try_fold(0u64, |total, acc| {
        let amount: u64 = acc
            .account
            .data
            .parsed
            .info
            .token_amount
            .amount
            .parse()
            .map_err(|_| {
                ClientError::Decode(format!(
                    "invalid token amount: {}",
                    acc.account.data.parsed.info.token_amount.amount
                ))
            })?;
        Ok(total.saturating_add(amount))
    })
}

#[derive(Clone)]
pub struct HeliusClient {
    client: reqwest::Client,
    rpc_endpoint: String,
    transactions_endpoint: String,
}

impl HeliusClient {
    pub fn new(config: &HeliusConfig, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            rpc_endpoint: config.rpc_endpoint(),
            transactions_endpoint: format!(
                "{}/transactions?api-key={}",
                config.api_url.trim_end_matches('/'),
                config.api_key
            ),
        })
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let resp = self
            .client
            .post(&self.rpc_endpoint)
            .json(&request)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: RpcResponse<T> = resp.json().await?;
        unwrap_rpc(method, body)
    }
}

#[async_trait]
impl TransactionDetailSource for HeliusClient {
    async fn parsed_transactions(
        &self,
        signatures: &[String],
    ) -> Result<Vec<ParsedTransaction>, ClientError> {
        if signatures.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .post(&self.transactions_endpoint)
            .json(&ParsedTransactionsRequest {
                transactions: signatures,
            })
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let transactions: Vec<ParsedTransaction> = resp.json().await?;
        log::debug!(
            "🔎 Resolved {}/{} transactions",
            transactions.len(),
            signatures.len()
        );
        Ok(transactions)
    }
}

#[async_trait]
impl BalanceSource for HeliusClient {
    async fn native_balance(&self, owner: &str) -> Result<u64, ClientError> {
        let balance: WithContext<u64> = self.rpc_call("getBalance", json!([owner])).await?;
        Ok(balance.value)
    }

    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, ClientError> {
        let accounts: WithContext<Vec<TokenAccount>> = self
            .rpc_call(
                "getTokenAccountsByOwner",
                json!([owner, { "mint": mint }, { "encoding": "jsonParsed" }]),
            )
            .await?;
        sum_token_amounts(&accounts.value)
    }
}

#[async_trait]
impl TransactionSubmitter for HeliusClient {
    async fn send_transaction(&self, signed_tx: &str) -> Result<String, ClientError> {
        self.rpc_call(
            "sendTransaction",
            json!([signed_tx, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
        )
        .await
    }
}
