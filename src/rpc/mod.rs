//! External HTTP collaborators: transaction detail lookup, balances, submission

pub mod helius;

pub use helius::{HeliusClient, ParsedInstruction, ParsedTransaction};

use async_trait::async_trait;

#[derive(Debug)]
pub enum ClientError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    Decode(String),
    Rpc(String),
    Timeout,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Http(err)
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "HTTP error: {}", e),
            ClientError::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            ClientError::Decode(msg) => write!(f, "Decode error: {}", msg),
            ClientError::Rpc(msg) => write!(f, "RPC error: {}", msg),
            ClientError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Turn a non-2xx response into `ClientError::Status`
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

/// Batched lookup of parsed transactions by signature
#[async_trait]
pub trait TransactionDetailSource: Send + Sync {
    async fn parsed_transactions(
        &self,
        signatures: &[String],
    ) -> Result<Vec<ParsedTransaction>, ClientError>;
}

/// Balances in the smallest unit (lamports or raw token amount)
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn native_balance(&self, owner: &str) -> Result<u64, ClientError>;

    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, ClientError>;
}

#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit a signed, base64-encoded transaction and return its signature
    async fn send_transaction(&self, signed_tx: &str) -> Result<String, ClientError>;
}
