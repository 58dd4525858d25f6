//! Swap saga for one order: balance preflight, quote, build, sign, submit

use super::jupiter::{QuoteRequest, SwapVenue};
use super::wallet::{SignError, TransactionSigner};
use crate::pipeline::types::SwapOrder;
use crate::rpc::{BalanceSource, ClientError, TransactionSubmitter};
use async_trait::async_trait;
use std::sync::Arc;

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug)]
pub enum SwapError {
    InsufficientBalance { required: u64, available: u64 },
    PartialSellUnsupported,
    InvalidAmount(f64),
    NoQuote,
    BuildFailed,
    Sign(SignError),
    Client(ClientError),
}

impl std::fmt::Display for SwapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapError::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "Insufficient balance: need {}, have {}",
                required, available
            ),
            SwapError::PartialSellUnsupported => {
                write!(f, "Sell rules are not supported, refusing to sell full balance")
            }
            SwapError::InvalidAmount(qty) => write!(f, "Invalid buy quantity: {} SOL", qty),
            SwapError::NoQuote => write!(f, "No quote or empty route"),
            SwapError::BuildFailed => write!(f, "Venue returned no swap transaction"),
            SwapError::Sign(e) => write!(f, "{}", e),
            SwapError::Client(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SwapError {}

impl From<ClientError> for SwapError {
    fn from(err: ClientError) -> Self {
        SwapError::Client(err)
    }
}

impl From<SignError> for SwapError {
    fn from(err: SignError) -> Self {
        SwapError::Sign(err)
    }
}

/// What an order asks for once its shape is interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum TradePlan {
    /// Spend `lamports` of native currency on `mint`
    Buy { mint: String, lamports: u64 },
    /// Sell the whole balance of `mint`
    SellAll { mint: String },
    /// Sell governed by exit rules
    SellWithRules { mint: String },
}

impl TradePlan {
    pub fn for_order(order: &SwapOrder) -> Result<Self, SwapError> {
        match (&order.amount_details, &order.rules) {
            (Some(details), _) => {
                let lamports = details.quantity_sol * LAMPORTS_PER_SOL;
                if !lamports.is_finite() || lamports < 1.0 {
                    return Err(SwapError::InvalidAmount(details.quantity_sol));
                }
                Ok(TradePlan::Buy {
                    mint: order.to_token.clone(),
                    lamports: lamports.round() as u64,
                })
            }
            (None, None) => Ok(TradePlan::SellAll {
                mint: order.from_token.clone(),
            }),
            (None, Some(_)) => Ok(TradePlan::SellWithRules {
                mint: order.from_token.clone(),
            }),
        }
    }
}

/// Runs one order to completion, returning the submitted transaction id
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(&self, order: &SwapOrder) -> Result<String, SwapError>;
}

#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub native_mint: String,
    pub slippage_bps: u16,
}

pub struct SwapExecutor {
    balances: Arc<dyn BalanceSource>,
    venue: Arc<dyn SwapVenue>,
    signer: Arc<dyn TransactionSigner>,
    submitter: Arc<dyn TransactionSubmitter>,
    settings: SwapSettings,
}

impl SwapExecutor {
    pub fn new(
        balances: Arc<dyn BalanceSource>,
        venue: Arc<dyn SwapVenue>,
        signer: Arc<dyn TransactionSigner>,
        submitter: Arc<dyn TransactionSubmitter>,
        settings: SwapSettings,
    ) -> Self {
        Self {
            balances,
            venue,
            signer,
            submitter,
            settings,
        }
    }

    /// Resolve the plan into a quote request, checking the wallet can cover it
    async fn preflight(&self, plan: &TradePlan) -> Result<QuoteRequest, SwapError> {
        let owner = self.signer.pubkey();

        match plan {
            TradePlan::Buy { mint, lamports } => {
                let available = self.balances.native_balance(&owner).await?;
                if available < *lamports {
                    return Err(SwapError::InsufficientBalance {
                        required: *lamports,
                        available,
                    });
                }
                Ok(self.quote_request(&self.settings.native_mint, mint, *lamports))
            }
            TradePlan::SellAll { mint } | TradePlan::SellWithRules { mint } => {
                let available = self.balances.token_balance(&owner, mint).await?;
                if available == 0 {
                    return Err(SwapError::InsufficientBalance {
                        required: 1,
                        available,
                    });
                }
                if matches!(plan, TradePlan::SellWithRules { .. }) {
                    return Err(SwapError::PartialSellUnsupported);
                }
                Ok(self.quote_request(mint, &self.settings.native_mint, available))
            }
        }
    }

    fn quote_request(&self, input: &str, output: &str, amount: u64) -> QuoteRequest {
        QuoteRequest {
            input_mint: input.to_string(),
            output_mint: output.to_string(),
            amount,
            slippage_bps: self.settings.slippage_bps,
        }
    }
}

#[async_trait]
impl OrderExecutor for SwapExecutor {
    async fn execute(&self, order: &SwapOrder) -> Result<String, SwapError> {
        let plan = TradePlan::for_order(order)?;
        let request = self.preflight(&plan).await?;

        log::info!(
            "💱 Order {}: quoting {} {} -> {}",
            order.id,
            request.amount,
            request.input_mint,
            request.output_mint
        );

        let quote = self.venue.quote(&request).await?;
        if quote.route_plan.is_empty() {
            return Err(SwapError::NoQuote);
        }

        let unsigned = self
            .venue
            .build_swap(&quote, &self.signer.pubkey())
            .await?
            .ok_or(SwapError::BuildFailed)?;

        let signed = self.signer.sign_transaction(&unsigned)?;
        let signature = self.submitter.send_transaction(&signed).await?;

        log::info!("✅ Order {} submitted: {}", order.id, signature);
        Ok(signature)
    }
}
