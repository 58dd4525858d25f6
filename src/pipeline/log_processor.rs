//! Log enrichment
//!
//! Claims unprocessed migration logs in batches, resolves them through the
//! transaction detail service, and records the token each pool
//! initialisation created.

use super::db::{LogStore, StoreError};
use super::scheduler::sleep_or_shutdown;
use super::types::now_millis;
use crate::rpc::{ParsedInstruction, ParsedTransaction, TransactionDetailSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Account positions of the two pool mints in the pool initialise instruction
pub const COIN_MINT_SLOT: usize = 8;
pub const PC_MINT_SLOT: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingAccounts { needed: usize, found: usize },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MissingAccounts { needed, found } => write!(
                f,
                "pool instruction has {} accounts, need at least {}",
                found, needed
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// The two sides of a newly initialised pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAccounts {
    pub coin_mint: String,
    pub pc_mint: String,
}

impl PoolAccounts {
    pub fn decode(instruction: &ParsedInstruction) -> Result<Self, DecodeError> {
        let accounts = &instruction.accounts;
        match (accounts.get(COIN_MINT_SLOT), accounts.get(PC_MINT_SLOT)) {
            (Some(coin), Some(pc)) => Ok(Self {
                coin_mint: coin.clone(),
                pc_mint: pc.clone(),
            }),
            _ => Err(DecodeError::MissingAccounts {
                needed: PC_MINT_SLOT + 1,
                found: accounts.len(),
            }),
        }
    }

    /// The side that is not the native mint, if any
    pub fn new_mint(&self, native_mint: &str) -> Option<&str> {
        let candidate = if self.coin_mint == native_mint {
            &self.pc_mint
        } else {
            &self.coin_mint
        };

        (candidate != native_mint).then_some(candidate.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub fetch_limit: usize,
    pub batch_threshold: usize,
    /// Pause when fewer than `batch_threshold` logs are waiting
    pub wait: Duration,
    /// Pause after a completed (or failed) lookup
    pub interval: Duration,
    pub program_id: String,
    pub native_mint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentCycle {
    /// Not enough logs yet
    Waiting { pending: usize },
    /// Detail lookup failed, logs left for the next cycle
    LookupFailed,
    Completed {
        transactions: usize,
        discovered: usize,
    },
}

pub struct LogEnrichmentPipeline {
    store: Arc<dyn LogStore>,
    details: Arc<dyn TransactionDetailSource>,
    settings: EnrichmentSettings,
}

impl LogEnrichmentPipeline {
    pub fn new(
        store: Arc<dyn LogStore>,
        details: Arc<dyn TransactionDetailSource>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            store,
            details,
            settings,
        }
    }

    pub async fn run_once(&self) -> Result<EnrichmentCycle, StoreError> {
        let logs = self.store.unprocessed_logs(self.settings.fetch_limit).await?;

        if logs.len() < self.settings.batch_threshold {
            log::info!(
                "⏳ Waiting for migration logs: {}/{}",
                logs.len(),
                self.settings.batch_threshold
            );
            return Ok(EnrichmentCycle::Waiting { pending: logs.len() });
        }

        let signatures: Vec<String> = logs.into_iter().map(|l| l.signature).collect();

        let transactions = match self.details.parsed_transactions(&signatures).await {
            Ok(txs) => txs,
            Err(e) => {
                log::warn!("⚠️  Transaction lookup failed for {} logs: {}", signatures.len(), e);
                return Ok(EnrichmentCycle::LookupFailed);
            }
        };

        // Logs that yield nothing stay unprocessed but move behind newer ones
        self.store
            .mark_logs_attempted(&signatures, now_millis())
            .await?;

        let mut discovered = 0;
        for tx in &transactions {
            discovered += self.record_transaction(tx).await?;
        }

        log::info!(
            "✅ Enriched {} transactions, {} new tokens",
            transactions.len(),
            discovered
        );

        Ok(EnrichmentCycle::Completed {
            transactions: transactions.len(),
            discovered,
        })
    }

    async fn record_transaction(&self, tx: &ParsedTransaction) -> Result<usize, StoreError> {
        let mut discovered = 0;

        let pool_instructions = tx
            .instructions
            .iter()
            .filter(|ix| ix.program_id == self.settings.program_id);

        for instruction in pool_instructions {
            let pool = match PoolAccounts::decode(instruction) {
                Ok(pool) => pool,
                Err(e) => {
                    log::warn!("⚠️  Skipping pool instruction in {}: {}", tx.signature, e);
                    continue;
                }
            };

            let Some(mint) = pool.new_mint(&self.settings.native_mint) else {
                log::debug!("Pool in {} has no non-native side", tx.signature);
                continue;
            };

            if self.store.record_discovered_token(mint, &tx.signature).await? {
                log::info!("🪙 New token {} (tx {})", mint, tx.signature);
                discovered += 1;
            }
        }

        Ok(discovered)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "🚀 Starting log enrichment (batch threshold: {}, limit: {})",
            self.settings.batch_threshold,
            self.settings.fetch_limit
        );

        loop {
            let pause = match self.run_once().await {
                Ok(EnrichmentCycle::Waiting { .. }) => self.settings.wait,
                Ok(_) => self.settings.interval,
                Err(e) => {
                    log::error!("❌ Log enrichment failed: {}", e);
                    self.settings.interval
                }
            };

            if !sleep_or_shutdown(pause, &mut shutdown).await {
                break;
            }
        }

        log::info!("✅ Log enrichment stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(accounts: &[&str]) -> ParsedInstruction {
        ParsedInstruction {
            program_id: "POOL".to_string(),
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    fn pool_accounts(coin: &str, pc: &str) -> Vec<String> {
        let mut accounts: Vec<String> = (0..8).map(|i| format!("acct{}", i)).collect();
        accounts.push(coin.to_string());
        accounts.push(pc.to_string());
        accounts.push("acct10".to_string());
        accounts
    }

    #[test]
    fn test_decode_picks_non_native_side() {
        let ix = ParsedInstruction {
            accounts: pool_accounts("NATIVE", "TOKEN_X"),
            ..Default::default()
        };
        let pool = PoolAccounts::decode(&ix).unwrap();
        assert_eq!(pool.new_mint("NATIVE"), Some("TOKEN_X"));

        let ix = ParsedInstruction {
            accounts: pool_accounts("TOKEN_Y", "NATIVE"),
            ..Default::default()
        };
        let pool = PoolAccounts::decode(&ix).unwrap();
        assert_eq!(pool.new_mint("NATIVE"), Some("TOKEN_Y"));

        let ix = ParsedInstruction {
            accounts: pool_accounts("NATIVE", "NATIVE"),
            ..Default::default()
        };
        assert_eq!(PoolAccounts::decode(&ix).unwrap().new_mint("NATIVE"), None);
    }

    #[test]
    fn test_decode_rejects_short_account_list() {
        let ix = instruction(&["a", "b", "c", "d", "e", "f", "g", "h", "i"]);
        assert_eq!(
            PoolAccounts::decode(&ix),
            Err(DecodeError::MissingAccounts { needed: 10, found: 9 })
        );
        assert!(PoolAccounts::decode(&instruction(&[])).is_err());
    }
}
