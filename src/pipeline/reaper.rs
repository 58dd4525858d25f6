//! Retention reaper
//!
//! Removes tokens that stayed under the market cap floor past the minimum
//! pair age, together with their market data history.

use super::db::{StoreError, TokenStore};
use super::scheduler::sleep_or_shutdown;
use super::types::{now_millis, DeleteSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ReaperSettings {
    pub min_market_cap: f64,
    pub min_age: Duration,
    pub interval: Duration,
}

pub struct RetentionReaper {
    store: Arc<dyn TokenStore>,
    settings: ReaperSettings,
}

impl RetentionReaper {
    pub fn new(store: Arc<dyn TokenStore>, settings: ReaperSettings) -> Self {
        Self { store, settings }
    }

    pub async fn run_once(&self) -> Result<DeleteSummary, StoreError> {
        let created_before = now_millis() - self.settings.min_age.as_millis() as i64;
        let expired = self
            .store
            .expired_tokens(self.settings.min_market_cap, created_before)
            .await?;

        if expired.is_empty() {
            return Ok(DeleteSummary::default());
        }

        let summary = self.store.delete_tokens(&expired).await?;
        log::info!(
            "🧹 Reaped {} tokens and {} market data rows",
            summary.tokens,
            summary.market_data
        );
        Ok(summary)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "🚀 Starting retention reaper: market cap < ${} and older than {:?}",
            self.settings.min_market_cap,
            self.settings.min_age
        );

        loop {
            if let Err(e) = self.run_once().await {
                log::error!("❌ Retention pass failed, nothing deleted: {}", e);
            }

            if !sleep_or_shutdown(self.settings.interval, &mut shutdown).await {
                break;
            }
        }

        log::info!("✅ Retention reaper stopped");
    }
}
