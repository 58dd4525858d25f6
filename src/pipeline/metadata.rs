//! Market data refresh
//!
//! Two loops share one pipeline:
//! - stale refresh: tokens under the market cap ceiling that were never
//!   refreshed or were refreshed longer ago than the staleness window
//! - top refresh: tokens above the ceiling, refreshed on a slower cadence
//!
//! Requests go out in sub-batches with a pause in between to stay under the
//! market data service's rate limit.

use super::db::{StoreError, TokenStore};
use super::dexscreener::{select_pairs, MarketDataSource};
use super::scheduler::sleep_or_shutdown;
use super::types::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub limit: usize,
    pub sub_batch: usize,
    pub stale: Duration,
    pub interval: Duration,
    pub max_market_cap: f64,
    pub top_interval: Duration,
    pub pause: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub requested: usize,
    pub updated: usize,
    pub stamped: usize,
    pub failed_batches: usize,
}

impl RefreshReport {
    fn merge(&mut self, other: RefreshReport) {
        self.requested += other.requested;
        self.updated += other.updated;
        self.stamped += other.stamped;
        self.failed_batches += other.failed_batches;
    }
}

pub struct MetadataRefreshPipeline {
    store: Arc<dyn TokenStore>,
    market: Arc<dyn MarketDataSource>,
    settings: RefreshSettings,
}

impl MetadataRefreshPipeline {
    pub fn new(
        store: Arc<dyn TokenStore>,
        market: Arc<dyn MarketDataSource>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            store,
            market,
            settings,
        }
    }

    /// Refresh one sub-batch
    ///
    /// Every requested address is stamped once the lookup succeeds, even if
    /// the service had nothing for it. A failed lookup stamps nothing.
    pub async fn refresh_batch(&self, addresses: &[String]) -> Result<RefreshReport, StoreError> {
        let mut report = RefreshReport {
            requested: addresses.len(),
            ..Default::default()
        };

        let pairs = match self.market.pairs_for_tokens(addresses).await {
            Ok(pairs) => select_pairs(addresses, pairs),
            Err(e) => {
                log::warn!("⚠️  Market data lookup failed for {} tokens: {}", addresses.len(), e);
                report.failed_batches = 1;
                return Ok(report);
            }
        };

        let now = now_millis();
        for pair in &pairs {
            match self.store.apply_market_update(&pair.to_market_update(now)).await {
                Ok(()) => report.updated += 1,
                Err(e) => log::warn!(
                    "⚠️  Failed to store market data for {}: {}",
                    pair.base_token.address,
                    e
                ),
            }
        }

        report.stamped = self.store.mark_tokens_processed(addresses, now).await?;
        Ok(report)
    }

    /// Refresh an arbitrary list in sub-batches
    pub async fn refresh(&self, addresses: &[String]) -> Result<RefreshReport, StoreError> {
        let mut report = RefreshReport::default();

        for (i, chunk) in addresses.chunks(self.settings.sub_batch).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.pause).await;
            }
            report.merge(self.refresh_batch(chunk).await?);
        }

        Ok(report)
    }

    /// One stale-refresh cycle
    pub async fn run_once(&self) -> Result<RefreshReport, StoreError> {
        let stale_before = now_millis() - self.settings.stale.as_millis() as i64;
        let addresses = self
            .store
            .tokens_for_refresh(self.settings.max_market_cap, stale_before, self.settings.limit)
            .await?;

        if addresses.is_empty() {
            return Ok(RefreshReport::default());
        }

        log::info!("🔄 Refreshing market data for {} tokens", addresses.len());
        self.refresh(&addresses).await
    }

    /// One top-token cycle
    pub async fn run_top_once(&self) -> Result<RefreshReport, StoreError> {
        let addresses = self.store.top_tokens(self.settings.max_market_cap).await?;

        if addresses.is_empty() {
            return Ok(RefreshReport::default());
        }

        log::info!("🏆 Refreshing market data for {} top tokens", addresses.len());
        self.refresh(&addresses).await
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "🚀 Starting metadata refresh (every {:?}, ceiling ${})",
            self.settings.interval,
            self.settings.max_market_cap
        );

        loop {
            match self.run_once().await {
                Ok(report) if report.requested > 0 => log::info!(
                    "✅ Refresh: {} requested, {} updated, {} stamped",
                    report.requested,
                    report.updated,
                    report.stamped
                ),
                Ok(_) => log::debug!("No tokens due for refresh"),
                Err(e) => log::error!("❌ Metadata refresh failed: {}", e),
            }

            if !sleep_or_shutdown(self.settings.interval, &mut shutdown).await {
                break;
            }
        }

        log::info!("✅ Metadata refresh stopped");
    }

    pub async fn run_top(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        log::info!("🚀 Starting top token refresh (every {:?})", self.settings.top_interval);

        loop {
            match self.run_top_once().await {
                Ok(report) if report.requested > 0 => log::info!(
                    "✅ Top refresh: {} requested, {} updated",
                    report.requested,
                    report.updated
                ),
                Ok(_) => log::debug!("No top tokens to refresh"),
                Err(e) => log::error!("❌ Top token refresh failed: {}", e),
            }

            if !sleep_or_shutdown(self.settings.top_interval, &mut shutdown).await {
                break;
            }
        }

        log::info!("✅ Top token refresh stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::test_support::temp_store;
    use crate::pipeline::db::LogStore;
    use crate::pipeline::dexscreener::{DexScreenerPair, PairToken};
    use crate::rpc::ClientError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns data only for addresses it knows, records every request
    struct FakeMarket {
        known: Vec<(String, f64)>,
        fail: bool,
        requests: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl MarketDataSource for FakeMarket {
        async fn pairs_for_tokens(
            &self,
            addresses: &[String],
        ) -> Result<Vec<DexScreenerPair>, ClientError> {
            self.requests.lock().unwrap().push(addresses.to_vec());
            if self.fail {
                return Err(ClientError::Timeout);
            }

            Ok(self
                .known
                .iter()
                .filter(|(addr, _)| addresses.contains(addr))
                .map(|(addr, cap)| DexScreenerPair {
                    base_token: PairToken {
                        address: addr.clone(),
                        symbol: "SYM".to_string(),
                    },
                    market_cap: Some(*cap),
                    pair_created_at: Some(1),
                    ..Default::default()
                })
                .collect())
        }
    }

    fn settings(sub_batch: usize) -> RefreshSettings {
        RefreshSettings {
            limit: 90,
            sub_batch,
            stale: Duration::from_secs(300),
            interval: Duration::from_secs(5),
            max_market_cap: 1_000_000.0,
            top_interval: Duration::from_secs(60),
            pause: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_every_selected_token_stamped() {
        let (_dir, store) = temp_store();
        for address in ["A", "B", "C"] {
            store.record_discovered_token(address, "sig").await.unwrap();
        }

        let market = Arc::new(FakeMarket {
            known: vec![("B".to_string(), 5000.0)],
            fail: false,
            requests: Mutex::new(Vec::new()),
        });
        let pipeline = MetadataRefreshPipeline::new(Arc::new(store.clone()), market.clone(), settings(2));

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.requested, 3);
        assert_eq!(report.updated, 1);
        assert_eq!(report.stamped, 3);

        // Split into sub-batches of two
        assert_eq!(market.requests.lock().unwrap().len(), 2);

        for address in ["A", "B", "C"] {
            assert!(store.token(address).unwrap().unwrap().last_processed_at.is_some());
        }
        assert_eq!(store.token("B").unwrap().unwrap().market_cap, Some(5000.0));
        assert_eq!(store.market_data_count("B").unwrap(), 1);

        // Nothing is stale any more
        assert_eq!(pipeline.run_once().await.unwrap(), RefreshReport::default());
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_tokens_unstamped() {
        let (_dir, store) = temp_store();
        store.record_discovered_token("A", "sig").await.unwrap();

        let market = Arc::new(FakeMarket {
            known: vec![],
            fail: true,
            requests: Mutex::new(Vec::new()),
        });
        let pipeline = MetadataRefreshPipeline::new(Arc::new(store.clone()), market, settings(30));

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.stamped, 0);
        assert!(store.token("A").unwrap().unwrap().last_processed_at.is_none());
    }

    #[tokio::test]
    async fn test_top_refresh_targets_large_caps() {
        let (_dir, store) = temp_store();
        store.record_discovered_token("BIG", "sig").await.unwrap();
        store.record_discovered_token("SMALL", "sig").await.unwrap();

        let market = Arc::new(FakeMarket {
            known: vec![("BIG".to_string(), 2_000_000.0), ("SMALL".to_string(), 100.0)],
            fail: false,
            requests: Mutex::new(Vec::new()),
        });
        let pipeline = MetadataRefreshPipeline::new(Arc::new(store.clone()), market.clone(), settings(30));

        pipeline.run_once().await.unwrap();
        market.requests.lock().unwrap().clear();

        let report = pipeline.run_top_once().await.unwrap();
        assert_eq!(report.requested, 1);
        assert_eq!(market.requests.lock().unwrap()[0], vec!["BIG".to_string()]);
        assert_eq!(store.market_data_count("BIG").unwrap(), 2);
    }
}
