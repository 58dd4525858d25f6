//! Background task wiring
//!
//! Every pipeline loop runs on its own task with its own timer. Loops stop at
//! their next pause once the shutdown signal flips to `true`.

use super::db::{LogStore, SqliteStore};
use super::dexscreener::MarketDataSource;
use super::log_processor::{EnrichmentSettings, LogEnrichmentPipeline};
use super::metadata::{MetadataRefreshPipeline, RefreshSettings};
use super::reaper::{ReaperSettings, RetentionReaper};
use crate::config::Config;
use crate::rpc::TransactionDetailSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pause between market data sub-batches
const MARKET_DATA_PAUSE: Duration = Duration::from_secs(1);

/// Sleep for `duration` unless shutdown is signalled first
///
/// Returns `false` when the caller should stop.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => match changed {
            Ok(()) => !*shutdown.borrow(),
            // Sender gone, nobody can tell us to keep going
            Err(_) => false,
        },
    }
}

/// Delete processed logs on a fixed interval
pub async fn run_log_pruning(
    store: Arc<dyn LogStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("🚀 Starting processed log pruning (every {:?})", interval);

    loop {
        match store.delete_processed_logs().await {
            Ok(0) => log::debug!("No processed logs to prune"),
            Ok(n) => log::info!("🧹 Pruned {} processed logs", n),
            Err(e) => log::error!("❌ Log pruning failed: {}", e),
        }

        if !sleep_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    log::info!("✅ Log pruning stopped");
}

pub fn enrichment_settings(config: &Config) -> EnrichmentSettings {
    EnrichmentSettings {
        fetch_limit: config.engine.log_fetch_limit,
        batch_threshold: config.engine.log_batch_threshold,
        wait: config.engine.log_wait,
        interval: config.engine.log_interval,
        program_id: config.pool.program_id.clone(),
        native_mint: config.pool.native_mint.clone(),
    }
}

pub fn refresh_settings(config: &Config) -> RefreshSettings {
    RefreshSettings {
        limit: config.engine.refresh_limit,
        sub_batch: config.engine.refresh_sub_batch,
        stale: config.engine.refresh_stale,
        interval: config.engine.refresh_interval,
        max_market_cap: config.engine.refresh_max_market_cap,
        top_interval: config.engine.top_refresh_interval,
        pause: MARKET_DATA_PAUSE,
    }
}

pub fn reaper_settings(config: &Config) -> ReaperSettings {
    ReaperSettings {
        min_market_cap: config.engine.reaper_min_market_cap,
        min_age: config.engine.reaper_min_age,
        interval: config.engine.reaper_interval,
    }
}

/// Spawn enrichment, pruning, refresh and retention loops
pub fn spawn_pipelines(
    config: &Config,
    store: Arc<SqliteStore>,
    details: Arc<dyn TransactionDetailSource>,
    market: Arc<dyn MarketDataSource>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let enrichment = LogEnrichmentPipeline::new(store.clone(), details, enrichment_settings(config));
    handles.push(tokio::spawn(enrichment.run(shutdown.clone())));

    handles.push(tokio::spawn(run_log_pruning(
        store.clone(),
        config.engine.log_prune_interval,
        shutdown.clone(),
    )));

    let refresh = Arc::new(MetadataRefreshPipeline::new(
        store.clone(),
        market,
        refresh_settings(config),
    ));
    handles.push(tokio::spawn(refresh.clone().run(shutdown.clone())));

    if config.engine.top_refresh_interval.is_zero() {
        log::info!("Top token refresh disabled");
    } else {
        handles.push(tokio::spawn(refresh.run_top(shutdown.clone())));
    }

    let reaper = RetentionReaper::new(store, reaper_settings(config));
    handles.push(tokio::spawn(reaper.run(shutdown.clone())));

    handles
}
