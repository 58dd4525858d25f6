//! Sniper runtime
//!
//! Wires the feed connector, discovery pipelines and (when a wallet is
//! configured) the trade dispatcher, then runs until CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin sniper
//!
//! Configuration comes from the environment (and `.env`); see `Config`.

use dotenv::dotenv;
use log::{error, info, warn};
use solsniper::config::Config;
use solsniper::pipeline::db::SqliteStore;
use solsniper::pipeline::dexscreener::DexScreenerClient;
use solsniper::pipeline::ingestion::{run_ingestion, Ingestor};
use solsniper::pipeline::scheduler::spawn_pipelines;
use solsniper::rpc::HeliusClient;
use solsniper::streamer_core::{ConnectorSettings, StreamConnector};
use solsniper::trading::{
    load_startup_orders, JupiterClient, KeypairSigner, OrderLocks, SwapExecutor, SwapSettings,
    TradeDispatcher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const SCHEMA_DIR: &str = "sql";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    // NOTE: Workaround for rustls issue
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("⚠️  A rustls crypto provider was already installed");
    }

    let config = Config::from_env()?;

    info!("🚀 Starting sniper");
    info!("   ├─ Database: {}", config.engine.db_path);
    info!("   ├─ Pool program: {}", config.pool.program_id);
    info!("   ├─ Migration marker: {}", config.pool.migration_message);
    info!("   └─ Trading: {}", if config.trading.wallet_private_key.is_some() { "enabled" } else { "disabled" });

    // Startup failures below are fatal
    let store = Arc::new(SqliteStore::open(&config.engine.db_path, SCHEMA_DIR)?);
    info!("✅ Database initialized");

    let subscription = std::fs::read(&config.stream.subscribe_path).map_err(|e| {
        format!(
            "Failed to read subscription payload {}: {}",
            config.stream.subscribe_path, e
        )
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (feed_tx, feed_rx) = mpsc::channel::<Vec<u8>>(config.stream.channel_buffer);

    let connector = StreamConnector::connect(
        ConnectorSettings {
            url: config.helius.ws_endpoint(),
            subscription,
            connect_timeout: config.stream.connect_timeout,
            reconnect_initial: config.stream.reconnect_initial,
            reconnect_max: config.stream.reconnect_max,
        },
        feed_tx,
        shutdown_rx.clone(),
    )
    .await?;
    info!("✅ Feed connected");

    let helius = Arc::new(HeliusClient::new(&config.helius, config.engine.http_timeout)?);
    let dexscreener = Arc::new(DexScreenerClient::new(
        &config.dexscreener,
        config.engine.http_timeout,
    )?);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(connector.run()));

    let ingestor = Arc::new(Ingestor::new(store.clone(), config.pool.migration_message.clone()));
    handles.push(tokio::spawn(run_ingestion(
        feed_rx,
        ingestor,
        config.stream.max_in_flight,
        shutdown_rx.clone(),
    )));

    handles.extend(spawn_pipelines(
        &config,
        store.clone(),
        helius.clone(),
        dexscreener,
        &shutdown_rx,
    ));

    if let Some(private_key) = &config.trading.wallet_private_key {
        let signer = Arc::new(KeypairSigner::from_base58(
            private_key,
            config.trading.wallet_pubkey.as_deref(),
        )?);
        let jupiter = Arc::new(JupiterClient::new(
            &config.trading.jupiter_base_url,
            config.engine.http_timeout,
        )?);

        if let Some(path) = &config.trading.trades_path {
            if let Err(e) = load_startup_orders(&*store, path).await {
                error!("❌ {}", e);
            }
        }

        let executor = Arc::new(SwapExecutor::new(
            helius.clone(),
            jupiter,
            signer,
            helius.clone(),
            SwapSettings {
                native_mint: config.pool.native_mint.clone(),
                slippage_bps: config.trading.slippage_bps,
            },
        ));
        let dispatcher = TradeDispatcher::new(
            store.clone(),
            executor,
            OrderLocks::new(),
            config.trading.interval,
        );
        handles.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
    }

    info!("✅ {} background tasks running", handles.len());
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    let _ = shutdown_tx.send(true);

    // Loops stop at their next pause; in-flight iterations finish
    let all_done = futures_util::future::join_all(handles);
    if tokio::time::timeout(SHUTDOWN_GRACE, all_done).await.is_err() {
        warn!("⚠️  Some tasks did not stop within {:?}", SHUTDOWN_GRACE);
    }

    info!("✅ Sniper stopped");
    Ok(())
}
