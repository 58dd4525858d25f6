//! # Token discovery pipeline
//!
//! Feed frames flow one way:
//!
//! 1. `ingestion` stores every feed transaction that carries the migration
//!    marker as an unprocessed log
//! 2. `log_processor` resolves those logs in batches and records the token
//!    each new pool was created for
//! 3. `metadata` keeps market data for known tokens fresh
//! 4. `reaper` deletes tokens that never took off
//!
//! Each stage is an independent loop over the shared SQLite store
//! (`db`), wired together by `scheduler`.

pub mod db;
pub mod dexscreener;
pub mod ingestion;
pub mod log_processor;
pub mod metadata;
pub mod reaper;
pub mod scheduler;
pub mod types;

pub use db::{LogStore, OrderStore, SqliteStore, StoreError, TokenStore};
pub use dexscreener::{DexScreenerClient, MarketDataSource};
pub use ingestion::{run_ingestion, Ingestor};
pub use log_processor::{DecodeError, LogEnrichmentPipeline, PoolAccounts};
pub use metadata::MetadataRefreshPipeline;
pub use reaper::RetentionReaper;
pub use types::{LogEvent, MarketDataSample, NewSwapOrder, SwapOrder, Token};
