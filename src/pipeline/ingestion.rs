//! Feed ingestion
//!
//! Turns raw websocket frames into `rpc_logs` rows. Each frame is handled on
//! its own task, with at most `max_in_flight` handlers alive at once.

use super::db::{LogStore, StoreError};
use crate::streamer_core::FeedMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};

#[derive(Debug)]
pub enum IngestError {
    Malformed(serde_json::Error),
    Store(StoreError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Malformed(e) => write!(f, "Malformed feed payload: {}", e),
            IngestError::Store(e) => write!(f, "Failed to persist log: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New log row written
    Recorded,
    /// Signature already stored
    Duplicate,
    /// No log line carried the migration marker, or the transaction failed
    Skipped,
    /// Subscription confirmation from the feed
    Acknowledged,
}

pub struct Ingestor {
    store: Arc<dyn LogStore>,
    migration_marker: String,
}

impl Ingestor {
    pub fn new(store: Arc<dyn LogStore>, migration_marker: impl Into<String>) -> Self {
        Self {
            store,
            migration_marker: migration_marker.into(),
        }
    }

    pub async fn handle_message(&self, raw: &[u8]) -> Result<IngestOutcome, IngestError> {
        let notification = match FeedMessage::parse(raw).map_err(IngestError::Malformed)? {
            FeedMessage::Ack(ack) => {
                log::info!("📡 Log subscription confirmed (id: {})", ack.result);
                return Ok(IngestOutcome::Acknowledged);
            }
            FeedMessage::Logs(notification) => notification,
        };

        if notification.failed() {
            log::debug!("Skipping failed transaction {}", notification.signature());
            return Ok(IngestOutcome::Skipped);
        }

        let qualifies = notification
            .logs()
            .iter()
            .any(|line| line.contains(&self.migration_marker));

        if !qualifies {
            return Ok(IngestOutcome::Skipped);
        }

        let signature = notification.signature();
        if self.store.insert_log(signature).await? {
            log::info!("🆕 Migration log recorded: {}", signature);
            Ok(IngestOutcome::Recorded)
        } else {
            log::debug!("Duplicate migration log ignored: {}", signature);
            Ok(IngestOutcome::Duplicate)
        }
    }
}

/// Drain the feed queue until it closes or shutdown is signalled
///
/// In-flight handlers are awaited before returning.
pub async fn run_ingestion(
    mut rx: mpsc::Receiver<Vec<u8>>,
    ingestor: Arc<Ingestor>,
    max_in_flight: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let mut received = 0u64;

    log::info!("🚀 Starting feed ingestion (max in flight: {})", max_in_flight);

    loop {
        let raw = tokio::select! {
            msg = rx.recv() => match msg {
                Some(raw) => raw,
                None => {
                    log::warn!("⚠️  Feed channel closed, stopping ingestion");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        received += 1;
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match ingestor.handle_message(&raw).await {
                Ok(_) => {}
                Err(IngestError::Malformed(e)) => {
                    log::warn!(
                        "⚠️  Dropping malformed feed message ({}): {}",
                        e,
                        String::from_utf8_lossy(&raw)
                    );
                }
                Err(e) => log::error!("❌ {}", e),
            }
        });
    }

    // Wait for every handler to hand its permit back
    let _ = permits.acquire_many(max_in_flight as u32).await;
    log::info!("✅ Feed ingestion stopped after {} messages", received);
}
