//! Startup order file
//!
//! A JSON array of orders inserted when the process starts. Each entry is
//! keyed by its content, so restarting with the same file does not queue an
//! order that was already loaded (and possibly executed) again:
//!
//! ```json
//! [
//!   {"fromToken": "So111...", "toToken": "MINT", "amountDetails": {"quantitySol": 0.1}},
//!   {"fromToken": "MINT", "toToken": "So111...", "rules": null}
//! ]
//! ```

use crate::pipeline::db::{OrderStore, StoreError};
use crate::pipeline::types::NewSwapOrder;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum OrderFileError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Store(StoreError),
}

impl std::fmt::Display for OrderFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderFileError::Io(e) => write!(f, "Failed to read order file: {}", e),
            OrderFileError::Parse(e) => write!(f, "Invalid order file: {}", e),
            OrderFileError::Store(e) => write!(f, "Failed to insert order: {}", e),
        }
    }
}

impl std::error::Error for OrderFileError {}

impl From<std::io::Error> for OrderFileError {
    fn from(err: std::io::Error) -> Self {
        OrderFileError::Io(err)
    }
}

impl From<serde_json::Error> for OrderFileError {
    fn from(err: serde_json::Error) -> Self {
        OrderFileError::Parse(err)
    }
}

impl From<StoreError> for OrderFileError {
    fn from(err: StoreError) -> Self {
        OrderFileError::Store(err)
    }
}

pub fn read_orders(file_path: &Path) -> Result<Vec<NewSwapOrder>, OrderFileError> {
    let json = fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Content keys for file entries. Identical entries are told apart by their
/// occurrence count.
pub fn load_keys(orders: &[NewSwapOrder]) -> Result<Vec<String>, OrderFileError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut keys = Vec::with_capacity(orders.len());

    for order in orders {
        let content = serde_json::to_string(order)?;
        let occurrence = seen.entry(content.clone()).or_insert(0);
        *occurrence += 1;
        keys.push(format!("{}#{}", content, occurrence));
    }

    Ok(keys)
}

/// Insert the file's orders that were never loaded before, returning how many
/// were written
///
/// A missing file is not an error.
pub async fn load_startup_orders(
    store: &dyn OrderStore,
    file_path: &str,
) -> Result<usize, OrderFileError> {
    let path = Path::new(file_path);
    if !path.exists() {
        log::info!("No order file found: {}", file_path);
        return Ok(0);
    }

    let orders = read_orders(path)?;
    let keys = load_keys(&orders)?;
    let mut loaded = 0;

    for (order, key) in orders.iter().zip(&keys) {
        match store.insert_order_once(order, key).await? {
            Some(id) => {
                loaded += 1;
                log::info!(
                    "📝 Loaded order {}: {} -> {}",
                    id,
                    order.from_token,
                    order.to_token
                );
            }
            None => log::debug!(
                "Order {} -> {} already loaded, skipping",
                order.from_token,
                order.to_token
            ),
        }
    }

    log::info!(
        "Loaded {} new orders from {} ({} already known)",
        loaded,
        file_path,
        orders.len() - loaded
    );
    Ok(loaded)
}
