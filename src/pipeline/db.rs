//! SQLite store for feed logs, tokens, market data and swap orders
//!
//! One connection behind a mutex. Writes that must land together (token
//! discovery + log completion, token deletion + history deletion) run inside a
//! single immediate transaction.

use super::types::{
    now_millis, AmountDetails, DeleteSummary, LogEvent, NewSwapOrder, SwapOrder, Token,
    TokenMarketUpdate,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    Schema(String),
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Schema(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Schema(msg) => write!(f, "Schema error: {}", msg),
            StoreError::Poisoned => write!(f, "Store connection mutex poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Feed log persistence
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert a new unprocessed log. Returns `false` if the signature exists.
    async fn insert_log(&self, signature: &str) -> Result<bool, StoreError>;

    /// Unprocessed logs, never-attempted first, then least recently attempted
    async fn unprocessed_logs(&self, limit: usize) -> Result<Vec<LogEvent>, StoreError>;

    /// Stamp logs that went through a detail lookup so the next claim rotates
    /// past them
    async fn mark_logs_attempted(&self, signatures: &[String], at: i64)
        -> Result<usize, StoreError>;

    /// Insert a discovered token and mark the log that produced it processed,
    /// atomically. Returns `false` if the token already existed.
    async fn record_discovered_token(
        &self,
        contract_address: &str,
        signature: &str,
    ) -> Result<bool, StoreError>;

    async fn delete_processed_logs(&self) -> Result<usize, StoreError>;
}

/// Token and market data persistence
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Tokens below `max_market_cap` (or without one) that were never
    /// refreshed or were last refreshed before `stale_before`
    async fn tokens_for_refresh(
        &self,
        max_market_cap: f64,
        stale_before: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    async fn top_tokens(&self, min_market_cap: f64) -> Result<Vec<String>, StoreError>;

    /// Append a market data sample and refresh the token attributes
    async fn apply_market_update(&self, update: &TokenMarketUpdate) -> Result<(), StoreError>;

    async fn mark_tokens_processed(&self, addresses: &[String], at: i64)
        -> Result<usize, StoreError>;

    /// Processed tokens under `min_market_cap` whose pair predates `created_before`
    async fn expired_tokens(
        &self,
        min_market_cap: f64,
        created_before: i64,
    ) -> Result<Vec<String>, StoreError>;

    /// Delete tokens and their market data history in one transaction
    async fn delete_tokens(&self, addresses: &[String]) -> Result<DeleteSummary, StoreError>;
}

/// Swap order persistence
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &NewSwapOrder) -> Result<i64, StoreError>;

    /// Insert an order keyed by `load_key` unless one with that key was ever
    /// inserted. Returns the new id, or `None` for a known key.
    async fn insert_order_once(
        &self,
        order: &NewSwapOrder,
        load_key: &str,
    ) -> Result<Option<i64>, StoreError>;

    /// Orders with no `executed_at`, oldest first
    async fn pending_orders(&self) -> Result<Vec<SwapOrder>, StoreError>;

    /// Stamp an order executed. A second stamp for the same order is ignored.
    async fn mark_order_executed(
        &self,
        id: i64,
        tx_hash: Option<&str>,
        at: i64,
    ) -> Result<(), StoreError>;
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in name order and executes them.
/// All files use "IF NOT EXISTS" so running them again is harmless.
pub fn run_schema_migrations(conn: &Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Schema(format!(
            "Schema directory not found: {}",
            schema_dir
        )));
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::debug!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
    }

    log::info!("✅ Schema migrations completed");
    Ok(())
}

/// SQLite implementation of all store traits
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database and apply the schema
    pub fn open(db_path: impl AsRef<Path>, schema_dir: &str) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        log::info!("📊 SQLite journal mode: {}", mode);

        run_schema_migrations(&conn, schema_dir)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn log_by_signature(&self, signature: &str) -> Result<Option<LogEvent>, StoreError> {
        let conn = self.conn()?;
        let log = conn
            .query_row(
                "SELECT id, signature, created_at, processed_at FROM rpc_logs WHERE signature = ?1",
                params![signature],
                |row| {
                    Ok(LogEvent {
                        id: row.get(0)?,
                        signature: row.get(1)?,
                        created_at: row.get(2)?,
                        processed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(log)
    }

    pub fn token(&self, contract_address: &str) -> Result<Option<Token>, StoreError> {
        let conn = self.conn()?;
        let token = conn
            .query_row(
                "SELECT id, contract_address, created_at, last_processed_at, symbol, market_cap, pair_created_at
                 FROM tokens WHERE contract_address = ?1",
                params![contract_address],
                |row| {
                    Ok(Token {
                        id: row.get(0)?,
                        contract_address: row.get(1)?,
                        created_at: row.get(2)?,
                        last_processed_at: row.get(3)?,
                        symbol: row.get(4)?,
                        market_cap: row.get(5)?,
                        pair_created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    pub fn market_data_count(&self, contract_address: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM market_data WHERE contract_address = ?1",
            params![contract_address],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn order(&self, id: i64) -> Result<Option<SwapOrder>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, created_at, executed_at, from_token, to_token, amount_details, rules, tx_hash
                 FROM swap_orders WHERE id = ?1",
                params![id],
                read_order_row,
            )
            .optional()?;
        row.map(OrderRow::into_order).transpose()
    }

    /// Direct access for tests and one-off maintenance
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.conn()?;
        Ok(f(&conn)?)
    }
}

struct OrderRow {
    id: i64,
    created_at: i64,
    executed_at: Option<i64>,
    from_token: String,
    to_token: String,
    amount_details: Option<String>,
    rules: Option<String>,
    tx_hash: Option<String>,
}

fn read_order_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        executed_at: row.get(2)?,
        from_token: row.get(3)?,
        to_token: row.get(4)?,
        amount_details: row.get(5)?,
        rules: row.get(6)?,
        tx_hash: row.get(7)?,
    })
}

/// JSON text for the `amount_details` and `rules` columns
fn order_columns(order: &NewSwapOrder) -> Result<(Option<String>, Option<String>), StoreError> {
    let amount_details = order
        .amount_details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let rules = order
        .rules
        .as_ref()
        .filter(|r| !r.is_null())
        .map(serde_json::to_string)
        .transpose()?;
    Ok((amount_details, rules))
}

/// Treat SQL NULL, empty text and the JSON literal `null` alike
fn non_null_json(raw: Option<String>) -> Option<String> {
    raw.filter(|s| {
        let trimmed = s.trim();
        !trimmed.is_empty() && trimmed != "null"
    })
}

impl OrderRow {
    fn into_order(self) -> Result<SwapOrder, StoreError> {
        let amount_details = match non_null_json(self.amount_details) {
            Some(json) => Some(serde_json::from_str::<AmountDetails>(&json)?),
            None => None,
        };

        Ok(SwapOrder {
            id: self.id,
            created_at: self.created_at,
            executed_at: self.executed_at,
            from_token: self.from_token,
            to_token: self.to_token,
            amount_details,
            rules: non_null_json(self.rules),
            tx_hash: self.tx_hash,
        })
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn insert_log(&self, signature: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO rpc_logs (signature, created_at) VALUES (?1, ?2)",
            params![signature, now_millis()],
        )?;
        Ok(inserted == 1)
    }

    async fn unprocessed_logs(&self, limit: usize) -> Result<Vec<LogEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, signature, created_at, processed_at FROM rpc_logs
             WHERE processed_at IS NULL
             ORDER BY attempted_at IS NOT NULL, attempted_at, id
             LIMIT ?1",
        )?;

        let logs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(LogEvent {
                    id: row.get(0)?,
                    signature: row.get(1)?,
                    created_at: row.get(2)?,
                    processed_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(logs)
    }

    async fn mark_logs_attempted(
        &self,
        signatures: &[String],
        at: i64,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;

        {
            let mut stmt = tx.prepare(
                "UPDATE rpc_logs SET attempted_at = ?1 WHERE signature = ?2 AND processed_at IS NULL",
            )?;
            for signature in signatures {
                updated += stmt.execute(params![at, signature])?;
            }
        }

        tx.commit()?;
        Ok(updated)
    }

    async fn record_discovered_token(
        &self,
        contract_address: &str,
        signature: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let now = now_millis();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO tokens (contract_address, created_at) VALUES (?1, ?2)",
            params![contract_address, now],
        )?;

        tx.execute(
            "UPDATE rpc_logs SET processed_at = ?1 WHERE signature = ?2 AND processed_at IS NULL",
            params![now, signature],
        )?;

        tx.commit()?;
        Ok(inserted == 1)
    }

    async fn delete_processed_logs(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM rpc_logs WHERE processed_at IS NOT NULL", [])?;
        Ok(deleted)
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn tokens_for_refresh(
        &self,
        max_market_cap: f64,
        stale_before: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT contract_address FROM tokens
             WHERE (market_cap IS NULL OR market_cap < ?1)
               AND (last_processed_at IS NULL OR last_processed_at < ?2)
             ORDER BY last_processed_at IS NOT NULL, last_processed_at, id
             LIMIT ?3",
        )?;

        let addresses = stmt
            .query_map(params![max_market_cap, stale_before, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(addresses)
    }

    async fn top_tokens(&self, min_market_cap: f64) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT contract_address FROM tokens WHERE market_cap > ?1 ORDER BY market_cap DESC",
        )?;

        let addresses = stmt
            .query_map(params![min_market_cap], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(addresses)
    }

    async fn apply_market_update(&self, update: &TokenMarketUpdate) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sample = &update.sample;

        tx.execute(
            "INSERT INTO market_data
                (timestamp, market_cap, fdv, liquidity_usd, price_native, price_usd, contract_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sample.timestamp,
                sample.market_cap,
                sample.fdv,
                sample.liquidity_usd,
                sample.price_native,
                sample.price_usd,
                sample.contract_address,
            ],
        )?;

        tx.execute(
            "UPDATE tokens SET
                symbol = COALESCE(?1, symbol),
                market_cap = COALESCE(?2, market_cap),
                pair_created_at = COALESCE(?3, pair_created_at)
             WHERE contract_address = ?4",
            params![
                update.symbol,
                update.market_cap,
                update.pair_created_at,
                sample.contract_address,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn mark_tokens_processed(
        &self,
        addresses: &[String],
        at: i64,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;

        {
            let mut stmt =
                tx.prepare("UPDATE tokens SET last_processed_at = ?1 WHERE contract_address = ?2")?;
            for address in addresses {
                updated += stmt.execute(params![at, address])?;
            }
        }

        tx.commit()?;
        Ok(updated)
    }

    async fn expired_tokens(
        &self,
        min_market_cap: f64,
        created_before: i64,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT contract_address FROM tokens
             WHERE market_cap < ?1
               AND pair_created_at < ?2
               AND last_processed_at IS NOT NULL",
        )?;

        let addresses = stmt
            .query_map(params![min_market_cap, created_before], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(addresses)
    }

    async fn delete_tokens(&self, addresses: &[String]) -> Result<DeleteSummary, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut summary = DeleteSummary::default();

        {
            let mut history = tx.prepare("DELETE FROM market_data WHERE contract_address = ?1")?;
            for address in addresses {
                summary.market_data += history.execute(params![address])?;
            }

            let mut tokens = tx.prepare("DELETE FROM tokens WHERE contract_address = ?1")?;
            for address in addresses {
                summary.tokens += tokens.execute(params![address])?;
            }
        }

        // Dropping `tx` on any error above rolls both deletes back
        tx.commit()?;
        Ok(summary)
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn insert_order(&self, order: &NewSwapOrder) -> Result<i64, StoreError> {
        let (amount_details, rules) = order_columns(order)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO swap_orders (created_at, from_token, to_token, amount_details, rules)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![now_millis(), order.from_token, order.to_token, amount_details, rules],
        )?;

        Ok(conn.last_insert_rowid())
    }

    async fn insert_order_once(
        &self,
        order: &NewSwapOrder,
        load_key: &str,
    ) -> Result<Option<i64>, StoreError> {
        let (amount_details, rules) = order_columns(order)?;

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO swap_orders
                (created_at, from_token, to_token, amount_details, rules, load_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                now_millis(),
                order.from_token,
                order.to_token,
                amount_details,
                rules,
                load_key
            ],
        )?;

        Ok((inserted == 1).then(|| conn.last_insert_rowid()))
    }

    async fn pending_orders(&self) -> Result<Vec<SwapOrder>, StoreError> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, created_at, executed_at, from_token, to_token, amount_details, rules, tx_hash
                 FROM swap_orders WHERE executed_at IS NULL ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], read_order_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_order() {
                Ok(order) => orders.push(order),
                Err(e) => log::warn!("⚠️  Skipping order {} with unreadable details: {}", id, e),
            }
        }

        Ok(orders)
    }

    async fn mark_order_executed(
        &self,
        id: i64,
        tx_hash: Option<&str>,
        at: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE swap_orders SET executed_at = ?1, tx_hash = ?2 WHERE id = ?3 AND executed_at IS NULL",
            params![at, tx_hash, id],
        )?;

        if updated == 0 {
            log::warn!("⚠️  Order {} was already stamped executed", id);
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SqliteStore;
    use tempfile::TempDir;

    pub const SCHEMA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/sql");

    /// Fresh on-disk store with the real schema
    pub fn temp_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db"), SCHEMA_DIR).unwrap();
        (dir, store)
    }
}
