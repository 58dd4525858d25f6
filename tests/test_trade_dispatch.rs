//! Trade dispatch and swap saga tests with faked venue, wallet and RPC

use async_trait::async_trait;
use serde_json::json;
use solsniper::pipeline::db::{OrderStore, SqliteStore};
use solsniper::pipeline::types::{AmountDetails, NewSwapOrder, SwapOrder};
use solsniper::rpc::{BalanceSource, ClientError, TransactionSubmitter};
use solsniper::trading::{
    OrderExecutor, OrderLocks, Quote, QuoteRequest, SignError, SwapError, SwapExecutor,
    SwapSettings, SwapVenue, TradeDispatcher, TransactionSigner,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const SCHEMA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/sql");
const NATIVE: &str = "So11111111111111111111111111111111111111112";

fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("sniper.db"), SCHEMA_DIR).unwrap();
    (dir, store)
}

fn buy(mint: &str, quantity_sol: f64) -> NewSwapOrder {
    NewSwapOrder {
        from_token: NATIVE.to_string(),
        to_token: mint.to_string(),
        amount_details: Some(AmountDetails { quantity_sol }),
        rules: None,
    }
}

fn sell(mint: &str, rules: Option<serde_json::Value>) -> NewSwapOrder {
    NewSwapOrder {
        from_token: mint.to_string(),
        to_token: NATIVE.to_string(),
        amount_details: None,
        rules,
    }
}

struct FakeBalances {
    native: u64,
    token: u64,
}

#[async_trait]
impl BalanceSource for FakeBalances {
    async fn native_balance(&self, _owner: &str) -> Result<u64, ClientError> {
        Ok(self.native)
    }

    async fn token_balance(&self, _owner: &str, _mint: &str) -> Result<u64, ClientError> {
        Ok(self.token)
    }
}

#[derive(Default)]
struct FakeVenue {
    empty_route: bool,
    build_returns_none: bool,
    quotes: Mutex<Vec<QuoteRequest>>,
    builds: AtomicUsize,
}

#[async_trait]
impl SwapVenue for FakeVenue {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ClientError> {
        self.quotes.lock().unwrap().push(request.clone());

        let route_plan = if self.empty_route {
            Vec::new()
        } else {
            vec![json!({"swapInfo": {"ammKey": "AMM"}, "percent": 100})]
        };

        Ok(Quote {
            input_mint: request.input_mint.clone(),
            in_amount: request.amount.to_string(),
            output_mint: request.output_mint.clone(),
            out_amount: "42".to_string(),
            route_plan,
            ..Default::default()
        })
    }

    async fn build_swap(
        &self,
        _quote: &Quote,
        user_pubkey: &str,
    ) -> Result<Option<String>, ClientError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.build_returns_none {
            return Ok(None);
        }
        Ok(Some(format!("unsigned-for-{}", user_pubkey)))
    }
}

struct FakeSigner;

impl TransactionSigner for FakeSigner {
    fn pubkey(&self) -> String {
        "WALLET".to_string()
    }

    fn sign_transaction(&self, unsigned_tx: &str) -> Result<String, SignError> {
        Ok(format!("signed:{}", unsigned_tx))
    }
}

#[derive(Default)]
struct FakeSubmitter {
    submitted: Mutex<Vec<String>>,
    reject: bool,
}

#[async_trait]
impl TransactionSubmitter for FakeSubmitter {
    async fn send_transaction(&self, signed_tx: &str) -> Result<String, ClientError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(signed_tx.to_string());
        if self.reject {
            return Err(ClientError::Rpc("Transaction simulation failed".to_string()));
        }
        Ok(format!("txhash_{}", submitted.len()))
    }
}

struct Harness {
    venue: Arc<FakeVenue>,
    submitter: Arc<FakeSubmitter>,
    executor: Arc<SwapExecutor>,
}

fn harness(native: u64, token: u64, venue: FakeVenue) -> Harness {
    harness_with_submitter(native, token, venue, FakeSubmitter::default())
}

fn harness_with_submitter(
    native: u64,
    token: u64,
    venue: FakeVenue,
    submitter: FakeSubmitter,
) -> Harness {
    let venue = Arc::new(venue);
    let submitter = Arc::new(submitter);
    let executor = Arc::new(SwapExecutor::new(
        Arc::new(FakeBalances { native, token }),
        venue.clone(),
        Arc::new(FakeSigner),
        submitter.clone(),
        SwapSettings {
            native_mint: NATIVE.to_string(),
            slippage_bps: 100,
        },
    ));

    Harness {
        venue,
        submitter,
        executor,
    }
}

async fn dispatch_and_wait(dispatcher: &TradeDispatcher) -> usize {
    let round = dispatcher.dispatch_pending().await.unwrap();
    let spawned = round.spawned.len();
    for handle in round.spawned {
        handle.await.unwrap();
    }
    spawned
}

#[tokio::test]
async fn test_sell_with_zero_balance_aborts_before_venue() {
    let (_dir, store) = open_store();
    let id = store.insert_order(&sell("TOKEN_X", None)).await.unwrap();

    let h = harness(1_000_000_000, 0, FakeVenue::default());
    let dispatcher = TradeDispatcher::new(
        Arc::new(store.clone()),
        h.executor.clone(),
        OrderLocks::new(),
        Duration::from_secs(60),
    );

    assert_eq!(dispatch_and_wait(&dispatcher).await, 1);

    assert!(h.venue.quotes.lock().unwrap().is_empty());
    assert_eq!(h.venue.builds.load(Ordering::SeqCst), 0);
    assert!(h.submitter.submitted.lock().unwrap().is_empty());

    let order = store.order(id).unwrap().unwrap();
    assert!(order.executed_at.is_some());
    assert!(order.tx_hash.is_none());
    assert_eq!(dispatcher.locks().held(), 0);

    // Not picked up again
    assert_eq!(dispatch_and_wait(&dispatcher).await, 0);
}

#[tokio::test]
async fn test_buy_runs_full_saga() {
    let (_dir, store) = open_store();
    let id = store.insert_order(&buy("TOKEN_X", 0.5)).await.unwrap();

    let h = harness(1_000_000_000, 0, FakeVenue::default());
    let dispatcher = TradeDispatcher::new(
        Arc::new(store.clone()),
        h.executor.clone(),
        OrderLocks::new(),
        Duration::from_secs(60),
    );

    dispatch_and_wait(&dispatcher).await;

    let quotes = h.venue.quotes.lock().unwrap().clone();
    assert_eq!(
        quotes,
        vec![QuoteRequest {
            input_mint: NATIVE.to_string(),
            output_mint: "TOKEN_X".to_string(),
            amount: 500_000_000,
            slippage_bps: 100,
        }]
    );
    assert_eq!(
        *h.submitter.submitted.lock().unwrap(),
        vec!["signed:unsigned-for-WALLET".to_string()]
    );

    let order = store.order(id).unwrap().unwrap();
    assert_eq!(order.tx_hash.as_deref(), Some("txhash_1"));
    assert!(order.executed_at.is_some());
}

#[tokio::test]
async fn test_full_sell_quotes_entire_balance() {
    let h = harness(0, 7_500, FakeVenue::default());

    let order = SwapOrder {
        id: 9,
        created_at: 0,
        executed_at: None,
        from_token: "TOKEN_X".to_string(),
        to_token: NATIVE.to_string(),
        amount_details: None,
        rules: None,
        tx_hash: None,
    };

    let hash = h.executor.execute(&order).await.unwrap();
    assert_eq!(hash, "txhash_1");

    let quotes = h.venue.quotes.lock().unwrap();
    assert_eq!(quotes[0].input_mint, "TOKEN_X");
    assert_eq!(quotes[0].output_mint, NATIVE);
    assert_eq!(quotes[0].amount, 7_500);
}

#[tokio::test]
async fn test_saga_terminal_failures() {
    // Buy larger than the wallet
    let h = harness(100, 0, FakeVenue::default());
    let (_dir, store) = open_store();
    let id = store.insert_order(&buy("TOKEN_X", 1.0)).await.unwrap();
    let order = store.order(id).unwrap().unwrap();
    assert!(matches!(
        h.executor.execute(&order).await,
        Err(SwapError::InsufficientBalance {
            required: 1_000_000_000,
            available: 100
        })
    ));
    assert!(h.venue.quotes.lock().unwrap().is_empty());

    // Sell with exit rules is refused rather than selling everything
    let id = store
        .insert_order(&sell("TOKEN_X", Some(json!({"takeProfitPct": 50}))))
        .await
        .unwrap();
    let order = store.order(id).unwrap().unwrap();
    let h = harness(0, 1_000, FakeVenue::default());
    assert!(matches!(
        h.executor.execute(&order).await,
        Err(SwapError::PartialSellUnsupported)
    ));
    assert!(h.venue.quotes.lock().unwrap().is_empty());

    // Quote without a route
    let h = harness(
        1_000_000_000,
        0,
        FakeVenue {
            empty_route: true,
            ..Default::default()
        },
    );
    let id = store.insert_order(&buy("TOKEN_Y", 0.1)).await.unwrap();
    let order = store.order(id).unwrap().unwrap();
    assert!(matches!(h.executor.execute(&order).await, Err(SwapError::NoQuote)));
    assert_eq!(h.venue.builds.load(Ordering::SeqCst), 0);
    assert!(h.submitter.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_build_and_submit_failures_stamp_without_hash() {
    let (_dir, store) = open_store();

    // Venue builds nothing: saga stops before signing and submitting
    let id = store.insert_order(&buy("TOKEN_X", 0.1)).await.unwrap();
    let h = harness(
        1_000_000_000,
        0,
        FakeVenue {
            build_returns_none: true,
            ..Default::default()
        },
    );
    let locks = OrderLocks::new();
    let dispatcher = TradeDispatcher::new(
        Arc::new(store.clone()),
        h.executor.clone(),
        locks.clone(),
        Duration::from_secs(60),
    );

    assert_eq!(dispatch_and_wait(&dispatcher).await, 1);
    assert_eq!(h.venue.builds.load(Ordering::SeqCst), 1);
    assert!(h.submitter.submitted.lock().unwrap().is_empty());

    let order = store.order(id).unwrap().unwrap();
    assert!(order.executed_at.is_some());
    assert!(order.tx_hash.is_none());
    assert!(!locks.is_locked(id));

    let order = store.order(id).unwrap().unwrap();
    assert!(matches!(
        h.executor.execute(&order).await,
        Err(SwapError::BuildFailed)
    ));

    // Submission rejected: one submit attempt, no hash recorded
    let id = store.insert_order(&buy("TOKEN_Y", 0.1)).await.unwrap();
    let h = harness_with_submitter(
        1_000_000_000,
        0,
        FakeVenue::default(),
        FakeSubmitter {
            reject: true,
            ..Default::default()
        },
    );
    let locks = OrderLocks::new();
    let dispatcher = TradeDispatcher::new(
        Arc::new(store.clone()),
        h.executor.clone(),
        locks.clone(),
        Duration::from_secs(60),
    );

    assert_eq!(dispatch_and_wait(&dispatcher).await, 1);
    assert_eq!(h.submitter.submitted.lock().unwrap().len(), 1);

    let order = store.order(id).unwrap().unwrap();
    assert!(order.executed_at.is_some());
    assert!(order.tx_hash.is_none());
    assert!(!locks.is_locked(id));
    assert!(store.pending_orders().await.unwrap().is_empty());
}

/// Slow executor that records how many runs overlap per order
#[derive(Default)]
struct SlowExecutor {
    running: Mutex<HashMap<i64, usize>>,
    max_overlap: AtomicUsize,
    runs: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl OrderExecutor for SlowExecutor {
    async fn execute(&self, order: &SwapOrder) -> Result<String, SwapError> {
        {
            let mut running = self.running.lock().unwrap();
            let count = running.entry(order.id).or_insert(0);
            *count += 1;
            self.max_overlap.fetch_max(*count, Ordering::SeqCst);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(200)).await;

        *self.running.lock().unwrap().get_mut(&order.id).unwrap() -= 1;

        if self.fail {
            Err(SwapError::NoQuote)
        } else {
            Ok(format!("hash_{}", order.id))
        }
    }
}

#[tokio::test]
async fn test_order_never_runs_twice_concurrently() {
    let (_dir, store) = open_store();
    let first = store.insert_order(&buy("A", 0.1)).await.unwrap();
    let second = store.insert_order(&buy("B", 0.1)).await.unwrap();

    let executor = Arc::new(SlowExecutor::default());
    let locks = OrderLocks::new();
    let dispatcher = TradeDispatcher::new(
        Arc::new(store.clone()),
        executor.clone(),
        locks.clone(),
        Duration::from_secs(60),
    );

    let round1 = dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(round1.spawned.len(), 2);

    // Both orders still pending and locked: every claim is skipped
    let round2 = dispatcher.dispatch_pending().await.unwrap();
    assert!(round2.spawned.is_empty());
    assert_eq!(round2.skipped, 2);
    assert!(locks.is_locked(first) && locks.is_locked(second));

    for handle in round1.spawned {
        handle.await.unwrap();
    }

    assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
    assert_eq!(executor.max_overlap.load(Ordering::SeqCst), 1);
    assert_eq!(locks.held(), 0);
    assert_eq!(
        store.order(first).unwrap().unwrap().tx_hash.as_deref(),
        Some("hash_1")
    );
}

#[tokio::test]
async fn test_lock_released_when_saga_fails() {
    let (_dir, store) = open_store();
    let id = store.insert_order(&sell("A", None)).await.unwrap();

    let executor = Arc::new(SlowExecutor {
        fail: true,
        ..Default::default()
    });
    let locks = OrderLocks::new();
    let dispatcher = TradeDispatcher::new(
        Arc::new(store.clone()),
        executor,
        locks.clone(),
        Duration::from_secs(60),
    );

    dispatch_and_wait(&dispatcher).await;

    assert!(!locks.is_locked(id));
    let order = store.order(id).unwrap().unwrap();
    assert!(order.executed_at.is_some());
    assert!(order.tx_hash.is_none());
}
