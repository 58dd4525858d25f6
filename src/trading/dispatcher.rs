//! Trade dispatcher
//!
//! Polls pending orders and runs each on its own task under its order lock.
//! An order already in flight is skipped for the round. Once a saga ends the
//! order is stamped executed with whatever hash was obtained and the lock is
//! released; failed orders are not retried.

use super::executor::OrderExecutor;
use super::locks::OrderLocks;
use crate::pipeline::db::{OrderStore, StoreError};
use crate::pipeline::scheduler::sleep_or_shutdown;
use crate::pipeline::types::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one polling round
pub struct DispatchRound {
    pub spawned: Vec<JoinHandle<()>>,
    pub skipped: usize,
}

pub struct TradeDispatcher {
    store: Arc<dyn OrderStore>,
    executor: Arc<dyn OrderExecutor>,
    locks: OrderLocks,
    interval: Duration,
}

impl TradeDispatcher {
    pub fn new(
        store: Arc<dyn OrderStore>,
        executor: Arc<dyn OrderExecutor>,
        locks: OrderLocks,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            locks,
            interval,
        }
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub async fn dispatch_pending(&self) -> Result<DispatchRound, StoreError> {
        let orders = self.store.pending_orders().await?;
        let mut round = DispatchRound {
            spawned: Vec::with_capacity(orders.len()),
            skipped: 0,
        };

        for order in orders {
            let Some(guard) = self.locks.try_acquire(order.id) else {
                log::debug!("Order {} already in flight, skipping", order.id);
                round.skipped += 1;
                continue;
            };

            let store = self.store.clone();
            let executor = self.executor.clone();

            round.spawned.push(tokio::spawn(async move {
                let _guard = guard;

                let tx_hash = match executor.execute(&order).await {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        log::error!("❌ Order {} failed: {}", order.id, e);
                        None
                    }
                };

                if let Err(e) = store
                    .mark_order_executed(order.id, tx_hash.as_deref(), now_millis())
                    .await
                {
                    log::error!("❌ Failed to stamp order {}: {}", order.id, e);
                }
            }));
        }

        Ok(round)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("🚀 Starting trade dispatcher (every {:?})", self.interval);

        loop {
            match self.dispatch_pending().await {
                Ok(round) if !round.spawned.is_empty() || round.skipped > 0 => log::info!(
                    "📋 Dispatched {} orders, {} already in flight",
                    round.spawned.len(),
                    round.skipped
                ),
                Ok(_) => log::debug!("No pending orders"),
                Err(e) => log::error!("❌ Failed to load pending orders: {}", e),
            }

            if !sleep_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        log::info!("✅ Trade dispatcher stopped ({} orders still in flight)", self.locks.held());
    }
}
