//! Order execution: per-order locks, the swap saga and its collaborators

pub mod dispatcher;
pub mod executor;
pub mod jupiter;
pub mod locks;
pub mod orders;
pub mod wallet;

pub use dispatcher::{DispatchRound, TradeDispatcher};
pub use executor::{OrderExecutor, SwapError, SwapExecutor, SwapSettings, TradePlan};
pub use jupiter::{JupiterClient, Quote, QuoteRequest, SwapVenue};
pub use locks::{OrderLockGuard, OrderLocks};
pub use orders::load_startup_orders;
pub use wallet::{KeypairSigner, SignError, TransactionSigner};
