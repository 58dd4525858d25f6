//! Token discovery and swap execution engine.
//!
//! A websocket log subscription feeds newly migrated liquidity pools into a
//! SQLite store, a set of background loops enriches and prunes the discovered
//! tokens, and a trade dispatcher executes pending swap orders through an
//! external venue.

pub mod config;
pub mod pipeline;
pub mod rpc;
pub mod streamer_core;
pub mod trading;

pub use config::{Config, ConfigError};
