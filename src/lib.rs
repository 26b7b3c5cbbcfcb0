//! Spectre - margin and spot paper-trading simulation engine
//!
//! Simulates trading against an externally supplied reference price feed:
//! per-currency balances, market and escrowed limit spot orders, leveraged
//! positions with forced liquidation, and an append-only transaction journal
//! feeding average-cost computation. Sessions are explicit objects owned by
//! the caller, so any number of simulated users can run side by side.

pub mod config;
pub mod error;
pub mod services;
pub mod types;

pub use config::{PendingScanPolicy, SimConfig};
pub use error::{Result, TradingError};
pub use services::{
    replay_average_cost, BalanceLedger, CloseGuard, FeeSchedule, MarketPriceTable, MemoryStore,
    OrderClass, SessionStore, SqliteStore, TradingSession, TransactionJournal,
};
pub use types::*;
