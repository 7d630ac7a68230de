//! Settlement Engine - balance and ledger core for a crypto/fiat trading platform
//!
//! Every trade, swap, fiat conversion and wallet movement settles as one
//! all-or-nothing ledger unit with exact decimal arithmetic.
//!
//! # Modules
//!
//! - [`currency`] - Fiat / crypto currency codes and trading pairs
//! - [`money`] - Amount parsing, scale checks and directional rounding
//! - [`fee`] - Trading, swap and fiat conversion fee schedule
//! - [`id`] - Prefixed record IDs
//! - [`models`] - Ledger rows and append-only records
//! - [`oracle`] - Read-only price source
//! - [`store`] - Ledger store seam (in-memory and PostgreSQL)
//! - [`settlement`] - Trades, swaps, fiat conversions, wallet movements
//! - [`portfolio`] - Valuation and statistics
//! - [`order`] - Resting order lifecycle
//! - [`command`] - JSON command boundary

// Unit-of-work macro - must be first!
#[macro_use]
mod atomic;

// Value types
pub mod currency;
pub mod fee;
pub mod id;
pub mod models;
pub mod money;

// Core
pub mod error;
pub mod oracle;
pub mod order;
pub mod portfolio;
pub mod settlement;
pub mod store;

// Boundary and ambient
pub mod command;
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use command::{CommandResponse, Dispatcher, SettlementCommand};
pub use config::AppConfig;
pub use currency::{CryptoSymbol, Currency, Fiat, TradingPair};
pub use error::SettlementError;
pub use fee::FeeSchedule;
pub use models::{
    CryptoSwap, Order, OrderType, Portfolio, PortfolioAsset, Side, Trade, Transaction, User,
    Wallet, WalletTransaction,
};
pub use oracle::{PriceOracle, PriceTable};
pub use order::{OrderManager, OrderStatus};
pub use portfolio::{PortfolioStats, PortfolioValuator, Valuation};
pub use settlement::{EngineSettings, SettlementEngine};
pub use store::{LedgerStore, LedgerUnit, MemoryLedgerStore, PgLedgerStore, StoreError};
