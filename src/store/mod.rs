//! Ledger Store
//!
//! Durable keyed storage for users, wallets, portfolios, assets, orders and the
//! append-only records. All access goes through a [`LedgerUnit`]: one atomic,
//! isolated unit of work obtained from [`LedgerStore::begin_unit`].
//!
//! # Unit contract
//!
//! 1. **Isolation**: rows read from a unit stay consistent until the unit ends;
//!    a concurrent writer either blocks (row locks) or makes this unit fail
//!    with [`StoreError::Conflict`] at commit (optimistic validation).
//! 2. **All-or-nothing**: nothing a unit writes is visible before `commit`;
//!    `rollback`, or dropping the unit, discards everything.
//! 3. **No reuse**: rows are never carried from one unit into another.
//!
//! Two implementations:
//! - [`memory::MemoryLedgerStore`] - versioned rows, optimistic commit
//! - [`postgres::PgLedgerStore`] - PostgreSQL, `SELECT ... FOR UPDATE`

pub mod memory;
pub mod postgres;

pub use memory::{LedgerSnapshot, MemoryLedgerStore};
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::currency::CryptoSymbol;
use crate::models::{
    BankWithdrawal, CryptoSwap, Order, Portfolio, PortfolioAsset, PortfolioId, PortfolioSnapshot,
    Trade, Transaction, User, UserId, Wallet, WalletTransaction,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row this unit read was modified by another unit
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Underlying persistence failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Factory for units of work
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin_unit(&self) -> Result<Box<dyn LedgerUnit>, StoreError>;
}

/// One atomic, isolated unit of work
///
/// `get_*` reads return the row as it stands inside this unit (including the
/// unit's own staged writes). Writes are staged until `commit`.
#[async_trait]
pub trait LedgerUnit: Send {
    // === Users ===
    async fn get_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError>;
    async fn update_user(&mut self, user: &User) -> Result<(), StoreError>;

    // === Wallets ===
    async fn get_wallet(
        &mut self,
        user_id: UserId,
        currency: &CryptoSymbol,
    ) -> Result<Option<Wallet>, StoreError>;
    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError>;

    // === Portfolio ===
    async fn get_portfolio(&mut self, user_id: UserId) -> Result<Option<Portfolio>, StoreError>;
    async fn update_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), StoreError>;

    async fn get_asset(
        &mut self,
        portfolio_id: PortfolioId,
        symbol: &CryptoSymbol,
    ) -> Result<Option<PortfolioAsset>, StoreError>;
    async fn list_assets(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<PortfolioAsset>, StoreError>;
    async fn upsert_asset(&mut self, asset: &PortfolioAsset) -> Result<(), StoreError>;
    async fn delete_asset(
        &mut self,
        portfolio_id: PortfolioId,
        symbol: &CryptoSymbol,
    ) -> Result<(), StoreError>;

    // === Orders ===
    async fn get_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError>;
    async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError>;
    /// Orders not yet in a terminal state, all users
    async fn list_open_orders(&mut self) -> Result<Vec<Order>, StoreError>;

    // === Append-only records ===
    async fn create_trade(&mut self, trade: &Trade) -> Result<(), StoreError>;
    async fn list_trades(&mut self, user_id: UserId) -> Result<Vec<Trade>, StoreError>;
    async fn create_swap(&mut self, swap: &CryptoSwap) -> Result<(), StoreError>;
    async fn append_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;
    async fn list_transactions(&mut self, user_id: UserId) -> Result<Vec<Transaction>, StoreError>;
    async fn append_wallet_transaction(&mut self, tx: &WalletTransaction)
    -> Result<(), StoreError>;
    async fn find_wallet_transaction(
        &mut self,
        tx_hash: &str,
    ) -> Result<Option<WalletTransaction>, StoreError>;
    async fn create_withdrawal(&mut self, withdrawal: &BankWithdrawal) -> Result<(), StoreError>;
    async fn append_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError>;
    /// Snapshots recorded at or after `since`, oldest first
    async fn list_snapshots(
        &mut self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>, StoreError>;

    // === Release ===
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
