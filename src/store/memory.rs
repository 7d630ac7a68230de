//! In-memory ledger store with optimistic concurrency
//!
//! Every mutable row carries a version. A unit remembers the version of each
//! row it reads (or blindly writes) and stages its writes locally. `commit`
//! re-checks all remembered versions under the store lock; any mismatch fails
//! the whole unit with [`StoreError::Conflict`] and nothing is applied.
//!
//! Appending a wallet transaction bumps a version keyed by its `tx_hash`, so
//! two units that both observed "no such hash" cannot both commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{LedgerStore, LedgerUnit, StoreError};
use crate::currency::CryptoSymbol;
use crate::models::{
    BankWithdrawal, CryptoSwap, Order, Portfolio, PortfolioAsset, PortfolioId, PortfolioSnapshot,
    Trade, Transaction, User, UserId, Wallet, WalletTransaction,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    User(UserId),
    Wallet(UserId, CryptoSymbol),
    Portfolio(UserId),
    Asset(PortfolioId, CryptoSymbol),
    Order(String),
    WalletTx(String),
}

/// Point-in-time copy of everything the store holds
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub users: HashMap<UserId, User>,
    pub wallets: HashMap<(UserId, CryptoSymbol), Wallet>,
    pub portfolios: HashMap<UserId, Portfolio>,
    pub assets: HashMap<(PortfolioId, CryptoSymbol), PortfolioAsset>,
    pub orders: HashMap<String, Order>,
    pub trades: Vec<Trade>,
    pub swaps: Vec<CryptoSwap>,
    pub transactions: Vec<Transaction>,
    pub wallet_transactions: Vec<WalletTransaction>,
    pub withdrawals: Vec<BankWithdrawal>,
    pub portfolio_snapshots: Vec<PortfolioSnapshot>,
}

impl LedgerSnapshot {
    pub fn asset(&self, portfolio_id: PortfolioId, symbol: &str) -> Option<&PortfolioAsset> {
        self.assets
            .iter()
            .find(|((pid, sym), _)| *pid == portfolio_id && sym.as_str() == symbol)
            .map(|(_, asset)| asset)
    }

    pub fn wallet(&self, user_id: UserId, symbol: &str) -> Option<&Wallet> {
        self.wallets
            .iter()
            .find(|((uid, sym), _)| *uid == user_id && sym.as_str() == symbol)
            .map(|(_, wallet)| wallet)
    }

    pub fn transactions_for(&self, user_id: UserId) -> Vec<&Transaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    data: LedgerSnapshot,
    versions: HashMap<RowKey, u64>,
}

impl Inner {
    fn version(&self, key: &RowKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: RowKey) {
        *self.versions.entry(key).or_insert(0) += 1;
    }
}

/// Shared in-memory store; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Seeding (setup and tests) ===

    pub async fn insert_user(&self, user: User) {
        let mut inner = self.inner.lock().await;
        inner.bump(RowKey::User(user.user_id));
        inner.data.users.insert(user.user_id, user);
    }

    pub async fn insert_wallet(&self, wallet: Wallet) {
        let mut inner = self.inner.lock().await;
        let key = (wallet.user_id, wallet.currency.clone());
        inner.bump(RowKey::Wallet(key.0, key.1.clone()));
        inner.data.wallets.insert(key, wallet);
    }

    pub async fn insert_portfolio(&self, portfolio: Portfolio) {
        let mut inner = self.inner.lock().await;
        inner.bump(RowKey::Portfolio(portfolio.user_id));
        inner.data.portfolios.insert(portfolio.user_id, portfolio);
    }

    pub async fn insert_asset(&self, asset: PortfolioAsset) {
        let mut inner = self.inner.lock().await;
        let key = (asset.portfolio_id, asset.symbol.clone());
        inner.bump(RowKey::Asset(key.0, key.1.clone()));
        inner.data.assets.insert(key, asset);
    }

    pub async fn insert_order(&self, order: Order) {
        let mut inner = self.inner.lock().await;
        inner.bump(RowKey::Order(order.order_id.clone()));
        inner.data.orders.insert(order.order_id.clone(), order);
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.inner.lock().await.data.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin_unit(&self) -> Result<Box<dyn LedgerUnit>, StoreError> {
        Ok(Box::new(MemoryUnit {
            inner: Arc::clone(&self.inner),
            read_versions: HashMap::new(),
            users: HashMap::new(),
            wallets: HashMap::new(),
            portfolios: HashMap::new(),
            assets: HashMap::new(),
            orders: HashMap::new(),
            trades: Vec::new(),
            swaps: Vec::new(),
            transactions: Vec::new(),
            wallet_transactions: Vec::new(),
            withdrawals: Vec::new(),
            snapshots: Vec::new(),
        }))
    }
}

/// Staged writes of one unit. `assets` maps to `None` for a deleted row.
struct MemoryUnit {
    inner: Arc<Mutex<Inner>>,
    read_versions: HashMap<RowKey, u64>,
    users: HashMap<UserId, User>,
    wallets: HashMap<(UserId, CryptoSymbol), Wallet>,
    portfolios: HashMap<UserId, Portfolio>,
    assets: HashMap<(PortfolioId, CryptoSymbol), Option<PortfolioAsset>>,
    orders: HashMap<String, Order>,
    trades: Vec<Trade>,
    swaps: Vec<CryptoSwap>,
    transactions: Vec<Transaction>,
    wallet_transactions: Vec<WalletTransaction>,
    withdrawals: Vec<BankWithdrawal>,
    snapshots: Vec<PortfolioSnapshot>,
}

impl MemoryUnit {
    /// Remember the first version observed for `key`
    fn observe(&mut self, inner: &Inner, key: RowKey) {
        let version = inner.version(&key);
        self.read_versions.entry(key).or_insert(version);
    }

    async fn observe_unlocked(&mut self, key: RowKey) {
        if self.read_versions.contains_key(&key) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, key);
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn get_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        if let Some(user) = self.users.get(&user_id) {
            return Ok(Some(user.clone()));
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, RowKey::User(user_id));
        Ok(guard.data.users.get(&user_id).cloned())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.observe_unlocked(RowKey::User(user.user_id)).await;
        self.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get_wallet(
        &mut self,
        user_id: UserId,
        currency: &CryptoSymbol,
    ) -> Result<Option<Wallet>, StoreError> {
        let key = (user_id, currency.clone());
        if let Some(wallet) = self.wallets.get(&key) {
            return Ok(Some(wallet.clone()));
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, RowKey::Wallet(user_id, currency.clone()));
        Ok(guard.data.wallets.get(&key).cloned())
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        self.observe_unlocked(RowKey::Wallet(wallet.user_id, wallet.currency.clone()))
            .await;
        self.wallets
            .insert((wallet.user_id, wallet.currency.clone()), wallet.clone());
        Ok(())
    }

    async fn get_portfolio(&mut self, user_id: UserId) -> Result<Option<Portfolio>, StoreError> {
        if let Some(portfolio) = self.portfolios.get(&user_id) {
            return Ok(Some(portfolio.clone()));
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, RowKey::Portfolio(user_id));
        Ok(guard.data.portfolios.get(&user_id).cloned())
    }

    async fn update_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), StoreError> {
        self.observe_unlocked(RowKey::Portfolio(portfolio.user_id))
            .await;
        self.portfolios.insert(portfolio.user_id, portfolio.clone());
        Ok(())
    }

    async fn get_asset(
        &mut self,
        portfolio_id: PortfolioId,
        symbol: &CryptoSymbol,
    ) -> Result<Option<PortfolioAsset>, StoreError> {
        let key = (portfolio_id, symbol.clone());
        if let Some(staged) = self.assets.get(&key) {
            return Ok(staged.clone());
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, RowKey::Asset(portfolio_id, symbol.clone()));
        Ok(guard.data.assets.get(&key).cloned())
    }

    async fn list_assets(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<PortfolioAsset>, StoreError> {
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;

        let mut merged: HashMap<CryptoSymbol, PortfolioAsset> = HashMap::new();
        for ((pid, symbol), asset) in guard.data.assets.iter() {
            if *pid != portfolio_id {
                continue;
            }
            self.observe(&guard, RowKey::Asset(*pid, symbol.clone()));
            merged.insert(symbol.clone(), asset.clone());
        }
        for ((pid, symbol), staged) in self.assets.iter() {
            if *pid != portfolio_id {
                continue;
            }
            match staged {
                Some(asset) => merged.insert(symbol.clone(), asset.clone()),
                None => merged.remove(symbol),
            };
        }

        let mut assets: Vec<PortfolioAsset> = merged.into_values().collect();
        assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(assets)
    }

    async fn upsert_asset(&mut self, asset: &PortfolioAsset) -> Result<(), StoreError> {
        self.observe_unlocked(RowKey::Asset(asset.portfolio_id, asset.symbol.clone()))
            .await;
        self.assets.insert(
            (asset.portfolio_id, asset.symbol.clone()),
            Some(asset.clone()),
        );
        Ok(())
    }

    async fn delete_asset(
        &mut self,
        portfolio_id: PortfolioId,
        symbol: &CryptoSymbol,
    ) -> Result<(), StoreError> {
        self.observe_unlocked(RowKey::Asset(portfolio_id, symbol.clone()))
            .await;
        self.assets.insert((portfolio_id, symbol.clone()), None);
        Ok(())
    }

    async fn get_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError> {
        if let Some(order) = self.orders.get(order_id) {
            return Ok(Some(order.clone()));
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, RowKey::Order(order_id.to_string()));
        Ok(guard.data.orders.get(order_id).cloned())
    }

    async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.observe_unlocked(RowKey::Order(order.order_id.clone()))
            .await;
        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn list_open_orders(&mut self) -> Result<Vec<Order>, StoreError> {
        let guard = self.inner.lock().await;
        let mut merged: HashMap<String, Order> = guard
            .data
            .orders
            .iter()
            .map(|(id, order)| (id.clone(), order.clone()))
            .collect();
        drop(guard);

        for (id, order) in self.orders.iter() {
            merged.insert(id.clone(), order.clone());
        }

        let mut open: Vec<Order> = merged
            .into_values()
            .filter(|order| order.status.is_open())
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }

    async fn create_trade(&mut self, trade: &Trade) -> Result<(), StoreError> {
        self.trades.push(trade.clone());
        Ok(())
    }

    async fn list_trades(&mut self, user_id: UserId) -> Result<Vec<Trade>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .data
            .trades
            .iter()
            .chain(self.trades.iter())
            .filter(|trade| trade.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_swap(&mut self, swap: &CryptoSwap) -> Result<(), StoreError> {
        self.swaps.push(swap.clone());
        Ok(())
    }

    async fn append_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        self.transactions.push(tx.clone());
        Ok(())
    }

    async fn list_transactions(&mut self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .data
            .transactions
            .iter()
            .chain(self.transactions.iter())
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_wallet_transaction(
        &mut self,
        tx: &WalletTransaction,
    ) -> Result<(), StoreError> {
        if self
            .wallet_transactions
            .iter()
            .any(|staged| staged.tx_hash == tx.tx_hash)
        {
            return Err(StoreError::Conflict(format!(
                "duplicate tx_hash {}",
                tx.tx_hash
            )));
        }
        self.observe_unlocked(RowKey::WalletTx(tx.tx_hash.clone()))
            .await;
        self.wallet_transactions.push(tx.clone());
        Ok(())
    }

    async fn find_wallet_transaction(
        &mut self,
        tx_hash: &str,
    ) -> Result<Option<WalletTransaction>, StoreError> {
        if let Some(staged) = self
            .wallet_transactions
            .iter()
            .find(|tx| tx.tx_hash == tx_hash)
        {
            return Ok(Some(staged.clone()));
        }
        let inner = Arc::clone(&self.inner);
        let guard = inner.lock().await;
        self.observe(&guard, RowKey::WalletTx(tx_hash.to_string()));
        Ok(guard
            .data
            .wallet_transactions
            .iter()
            .find(|tx| tx.tx_hash == tx_hash)
            .cloned())
    }

    async fn create_withdrawal(&mut self, withdrawal: &BankWithdrawal) -> Result<(), StoreError> {
        self.withdrawals.push(withdrawal.clone());
        Ok(())
    }

    async fn append_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn list_snapshots(
        &mut self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>, StoreError> {
        let guard = self.inner.lock().await;
        let mut history: Vec<PortfolioSnapshot> = guard
            .data
            .portfolio_snapshots
            .iter()
            .chain(self.snapshots.iter())
            .filter(|snap| snap.user_id == user_id && snap.recorded_at >= since)
            .cloned()
            .collect();
        history.sort_by_key(|snap| snap.recorded_at);
        Ok(history)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        let mut guard = unit.inner.lock().await;

        for (key, seen) in unit.read_versions.iter() {
            if guard.version(key) != *seen {
                return Err(StoreError::Conflict(format!("{:?}", key)));
            }
        }

        let inner = &mut *guard;
        for (user_id, user) in unit.users {
            inner.bump(RowKey::User(user_id));
            inner.data.users.insert(user_id, user);
        }
        for ((user_id, symbol), wallet) in unit.wallets {
            inner.bump(RowKey::Wallet(user_id, symbol.clone()));
            inner.data.wallets.insert((user_id, symbol), wallet);
        }
        for (user_id, portfolio) in unit.portfolios {
            inner.bump(RowKey::Portfolio(user_id));
            inner.data.portfolios.insert(user_id, portfolio);
        }
        for ((portfolio_id, symbol), staged) in unit.assets {
            inner.bump(RowKey::Asset(portfolio_id, symbol.clone()));
            match staged {
                Some(asset) => {
                    inner.data.assets.insert((portfolio_id, symbol), asset);
                }
                None => {
                    inner.data.assets.remove(&(portfolio_id, symbol));
                }
            }
        }
        for (order_id, order) in unit.orders {
            inner.bump(RowKey::Order(order_id.clone()));
            inner.data.orders.insert(order_id, order);
        }
        for tx in unit.wallet_transactions {
            inner.bump(RowKey::WalletTx(tx.tx_hash.clone()));
            inner.data.wallet_transactions.push(tx);
        }
        inner.data.trades.extend(unit.trades);
        inner.data.swaps.extend(unit.swaps);
        inner.data.transactions.extend(unit.transactions);
        inner.data.withdrawals.extend(unit.withdrawals);
        inner.data.portfolio_snapshots.extend(unit.snapshots);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Staged state is simply dropped
        Ok(())
    }
}
