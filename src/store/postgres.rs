//! PostgreSQL ledger store
//!
//! One unit = one database transaction. Every row the settlement core reads
//! with intent to modify is fetched `FOR UPDATE`, so concurrent units touching
//! the same user serialize on the row lock and never lose an update.
//! Serialization failures and deadlocks (SQLSTATE 40001 / 40P01) surface as
//! [`StoreError::Conflict`] so the caller restarts the unit; a duplicate key
//! (23505) does too, which makes idempotent inserts safe under races.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction as PgTransaction};

use super::{LedgerStore, LedgerUnit, StoreError};
use crate::currency::CryptoSymbol;
use crate::models::{
    BankWithdrawal, CryptoSwap, Order, Portfolio, PortfolioAsset, PortfolioId, PortfolioSnapshot,
    Trade, Transaction, User, UserId, Wallet, WalletTransaction,
};

const SCHEMA: &str = include_str!("../../migrations/0001_settlement_core.sql");

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            let retryable = db_err
                .code()
                .is_some_and(|code| matches!(code.as_ref(), "40001" | "40P01" | "23505"));
            if retryable {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Backend(e.to_string())
    }
}

/// Read a TEXT column into one of the string-coded domain types
fn parse_col<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("column '{}': {}", column, e)))
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the settlement tables if they do not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Settlement schema ensured");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create a user with its portfolio and wallets; existing rows are left untouched
    pub async fn open_account(
        &self,
        user: &User,
        portfolio: &Portfolio,
        wallets: &[Wallet],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users_tb (user_id, balance_usd, balance_naira) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user.user_id)
        .bind(user.balance_usd)
        .bind(user.balance_naira)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO portfolios_tb (portfolio_id, user_id, available_balance) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(portfolio.portfolio_id)
        .bind(portfolio.user_id)
        .bind(portfolio.available_balance)
        .execute(&mut *tx)
        .await?;

        for wallet in wallets {
            sqlx::query(
                "INSERT INTO wallets_tb (wallet_id, user_id, currency, address, balance, is_active) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING",
            )
            .bind(&wallet.wallet_id)
            .bind(wallet.user_id)
            .bind(wallet.currency.as_str())
            .bind(&wallet.address)
            .bind(wallet.balance)
            .bind(wallet.is_active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin_unit(&self) -> Result<Box<dyn LedgerUnit>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit { tx }))
    }
}

struct PgUnit {
    tx: PgTransaction<'static, Postgres>,
}

// ============================================================================
// Row mapping
// ============================================================================

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        balance_usd: row.try_get("balance_usd")?,
        balance_naira: row.try_get("balance_naira")?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, StoreError> {
    Ok(Wallet {
        wallet_id: row.try_get("wallet_id")?,
        user_id: row.try_get("user_id")?,
        currency: parse_col(row, "currency")?,
        address: row.try_get("address")?,
        balance: row.try_get("balance")?,
        is_active: row.try_get("is_active")?,
    })
}

fn portfolio_from_row(row: &PgRow) -> Result<Portfolio, StoreError> {
    Ok(Portfolio {
        portfolio_id: row.try_get("portfolio_id")?,
        user_id: row.try_get("user_id")?,
        available_balance: row.try_get("available_balance")?,
        total_value_usd: row.try_get("total_value_usd")?,
        total_invested: row.try_get("total_invested")?,
        total_pnl: row.try_get("total_pnl")?,
        total_pnl_percentage: row.try_get("total_pnl_percentage")?,
    })
}

fn asset_from_row(row: &PgRow) -> Result<PortfolioAsset, StoreError> {
    Ok(PortfolioAsset {
        portfolio_id: row.try_get("portfolio_id")?,
        symbol: parse_col(row, "symbol")?,
        amount: row.try_get("amount")?,
        average_buy_price: row.try_get("average_buy_price")?,
        invested_amount: row.try_get("invested_amount")?,
        current_value_usd: row.try_get("current_value_usd")?,
        pnl: row.try_get("pnl")?,
        pnl_percentage: row.try_get("pnl_percentage")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    Ok(Order {
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        pair: parse_col(row, "pair")?,
        side: parse_col(row, "side")?,
        order_type: parse_col(row, "order_type")?,
        amount: row.try_get("amount")?,
        price: row.try_get("price")?,
        stop_price: row.try_get("stop_price")?,
        filled_amount: row.try_get("filled_amount")?,
        average_fill_price: row.try_get("average_fill_price")?,
        status: parse_col(row, "status")?,
        trade_id: row.try_get("trade_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn trade_from_row(row: &PgRow) -> Result<Trade, StoreError> {
    Ok(Trade {
        trade_id: row.try_get("trade_id")?,
        user_id: row.try_get("user_id")?,
        pair: parse_col(row, "pair")?,
        side: parse_col(row, "side")?,
        trade_type: parse_col(row, "trade_type")?,
        amount: row.try_get("amount")?,
        price: row.try_get("price")?,
        total: row.try_get("total")?,
        fee: row.try_get("fee")?,
        status: parse_col(row, "status")?,
        executed_at: row.try_get("executed_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<PortfolioSnapshot, StoreError> {
    Ok(PortfolioSnapshot {
        user_id: row.try_get("user_id")?,
        total_value_usd: row.try_get("total_value_usd")?,
        total_invested: row.try_get("total_invested")?,
        total_pnl: row.try_get("total_pnl")?,
        total_pnl_percentage: row.try_get("total_pnl_percentage")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    Ok(Transaction {
        transaction_id: row.try_get("transaction_id")?,
        user_id: row.try_get("user_id")?,
        tx_type: parse_col(row, "tx_type")?,
        currency: parse_col(row, "currency")?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        status: parse_col(row, "status")?,
        reference: row.try_get("reference")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn wallet_tx_from_row(row: &PgRow) -> Result<WalletTransaction, StoreError> {
    Ok(WalletTransaction {
        tx_hash: row.try_get("tx_hash")?,
        wallet_id: row.try_get("wallet_id")?,
        user_id: row.try_get("user_id")?,
        tx_type: parse_col(row, "tx_type")?,
        currency: parse_col(row, "currency")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        from_address: row.try_get("from_address")?,
        to_address: row.try_get("to_address")?,
        status: parse_col(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

const ORDER_COLUMNS: &str = "order_id, user_id, pair, side, order_type, amount, price, \
     stop_price, filled_amount, average_fill_price, status, trade_id, expires_at, \
     created_at, updated_at";

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn get_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, balance_usd, balance_naira FROM users_tb WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users_tb SET balance_usd = $1, balance_naira = $2, updated_at = NOW() \
             WHERE user_id = $3",
        )
        .bind(user.balance_usd)
        .bind(user.balance_naira)
        .bind(user.user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_wallet(
        &mut self,
        user_id: UserId,
        currency: &CryptoSymbol,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT wallet_id, user_id, currency, address, balance, is_active
            FROM wallets_tb
            WHERE user_id = $1 AND currency = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(currency.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallets_tb (wallet_id, user_id, currency, address, balance, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (wallet_id) DO UPDATE
            SET balance = EXCLUDED.balance, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&wallet.wallet_id)
        .bind(wallet.user_id)
        .bind(wallet.currency.as_str())
        .bind(&wallet.address)
        .bind(wallet.balance)
        .bind(wallet.is_active)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_portfolio(&mut self, user_id: UserId) -> Result<Option<Portfolio>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT portfolio_id, user_id, available_balance, total_value_usd,
                   total_invested, total_pnl, total_pnl_percentage
            FROM portfolios_tb
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(portfolio_from_row).transpose()
    }

    async fn update_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE portfolios_tb
            SET available_balance = $1, total_value_usd = $2, total_invested = $3,
                total_pnl = $4, total_pnl_percentage = $5
            WHERE portfolio_id = $6
            "#,
        )
        .bind(portfolio.available_balance)
        .bind(portfolio.total_value_usd)
        .bind(portfolio.total_invested)
        .bind(portfolio.total_pnl)
        .bind(portfolio.total_pnl_percentage)
        .bind(portfolio.portfolio_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_asset(
        &mut self,
        portfolio_id: PortfolioId,
        symbol: &CryptoSymbol,
    ) -> Result<Option<PortfolioAsset>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT portfolio_id, symbol, amount, average_buy_price, invested_amount,
                   current_value_usd, pnl, pnl_percentage
            FROM portfolio_assets_tb
            WHERE portfolio_id = $1 AND symbol = $2
            FOR UPDATE
            "#,
        )
        .bind(portfolio_id)
        .bind(symbol.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(asset_from_row).transpose()
    }

    async fn list_assets(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<PortfolioAsset>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT portfolio_id, symbol, amount, average_buy_price, invested_amount,
                   current_value_usd, pnl, pnl_percentage
            FROM portfolio_assets_tb
            WHERE portfolio_id = $1
            ORDER BY symbol
            FOR UPDATE
            "#,
        )
        .bind(portfolio_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn upsert_asset(&mut self, asset: &PortfolioAsset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_assets_tb
                (portfolio_id, symbol, amount, average_buy_price, invested_amount,
                 current_value_usd, pnl, pnl_percentage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (portfolio_id, symbol) DO UPDATE
            SET amount = EXCLUDED.amount,
                average_buy_price = EXCLUDED.average_buy_price,
                invested_amount = EXCLUDED.invested_amount,
                current_value_usd = EXCLUDED.current_value_usd,
                pnl = EXCLUDED.pnl,
                pnl_percentage = EXCLUDED.pnl_percentage
            "#,
        )
        .bind(asset.portfolio_id)
        .bind(asset.symbol.as_str())
        .bind(asset.amount)
        .bind(asset.average_buy_price)
        .bind(asset.invested_amount)
        .bind(asset.current_value_usd)
        .bind(asset.pnl)
        .bind(asset.pnl_percentage)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_asset(
        &mut self,
        portfolio_id: PortfolioId,
        symbol: &CryptoSymbol,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM portfolio_assets_tb WHERE portfolio_id = $1 AND symbol = $2")
            .bind(portfolio_id)
            .bind(symbol.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders_tb WHERE order_id = $1 FOR UPDATE",
            ORDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders_tb
                (order_id, user_id, pair, side, order_type, amount, price, stop_price,
                 filled_amount, average_fill_price, status, trade_id, expires_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (order_id) DO UPDATE
            SET filled_amount = EXCLUDED.filled_amount,
                average_fill_price = EXCLUDED.average_fill_price,
                status = EXCLUDED.status,
                trade_id = EXCLUDED.trade_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&order.order_id)
        .bind(order.user_id)
        .bind(order.pair.to_string())
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.amount)
        .bind(order.price)
        .bind(order.stop_price)
        .bind(order.filled_amount)
        .bind(order.average_fill_price)
        .bind(order.status.as_str())
        .bind(order.trade_id.as_deref())
        .bind(order.expires_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_open_orders(&mut self) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders_tb WHERE status IN ('pending', 'partially_filled') \
             ORDER BY created_at",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn create_trade(&mut self, trade: &Trade) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades_tb
                (trade_id, user_id, pair, side, trade_type, amount, price, total, fee,
                 status, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&trade.trade_id)
        .bind(trade.user_id)
        .bind(trade.pair.to_string())
        .bind(trade.side.as_str())
        .bind(trade.trade_type.as_str())
        .bind(trade.amount)
        .bind(trade.price)
        .bind(trade.total)
        .bind(trade.fee)
        .bind(trade.status.as_str())
        .bind(trade.executed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_trades(&mut self, user_id: UserId) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, user_id, pair, side, trade_type, amount, price, total, fee,
                   status, executed_at
            FROM trades_tb
            WHERE user_id = $1
            ORDER BY executed_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn create_swap(&mut self, swap: &CryptoSwap) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO crypto_swaps_tb
                (swap_id, user_id, from_currency, to_currency, from_amount, to_amount,
                 exchange_rate, fee, status, from_wallet_id, to_wallet_id, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&swap.swap_id)
        .bind(swap.user_id)
        .bind(swap.from_currency.as_str())
        .bind(swap.to_currency.as_str())
        .bind(swap.from_amount)
        .bind(swap.to_amount)
        .bind(swap.exchange_rate)
        .bind(swap.fee)
        .bind(swap.status.as_str())
        .bind(&swap.from_wallet_id)
        .bind(&swap.to_wallet_id)
        .bind(swap.executed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions_tb
                (transaction_id, user_id, tx_type, currency, amount, balance_before,
                 balance_after, status, reference, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&tx.transaction_id)
        .bind(tx.user_id)
        .bind(tx.tx_type.as_str())
        .bind(tx.currency.code())
        .bind(tx.amount)
        .bind(tx.balance_before)
        .bind(tx.balance_after)
        .bind(tx.status.as_str())
        .bind(tx.reference.as_deref())
        .bind(&tx.description)
        .bind(tx.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_transactions(&mut self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, user_id, tx_type, currency, amount, balance_before,
                   balance_after, status, reference, description, created_at
            FROM transactions_tb
            WHERE user_id = $1
            ORDER BY seq
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn append_wallet_transaction(
        &mut self,
        tx: &WalletTransaction,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions_tb
                (tx_hash, wallet_id, user_id, tx_type, currency, amount, fee,
                 from_address, to_address, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&tx.tx_hash)
        .bind(&tx.wallet_id)
        .bind(tx.user_id)
        .bind(tx.tx_type.as_str())
        .bind(tx.currency.as_str())
        .bind(tx.amount)
        .bind(tx.fee)
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(tx.status.as_str())
        .bind(tx.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_wallet_transaction(
        &mut self,
        tx_hash: &str,
    ) -> Result<Option<WalletTransaction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT tx_hash, wallet_id, user_id, tx_type, currency, amount, fee,
                   from_address, to_address, status, created_at
            FROM wallet_transactions_tb
            WHERE tx_hash = $1
            "#,
        )
        .bind(tx_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(wallet_tx_from_row).transpose()
    }

    async fn create_withdrawal(&mut self, withdrawal: &BankWithdrawal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bank_withdrawals_tb
                (withdrawal_id, user_id, bank_account, amount_naira, fee, net_amount,
                 status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&withdrawal.withdrawal_id)
        .bind(withdrawal.user_id)
        .bind(&withdrawal.bank_account)
        .bind(withdrawal.amount_naira)
        .bind(withdrawal.fee)
        .bind(withdrawal.net_amount)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots_tb
                (user_id, total_value_usd, total_invested, total_pnl, total_pnl_percentage,
                 recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(snapshot.user_id)
        .bind(snapshot.total_value_usd)
        .bind(snapshot.total_invested)
        .bind(snapshot.total_pnl)
        .bind(snapshot.total_pnl_percentage)
        .bind(snapshot.recorded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_snapshots(
        &mut self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, total_value_usd, total_invested, total_pnl, total_pnl_percentage,
                   recorded_at
            FROM portfolio_snapshots_tb
            WHERE user_id = $1 AND recorded_at >= $2
            ORDER BY recorded_at, seq
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
