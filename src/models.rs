//! Ledger record types
//!
//! Users, wallets and portfolios are mutable rows that only change inside a
//! ledger unit. Trades, swaps, transactions and wallet transactions are
//! append-only records; they reference pairs and currencies by value so
//! history is unaffected by later pair or rate changes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::{CryptoSymbol, Currency, TradingPair};
use crate::order::OrderStatus;

pub type UserId = i64;
pub type PortfolioId = i64;

/// Closed string enum stored as TEXT and serialized as snake_case
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

str_enum!(
    /// Trade / order side
    Side {
        Buy => "buy",
        Sell => "sell",
    }
);

str_enum!(
    /// How the execution price was chosen
    TradeType {
        /// Priced from the oracle at execution time
        Market => "market",
        /// Priced by the caller (or by a resting order's fills)
        Limit => "limit",
    }
);

str_enum!(
    TradeStatus {
        Pending => "pending",
        Completed => "completed",
        Cancelled => "cancelled",
        Failed => "failed",
    }
);

str_enum!(
    /// Resting order kinds
    OrderType {
        Limit => "limit",
        StopLoss => "stop_loss",
        TakeProfit => "take_profit",
    }
);

str_enum!(
    SwapStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

str_enum!(
    /// Ledger row type
    TransactionType {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
        Trade => "trade",
        Fee => "fee",
        Bonus => "bonus",
        SwapIn => "swap_in",
        SwapOut => "swap_out",
        CryptoPurchase => "crypto_purchase",
        CryptoSale => "crypto_sale",
    }
);

str_enum!(
    TransactionStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

str_enum!(
    /// Bank payout lifecycle; settlement leaves it `pending`
    WithdrawalStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
);

str_enum!(
    /// Per-wallet movement type
    WalletTxType {
        Send => "send",
        Receive => "receive",
        SwapIn => "swap_in",
        SwapOut => "swap_out",
    }
);

str_enum!(
    WalletTxStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

// ============================================================================
// Mutable rows
// ============================================================================

/// User fiat cash positions. Invariant: both balances >= 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub balance_usd: Decimal,
    pub balance_naira: Decimal,
}

impl User {
    pub fn new(user_id: UserId, balance_usd: Decimal, balance_naira: Decimal) -> Self {
        Self {
            user_id,
            balance_usd,
            balance_naira,
        }
    }
}

/// One wallet per (user, currency). Invariant: `balance >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: String,
    pub user_id: UserId,
    pub currency: CryptoSymbol,
    pub address: String,
    pub balance: Decimal,
    pub is_active: bool,
}

/// One portfolio per user. Valuation fields are written by the valuator only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub portfolio_id: PortfolioId,
    pub user_id: UserId,
    /// USD not yet invested
    pub available_balance: Decimal,
    pub total_value_usd: Decimal,
    pub total_invested: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_percentage: Decimal,
}

impl Portfolio {
    pub fn new(portfolio_id: PortfolioId, user_id: UserId, available_balance: Decimal) -> Self {
        Self {
            portfolio_id,
            user_id,
            available_balance,
            total_value_usd: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            total_pnl_percentage: Decimal::ZERO,
        }
    }
}

/// Holding of one symbol within a portfolio. Deleted when `amount` reaches 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioAsset {
    pub portfolio_id: PortfolioId,
    pub symbol: CryptoSymbol,
    pub amount: Decimal,
    /// Volume-weighted cost basis, changed by buys only
    pub average_buy_price: Decimal,
    pub invested_amount: Decimal,
    pub current_value_usd: Decimal,
    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
}

impl PortfolioAsset {
    /// Open a position from a first buy
    pub fn opened(
        portfolio_id: PortfolioId,
        symbol: CryptoSymbol,
        amount: Decimal,
        average_buy_price: Decimal,
        total: Decimal,
    ) -> Self {
        Self {
            portfolio_id,
            symbol,
            amount,
            average_buy_price,
            invested_amount: total,
            current_value_usd: total,
            pnl: Decimal::ZERO,
            pnl_percentage: Decimal::ZERO,
        }
    }
}

/// Resting instruction; `filled_amount <= amount` always
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: UserId,
    pub pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub filled_amount: Decimal,
    /// Volume-weighted price of the fills so far
    pub average_fill_price: Decimal,
    pub status: OrderStatus,
    /// Trade settled when the order filled
    pub trade_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn remaining_amount(&self) -> Decimal {
        self.amount - self.filled_amount
    }
}

// ============================================================================
// Append-only records
// ============================================================================

/// Executed fill; only `status` may change after settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub user_id: UserId,
    pub pair: TradingPair,
    pub side: Side,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub price: Decimal,
    /// `amount * price` in cents
    pub total: Decimal,
    pub fee: Decimal,
    pub status: TradeStatus,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSwap {
    pub swap_id: String,
    pub user_id: UserId,
    pub from_currency: CryptoSymbol,
    pub to_currency: CryptoSymbol,
    pub from_amount: Decimal,
    /// Net amount credited to the destination wallet
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
    pub fee: Decimal,
    pub status: SwapStatus,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub executed_at: DateTime<Utc>,
}

/// Ledger row: one per balance mutation, with the before/after snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub currency: Currency,
    /// Signed delta applied to the balance
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    /// ID of the trade / swap / wallet movement that caused the row
    pub reference: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub tx_hash: String,
    pub wallet_id: String,
    pub user_id: UserId,
    pub tx_type: WalletTxType,
    pub currency: CryptoSymbol,
    pub amount: Decimal,
    pub fee: Decimal,
    pub from_address: String,
    pub to_address: String,
    pub status: WalletTxStatus,
    pub created_at: DateTime<Utc>,
}

/// Naira payout to a bank account. The full amount leaves `balance_naira`;
/// the bank receives `net_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankWithdrawal {
    pub withdrawal_id: String,
    pub user_id: UserId,
    pub bank_account: String,
    pub amount_naira: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

/// Portfolio totals as of one revaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub user_id: UserId,
    pub total_value_usd: Decimal,
    pub total_invested: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_percentage: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn of(portfolio: &Portfolio, recorded_at: DateTime<Utc>) -> Self {
        Self {
            user_id: portfolio.user_id,
            total_value_usd: portfolio.total_value_usd,
            total_invested: portfolio.total_invested,
            total_pnl: portfolio.total_pnl,
            total_pnl_percentage: portfolio.total_pnl_percentage,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_enum_roundtrip() {
        assert_eq!(TransactionType::CryptoPurchase.as_str(), "crypto_purchase");
        assert_eq!(
            "swap_out".parse::<TransactionType>().unwrap(),
            TransactionType::SwapOut
        );
        assert_eq!("stop_loss".parse::<OrderType>().unwrap(), OrderType::StopLoss);
        assert!("sideways".parse::<Side>().is_err());
    }

    #[test]
    fn test_serde_matches_storage_strings() {
        let json = serde_json::to_string(&WalletTxType::SwapIn).unwrap();
        assert_eq!(json, format!("\"{}\"", WalletTxType::SwapIn.as_str()));
        let json = serde_json::to_string(&OrderType::TakeProfit).unwrap();
        assert_eq!(json, "\"take_profit\"");
    }
}
