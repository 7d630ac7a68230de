//! Settlement Error Types
//!
//! Every inbound operation returns one of these kinds; nothing escapes
//! uncategorized. Codes are stable strings for API responses.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::currency::CurrencyError;
use crate::models::UserId;
use crate::money::MoneyError;
use crate::order::OrderStatus;
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    // === Validation Errors ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    // === Balance Errors ===
    #[error("Insufficient {currency} funds: required {required}, available {available}")]
    InsufficientFunds {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    // === Missing Resources ===
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Portfolio not found for user {0}")]
    PortfolioNotFound(UserId),

    #[error("{currency} wallet not found for user {user_id}")]
    WalletNotFound { user_id: UserId, currency: String },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    // === Oracle ===
    #[error("Rate unavailable for {base}/{quote}")]
    RateUnavailable { base: String, quote: String },

    // === Order FSM ===
    #[error("Order {order_id} cannot {action} while {status}")]
    InvalidState {
        order_id: String,
        status: OrderStatus,
        action: &'static str,
    },

    // === Concurrency / Storage ===
    #[error("Concurrent modification, gave up after {attempts} attempt(s)")]
    Conflict { attempts: u32 },

    #[error("Store failure: {0}")]
    StoreFailure(String),
}

impl SettlementError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InvalidAmount(_) => "INVALID_AMOUNT",
            SettlementError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            SettlementError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SettlementError::UserNotFound(_) => "USER_NOT_FOUND",
            SettlementError::PortfolioNotFound(_) => "PORTFOLIO_NOT_FOUND",
            SettlementError::WalletNotFound { .. } => "WALLET_NOT_FOUND",
            SettlementError::AssetNotFound(_) => "ASSET_NOT_FOUND",
            SettlementError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            SettlementError::RateUnavailable { .. } => "RATE_UNAVAILABLE",
            SettlementError::InvalidState { .. } => "INVALID_STATE",
            SettlementError::Conflict { .. } => "CONFLICT",
            SettlementError::StoreFailure(_) => "STORE_FAILURE",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::InvalidAmount(_) | SettlementError::UnsupportedCurrency(_) => 400,
            SettlementError::UserNotFound(_)
            | SettlementError::PortfolioNotFound(_)
            | SettlementError::WalletNotFound { .. }
            | SettlementError::AssetNotFound(_)
            | SettlementError::OrderNotFound(_) => 404,
            SettlementError::InvalidState { .. } | SettlementError::Conflict { .. } => 409,
            SettlementError::InsufficientFunds { .. } => 422,
            SettlementError::StoreFailure(_) => 500,
            SettlementError::RateUnavailable { .. } => 503,
        }
    }

    /// Store conflicts are retried by restarting the whole unit
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, SettlementError::Conflict { .. })
    }

    pub(crate) fn insufficient(currency: impl ToString, required: Decimal, available: Decimal) -> Self {
        SettlementError::InsufficientFunds {
            currency: currency.to_string(),
            required,
            available,
        }
    }

    pub(crate) fn rate_unavailable(base: impl ToString, quote: impl ToString) -> Self {
        SettlementError::RateUnavailable {
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            // Attempt count is filled in by the unit runner
            StoreError::Conflict(_) => SettlementError::Conflict { attempts: 1 },
            StoreError::Backend(msg) => SettlementError::StoreFailure(msg),
        }
    }
}

impl From<MoneyError> for SettlementError {
    fn from(e: MoneyError) -> Self {
        SettlementError::InvalidAmount(e.to_string())
    }
}

impl From<CurrencyError> for SettlementError {
    fn from(e: CurrencyError) -> Self {
        SettlementError::UnsupportedCurrency(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SettlementError::insufficient("USD", dec!(10), dec!(5)).code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(SettlementError::Conflict { attempts: 3 }.code(), "CONFLICT");
        assert_eq!(
            SettlementError::rate_unavailable("BTC", "NGN").code(),
            "RATE_UNAVAILABLE"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(SettlementError::InvalidAmount("x".into()).http_status(), 400);
        assert_eq!(SettlementError::OrderNotFound("ORD_1".into()).http_status(), 404);
        assert_eq!(
            SettlementError::insufficient("USD", dec!(1), dec!(0)).http_status(),
            422
        );
        assert_eq!(SettlementError::StoreFailure("down".into()).http_status(), 500);
    }

    #[test]
    fn test_store_error_mapping() {
        let conflict: SettlementError = StoreError::Conflict("user 1".into()).into();
        assert!(conflict.is_conflict());

        let backend: SettlementError = StoreError::Backend("io".into()).into();
        assert_eq!(backend, SettlementError::StoreFailure("io".into()));
    }

    #[test]
    fn test_display() {
        let err = SettlementError::InvalidState {
            order_id: "ORD_1".into(),
            status: OrderStatus::Filled,
            action: "cancel",
        };
        assert_eq!(err.to_string(), "Order ORD_1 cannot cancel while filled");
    }
}
