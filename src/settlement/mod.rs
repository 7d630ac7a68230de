//! Settlement Engine
//!
//! Turns a trade, swap or fiat conversion intent into one all-or-nothing
//! ledger unit: validate funds, mutate balances and holdings, append the
//! audit rows, refresh the portfolio valuation, commit.
//!
//! # Ledger rules
//!
//! 1. Every balance mutation appends exactly one [`Transaction`] whose
//!    `balance_before`/`balance_after` bracket the mutation.
//! 2. Amounts credited to the user round toward zero; amounts charged round
//!    away from zero. Value is never created by rounding.
//! 3. Quote and execution share the same arithmetic functions.
//! 4. Rows are read inside the unit that writes them, never reused across units.

pub mod fiat;
pub mod swap;
pub mod trade;
pub mod wallet;


pub use fiat::{ConversionDirection, ConversionQuote, ConversionResult, LiveRate};
pub use swap::SwapQuote;
pub use trade::TradeRequest;
pub use wallet::{ReceiveRequest, SendRequest};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::{CryptoSymbol, Currency};
use crate::error::SettlementError;
use crate::fee::FeeSchedule;
use crate::id::{TRANSACTION_PREFIX, generate_id};
use crate::models::{
    Portfolio, Transaction, TransactionStatus, TransactionType, User, UserId, Wallet,
};
use crate::money;
use crate::oracle::PriceOracle;
use crate::portfolio::PortfolioValuator;
use crate::store::{LedgerStore, LedgerUnit};

/// Default conflict retry budget per operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Units restarted at most this many times on store conflicts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub fees: FeeSchedule,
    /// Tradeable crypto symbols; empty accepts any well-formed symbol
    #[serde(default)]
    pub supported_currencies: Vec<CryptoSymbol>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            fees: FeeSchedule::default(),
            supported_currencies: Vec::new(),
        }
    }
}

pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    oracle: Arc<dyn PriceOracle>,
    valuator: PortfolioValuator,
    fees: FeeSchedule,
    max_attempts: u32,
    supported: BTreeSet<CryptoSymbol>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        oracle: Arc<dyn PriceOracle>,
        settings: EngineSettings,
    ) -> Self {
        let valuator = PortfolioValuator::new(
            Arc::clone(&store),
            Arc::clone(&oracle),
            settings.max_attempts,
        );
        Self {
            store,
            oracle,
            valuator,
            fees: settings.fees,
            max_attempts: settings.max_attempts.max(1),
            supported: settings.supported_currencies.into_iter().collect(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn oracle(&self) -> &Arc<dyn PriceOracle> {
        &self.oracle
    }

    pub fn valuator(&self) -> &PortfolioValuator {
        &self.valuator
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn supported_currencies(&self) -> impl Iterator<Item = &CryptoSymbol> {
        self.supported.iter()
    }

    pub(crate) fn ensure_supported(&self, symbol: &CryptoSymbol) -> Result<(), SettlementError> {
        if self.supported.is_empty() || self.supported.contains(symbol) {
            Ok(())
        } else {
            Err(SettlementError::UnsupportedCurrency(symbol.to_string()))
        }
    }

    /// Oracle price of `base` in `quote`; missing or non-positive is `RateUnavailable`
    pub(crate) fn rate(&self, base: &Currency, quote: &Currency) -> Result<Decimal, SettlementError> {
        self.oracle
            .current_price(base, quote)
            .filter(|price| *price > Decimal::ZERO)
            .ok_or_else(|| SettlementError::rate_unavailable(base, quote))
    }

    /// Price of `base` in `quote`, crossing through USD when no direct quote exists
    pub(crate) fn cross_rate(
        &self,
        base: &Currency,
        quote: &Currency,
    ) -> Result<Decimal, SettlementError> {
        if let Ok(direct) = self.rate(base, quote) {
            return Ok(direct);
        }
        let base_usd = self.rate(base, &Currency::USD)?;
        let quote_usd = self.rate(quote, &Currency::USD)?;
        Ok(money::div(base_usd, quote_usd)?)
    }
}

// ============================================================================
// Unit helpers
// ============================================================================

/// Positive amount carrying at most `scale` fractional digits
pub(crate) fn positive_amount(amount: Decimal, scale: u32) -> Result<Decimal, SettlementError> {
    money::check_amount(amount, scale).map_err(SettlementError::from)
}

/// Zero or a positive amount carrying at most `scale` fractional digits
pub(crate) fn fee_amount(amount: Decimal, scale: u32) -> Result<Decimal, SettlementError> {
    if amount.is_zero() {
        return Ok(amount);
    }
    positive_amount(amount, scale)
}

pub(crate) async fn require_user(
    unit: &mut dyn LedgerUnit,
    user_id: UserId,
) -> Result<User, SettlementError> {
    unit.get_user(user_id)
        .await?
        .ok_or(SettlementError::UserNotFound(user_id))
}

pub(crate) async fn require_portfolio(
    unit: &mut dyn LedgerUnit,
    user_id: UserId,
) -> Result<Portfolio, SettlementError> {
    unit.get_portfolio(user_id)
        .await?
        .ok_or(SettlementError::PortfolioNotFound(user_id))
}

/// Active wallet for `(user, currency)`; an inactive wallet counts as missing
pub(crate) async fn require_wallet(
    unit: &mut dyn LedgerUnit,
    user_id: UserId,
    currency: &CryptoSymbol,
) -> Result<Wallet, SettlementError> {
    match unit.get_wallet(user_id, currency).await? {
        Some(wallet) if wallet.is_active => Ok(wallet),
        _ => Err(SettlementError::WalletNotFound {
            user_id,
            currency: currency.to_string(),
        }),
    }
}

/// Ledger row for one balance mutation `before -> after`
pub(crate) fn ledger_entry(
    user_id: UserId,
    tx_type: TransactionType,
    currency: Currency,
    balance_before: Decimal,
    balance_after: Decimal,
    reference: &str,
    description: String,
) -> Transaction {
    Transaction {
        transaction_id: generate_id(TRANSACTION_PREFIX),
        user_id,
        tx_type,
        currency,
        amount: balance_after - balance_before,
        balance_before,
        balance_after,
        status: TransactionStatus::Completed,
        reference: Some(reference.to_string()),
        description,
        created_at: Utc::now(),
    }
}

/// Debit `amount` from `balance`, failing with `InsufficientFunds` if short
pub(crate) fn debit(
    balance: Decimal,
    amount: Decimal,
    currency: impl ToString,
) -> Result<Decimal, SettlementError> {
    if balance < amount {
        return Err(SettlementError::insufficient(currency, amount, balance));
    }
    Ok(balance - amount)
}

pub(crate) fn credit(balance: Decimal, amount: Decimal) -> Result<Decimal, SettlementError> {
    Ok(money::add(balance, amount)?)
}
