//! Wallet-to-wallet crypto swaps
//!
//! Cross rate through USD: `gross = amount * usd(from) / usd(to)`, truncated
//! to 8 dp once at the end. `fee = gross * swap_rate` (rounded up), `net =
//! gross - fee`. The 8 dp rate on the quote is for display only and never
//! feeds the arithmetic. The quote and the settlement both go through
//! [`SettlementEngine::swap_terms`], so they can never disagree.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{SettlementEngine, credit, debit, ledger_entry, positive_amount, require_wallet};
use crate::currency::{CryptoSymbol, Currency};
use crate::error::SettlementError;
use crate::id::{SWAP_PREFIX, WALLET_TX_PREFIX, generate_id};
use crate::models::{
    CryptoSwap, SwapStatus, TransactionType, UserId, WalletTransaction, WalletTxStatus,
    WalletTxType,
};
use crate::money::{self, CRYPTO_SCALE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub from_currency: CryptoSymbol,
    pub to_currency: CryptoSymbol,
    pub from_amount: Decimal,
    pub exchange_rate: Decimal,
    /// `from_amount * exchange_rate`, before the fee
    pub gross_to_amount: Decimal,
    pub fee: Decimal,
    /// Net amount credited to the destination wallet
    pub to_amount: Decimal,
    pub fee_percentage: Decimal,
}

impl SettlementEngine {
    fn swap_terms(
        &self,
        from: &CryptoSymbol,
        to: &CryptoSymbol,
        amount: Decimal,
    ) -> Result<SwapQuote, SettlementError> {
        positive_amount(amount, CRYPTO_SCALE)?;
        if from == to {
            return Err(SettlementError::UnsupportedCurrency(format!(
                "cannot swap {} into itself",
                from
            )));
        }
        self.ensure_supported(from)?;
        self.ensure_supported(to)?;

        let from_currency = Currency::Crypto(from.clone());
        let to_currency = Currency::Crypto(to.clone());
        let from_usd = self.rate(&from_currency, &Currency::USD)?;
        let to_usd = self.rate(&to_currency, &Currency::USD)?;

        let gross_to_amount = money::round_down(
            money::div(money::mul(amount, from_usd)?, to_usd)?,
            CRYPTO_SCALE,
        );
        let exchange_rate = money::round_down(money::div(from_usd, to_usd)?, CRYPTO_SCALE);
        let fee = self.fees.swap_fee(gross_to_amount)?;
        let to_amount = gross_to_amount - fee;
        if to_amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(format!(
                "{} {} is too small to swap into {}",
                amount, from, to
            )));
        }

        Ok(SwapQuote {
            from_currency: from.clone(),
            to_currency: to.clone(),
            from_amount: amount,
            exchange_rate,
            gross_to_amount,
            fee,
            to_amount,
            fee_percentage: self.fees.swap_fee_percentage(),
        })
    }

    /// Preview a swap. Never touches the store.
    pub fn get_swap_quote(
        &self,
        from: &CryptoSymbol,
        to: &CryptoSymbol,
        amount: Decimal,
    ) -> Result<SwapQuote, SettlementError> {
        self.swap_terms(from, to, amount)
    }

    /// Move `amount` of `from` into the user's `to` wallet at the current cross rate
    pub async fn execute_swap(
        &self,
        user_id: UserId,
        from: &CryptoSymbol,
        to: &CryptoSymbol,
        amount: Decimal,
    ) -> Result<CryptoSwap, SettlementError> {
        positive_amount(amount, CRYPTO_SCALE)?;

        let swap = atomically!(self.store, self.max_attempts, |unit| {
            let mut from_wallet = require_wallet(unit.as_mut(), user_id, from).await?;
            let mut to_wallet = require_wallet(unit.as_mut(), user_id, to).await?;
            if from_wallet.balance < amount {
                return Err(SettlementError::insufficient(from, amount, from_wallet.balance));
            }

            // Priced inside the unit so a retry picks up the current rate
            let quote = self.swap_terms(from, to, amount)?;
            let swap_id = generate_id(SWAP_PREFIX);
            let counter_address = format!("SWAP_{}", swap_id);
            let now = Utc::now();

            let from_before = from_wallet.balance;
            from_wallet.balance = debit(from_wallet.balance, quote.from_amount, from)?;
            let to_before = to_wallet.balance;
            to_wallet.balance = credit(to_wallet.balance, quote.to_amount)?;
            unit.update_wallet(&from_wallet).await?;
            unit.update_wallet(&to_wallet).await?;

            let swap = CryptoSwap {
                swap_id: swap_id.clone(),
                user_id,
                from_currency: from.clone(),
                to_currency: to.clone(),
                from_amount: quote.from_amount,
                to_amount: quote.to_amount,
                exchange_rate: quote.exchange_rate,
                fee: quote.fee,
                status: SwapStatus::Completed,
                from_wallet_id: from_wallet.wallet_id.clone(),
                to_wallet_id: to_wallet.wallet_id.clone(),
                executed_at: now,
            };
            unit.create_swap(&swap).await?;

            unit.append_wallet_transaction(&WalletTransaction {
                tx_hash: generate_id(WALLET_TX_PREFIX),
                wallet_id: from_wallet.wallet_id.clone(),
                user_id,
                tx_type: WalletTxType::SwapOut,
                currency: from.clone(),
                amount: quote.from_amount,
                fee: Decimal::ZERO,
                from_address: from_wallet.address.clone(),
                to_address: counter_address.clone(),
                status: WalletTxStatus::Confirmed,
                created_at: now,
            })
            .await?;
            unit.append_wallet_transaction(&WalletTransaction {
                tx_hash: generate_id(WALLET_TX_PREFIX),
                wallet_id: to_wallet.wallet_id.clone(),
                user_id,
                tx_type: WalletTxType::SwapIn,
                currency: to.clone(),
                amount: quote.to_amount,
                fee: quote.fee,
                from_address: counter_address,
                to_address: to_wallet.address.clone(),
                status: WalletTxStatus::Confirmed,
                created_at: now,
            })
            .await?;

            unit.append_transaction(&ledger_entry(
                user_id,
                TransactionType::SwapOut,
                Currency::Crypto(from.clone()),
                from_before,
                from_wallet.balance,
                &swap_id,
                format!("Swap {} {} to {}", quote.from_amount, from, to),
            ))
            .await?;
            unit.append_transaction(&ledger_entry(
                user_id,
                TransactionType::SwapIn,
                Currency::Crypto(to.clone()),
                to_before,
                to_wallet.balance,
                &swap_id,
                format!(
                    "Swap from {}: {} {} (fee {})",
                    from, quote.to_amount, to, quote.fee
                ),
            ))
            .await?;

            Ok(swap)
        })?;

        info!(
            user_id,
            swap_id = %swap.swap_id,
            from = %swap.from_currency,
            to = %swap.to_currency,
            from_amount = %swap.from_amount,
            to_amount = %swap.to_amount,
            "Swap settled"
        );
        Ok(swap)
    }
}
