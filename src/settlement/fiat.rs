//! Naira <-> crypto conversion
//!
//! Rates are NGN per unit of crypto. The conversion fee is charged on the
//! Naira leg: on top of the spend when buying, out of the proceeds when
//! selling. Crypto <-> crypto previews compose two NGN rates and carry no fee.
//!
//! [`SettlementEngine::calculate_conversion`] is the single source of the
//! arithmetic; execution settles exactly the quote it computes.
//!
//! Bank payouts leave the Naira balance in full; the bank receives the
//! amount less the withdrawal fee.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::wallet::require_text;
use super::{
    SettlementEngine, credit, debit, ledger_entry, positive_amount, require_user, require_wallet,
};
use crate::currency::{CryptoSymbol, Currency, Fiat};
use crate::error::SettlementError;
use crate::id::{TRANSACTION_PREFIX, WITHDRAWAL_PREFIX, generate_id};
use crate::models::{BankWithdrawal, TransactionType, UserId, WithdrawalStatus};
use crate::money::{self, CRYPTO_SCALE, FIAT_SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionDirection {
    /// Naira -> crypto
    Buy,
    /// Crypto -> Naira
    Sell,
}

/// Priced conversion, no state touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionQuote {
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub from_amount: Decimal,
    /// `to` units per `from` unit
    pub exchange_rate: Decimal,
    /// Destination amount before the fee
    pub gross_amount: Decimal,
    /// Charged in NGN; zero for crypto <-> crypto
    pub fee: Decimal,
    /// Destination amount credited
    pub to_amount: Decimal,
    /// Source amount debited (`from_amount + fee` when paying in NGN)
    pub total_debit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub reference: String,
    pub direction: ConversionDirection,
    pub currency: CryptoSymbol,
    pub crypto_amount: Decimal,
    /// NGN spent (buy, fee included) or received (sell, net of fee)
    pub naira_amount: Decimal,
    pub fee: Decimal,
    pub exchange_rate: Decimal,
    pub balance_naira: Decimal,
    pub wallet_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRate {
    pub currency: CryptoSymbol,
    pub ngn_rate: Decimal,
}

impl SettlementEngine {
    /// NGN per unit of `symbol`
    fn naira_rate(&self, symbol: &CryptoSymbol) -> Result<Decimal, SettlementError> {
        self.cross_rate(&Currency::Crypto(symbol.clone()), &Currency::NGN)
    }

    /// Price a conversion between NGN and crypto, or between two cryptos
    pub fn calculate_conversion(
        &self,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<ConversionQuote, SettlementError> {
        if from == to {
            return Err(SettlementError::UnsupportedCurrency(format!(
                "cannot convert {} into itself",
                from
            )));
        }

        match (from, to) {
            (Currency::Fiat(Fiat::Ngn), Currency::Crypto(symbol)) => {
                positive_amount(amount, FIAT_SCALE)?;
                self.ensure_supported(symbol)?;
                let rate = self.naira_rate(symbol)?;
                let crypto = money::round_down(money::div(amount, rate)?, CRYPTO_SCALE);
                if crypto.is_zero() {
                    return Err(SettlementError::InvalidAmount(format!(
                        "NGN {} buys less than one unit of {}",
                        amount, symbol
                    )));
                }
                let fee = self.fees.fiat_conversion_fee(amount)?;
                Ok(ConversionQuote {
                    from_currency: from.clone(),
                    to_currency: to.clone(),
                    from_amount: amount,
                    exchange_rate: rate,
                    gross_amount: crypto,
                    fee,
                    to_amount: crypto,
                    total_debit: money::add(amount, fee)?,
                })
            }
            (Currency::Crypto(symbol), Currency::Fiat(Fiat::Ngn)) => {
                positive_amount(amount, CRYPTO_SCALE)?;
                self.ensure_supported(symbol)?;
                let rate = self.naira_rate(symbol)?;
                let gross = money::round_down(money::mul(amount, rate)?, FIAT_SCALE);
                let fee = self.fees.fiat_conversion_fee(gross)?;
                let net = gross - fee;
                if net <= Decimal::ZERO {
                    return Err(SettlementError::InvalidAmount(format!(
                        "{} {} is worth less than the conversion fee",
                        amount, symbol
                    )));
                }
                Ok(ConversionQuote {
                    from_currency: from.clone(),
                    to_currency: to.clone(),
                    from_amount: amount,
                    exchange_rate: rate,
                    gross_amount: gross,
                    fee,
                    to_amount: net,
                    total_debit: amount,
                })
            }
            (Currency::Crypto(from_symbol), Currency::Crypto(to_symbol)) => {
                positive_amount(amount, CRYPTO_SCALE)?;
                self.ensure_supported(from_symbol)?;
                self.ensure_supported(to_symbol)?;
                let from_rate = self.naira_rate(from_symbol)?;
                let to_rate = self.naira_rate(to_symbol)?;
                let converted = money::round_down(
                    money::div(money::mul(amount, from_rate)?, to_rate)?,
                    CRYPTO_SCALE,
                );
                Ok(ConversionQuote {
                    from_currency: from.clone(),
                    to_currency: to.clone(),
                    from_amount: amount,
                    exchange_rate: money::round_down(money::div(from_rate, to_rate)?, CRYPTO_SCALE),
                    gross_amount: converted,
                    fee: Decimal::ZERO,
                    to_amount: converted,
                    total_debit: amount,
                })
            }
            _ => Err(SettlementError::UnsupportedCurrency(format!(
                "no conversion from {} to {}",
                from, to
            ))),
        }
    }

    /// Buy crypto with Naira, or sell crypto for Naira
    ///
    /// `amount` is the Naira spend for a buy and the crypto quantity for a sell.
    pub async fn execute_fiat_conversion(
        &self,
        user_id: UserId,
        currency: &CryptoSymbol,
        direction: ConversionDirection,
        amount: Decimal,
    ) -> Result<ConversionResult, SettlementError> {
        let crypto = Currency::Crypto(currency.clone());
        let (from, to) = match direction {
            ConversionDirection::Buy => (Currency::NGN, crypto.clone()),
            ConversionDirection::Sell => (crypto.clone(), Currency::NGN),
        };
        // Reject malformed input before opening a unit
        self.calculate_conversion(&from, &to, amount)?;

        let result = atomically!(self.store, self.max_attempts, |unit| {
            let mut user = require_user(unit.as_mut(), user_id).await?;
            let mut wallet = require_wallet(unit.as_mut(), user_id, currency).await?;
            let quote = self.calculate_conversion(&from, &to, amount)?;
            let reference = generate_id(TRANSACTION_PREFIX);

            let naira_before = user.balance_naira;
            let wallet_before = wallet.balance;
            let (tx_type, crypto_amount, naira_amount, description) = match direction {
                ConversionDirection::Buy => {
                    user.balance_naira = debit(user.balance_naira, quote.total_debit, Currency::NGN)?;
                    wallet.balance = credit(wallet.balance, quote.to_amount)?;
                    (
                        TransactionType::CryptoPurchase,
                        quote.to_amount,
                        quote.total_debit,
                        format!("Bought {} {} with NGN {}", quote.to_amount, currency, amount),
                    )
                }
                ConversionDirection::Sell => {
                    wallet.balance = debit(wallet.balance, quote.total_debit, currency)?;
                    user.balance_naira = credit(user.balance_naira, quote.to_amount)?;
                    (
                        TransactionType::CryptoSale,
                        quote.from_amount,
                        quote.to_amount,
                        format!(
                            "Sold {} {} for NGN {}",
                            amount, currency, quote.gross_amount
                        ),
                    )
                }
            };

            unit.update_user(&user).await?;
            unit.update_wallet(&wallet).await?;
            unit.append_transaction(&ledger_entry(
                user_id,
                tx_type,
                Currency::NGN,
                naira_before,
                user.balance_naira,
                &reference,
                description.clone(),
            ))
            .await?;
            unit.append_transaction(&ledger_entry(
                user_id,
                tx_type,
                crypto.clone(),
                wallet_before,
                wallet.balance,
                &reference,
                description,
            ))
            .await?;

            Ok(ConversionResult {
                reference,
                direction,
                currency: currency.clone(),
                crypto_amount,
                naira_amount,
                fee: quote.fee,
                exchange_rate: quote.exchange_rate,
                balance_naira: user.balance_naira,
                wallet_balance: wallet.balance,
            })
        })?;

        info!(
            user_id,
            reference = %result.reference,
            currency = %result.currency,
            direction = ?result.direction,
            crypto_amount = %result.crypto_amount,
            naira_amount = %result.naira_amount,
            "Fiat conversion settled"
        );
        Ok(result)
    }

    /// Pay `amount` NGN out to `bank_account`
    ///
    /// The withdrawal stays `pending` until the payment rail reports back.
    pub async fn withdraw_to_bank(
        &self,
        user_id: UserId,
        bank_account: &str,
        amount: Decimal,
    ) -> Result<BankWithdrawal, SettlementError> {
        positive_amount(amount, FIAT_SCALE)?;
        require_text(bank_account, "bank_account")?;
        let fee = self.fees.bank_withdrawal_fee(amount)?;
        if fee >= amount {
            return Err(SettlementError::InvalidAmount(format!(
                "NGN {} does not cover the NGN {} withdrawal fee",
                amount, fee
            )));
        }

        let withdrawal = atomically!(self.store, self.max_attempts, |unit| {
            let mut user = require_user(unit.as_mut(), user_id).await?;
            let before = user.balance_naira;
            user.balance_naira = debit(user.balance_naira, amount, Currency::NGN)?;

            let withdrawal = BankWithdrawal {
                withdrawal_id: generate_id(WITHDRAWAL_PREFIX),
                user_id,
                bank_account: bank_account.to_string(),
                amount_naira: amount,
                fee,
                net_amount: amount - fee,
                status: WithdrawalStatus::Pending,
                created_at: Utc::now(),
            };
            unit.update_user(&user).await?;
            unit.create_withdrawal(&withdrawal).await?;
            unit.append_transaction(&ledger_entry(
                user_id,
                TransactionType::Withdrawal,
                Currency::NGN,
                before,
                user.balance_naira,
                &withdrawal.withdrawal_id,
                format!("Bank withdrawal of NGN {} (fee NGN {})", amount, fee),
            ))
            .await?;
            Ok(withdrawal)
        })?;

        info!(
            user_id,
            withdrawal_id = %withdrawal.withdrawal_id,
            amount = %withdrawal.amount_naira,
            fee = %withdrawal.fee,
            "Bank withdrawal queued"
        );
        Ok(withdrawal)
    }

    /// Current NGN rate for every tradeable currency the oracle can price
    ///
    /// With no configured currency list, every symbol the oracle quotes in
    /// NGN or USD is listed.
    pub fn live_rates(&self) -> Vec<LiveRate> {
        let symbols: Vec<CryptoSymbol> = if self.supported.is_empty() {
            let mut quoted = self.oracle.quoted_symbols(&Currency::NGN);
            quoted.extend(self.oracle.quoted_symbols(&Currency::USD));
            quoted.sort();
            quoted.dedup();
            quoted
        } else {
            self.supported.iter().cloned().collect()
        };
        symbols
            .into_iter()
            .filter_map(|symbol| {
                self.naira_rate(&symbol)
                    .ok()
                    .map(|ngn_rate| LiveRate { currency: symbol, ngn_rate })
            })
            .collect()
    }
}
