//! Trade settlement
//!
//! Cash side of every trade is the user's USD balance, mirrored by the
//! portfolio's `available_balance`. USD legs settle in cents: the buy cost
//! and fee round up, sell proceeds round down. Holdings use a
//! volume-weighted cost basis that only buys move; sells release invested
//! capital pro rata.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    SettlementEngine, credit, debit, fee_amount, ledger_entry, positive_amount,
    require_portfolio, require_user,
};
use crate::currency::{Currency, TradingPair};
use crate::error::SettlementError;
use crate::id::{TRADE_PREFIX, generate_id};
use crate::models::{PortfolioAsset, Side, Trade, TradeStatus, TradeType, TransactionType, UserId};
use crate::money::{self, CRYPTO_SCALE, FIAT_SCALE};
use crate::store::LedgerUnit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub user_id: UserId,
    pub pair: TradingPair,
    pub side: Side,
    /// Base-currency quantity
    pub amount: Decimal,
    /// Quote price per unit of base
    pub price: Decimal,
    /// Fee charged in USD (cents) on top of (buy) or out of (sell) the total
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default = "default_trade_type")]
    pub trade_type: TradeType,
}

fn default_trade_type() -> TradeType {
    TradeType::Limit
}

impl TradeRequest {
    fn validate(&self) -> Result<(), SettlementError> {
        positive_amount(self.amount, CRYPTO_SCALE)?;
        positive_amount(self.price, CRYPTO_SCALE)?;
        fee_amount(self.fee, FIAT_SCALE)?;
        Ok(())
    }
}

/// `amount * price` in cents: rounded up when the user pays, down when paid
pub fn trade_total(side: Side, amount: Decimal, price: Decimal) -> Result<Decimal, SettlementError> {
    let raw = money::mul(amount, price)?;
    Ok(match side {
        Side::Buy => money::round_up(raw, FIAT_SCALE),
        Side::Sell => money::round_down(raw, FIAT_SCALE),
    })
}

impl SettlementEngine {
    /// Settle a trade at a caller-supplied price and fee
    pub async fn execute_trade(&self, request: TradeRequest) -> Result<Trade, SettlementError> {
        request.validate()?;
        self.ensure_supported(&request.pair.base)?;

        let trade = atomically!(self.store, self.max_attempts, |unit| {
            self.settle_trade(unit.as_mut(), &request).await
        })?;

        info!(
            user_id = trade.user_id,
            trade_id = %trade.trade_id,
            pair = %trade.pair,
            side = %trade.side,
            amount = %trade.amount,
            price = %trade.price,
            fee = %trade.fee,
            "Trade settled"
        );
        Ok(trade)
    }

    /// Settle a trade priced from the oracle, charging the configured trading fee
    pub async fn market_trade(
        &self,
        user_id: UserId,
        pair: TradingPair,
        side: Side,
        amount: Decimal,
    ) -> Result<Trade, SettlementError> {
        positive_amount(amount, CRYPTO_SCALE)?;
        let base = Currency::Crypto(pair.base.clone());
        let price = money::round_even(self.cross_rate(&base, &pair.quote)?, CRYPTO_SCALE);
        if price.is_zero() {
            return Err(SettlementError::rate_unavailable(&base, &pair.quote));
        }
        let total = trade_total(side, amount, price)?;
        let fee = self.fees.trading_fee(total)?;
        debug!(user_id, pair = %pair, %price, %fee, "Market trade priced");

        self.execute_trade(TradeRequest {
            user_id,
            pair,
            side,
            amount,
            price,
            fee,
            trade_type: TradeType::Market,
        })
        .await
    }

    /// Apply a validated trade inside an open unit
    ///
    /// Shared with order fills so the fill and the order update commit together.
    pub(crate) async fn settle_trade(
        &self,
        unit: &mut dyn LedgerUnit,
        request: &TradeRequest,
    ) -> Result<Trade, SettlementError> {
        let base = &request.pair.base;
        let total = trade_total(request.side, request.amount, request.price)?;
        let fee = request.fee;

        let mut user = require_user(unit, request.user_id).await?;
        let mut portfolio = require_portfolio(unit, request.user_id).await?;
        let trade_id = generate_id(TRADE_PREFIX);
        let usd_before = user.balance_usd;

        // Cash balance right after the trade leg, before the fee leg
        let after_trade = match request.side {
            Side::Buy => {
                let cost = money::add(total, fee)?;
                user.balance_usd = debit(user.balance_usd, cost, Currency::USD)?;
                // Funds are checked on the cash balance only; the mirror follows
                portfolio.available_balance =
                    (portfolio.available_balance - cost).max(Decimal::ZERO);

                let asset = match unit.get_asset(portfolio.portfolio_id, base).await? {
                    None => PortfolioAsset::opened(
                        portfolio.portfolio_id,
                        base.clone(),
                        request.amount,
                        money::div(total, request.amount)?,
                        total,
                    ),
                    Some(mut held) => {
                        held.amount = money::add(held.amount, request.amount)?;
                        held.invested_amount = money::add(held.invested_amount, total)?;
                        held.average_buy_price = money::div(held.invested_amount, held.amount)?;
                        held
                    }
                };
                unit.upsert_asset(&asset).await?;
                usd_before - total
            }
            Side::Sell => {
                if fee > total {
                    return Err(SettlementError::InvalidAmount(format!(
                        "fee {} exceeds trade total {}",
                        fee, total
                    )));
                }

                let held = unit.get_asset(portfolio.portfolio_id, base).await?;
                let mut asset = match held {
                    Some(asset) if asset.amount >= request.amount => asset,
                    other => {
                        let available = other.map(|a| a.amount).unwrap_or(Decimal::ZERO);
                        return Err(SettlementError::insufficient(base, request.amount, available));
                    }
                };

                let remaining = asset.amount - request.amount;
                if remaining.is_zero() {
                    unit.delete_asset(portfolio.portfolio_id, base).await?;
                } else {
                    let sold_invested = money::round_even(
                        money::div(money::mul(asset.invested_amount, request.amount)?, asset.amount)?,
                        FIAT_SCALE,
                    );
                    asset.invested_amount = (asset.invested_amount - sold_invested).max(Decimal::ZERO);
                    asset.amount = remaining;
                    unit.upsert_asset(&asset).await?;
                }

                let proceeds = total - fee;
                user.balance_usd = credit(user.balance_usd, proceeds)?;
                portfolio.available_balance = credit(portfolio.available_balance, proceeds)?;
                usd_before + total
            }
        };

        unit.update_user(&user).await?;
        unit.append_transaction(&ledger_entry(
            user.user_id,
            TransactionType::Trade,
            Currency::USD,
            usd_before,
            after_trade,
            &trade_id,
            format!(
                "{} {} {} @ {}",
                request.side, request.amount, request.pair, request.price
            ),
        ))
        .await?;
        if fee > Decimal::ZERO {
            unit.append_transaction(&ledger_entry(
                user.user_id,
                TransactionType::Fee,
                Currency::USD,
                after_trade,
                after_trade - fee,
                &trade_id,
                format!("Trading fee for {}", trade_id),
            ))
            .await?;
        }

        let trade = Trade {
            trade_id,
            user_id: user.user_id,
            pair: request.pair.clone(),
            side: request.side,
            trade_type: request.trade_type,
            amount: request.amount,
            price: request.price,
            total,
            fee,
            status: TradeStatus::Completed,
            executed_at: Utc::now(),
        };
        unit.create_trade(&trade).await?;

        self.valuator.revalue_in(unit, &mut portfolio).await?;
        Ok(trade)
    }
}
