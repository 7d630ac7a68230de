//! Portfolio Valuator
//!
//! Per asset: `current_value = amount * usd_price`, `pnl = current_value -
//! invested_amount`, `pnl_pct = pnl / invested_amount * 100` (0 when nothing
//! is invested). An asset without an oracle price keeps its previous
//! valuation and is left out of the portfolio totals until it is priced again.
//!
//! Revaluation is a pure function of (assets, prices): running it twice with
//! unchanged prices produces identical rows.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::currency::Currency;
use crate::error::SettlementError;
use crate::models::{Portfolio, PortfolioAsset, UserId};
use crate::money::{self, CRYPTO_SCALE};
use crate::oracle::PriceOracle;
use crate::settlement::require_portfolio;
use crate::store::{LedgerStore, LedgerUnit};

/// Portfolio row plus its assets as of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub portfolio: Portfolio,
    pub assets: Vec<PortfolioAsset>,
}

pub struct PortfolioValuator {
    store: Arc<dyn LedgerStore>,
    oracle: Arc<dyn PriceOracle>,
    max_attempts: u32,
}

impl PortfolioValuator {
    pub fn new(store: Arc<dyn LedgerStore>, oracle: Arc<dyn PriceOracle>, max_attempts: u32) -> Self {
        Self {
            store,
            oracle,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Refresh one asset from the oracle. Returns `false` when no price is known.
    pub fn value_asset(&self, asset: &mut PortfolioAsset) -> bool {
        let symbol = Currency::Crypto(asset.symbol.clone());
        let price = match self.oracle.current_price(&symbol, &Currency::USD) {
            Some(price) if price > Decimal::ZERO => price,
            _ => return false,
        };

        let current_value = match money::mul(asset.amount, price) {
            Ok(value) => money::round_even(value, CRYPTO_SCALE),
            Err(_) => return false,
        };
        asset.current_value_usd = current_value;
        asset.pnl = current_value - asset.invested_amount;
        asset.pnl_percentage = money::percentage(asset.pnl, asset.invested_amount);
        true
    }

    /// Recompute every asset and the portfolio aggregates inside an open unit
    ///
    /// Writes changed asset rows and the portfolio row (including any
    /// `available_balance` change the caller staged on `portfolio`).
    pub(crate) async fn revalue_in(
        &self,
        unit: &mut dyn LedgerUnit,
        portfolio: &mut Portfolio,
    ) -> Result<Vec<PortfolioAsset>, SettlementError> {
        let mut assets = unit.list_assets(portfolio.portfolio_id).await?;

        let mut total_value = Decimal::ZERO;
        let mut total_invested = Decimal::ZERO;
        for asset in assets.iter_mut() {
            let before = asset.clone();
            if !self.value_asset(asset) {
                debug!(symbol = %asset.symbol, "No USD price, keeping stale valuation");
                continue;
            }
            if *asset != before {
                unit.upsert_asset(asset).await?;
            }
            total_value = money::add(total_value, asset.current_value_usd)?;
            total_invested = money::add(total_invested, asset.invested_amount)?;
        }

        portfolio.total_value_usd = total_value;
        portfolio.total_invested = total_invested;
        portfolio.total_pnl = total_value - total_invested;
        portfolio.total_pnl_percentage = money::percentage(portfolio.total_pnl, total_invested);
        unit.update_portfolio(portfolio).await?;

        Ok(assets)
    }

    /// On-demand revaluation of a user's portfolio in its own unit
    pub async fn revalue(&self, user_id: UserId) -> Result<Valuation, SettlementError> {
        atomically!(self.store, self.max_attempts, |unit| {
            let mut portfolio = require_portfolio(unit.as_mut(), user_id).await?;
            let assets = self.revalue_in(unit.as_mut(), &mut portfolio).await?;
            Ok(Valuation { portfolio, assets })
        })
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
