//! Portfolio statistics for display
//!
//! Read-only summary over completed trades, fee ledger rows and the current
//! asset valuations. Nothing here is written back.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PortfolioValuator;
use crate::currency::CryptoSymbol;
use crate::error::SettlementError;
use crate::models::{PortfolioAsset, TradeStatus, TransactionType, UserId};
use crate::settlement::require_portfolio;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPerformance {
    pub symbol: CryptoSymbol,
    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
}

impl From<&PortfolioAsset> for AssetPerformance {
    fn from(asset: &PortfolioAsset) -> Self {
        Self {
            symbol: asset.symbol.clone(),
            pnl: asset.pnl,
            pnl_percentage: asset.pnl_percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub total_trades: u64,
    /// Sum of completed trade totals since the start of the current month
    pub monthly_volume: Decimal,
    pub total_fees_paid: Decimal,
    pub best_performing_asset: Option<AssetPerformance>,
    pub worst_performing_asset: Option<AssetPerformance>,
    pub total_value_usd: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_percentage: Decimal,
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

impl PortfolioValuator {
    /// Trading summary for `user_id` as of `now`
    pub async fn portfolio_stats(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<PortfolioStats, SettlementError> {
        let since = month_start(now);

        atomically!(self.store(), self.max_attempts(), |unit| {
            let portfolio = require_portfolio(unit.as_mut(), user_id).await?;
            let assets = unit.list_assets(portfolio.portfolio_id).await?;
            let trades = unit.list_trades(user_id).await?;
            let ledger = unit.list_transactions(user_id).await?;

            let completed = trades
                .iter()
                .filter(|trade| trade.status == TradeStatus::Completed);
            let total_trades = completed.clone().count() as u64;
            let monthly_volume = completed
                .filter(|trade| trade.executed_at >= since)
                .map(|trade| trade.total)
                .sum();
            let total_fees_paid = ledger
                .iter()
                .filter(|tx| tx.tx_type == TransactionType::Fee)
                .map(|tx| tx.amount.abs())
                .sum();

            // Ties resolve to the alphabetically first symbol
            let best = assets
                .iter()
                .reduce(|best, a| if a.pnl_percentage > best.pnl_percentage { a } else { best });
            let worst = assets
                .iter()
                .reduce(|worst, a| if a.pnl_percentage < worst.pnl_percentage { a } else { worst });

            Ok(PortfolioStats {
                total_trades,
                monthly_volume,
                total_fees_paid,
                best_performing_asset: best.map(AssetPerformance::from),
                worst_performing_asset: worst.map(AssetPerformance::from),
                total_value_usd: portfolio.total_value_usd,
                total_pnl: portfolio.total_pnl,
                total_pnl_percentage: portfolio.total_pnl_percentage,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_start() {
        let now = Utc.with_ymd_and_hms(2026, 3, 17, 13, 45, 2).unwrap();
        assert_eq!(
            month_start(now),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
