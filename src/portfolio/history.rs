//! Portfolio history
//!
//! A snapshot is taken right after a revaluation, so every recorded point
//! carries totals consistent with the asset rows of that moment.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::PortfolioValuator;
use crate::error::SettlementError;
use crate::models::{PortfolioSnapshot, UserId};
use crate::settlement::require_portfolio;

/// Window used when the caller names none
pub const DEFAULT_HISTORY_DAYS: u32 = 30;

impl PortfolioValuator {
    /// Revalue `user_id` and append the resulting totals to the history
    pub async fn record_snapshot(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, SettlementError> {
        let snapshot = atomically!(self.store(), self.max_attempts(), |unit| {
            let mut portfolio = require_portfolio(unit.as_mut(), user_id).await?;
            self.revalue_in(unit.as_mut(), &mut portfolio).await?;
            let snapshot = PortfolioSnapshot::of(&portfolio, now);
            unit.append_snapshot(&snapshot).await?;
            Ok(snapshot)
        })?;
        debug!(user_id, total_value = %snapshot.total_value_usd, "Portfolio snapshot recorded");
        Ok(snapshot)
    }

    /// Snapshots from the last `days` days as of `now`, oldest first
    pub async fn portfolio_history(
        &self,
        user_id: UserId,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>, SettlementError> {
        let since = now - Duration::days(i64::from(days));
        atomically!(self.store(), self.max_attempts(), |unit| {
            require_portfolio(unit.as_mut(), user_id).await?;
            Ok(unit.list_snapshots(user_id, since).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::currency::{CryptoSymbol, Currency};
    use crate::models::{Portfolio, PortfolioAsset};
    use crate::oracle::PriceTable;
    use crate::store::MemoryLedgerStore;

    async fn valuator(table: Arc<PriceTable>) -> (Arc<MemoryLedgerStore>, PortfolioValuator) {
        let store = Arc::new(MemoryLedgerStore::new());
        store.insert_portfolio(Portfolio::new(10, 1, dec!(0))).await;
        let btc = CryptoSymbol::parse("BTC").unwrap();
        store
            .insert_asset(PortfolioAsset::opened(10, btc, dec!(0.1), dec!(50000), dec!(5000)))
            .await;
        (store.clone(), PortfolioValuator::new(store, table, 3))
    }

    #[tokio::test]
    async fn test_history_window() {
        let table = Arc::new(PriceTable::new());
        let btc = Currency::Crypto(CryptoSymbol::parse("BTC").unwrap());
        let (store, valuator) = valuator(table.clone()).await;
        let now = Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap();

        for (days_ago, price) in [(45, dec!(40000)), (20, dec!(50000)), (1, dec!(60000))] {
            table.set_price(btc.clone(), Currency::USD, price);
            valuator
                .record_snapshot(1, now - Duration::days(days_ago))
                .await
                .unwrap();
        }
        assert_eq!(store.snapshot().await.portfolio_snapshots.len(), 3);

        let history = valuator
            .portfolio_history(1, DEFAULT_HISTORY_DAYS, now)
            .await
            .unwrap();
        let values: Vec<_> = history.iter().map(|s| s.total_value_usd).collect();
        assert_eq!(values, vec![dec!(5000), dec!(6000)]);
        assert_eq!(history[1].total_pnl, dec!(1000));
        assert_eq!(history[1].total_pnl_percentage, dec!(20));

        let week = valuator.portfolio_history(1, 7, now).await.unwrap();
        assert_eq!(week.len(), 1);
    }

    #[tokio::test]
    async fn test_history_unknown_user() {
        let (_store, valuator) = valuator(Arc::new(PriceTable::new())).await;
        assert_eq!(
            valuator.portfolio_history(2, 30, Utc::now()).await.unwrap_err(),
            SettlementError::PortfolioNotFound(2)
        );
    }
}
