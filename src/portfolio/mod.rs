//! Portfolio valuation and statistics
//!
//! The valuator is the only writer of a portfolio's derived fields
//! (`total_value_usd`, `total_invested`, `total_pnl`, `total_pnl_percentage`)
//! and of each asset's `current_value_usd`, `pnl`, `pnl_percentage`.

pub mod history;
pub mod stats;
pub mod valuator;

pub use history::DEFAULT_HISTORY_DAYS;
pub use stats::{AssetPerformance, PortfolioStats};
pub use valuator::{PortfolioValuator, Valuation};
