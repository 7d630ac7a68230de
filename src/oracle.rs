//! Price Oracle
//!
//! The settlement core only ever reads prices. An ingestion collaborator
//! (market-data poller, static config, test fixture) writes the snapshot via
//! [`PriceTable::set_price`]; concurrent readers need no coordination.

use std::collections::BTreeMap;

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::currency::{CryptoSymbol, Currency};

/// Read-only source of current prices
pub trait PriceOracle: Send + Sync {
    /// Price of one unit of `base` expressed in `quote`, if known
    fn current_price(&self, base: &Currency, quote: &Currency) -> Option<Decimal>;

    /// Crypto symbols with a direct quote in `quote`, sorted
    fn quoted_symbols(&self, _quote: &Currency) -> Vec<CryptoSymbol> {
        Vec::new()
    }
}

/// In-memory price snapshot keyed by `(base, quote)`
///
/// A pair with only the reverse direction quoted is answered with the inverse;
/// `base == quote` is always 1.
#[derive(Debug, Default)]
pub struct PriceTable {
    prices: DashMap<(Currency, Currency), Decimal>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table from USD prices and NGN rates (config / fixtures)
    pub fn from_quotes(
        usd_prices: &BTreeMap<CryptoSymbol, Decimal>,
        ngn_rates: &BTreeMap<CryptoSymbol, Decimal>,
    ) -> Self {
        let table = Self::new();
        for (symbol, price) in usd_prices {
            table.set_price(Currency::Crypto(symbol.clone()), Currency::USD, *price);
        }
        for (symbol, rate) in ngn_rates {
            table.set_price(Currency::Crypto(symbol.clone()), Currency::NGN, *rate);
        }
        table
    }

    /// Publish a price. Non-positive prices are treated as "not available".
    pub fn set_price(&self, base: Currency, quote: Currency, price: Decimal) {
        if price <= Decimal::ZERO {
            self.prices.remove(&(base, quote));
            return;
        }
        self.prices.insert((base, quote), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl PriceOracle for PriceTable {
    fn current_price(&self, base: &Currency, quote: &Currency) -> Option<Decimal> {
        if base == quote {
            return Some(Decimal::ONE);
        }

        if let Some(price) = self.prices.get(&(base.clone(), quote.clone())) {
            return Some(*price);
        }

        let inverse = *self.prices.get(&(quote.clone(), base.clone()))?;
        Decimal::ONE.checked_div(inverse)
    }

    fn quoted_symbols(&self, quote: &Currency) -> Vec<CryptoSymbol> {
        let mut symbols: Vec<CryptoSymbol> = self
            .prices
            .iter()
            .filter_map(|entry| match entry.key() {
                (Currency::Crypto(symbol), q) if q == quote => Some(symbol.clone()),
                _ => None,
            })
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Currency {
        "BTC".parse().unwrap()
    }

    #[test]
    fn test_direct_and_identity_lookup() {
        let table = PriceTable::new();
        table.set_price(btc(), Currency::USD, dec!(50000));

        assert_eq!(table.current_price(&btc(), &Currency::USD), Some(dec!(50000)));
        assert_eq!(table.current_price(&btc(), &btc()), Some(Decimal::ONE));
        assert_eq!(table.current_price(&btc(), &Currency::NGN), None);
    }

    #[test]
    fn test_inverse_lookup() {
        let table = PriceTable::new();
        table.set_price(btc(), Currency::USD, dec!(50000));
        assert_eq!(
            table.current_price(&Currency::USD, &btc()),
            Some(dec!(0.00002))
        );
    }

    #[test]
    fn test_non_positive_price_clears_entry() {
        let table = PriceTable::new();
        table.set_price(btc(), Currency::USD, dec!(50000));
        table.set_price(btc(), Currency::USD, dec!(0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_quoted_symbols() {
        let table = PriceTable::new();
        table.set_price("ETH".parse().unwrap(), Currency::NGN, dec!(4200000));
        table.set_price(btc(), Currency::NGN, dec!(65000000));
        table.set_price(btc(), Currency::USD, dec!(50000));

        let symbols: Vec<String> = table
            .quoted_symbols(&Currency::NGN)
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(symbols, vec!["BTC", "ETH"]);
        assert_eq!(table.quoted_symbols(&Currency::USD).len(), 1);
    }

    #[test]
    fn test_from_quotes() {
        let symbol = CryptoSymbol::parse("ETH").unwrap();
        let usd = BTreeMap::from([(symbol.clone(), dec!(3000))]);
        let ngn = BTreeMap::from([(symbol.clone(), dec!(4200000))]);
        let table = PriceTable::from_quotes(&usd, &ngn);

        let eth = Currency::Crypto(symbol);
        assert_eq!(table.len(), 2);
        assert_eq!(table.current_price(&eth, &Currency::NGN), Some(dec!(4200000)));
    }
}
