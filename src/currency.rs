//! Currency and trading pair types
//!
//! Every balance in the ledger is denominated in a [`Currency`]: either a fiat
//! cash position held on the user row, or a crypto symbol held in a wallet or
//! portfolio asset. Rate lookups, scales and ledger rows all key off this one
//! tagged variant instead of comparing raw strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::money::{CRYPTO_SCALE, FIAT_SCALE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurrencyError {
    #[error("Invalid currency code: {0}")]
    InvalidCode(String),

    #[error("Invalid trading pair: {0}")]
    InvalidPair(String),

    #[error("Expected a crypto currency, got {0}")]
    NotCrypto(String),
}

/// Fiat currencies held directly on the user row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fiat {
    Usd,
    Ngn,
}

impl Fiat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fiat::Usd => "USD",
            Fiat::Ngn => "NGN",
        }
    }
}

/// Upper-case crypto ticker (e.g. `BTC`, `USDT`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CryptoSymbol(String);

impl CryptoSymbol {
    /// Parse a ticker. Input is trimmed and upper-cased; 2..=10 ASCII
    /// alphanumerics are accepted, and fiat codes are rejected.
    pub fn parse(code: &str) -> Result<Self, CurrencyError> {
        let code = code.trim().to_ascii_uppercase();
        let valid_len = (2..=10).contains(&code.len());
        let valid_chars = code.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_len || !valid_chars {
            return Err(CurrencyError::InvalidCode(code));
        }
        if code == Fiat::Usd.as_str() || code == Fiat::Ngn.as_str() {
            return Err(CurrencyError::NotCrypto(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CryptoSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CryptoSymbol {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A ledger currency: fiat cash or a crypto symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Currency {
    Fiat(Fiat),
    Crypto(CryptoSymbol),
}

impl Currency {
    pub const USD: Currency = Currency::Fiat(Fiat::Usd);
    pub const NGN: Currency = Currency::Fiat(Fiat::Ngn);

    /// Number of fractional digits balances in this currency carry
    #[inline]
    pub fn scale(&self) -> u32 {
        match self {
            Currency::Fiat(_) => FIAT_SCALE,
            Currency::Crypto(_) => CRYPTO_SCALE,
        }
    }

    pub fn is_fiat(&self) -> bool {
        matches!(self, Currency::Fiat(_))
    }

    pub fn as_crypto(&self) -> Option<&CryptoSymbol> {
        match self {
            Currency::Crypto(symbol) => Some(symbol),
            Currency::Fiat(_) => None,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Currency::Fiat(fiat) => fiat.as_str(),
            Currency::Crypto(symbol) => symbol.as_str(),
        }
    }
}

impl From<CryptoSymbol> for Currency {
    fn from(symbol: CryptoSymbol) -> Self {
        Currency::Crypto(symbol)
    }
}

impl From<Fiat> for Currency {
    fn from(fiat: Fiat) -> Self {
        Currency::Fiat(fiat)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "NGN" => Ok(Currency::NGN),
            other => CryptoSymbol::parse(other).map(Currency::Crypto),
        }
    }
}

/// Trading pair referenced by value on trades and orders (`BASE/QUOTE`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradingPair {
    pub base: CryptoSymbol,
    pub quote: Currency,
}

impl TradingPair {
    pub fn new(base: CryptoSymbol, quote: Currency) -> Self {
        Self { base, quote }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| CurrencyError::InvalidPair(s.to_string()))?;
        let base = CryptoSymbol::parse(base).map_err(|_| CurrencyError::InvalidPair(s.to_string()))?;
        let quote = Currency::from_str(quote).map_err(|_| CurrencyError::InvalidPair(s.to_string()))?;
        if quote == Currency::Crypto(base.clone()) {
            return Err(CurrencyError::InvalidPair(s.to_string()));
        }
        Ok(Self { base, quote })
    }
}

// Records carry currencies and pairs as their string codes.
macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_via_str!(CryptoSymbol);
serde_via_str!(Currency);
serde_via_str!(TradingPair);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_symbol_normalizes_case() {
        let symbol = CryptoSymbol::parse(" btc ").unwrap();
        assert_eq!(symbol.as_str(), "BTC");
    }

    #[test]
    fn test_crypto_symbol_rejects_fiat_and_garbage() {
        assert!(matches!(
            CryptoSymbol::parse("NGN"),
            Err(CurrencyError::NotCrypto(_))
        ));
        assert!(CryptoSymbol::parse("B").is_err());
        assert!(CryptoSymbol::parse("BT-C").is_err());
    }

    #[test]
    fn test_currency_scales() {
        assert_eq!(Currency::NGN.scale(), 2);
        assert_eq!(Currency::USD.scale(), 2);
        assert_eq!("eth".parse::<Currency>().unwrap().scale(), 8);
    }

    #[test]
    fn test_pair_parse_and_display() {
        let pair: TradingPair = "btc/usdt".parse().unwrap();
        assert_eq!(pair.base.as_str(), "BTC");
        assert_eq!(pair.quote.code(), "USDT");
        assert_eq!(pair.to_string(), "BTC/USDT");
    }

    #[test]
    fn test_pair_rejects_malformed() {
        assert!("BTCUSDT".parse::<TradingPair>().is_err());
        assert!("BTC/BTC".parse::<TradingPair>().is_err());
        assert!("USD/BTC".parse::<TradingPair>().is_err());
    }

    #[test]
    fn test_currency_serde_as_code() {
        let json = serde_json::to_string(&Currency::NGN).unwrap();
        assert_eq!(json, "\"NGN\"");
        let back: Currency = serde_json::from_str("\"usdt\"").unwrap();
        assert_eq!(back.code(), "USDT");
    }
}
