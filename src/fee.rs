//! Fee calculation
//!
//! All fee rates are plain fractions: `0.001` = 0.10%.
//! Quote and execution paths share one [`FeeSchedule`], so a preview always
//! charges exactly what settlement will charge.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::{self, CRYPTO_SCALE, FIAT_SCALE, MoneyError};

/// Default trading fee (0.10% of trade total)
pub const DEFAULT_TRADING_FEE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Default swap fee (0.50% of the gross destination amount)
pub const DEFAULT_SWAP_FEE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Default fiat conversion fee (1.50% of the Naira leg)
pub const DEFAULT_FIAT_CONVERSION_FEE: Decimal = Decimal::from_parts(15, 0, 0, false, 3);

/// Default bank withdrawal fee (1.00% of the payout)
pub const DEFAULT_BANK_WITHDRAWAL_FEE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Floor on the bank withdrawal fee, NGN
pub const DEFAULT_BANK_WITHDRAWAL_MIN_FEE: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    #[serde(default = "default_trading_rate")]
    pub trading_rate: Decimal,
    #[serde(default = "default_swap_rate")]
    pub swap_rate: Decimal,
    #[serde(default = "default_fiat_conversion_rate")]
    pub fiat_conversion_rate: Decimal,
    #[serde(default = "default_bank_withdrawal_rate")]
    pub bank_withdrawal_rate: Decimal,
    #[serde(default = "default_bank_withdrawal_min_fee")]
    pub bank_withdrawal_min_fee: Decimal,
}

fn default_trading_rate() -> Decimal {
    DEFAULT_TRADING_FEE
}

fn default_swap_rate() -> Decimal {
    DEFAULT_SWAP_FEE
}

fn default_fiat_conversion_rate() -> Decimal {
    DEFAULT_FIAT_CONVERSION_FEE
}

fn default_bank_withdrawal_rate() -> Decimal {
    DEFAULT_BANK_WITHDRAWAL_FEE
}

fn default_bank_withdrawal_min_fee() -> Decimal {
    DEFAULT_BANK_WITHDRAWAL_MIN_FEE
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            trading_rate: DEFAULT_TRADING_FEE,
            swap_rate: DEFAULT_SWAP_FEE,
            fiat_conversion_rate: DEFAULT_FIAT_CONVERSION_FEE,
            bank_withdrawal_rate: DEFAULT_BANK_WITHDRAWAL_FEE,
            bank_withdrawal_min_fee: DEFAULT_BANK_WITHDRAWAL_MIN_FEE,
        }
    }
}

impl FeeSchedule {
    /// Trading fee on a USD trade total, rounded up to the cent
    pub fn trading_fee(&self, total: Decimal) -> Result<Decimal, MoneyError> {
        calculate_fee(total, self.trading_rate, FIAT_SCALE)
    }

    /// Swap fee on the gross destination amount, rounded up to 8 dp
    pub fn swap_fee(&self, gross_to: Decimal) -> Result<Decimal, MoneyError> {
        calculate_fee(gross_to, self.swap_rate, CRYPTO_SCALE)
    }

    /// Conversion fee on a Naira amount, rounded up to kobo
    pub fn fiat_conversion_fee(&self, naira: Decimal) -> Result<Decimal, MoneyError> {
        calculate_fee(naira, self.fiat_conversion_rate, FIAT_SCALE)
    }

    /// Bank payout fee: the rate on `naira`, never below the configured floor
    pub fn bank_withdrawal_fee(&self, naira: Decimal) -> Result<Decimal, MoneyError> {
        let fee = calculate_fee(naira, self.bank_withdrawal_rate, FIAT_SCALE)?;
        Ok(fee.max(self.bank_withdrawal_min_fee))
    }

    /// Swap fee as a display percentage (0.005 -> 0.5)
    pub fn swap_fee_percentage(&self) -> Decimal {
        (self.swap_rate * Decimal::ONE_HUNDRED).normalize()
    }

    /// Reject negative rates and rates of 100% or more
    pub fn validate(&self) -> Result<(), MoneyError> {
        let rates = [
            self.trading_rate,
            self.swap_rate,
            self.fiat_conversion_rate,
            self.bank_withdrawal_rate,
        ];
        for rate in rates {
            if rate.is_sign_negative() || rate >= Decimal::ONE {
                return Err(MoneyError::InvalidAmount);
            }
        }
        if self.bank_withdrawal_min_fee.is_sign_negative() {
            return Err(MoneyError::InvalidAmount);
        }
        Ok(())
    }
}

/// Calculate fee from amount and rate, rounded up at `decimals`
///
/// Fees are charged to the user, so any sub-unit remainder is rounded in the
/// platform's favour. A zero amount or zero rate is a zero fee.
#[inline]
pub fn calculate_fee(amount: Decimal, rate: Decimal, decimals: u32) -> Result<Decimal, MoneyError> {
    let fee = money::mul(amount, rate)?;
    Ok(money::round_up(fee, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_rates() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.trading_rate, dec!(0.001));
        assert_eq!(fees.swap_rate, dec!(0.005));
        assert_eq!(fees.fiat_conversion_rate, dec!(0.015));
        assert_eq!(fees.swap_fee_percentage(), dec!(0.5));
    }

    #[test]
    fn test_calculate_fee_basic() {
        // 500 USD * 0.10% = 0.5 USD
        assert_eq!(calculate_fee(dec!(500), dec!(0.001), 8).unwrap(), dec!(0.5));
        // 0.00002 BTC * 0.5% = 0.0000001 BTC
        assert_eq!(
            calculate_fee(dec!(0.00002), dec!(0.005), 8).unwrap(),
            dec!(0.0000001)
        );
    }

    #[test]
    fn test_calculate_fee_rounds_up() {
        // 0.00000001 * 0.5% = 5e-11 -> 1 satoshi
        assert_eq!(
            calculate_fee(dec!(0.00000001), dec!(0.005), 8).unwrap(),
            dec!(0.00000001)
        );
        // 1000.01 NGN * 1.5% = 15.00015 -> 15.01
        assert_eq!(
            calculate_fee(dec!(1000.01), dec!(0.015), 2).unwrap(),
            dec!(15.01)
        );
    }

    #[test]
    fn test_trading_fee_in_cents() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.trading_fee(dec!(500)).unwrap(), dec!(0.5));
        // 41.16 * 0.1% = 0.04116 -> 0.05
        assert_eq!(fees.trading_fee(dec!(41.16)).unwrap(), dec!(0.05));
    }

    #[test]
    fn test_bank_withdrawal_fee_floor() {
        let fees = FeeSchedule::default();
        // 1% of 5000 is 50, below the 100 floor
        assert_eq!(fees.bank_withdrawal_fee(dec!(5000)).unwrap(), dec!(100));
        assert_eq!(fees.bank_withdrawal_fee(dec!(25000.50)).unwrap(), dec!(250.01));
    }

    #[test]
    fn test_calculate_fee_zero() {
        assert_eq!(calculate_fee(dec!(0), dec!(0.001), 8).unwrap(), dec!(0));
        assert_eq!(calculate_fee(dec!(100), dec!(0), 8).unwrap(), dec!(0));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut fees = FeeSchedule::default();
        assert!(fees.validate().is_ok());
        fees.swap_rate = dec!(1);
        assert!(fees.validate().is_err());
        fees.swap_rate = dec!(-0.01);
        assert!(fees.validate().is_err());
    }
}
