use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::CryptoSymbol;
use crate::models::UserId;
use crate::money::FIAT_SCALE;
use crate::oracle::PriceTable;
use crate::settlement::EngineSettings;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// `hourly`, `daily` or anything else for a single file
    pub rotation: String,
    /// Emit per-attempt unit retry events
    #[serde(default)]
    pub enable_tracing: bool,
    /// PostgreSQL ledger store; the in-memory store is used when unset
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub postgres_max_connections: u32,
    #[serde(default)]
    pub settlement: EngineSettings,
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Accounts created at startup when absent
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

fn default_pool_size() -> u32 {
    10
}

/// Static price snapshot loaded at startup
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OracleConfig {
    /// USD price per unit
    #[serde(default)]
    pub usd_prices: BTreeMap<CryptoSymbol, Decimal>,
    /// Naira price per unit
    #[serde(default)]
    pub ngn_rates: BTreeMap<CryptoSymbol, Decimal>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeedAccount {
    pub user_id: UserId,
    #[serde(default)]
    pub balance_usd: Decimal,
    #[serde(default)]
    pub balance_naira: Decimal,
    /// Opening balance per crypto wallet
    #[serde(default)]
    pub wallets: BTreeMap<CryptoSymbol, Decimal>,
}

impl OracleConfig {
    pub fn price_table(&self) -> PriceTable {
        PriceTable::from_quotes(&self.usd_prices, &self.ngn_rates)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config file: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.settlement.max_attempts == 0 {
            bail!("settlement.max_attempts must be at least 1");
        }
        if self.settlement.fees.validate().is_err() {
            bail!("settlement.fees rates must be in [0, 1)");
        }
        let quotes = self.oracle.usd_prices.iter().chain(self.oracle.ngn_rates.iter());
        for (symbol, price) in quotes {
            if *price <= Decimal::ZERO {
                bail!("oracle price for {} must be positive", symbol);
            }
        }
        for account in &self.accounts {
            let balances = [account.balance_usd, account.balance_naira]
                .into_iter()
                .chain(account.wallets.values().copied());
            for balance in balances {
                if balance.is_sign_negative() {
                    bail!("account {} has a negative opening balance", account.user_id);
                }
            }
            for cash in [account.balance_usd, account.balance_naira] {
                if cash.normalize().scale() > FIAT_SCALE {
                    bail!("account {} fiat balance {} has sub-cent digits", account.user_id, cash);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::oracle::PriceOracle;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
log_level: info
log_dir: ./logs
log_file: settlement.log
use_json: false
rotation: daily
settlement:
  max_attempts: 3
  fees:
    trading_rate: "0.002"
  supported_currencies: [BTC, usdt]
oracle:
  usd_prices:
    BTC: "50000"
    USDT: "1"
  ngn_rates:
    BTC: "65000000"
accounts:
  - user_id: 1
    balance_usd: "1000"
    wallets:
      BTC: "0.5"
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert!(config.postgres_url.is_none());
        assert_eq!(config.postgres_max_connections, 10);
        assert_eq!(config.settlement.max_attempts, 3);
        assert_eq!(config.settlement.fees.trading_rate, dec!(0.002));
        assert_eq!(config.settlement.fees.swap_rate, dec!(0.005));
        assert_eq!(
            config.settlement.supported_currencies,
            vec![CryptoSymbol::parse("BTC").unwrap(), CryptoSymbol::parse("USDT").unwrap()]
        );

        let table = config.oracle.price_table();
        let btc = Currency::Crypto(CryptoSymbol::parse("BTC").unwrap());
        assert_eq!(table.current_price(&btc, &Currency::USD), Some(dec!(50000)));
        assert_eq!(table.current_price(&btc, &Currency::NGN), Some(dec!(65000000)));

        let account = &config.accounts[0];
        assert_eq!(account.balance_usd, dec!(1000));
        assert_eq!(account.balance_naira, Decimal::ZERO);
        assert_eq!(account.wallets[&CryptoSymbol::parse("BTC").unwrap()], dec!(0.5));
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_attempts = SAMPLE.replace("max_attempts: 3", "max_attempts: 0");
        assert!(AppConfig::from_yaml(&zero_attempts).is_err());

        let negative_price = SAMPLE.replace("USDT: \"1\"", "USDT: \"-1\"");
        assert!(AppConfig::from_yaml(&negative_price).is_err());

        let negative_balance = SAMPLE.replace("BTC: \"0.5\"", "BTC: \"-0.5\"");
        assert!(AppConfig::from_yaml(&negative_balance).is_err());

        let sub_cent = SAMPLE.replace("balance_usd: \"1000\"", "balance_usd: \"1000.001\"");
        assert!(AppConfig::from_yaml(&sub_cent).is_err());

        let bad_symbol = SAMPLE.replace("[BTC, usdt]", "[BTC, USD]");
        assert!(AppConfig::from_yaml(&bad_symbol).is_err());
    }
}
