//! Command boundary
//!
//! One JSON object per request, tagged by `op`. Amounts arrive as strings and
//! are parsed with [`money::parse_amount`] at the scale of their currency, so
//! precision problems are rejected before any unit is opened.
//!
//! Every request yields a [`CommandResponse`]: `code == 0` with `data` on
//! success, a stable non-zero code and a message otherwise.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::currency::{CryptoSymbol, Currency, TradingPair};
use crate::error::SettlementError;
use crate::models::{OrderType, Side, TradeType, UserId};
use crate::money::{self, CRYPTO_SCALE, FIAT_SCALE, MoneyError};
use crate::order::{OrderManager, PlaceOrderRequest};
use crate::portfolio::DEFAULT_HISTORY_DAYS;
use crate::settlement::{
    ConversionDirection, ReceiveRequest, SendRequest, SettlementEngine, TradeRequest,
};

/// Standard response codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const UNSUPPORTED_CURRENCY: i32 = 1003;
    pub const INVALID_STATE: i32 = 1004;

    // Resource errors (4xxx)
    pub const ORDER_NOT_FOUND: i32 = 4001;
    pub const NOT_FOUND: i32 = 4004;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const RATE_UNAVAILABLE: i32 = 5001;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SettlementCommand {
    ExecuteTrade {
        user_id: UserId,
        pair: TradingPair,
        side: Side,
        amount: String,
        price: String,
        #[serde(default)]
        fee: Option<String>,
    },
    MarketTrade {
        user_id: UserId,
        pair: TradingPair,
        side: Side,
        amount: String,
    },
    SwapQuote {
        from: CryptoSymbol,
        to: CryptoSymbol,
        amount: String,
    },
    ExecuteSwap {
        user_id: UserId,
        from: CryptoSymbol,
        to: CryptoSymbol,
        amount: String,
    },
    ConversionQuote {
        from: Currency,
        to: Currency,
        amount: String,
    },
    FiatConversion {
        user_id: UserId,
        currency: CryptoSymbol,
        direction: ConversionDirection,
        amount: String,
    },
    LiveRates,
    SendCrypto {
        user_id: UserId,
        currency: CryptoSymbol,
        to_address: String,
        amount: String,
        #[serde(default)]
        network_fee: Option<String>,
    },
    ReceiveCrypto {
        user_id: UserId,
        currency: CryptoSymbol,
        from_address: String,
        amount: String,
        tx_hash: String,
    },
    WithdrawToBank {
        user_id: UserId,
        bank_account: String,
        amount: String,
    },
    PlaceOrder {
        user_id: UserId,
        pair: TradingPair,
        side: Side,
        order_type: OrderType,
        amount: String,
        price: String,
        #[serde(default)]
        stop_price: Option<String>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    CancelOrder {
        user_id: UserId,
        order_id: String,
    },
    OrderFill {
        order_id: String,
        fill_amount: String,
        fill_price: String,
    },
    ExpireOrders {
        #[serde(default)]
        now: Option<DateTime<Utc>>,
    },
    Revalue {
        user_id: UserId,
    },
    PortfolioStats {
        user_id: UserId,
    },
    RecordSnapshot {
        user_id: UserId,
    },
    PortfolioHistory {
        user_id: UserId,
        #[serde(default)]
        days: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn success(data: Value) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == error_codes::SUCCESS
    }
}

impl From<&SettlementError> for CommandResponse {
    fn from(err: &SettlementError) -> Self {
        let code = match err {
            SettlementError::InvalidAmount(_) => error_codes::INVALID_PARAMETER,
            SettlementError::UnsupportedCurrency(_) => error_codes::UNSUPPORTED_CURRENCY,
            SettlementError::InsufficientFunds { .. } => error_codes::INSUFFICIENT_BALANCE,
            SettlementError::OrderNotFound(_) => error_codes::ORDER_NOT_FOUND,
            SettlementError::UserNotFound(_)
            | SettlementError::PortfolioNotFound(_)
            | SettlementError::WalletNotFound { .. }
            | SettlementError::AssetNotFound(_) => error_codes::NOT_FOUND,
            SettlementError::InvalidState { .. } => error_codes::INVALID_STATE,
            SettlementError::Conflict { .. } => error_codes::CONFLICT,
            SettlementError::RateUnavailable { .. } => error_codes::RATE_UNAVAILABLE,
            SettlementError::StoreFailure(_) => error_codes::INTERNAL_ERROR,
        };
        CommandResponse::error(code, format!("{}: {}", err.code(), err))
    }
}

/// Positive amount string at `scale`
fn amount(raw: &str, scale: u32) -> Result<Decimal, SettlementError> {
    Ok(money::parse_amount(raw, scale)?)
}

/// Optional fee string; absent or zero is a zero fee
fn fee(raw: Option<&str>, scale: u32) -> Result<Decimal, SettlementError> {
    let Some(raw) = raw else {
        return Ok(Decimal::ZERO);
    };
    match money::parse_amount(raw, scale) {
        // parse_amount rejects zero along with signed input
        Err(MoneyError::InvalidAmount) if !raw.trim().starts_with(['-', '+']) => Ok(Decimal::ZERO),
        other => Ok(other?),
    }
}

fn to_data<T: Serialize>(value: T) -> Result<Value, SettlementError> {
    serde_json::to_value(value)
        .map_err(|e| SettlementError::StoreFailure(format!("response encoding: {}", e)))
}

/// Routes parsed commands to the engine and the order manager
pub struct Dispatcher {
    engine: Arc<SettlementEngine>,
    orders: OrderManager,
}

impl Dispatcher {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        let orders = OrderManager::new(Arc::clone(&engine));
        Self { engine, orders }
    }

    pub fn engine(&self) -> &Arc<SettlementEngine> {
        &self.engine
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    /// Parse and run one JSON request line
    pub async fn handle_line(&self, line: &str) -> CommandResponse {
        match serde_json::from_str::<SettlementCommand>(line) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                debug!(error = %e, "Rejected malformed command");
                CommandResponse::error(
                    error_codes::INVALID_PARAMETER,
                    format!("INVALID_REQUEST: {}", e),
                )
            }
        }
    }

    pub async fn dispatch(&self, command: SettlementCommand) -> CommandResponse {
        match self.run(command).await {
            Ok(data) => CommandResponse::success(data),
            Err(err) => {
                if matches!(err, SettlementError::StoreFailure(_) | SettlementError::Conflict { .. }) {
                    warn!(error = %err, "Command failed");
                }
                CommandResponse::from(&err)
            }
        }
    }

    async fn run(&self, command: SettlementCommand) -> Result<Value, SettlementError> {
        let engine = &self.engine;
        match command {
            SettlementCommand::ExecuteTrade {
                user_id,
                pair,
                side,
                amount: qty,
                price,
                fee: trade_fee,
            } => to_data(
                engine
                    .execute_trade(TradeRequest {
                        user_id,
                        pair,
                        side,
                        amount: amount(&qty, CRYPTO_SCALE)?,
                        price: amount(&price, CRYPTO_SCALE)?,
                        fee: fee(trade_fee.as_deref(), FIAT_SCALE)?,
                        trade_type: TradeType::Limit,
                    })
                    .await?,
            ),
            SettlementCommand::MarketTrade {
                user_id,
                pair,
                side,
                amount: qty,
            } => to_data(
                engine
                    .market_trade(user_id, pair, side, amount(&qty, CRYPTO_SCALE)?)
                    .await?,
            ),
            SettlementCommand::SwapQuote { from, to, amount: qty } => {
                to_data(engine.get_swap_quote(&from, &to, amount(&qty, CRYPTO_SCALE)?)?)
            }
            SettlementCommand::ExecuteSwap {
                user_id,
                from,
                to,
                amount: qty,
            } => to_data(
                engine
                    .execute_swap(user_id, &from, &to, amount(&qty, CRYPTO_SCALE)?)
                    .await?,
            ),
            SettlementCommand::ConversionQuote { from, to, amount: qty } => {
                let qty = amount(&qty, from.scale())?;
                to_data(engine.calculate_conversion(&from, &to, qty)?)
            }
            SettlementCommand::FiatConversion {
                user_id,
                currency,
                direction,
                amount: qty,
            } => {
                let scale = match direction {
                    ConversionDirection::Buy => FIAT_SCALE,
                    ConversionDirection::Sell => CRYPTO_SCALE,
                };
                to_data(
                    engine
                        .execute_fiat_conversion(user_id, &currency, direction, amount(&qty, scale)?)
                        .await?,
                )
            }
            SettlementCommand::LiveRates => to_data(engine.live_rates()),
            SettlementCommand::SendCrypto {
                user_id,
                currency,
                to_address,
                amount: qty,
                network_fee,
            } => to_data(
                engine
                    .send_crypto(SendRequest {
                        user_id,
                        currency,
                        to_address,
                        amount: amount(&qty, CRYPTO_SCALE)?,
                        network_fee: fee(network_fee.as_deref(), CRYPTO_SCALE)?,
                    })
                    .await?,
            ),
            SettlementCommand::ReceiveCrypto {
                user_id,
                currency,
                from_address,
                amount: qty,
                tx_hash,
            } => to_data(
                engine
                    .receive_crypto(ReceiveRequest {
                        user_id,
                        currency,
                        from_address,
                        amount: amount(&qty, CRYPTO_SCALE)?,
                        tx_hash,
                    })
                    .await?,
            ),
            SettlementCommand::WithdrawToBank {
                user_id,
                bank_account,
                amount: qty,
            } => to_data(
                engine
                    .withdraw_to_bank(user_id, &bank_account, amount(&qty, FIAT_SCALE)?)
                    .await?,
            ),
            SettlementCommand::PlaceOrder {
                user_id,
                pair,
                side,
                order_type,
                amount: qty,
                price,
                stop_price,
                expires_at,
            } => {
                let stop_price = match stop_price {
                    Some(raw) => Some(amount(&raw, CRYPTO_SCALE)?),
                    None => None,
                };
                to_data(
                    self.orders
                        .place_order(PlaceOrderRequest {
                            user_id,
                            pair,
                            side,
                            order_type,
                            amount: amount(&qty, CRYPTO_SCALE)?,
                            price: amount(&price, CRYPTO_SCALE)?,
                            stop_price,
                            expires_at,
                        })
                        .await?,
                )
            }
            SettlementCommand::CancelOrder { user_id, order_id } => {
                to_data(self.orders.cancel_order(user_id, &order_id).await?)
            }
            SettlementCommand::OrderFill {
                order_id,
                fill_amount,
                fill_price,
            } => to_data(
                self.orders
                    .on_order_fill(
                        &order_id,
                        amount(&fill_amount, CRYPTO_SCALE)?,
                        amount(&fill_price, CRYPTO_SCALE)?,
                    )
                    .await?,
            ),
            SettlementCommand::ExpireOrders { now } => {
                to_data(self.orders.expire_orders(now.unwrap_or_else(Utc::now)).await?)
            }
            SettlementCommand::Revalue { user_id } => {
                to_data(engine.valuator().revalue(user_id).await?)
            }
            SettlementCommand::PortfolioStats { user_id } => {
                to_data(engine.valuator().portfolio_stats(user_id, Utc::now()).await?)
            }
            SettlementCommand::RecordSnapshot { user_id } => {
                to_data(engine.valuator().record_snapshot(user_id, Utc::now()).await?)
            }
            SettlementCommand::PortfolioHistory { user_id, days } => {
                let days = days.unwrap_or(DEFAULT_HISTORY_DAYS);
                to_data(engine.valuator().portfolio_history(user_id, days, Utc::now()).await?)
            }
        }
    }
}
