//! Order Lifecycle Manager
//!
//! - `place_order`: validate and persist a `pending` order
//! - `cancel_order`: owner-only, from `pending` / `partially_filled`
//! - `on_order_fill`: external fill trigger; the completing fill settles the
//!   whole order quantity at the volume-weighted fill price
//! - `expire_orders`: time-based sweep of open orders past `expires_at`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::OrderStatus;
use crate::currency::TradingPair;
use crate::error::SettlementError;
use crate::id::{ORDER_PREFIX, generate_id};
use crate::models::{Order, OrderType, Side, Trade, TradeType, UserId};
use crate::money::{self, CRYPTO_SCALE};
use crate::settlement::trade::trade_total;
use crate::settlement::{SettlementEngine, TradeRequest, positive_amount, require_user};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: UserId,
    pub pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Order after a fill, plus the trade settled if the fill completed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillOutcome {
    pub order: Order,
    pub trade: Option<Trade>,
}

pub struct OrderManager {
    engine: Arc<SettlementEngine>,
}

impl OrderManager {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SettlementEngine> {
        &self.engine
    }

    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<Order, SettlementError> {
        positive_amount(request.amount, CRYPTO_SCALE)?;
        positive_amount(request.price, CRYPTO_SCALE)?;
        match (request.order_type, request.stop_price) {
            (OrderType::StopLoss, None) => {
                return Err(SettlementError::InvalidAmount(
                    "stop_price is required for stop_loss orders".into(),
                ));
            }
            (_, Some(stop_price)) => {
                positive_amount(stop_price, CRYPTO_SCALE)?;
            }
            _ => {}
        }
        self.engine.ensure_supported(&request.pair.base)?;

        let now = Utc::now();
        if request.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(SettlementError::InvalidAmount(
                "expires_at must be in the future".into(),
            ));
        }

        let order = Order {
            order_id: generate_id(ORDER_PREFIX),
            user_id: request.user_id,
            pair: request.pair,
            side: request.side,
            order_type: request.order_type,
            amount: request.amount,
            price: request.price,
            stop_price: request.stop_price,
            filled_amount: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            status: OrderStatus::Pending,
            trade_id: None,
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
        };

        atomically!(self.engine.store(), self.engine.max_attempts(), |unit| {
            require_user(unit.as_mut(), order.user_id).await?;
            unit.upsert_order(&order).await?;
            Ok(())
        })?;

        info!(
            user_id = order.user_id,
            order_id = %order.order_id,
            pair = %order.pair,
            side = %order.side,
            order_type = %order.order_type,
            amount = %order.amount,
            price = %order.price,
            "Order placed"
        );
        Ok(order)
    }

    /// Cancel an open order. Someone else's order is reported as not found.
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: &str,
    ) -> Result<Order, SettlementError> {
        let order = atomically!(self.engine.store(), self.engine.max_attempts(), |unit| {
            let mut order = match unit.get_order(order_id).await? {
                Some(order) if order.user_id == user_id => order,
                _ => return Err(SettlementError::OrderNotFound(order_id.to_string())),
            };
            if !order.status.can_transition_to(OrderStatus::Cancelled) {
                return Err(SettlementError::InvalidState {
                    order_id: order.order_id.clone(),
                    status: order.status,
                    action: "cancel",
                });
            }
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
            unit.upsert_order(&order).await?;
            Ok(order)
        })?;

        info!(user_id, order_id = %order.order_id, "Order cancelled");
        Ok(order)
    }

    /// Apply one fill of `fill_amount` at `fill_price`
    ///
    /// The fill that brings `filled_amount` to `amount` settles a trade for the
    /// full order quantity at the average fill price, charging the trading fee.
    /// If that settlement fails, the fill is not recorded either.
    pub async fn on_order_fill(
        &self,
        order_id: &str,
        fill_amount: Decimal,
        fill_price: Decimal,
    ) -> Result<FillOutcome, SettlementError> {
        positive_amount(fill_amount, CRYPTO_SCALE)?;
        positive_amount(fill_price, CRYPTO_SCALE)?;

        let outcome = atomically!(self.engine.store(), self.engine.max_attempts(), |unit| {
            let mut order = unit
                .get_order(order_id)
                .await?
                .ok_or_else(|| SettlementError::OrderNotFound(order_id.to_string()))?;
            if order.status.is_terminal() {
                return Err(SettlementError::InvalidState {
                    order_id: order.order_id.clone(),
                    status: order.status,
                    action: "fill",
                });
            }

            let filled = money::add(order.filled_amount, fill_amount)?;
            if filled > order.amount {
                return Err(SettlementError::InvalidAmount(format!(
                    "fill of {} exceeds remaining {} on order {}",
                    fill_amount,
                    order.remaining_amount(),
                    order.order_id
                )));
            }

            let filled_value = money::add(
                money::mul(order.average_fill_price, order.filled_amount)?,
                money::mul(fill_price, fill_amount)?,
            )?;
            order.average_fill_price = money::div(filled_value, filled)?;
            order.filled_amount = filled;
            order.updated_at = Utc::now();

            let trade = if filled == order.amount {
                order.status = OrderStatus::Filled;
                let price = money::round_even(order.average_fill_price, CRYPTO_SCALE);
                let total = trade_total(order.side, order.amount, price)?;
                let request = TradeRequest {
                    user_id: order.user_id,
                    pair: order.pair.clone(),
                    side: order.side,
                    amount: order.amount,
                    price,
                    fee: self.engine.fees().trading_fee(total)?,
                    trade_type: TradeType::Limit,
                };
                let trade = self.engine.settle_trade(unit.as_mut(), &request).await?;
                order.trade_id = Some(trade.trade_id.clone());
                Some(trade)
            } else {
                order.status = OrderStatus::PartiallyFilled;
                None
            };

            unit.upsert_order(&order).await?;
            Ok(FillOutcome { order, trade })
        })?;

        match &outcome.trade {
            Some(trade) => info!(
                order_id = %outcome.order.order_id,
                trade_id = %trade.trade_id,
                price = %trade.price,
                "Order filled and settled"
            ),
            None => debug!(
                order_id = %outcome.order.order_id,
                filled = %outcome.order.filled_amount,
                amount = %outcome.order.amount,
                "Order partially filled"
            ),
        }
        Ok(outcome)
    }

    /// Expire every open order whose `expires_at` is at or before `now`
    pub async fn expire_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, SettlementError> {
        let candidates: Vec<String> =
            atomically!(self.engine.store(), self.engine.max_attempts(), |unit| {
                let open = unit.list_open_orders().await?;
                Ok(open
                    .into_iter()
                    .filter(|order| order.expires_at.is_some_and(|at| at <= now))
                    .map(|order| order.order_id)
                    .collect())
            })?;

        let mut expired = Vec::with_capacity(candidates.len());
        for order_id in candidates {
            // Each order in its own unit; a fill or cancel may have won the race
            let result = atomically!(self.engine.store(), self.engine.max_attempts(), |unit| {
                let mut order = match unit.get_order(&order_id).await? {
                    Some(order) => order,
                    None => return Ok(None),
                };
                let due = order.expires_at.is_some_and(|at| at <= now);
                if !due || !order.status.can_transition_to(OrderStatus::Expired) {
                    return Ok(None);
                }
                order.status = OrderStatus::Expired;
                order.updated_at = now;
                unit.upsert_order(&order).await?;
                Ok(Some(order))
            });

            match result {
                Ok(Some(order)) => expired.push(order),
                Ok(None) => {}
                Err(e) => warn!(order_id = %order_id, error = %e, "Failed to expire order"),
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Orders expired");
        }
        Ok(expired)
    }
}
