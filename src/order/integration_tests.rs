use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{OrderManager, OrderStatus, PlaceOrderRequest};
use crate::currency::Currency;
use crate::error::SettlementError;
use crate::models::{OrderType, Portfolio, Side, User};
use crate::oracle::PriceTable;
use crate::settlement::{EngineSettings, SettlementEngine};
use crate::store::MemoryLedgerStore;

async fn setup(balance_usd: Decimal) -> (MemoryLedgerStore, OrderManager) {
    let store = MemoryLedgerStore::new();
    store.insert_user(User::new(1, balance_usd, Decimal::ZERO)).await;
    store.insert_portfolio(Portfolio::new(1, 1, balance_usd)).await;
    store.insert_user(User::new(2, dec!(500), Decimal::ZERO)).await;
    store.insert_portfolio(Portfolio::new(2, 2, dec!(500))).await;

    let prices = PriceTable::new();
    prices.set_price("BTC".parse().unwrap(), Currency::USD, dec!(50000));

    let engine = SettlementEngine::new(
        Arc::new(store.clone()),
        Arc::new(prices),
        EngineSettings::default(),
    );
    (store, OrderManager::new(Arc::new(engine)))
}

fn buy_btc(user_id: i64, amount: Decimal, price: Decimal) -> PlaceOrderRequest {
    PlaceOrderRequest {
        user_id,
        pair: "BTC/USDT".parse().unwrap(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        amount,
        price,
        stop_price: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_place_order_moves_no_funds() {
    let (store, manager) = setup(dec!(10000)).await;
    let order = manager.place_order(buy_btc(1, dec!(0.1), dec!(50000))).await.unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.order_id.starts_with("ORD_"));
    assert_eq!(order.filled_amount, Decimal::ZERO);

    let snap = store.snapshot().await;
    assert_eq!(snap.orders[&order.order_id], order);
    assert_eq!(snap.users[&1].balance_usd, dec!(10000));
    assert!(snap.transactions.is_empty());
}

#[tokio::test]
async fn test_place_order_validation() {
    let (_store, manager) = setup(dec!(10000)).await;

    let mut stop = buy_btc(1, dec!(0.1), dec!(50000));
    stop.order_type = OrderType::StopLoss;
    assert!(matches!(
        manager.place_order(stop.clone()).await,
        Err(SettlementError::InvalidAmount(_))
    ));
    stop.stop_price = Some(dec!(45000));
    assert!(manager.place_order(stop).await.is_ok());

    assert!(matches!(
        manager.place_order(buy_btc(1, dec!(0), dec!(50000))).await,
        Err(SettlementError::InvalidAmount(_))
    ));
    assert!(matches!(
        manager.place_order(buy_btc(1, dec!(0.000000001), dec!(50000))).await,
        Err(SettlementError::InvalidAmount(_))
    ));
    assert!(matches!(
        manager.place_order(buy_btc(99, dec!(0.1), dec!(50000))).await,
        Err(SettlementError::UserNotFound(99))
    ));

    let mut stale = buy_btc(1, dec!(0.1), dec!(50000));
    stale.expires_at = Some(Utc::now() - Duration::minutes(1));
    assert!(matches!(
        manager.place_order(stale).await,
        Err(SettlementError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn test_cancel_order_owner_only() {
    let (store, manager) = setup(dec!(10000)).await;
    let order = manager.place_order(buy_btc(1, dec!(0.1), dec!(50000))).await.unwrap();

    assert_eq!(
        manager.cancel_order(2, &order.order_id).await.unwrap_err(),
        SettlementError::OrderNotFound(order.order_id.clone())
    );
    assert_eq!(store.snapshot().await.orders[&order.order_id].status, OrderStatus::Pending);

    let cancelled = manager.cancel_order(1, &order.order_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let err = manager.cancel_order(1, &order.order_id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidState {
            status: OrderStatus::Cancelled,
            action: "cancel",
            ..
        }
    ));
}

#[tokio::test]
async fn test_fills_settle_at_average_price() {
    let (store, manager) = setup(dec!(10000)).await;
    let order = manager.place_order(buy_btc(1, dec!(0.02), dec!(50000))).await.unwrap();

    let first = manager
        .on_order_fill(&order.order_id, dec!(0.01), dec!(49000))
        .await
        .unwrap();
    assert_eq!(first.order.status, OrderStatus::PartiallyFilled);
    assert_eq!(first.order.average_fill_price, dec!(49000));
    assert!(first.trade.is_none());
    assert_eq!(store.snapshot().await.users[&1].balance_usd, dec!(10000));

    let second = manager
        .on_order_fill(&order.order_id, dec!(0.01), dec!(51000))
        .await
        .unwrap();
    assert_eq!(second.order.status, OrderStatus::Filled);
    assert_eq!(second.order.filled_amount, dec!(0.02));

    let trade = second.trade.unwrap();
    assert_eq!(second.order.trade_id.as_deref(), Some(trade.trade_id.as_str()));
    assert_eq!(trade.price, dec!(50000));
    assert_eq!(trade.total, dec!(1000));
    // 0.10% trading fee
    assert_eq!(trade.fee, dec!(1));

    let snap = store.snapshot().await;
    assert_eq!(snap.users[&1].balance_usd, dec!(8999));
    assert_eq!(snap.portfolios[&1].available_balance, dec!(8999));
    assert_eq!(snap.asset(1, "BTC").unwrap().amount, dec!(0.02));
    assert_eq!(snap.trades.len(), 1);
}

#[tokio::test]
async fn test_filled_order_cannot_be_cancelled() {
    let (store, manager) = setup(dec!(10000)).await;
    let order = manager.place_order(buy_btc(1, dec!(0.01), dec!(50000))).await.unwrap();
    manager
        .on_order_fill(&order.order_id, dec!(0.01), dec!(50000))
        .await
        .unwrap();
    let settled = store.snapshot().await;

    let err = manager.cancel_order(1, &order.order_id).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidState {
            status: OrderStatus::Filled,
            action: "cancel",
            ..
        }
    ));

    let snap = store.snapshot().await;
    assert_eq!(snap.orders[&order.order_id].status, OrderStatus::Filled);
    assert_eq!(snap.users, settled.users);
    assert_eq!(snap.trades.len(), 1);
}

#[tokio::test]
async fn test_overfill_and_terminal_fill_rejected() {
    let (store, manager) = setup(dec!(10000)).await;
    let order = manager.place_order(buy_btc(1, dec!(0.01), dec!(50000))).await.unwrap();

    assert!(matches!(
        manager.on_order_fill(&order.order_id, dec!(0.02), dec!(50000)).await,
        Err(SettlementError::InvalidAmount(_))
    ));
    assert_eq!(
        store.snapshot().await.orders[&order.order_id].filled_amount,
        Decimal::ZERO
    );

    manager.cancel_order(1, &order.order_id).await.unwrap();
    assert!(matches!(
        manager.on_order_fill(&order.order_id, dec!(0.01), dec!(50000)).await,
        Err(SettlementError::InvalidState { action: "fill", .. })
    ));
    assert!(matches!(
        manager.on_order_fill("ORD_missing", dec!(0.01), dec!(50000)).await,
        Err(SettlementError::OrderNotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_settlement_keeps_order_unfilled() {
    let (store, manager) = setup(dec!(100)).await;
    let order = manager.place_order(buy_btc(1, dec!(0.01), dec!(50000))).await.unwrap();

    let err = manager
        .on_order_fill(&order.order_id, dec!(0.01), dec!(50000))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InsufficientFunds { .. }));

    let snap = store.snapshot().await;
    let stored = &snap.orders[&order.order_id];
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.filled_amount, Decimal::ZERO);
    assert!(snap.trades.is_empty());
    assert_eq!(snap.users[&1].balance_usd, dec!(100));
}

#[tokio::test]
async fn test_expire_orders_sweeps_only_overdue_open_orders() {
    let (store, manager) = setup(dec!(10000)).await;
    let now = Utc::now();

    let mut short = buy_btc(1, dec!(0.01), dec!(50000));
    short.expires_at = Some(now + Duration::hours(1));
    let short = manager.place_order(short).await.unwrap();

    let mut long = buy_btc(1, dec!(0.01), dec!(50000));
    long.expires_at = Some(now + Duration::days(2));
    let long = manager.place_order(long).await.unwrap();

    let open = manager.place_order(buy_btc(1, dec!(0.01), dec!(50000))).await.unwrap();

    let mut cancelled = buy_btc(1, dec!(0.01), dec!(50000));
    cancelled.expires_at = Some(now + Duration::hours(1));
    let cancelled = manager.place_order(cancelled).await.unwrap();
    manager.cancel_order(1, &cancelled.order_id).await.unwrap();

    let expired = manager.expire_orders(now + Duration::hours(2)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].order_id, short.order_id);

    let snap = store.snapshot().await;
    assert_eq!(snap.orders[&short.order_id].status, OrderStatus::Expired);
    assert_eq!(snap.orders[&long.order_id].status, OrderStatus::Pending);
    assert_eq!(snap.orders[&open.order_id].status, OrderStatus::Pending);
    assert_eq!(snap.orders[&cancelled.order_id].status, OrderStatus::Cancelled);

    assert!(manager.expire_orders(now + Duration::hours(2)).await.unwrap().is_empty());
}
