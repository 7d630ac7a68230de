//! Concurrent settlement against the shared in-memory store
//!
//! Units race on the same rows from many tasks; optimistic conflicts must
//! retry into a serial outcome with no lost or doubled updates.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use settlement_engine::currency::{CryptoSymbol, Currency};
use settlement_engine::models::{OrderType, Portfolio, Side, TradeType, User, Wallet};
use settlement_engine::order::PlaceOrderRequest;
use settlement_engine::settlement::{ReceiveRequest, TradeRequest};
use settlement_engine::{
    EngineSettings, MemoryLedgerStore, OrderManager, OrderStatus, PriceTable, SettlementEngine,
    SettlementError,
};

fn sym(code: &str) -> CryptoSymbol {
    CryptoSymbol::parse(code).unwrap()
}

fn wallet(code: &str, balance: Decimal) -> Wallet {
    Wallet {
        wallet_id: format!("WAL_1_{}", code),
        user_id: 1,
        currency: sym(code),
        address: format!("addr-{}", code),
        balance,
        is_active: true,
    }
}

async fn setup(balance_usd: Decimal) -> (MemoryLedgerStore, Arc<SettlementEngine>) {
    let store = MemoryLedgerStore::new();
    store.insert_user(User::new(1, balance_usd, Decimal::ZERO)).await;
    store.insert_portfolio(Portfolio::new(1, 1, balance_usd)).await;
    store.insert_wallet(wallet("BTC", dec!(1))).await;
    store.insert_wallet(wallet("USDT", dec!(50000))).await;

    let prices = PriceTable::new();
    prices.set_price(Currency::Crypto(sym("BTC")), Currency::USD, dec!(50000));
    prices.set_price(Currency::Crypto(sym("USDT")), Currency::USD, dec!(1));

    let settings = EngineSettings {
        max_attempts: 10_000,
        ..EngineSettings::default()
    };
    let engine = SettlementEngine::new(Arc::new(store.clone()), Arc::new(prices), settings);
    (store, Arc::new(engine))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_concurrent_buys_never_overdraw() {
    let (store, engine) = setup(dec!(1000)).await;

    // 30 buys of 50 USD against 1000 USD: exactly 20 can settle
    let mut handles = Vec::new();
    for _ in 0..30 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .execute_trade(TradeRequest {
                    user_id: 1,
                    pair: "BTC/USDT".parse().unwrap(),
                    side: Side::Buy,
                    amount: dec!(0.001),
                    price: dec!(50000),
                    fee: Decimal::ZERO,
                    trade_type: TradeType::Limit,
                })
                .await
        }));
    }

    let mut settled = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => settled += 1,
            Err(SettlementError::InsufficientFunds { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(settled, 20);
    assert_eq!(rejected, 10);

    let snap = store.snapshot().await;
    assert_eq!(snap.users[&1].balance_usd, Decimal::ZERO);
    assert_eq!(snap.portfolios[&1].available_balance, Decimal::ZERO);
    assert_eq!(snap.asset(1, "BTC").unwrap().amount, dec!(0.02));
    assert_eq!(snap.asset(1, "BTC").unwrap().invested_amount, dec!(1000));
    assert_eq!(snap.trades.len(), 20);
    assert_eq!(snap.transactions_for(1).len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_duplicate_receive_credits_once() {
    let (store, engine) = setup(dec!(0)).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .receive_crypto(ReceiveRequest {
                    user_id: 1,
                    currency: sym("BTC"),
                    from_address: "ext-btc".into(),
                    amount: dec!(0.25),
                    tx_hash: "0xdeadbeef".into(),
                })
                .await
        }));
    }
    for handle in handles {
        let tx = handle.await.unwrap().unwrap();
        assert_eq!(tx.tx_hash, "0xdeadbeef");
    }

    let snap = store.snapshot().await;
    assert_eq!(snap.wallet(1, "BTC").unwrap().balance, dec!(1.25));
    assert_eq!(snap.wallet_transactions.len(), 1);
    assert_eq!(snap.transactions_for(1).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_concurrent_swaps_conserve_ledger() {
    let (store, engine) = setup(dec!(0)).await;
    let before = store.snapshot().await;

    let mut handles = Vec::new();
    for i in 0..24 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.execute_swap(1, &sym("USDT"), &sym("BTC"), dec!(1000)).await
            } else {
                engine.execute_swap(1, &sym("BTC"), &sym("USDT"), dec!(0.01)).await
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let after = store.snapshot().await;
    let mut deltas: HashMap<String, Decimal> = HashMap::new();
    for tx in after.transactions_for(1) {
        assert_eq!(tx.amount, tx.balance_after - tx.balance_before);
        *deltas.entry(tx.currency.to_string()).or_default() += tx.amount;
    }
    for code in ["BTC", "USDT"] {
        let change =
            after.wallet(1, code).unwrap().balance - before.wallet(1, code).unwrap().balance;
        assert_eq!(deltas[code], change, "{} ledger drift", code);
    }
    assert_eq!(after.swaps.len(), 24);
    assert_eq!(after.wallet_transactions.len(), 48);

    // Swap fees only remove value
    let usdt_value = after.wallet(1, "USDT").unwrap().balance
        + after.wallet(1, "BTC").unwrap().balance * dec!(50000);
    assert!(usdt_value < dec!(50000) + dec!(50000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_concurrent_fills_complete_order_once() {
    let (store, engine) = setup(dec!(10000)).await;
    let manager = Arc::new(OrderManager::new(Arc::clone(&engine)));

    let order = manager
        .place_order(PlaceOrderRequest {
            user_id: 1,
            pair: "BTC/USDT".parse().unwrap(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            amount: dec!(0.1),
            price: dec!(50000),
            stop_price: None,
            expires_at: None,
        })
        .await
        .unwrap();

    // 12 fills of 0.01 against 0.1: 10 apply, 2 are rejected
    let mut handles = Vec::new();
    for _ in 0..12 {
        let manager = Arc::clone(&manager);
        let order_id = order.order_id.clone();
        handles.push(tokio::spawn(async move {
            manager.on_order_fill(&order_id, dec!(0.01), dec!(50000)).await
        }));
    }

    let mut applied = 0;
    let mut trades = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                applied += 1;
                if outcome.trade.is_some() {
                    trades += 1;
                }
            }
            Err(SettlementError::InvalidAmount(_)) | Err(SettlementError::InvalidState { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(applied, 10);
    assert_eq!(trades, 1);

    let snap = store.snapshot().await;
    let stored = &snap.orders[&order.order_id];
    assert_eq!(stored.status, OrderStatus::Filled);
    assert_eq!(stored.filled_amount, dec!(0.1));
    assert_eq!(snap.trades.len(), 1);
    // 5000 total + 5 trading fee
    assert_eq!(snap.users[&1].balance_usd, dec!(4995));
}
