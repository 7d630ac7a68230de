//! PostgreSQL ledger store round trip
//!
//! Requires `DATABASE_URL`; skipped otherwise. Each run uses fresh user IDs
//! so it can share a database with earlier runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use settlement_engine::currency::{CryptoSymbol, Currency};
use settlement_engine::models::{Portfolio, Side, TradeType, User, Wallet};
use settlement_engine::settlement::{ReceiveRequest, TradeRequest};
use settlement_engine::{
    EngineSettings, LedgerStore, LedgerUnit, PgLedgerStore, PriceTable, SettlementEngine,
    SettlementError,
};

async fn connect() -> Option<PgLedgerStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL tests");
        return None;
    };
    let store = PgLedgerStore::connect(&url, 8).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

static NEXT_SUFFIX: AtomicI64 = AtomicI64::new(0);

fn fresh_user_id() -> i64 {
    Utc::now().timestamp_micros() * 100 + NEXT_SUFFIX.fetch_add(1, Ordering::Relaxed) % 100
}

fn wallet(user_id: i64, code: &str, balance: Decimal) -> Wallet {
    Wallet {
        wallet_id: format!("WAL_{}_{}", user_id, code),
        user_id,
        currency: CryptoSymbol::parse(code).unwrap(),
        address: format!("{}-{}", code.to_lowercase(), user_id),
        balance,
        is_active: true,
    }
}

fn engine(store: PgLedgerStore) -> SettlementEngine {
    let prices = PriceTable::new();
    for (code, usd) in [("BTC", dec!(50000)), ("USDT", dec!(1))] {
        prices.set_price(Currency::Crypto(CryptoSymbol::parse(code).unwrap()), Currency::USD, usd);
    }
    let settings = EngineSettings {
        max_attempts: 50,
        ..EngineSettings::default()
    };
    SettlementEngine::new(Arc::new(store), Arc::new(prices), settings)
}

#[tokio::test]
async fn qa_pg_trade_round_trip() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = fresh_user_id();
    store
        .open_account(
            &User::new(user_id, dec!(1000), Decimal::ZERO),
            &Portfolio::new(user_id, user_id, dec!(1000)),
            &[],
        )
        .await
        .unwrap();
    let engine = engine(store.clone());

    let request = |side, price, fee| TradeRequest {
        user_id,
        pair: "BTC/USDT".parse().unwrap(),
        side,
        amount: dec!(0.01),
        price,
        fee,
        trade_type: TradeType::Limit,
    };
    engine.execute_trade(request(Side::Buy, dec!(50000), dec!(2.5))).await.unwrap();
    engine.execute_trade(request(Side::Sell, dec!(52000), dec!(2.6))).await.unwrap();

    let mut unit = store.begin_unit().await.unwrap();
    let user = unit.get_user(user_id).await.unwrap().unwrap();
    let portfolio = unit.get_portfolio(user_id).await.unwrap().unwrap();
    let asset = unit
        .get_asset(portfolio.portfolio_id, &CryptoSymbol::parse("BTC").unwrap())
        .await
        .unwrap();
    let ledger = unit.list_transactions(user_id).await.unwrap();
    let trades = unit.list_trades(user_id).await.unwrap();
    unit.rollback().await.unwrap();

    assert_eq!(user.balance_usd, dec!(1014.9));
    assert_eq!(portfolio.available_balance, dec!(1014.9));
    assert!(asset.is_none());
    assert_eq!(trades.len(), 2);
    assert_eq!(ledger.len(), 4);
    let net: Decimal = ledger.iter().map(|tx| tx.amount).sum();
    assert_eq!(net, dec!(14.9));
}

#[tokio::test]
async fn qa_pg_failed_unit_rolls_back() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = fresh_user_id();
    store
        .open_account(
            &User::new(user_id, dec!(10), Decimal::ZERO),
            &Portfolio::new(user_id, user_id, dec!(10)),
            &[wallet(user_id, "USDT", dec!(5)), wallet(user_id, "BTC", Decimal::ZERO)],
        )
        .await
        .unwrap();
    let engine = engine(store.clone());

    let err = engine
        .execute_swap(
            user_id,
            &CryptoSymbol::parse("USDT").unwrap(),
            &CryptoSymbol::parse("BTC").unwrap(),
            dec!(6),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InsufficientFunds { .. }));

    let mut unit = store.begin_unit().await.unwrap();
    let usdt = unit
        .get_wallet(user_id, &CryptoSymbol::parse("USDT").unwrap())
        .await
        .unwrap()
        .unwrap();
    let ledger = unit.list_transactions(user_id).await.unwrap();
    unit.rollback().await.unwrap();

    assert_eq!(usdt.balance, dec!(5));
    assert!(ledger.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_pg_duplicate_receive_credits_once() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = fresh_user_id();
    store
        .open_account(
            &User::new(user_id, Decimal::ZERO, Decimal::ZERO),
            &Portfolio::new(user_id, user_id, Decimal::ZERO),
            &[wallet(user_id, "BTC", Decimal::ZERO)],
        )
        .await
        .unwrap();
    let engine = Arc::new(engine(store.clone()));
    let tx_hash = format!("0x{:x}", user_id);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let tx_hash = tx_hash.clone();
        handles.push(tokio::spawn(async move {
            engine
                .receive_crypto(ReceiveRequest {
                    user_id,
                    currency: CryptoSymbol::parse("BTC").unwrap(),
                    from_address: "ext-btc".into(),
                    amount: dec!(0.1),
                    tx_hash,
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut unit = store.begin_unit().await.unwrap();
    let btc = unit
        .get_wallet(user_id, &CryptoSymbol::parse("BTC").unwrap())
        .await
        .unwrap()
        .unwrap();
    unit.rollback().await.unwrap();
    assert_eq!(btc.balance, dec!(0.1));
}
