//! Settlement Engine - JSON-lines command runner
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌────────────┐    ┌──────────┐
//! │  stdin / │───▶│ Dispatcher │───▶│ Settlement │───▶│  Ledger  │
//! │  --input │    │  (JSON)    │    │   Engine   │    │  Store   │
//! └──────────┘    └────────────┘    └────────────┘    └──────────┘
//!                       │                                  │
//!                       ▼                          memory | postgres
//!                  stdout (one response per line)
//! ```
//!
//! Flags: `--env <name>` selects `config/<name>.yaml` (default `dev`);
//! `--input <file>` reads commands from a file instead of stdin.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

use settlement_engine::config::{AppConfig, SeedAccount};
use settlement_engine::models::{Portfolio, User, Wallet};
use settlement_engine::store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use settlement_engine::{Dispatcher, SettlementEngine};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

/// Rows for one configured account: portfolio ID mirrors the user ID
fn account_rows(account: &SeedAccount) -> (User, Portfolio, Vec<Wallet>) {
    let user = User::new(account.user_id, account.balance_usd, account.balance_naira);
    let portfolio = Portfolio::new(account.user_id, account.user_id, account.balance_usd);
    let wallets = account
        .wallets
        .iter()
        .map(|(symbol, balance)| Wallet {
            wallet_id: format!("WAL_{}_{}", account.user_id, symbol),
            user_id: account.user_id,
            currency: symbol.clone(),
            address: format!("{}-{}", symbol.as_str().to_lowercase(), account.user_id),
            balance: *balance,
            is_active: true,
        })
        .collect();
    (user, portfolio, wallets)
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.postgres_url {
        Some(url) => {
            let store = PgLedgerStore::connect(url, config.postgres_max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store.migrate().await.context("Failed to apply migrations")?;
            store.health_check().await?;
            for account in &config.accounts {
                let (user, portfolio, wallets) = account_rows(account);
                store.open_account(&user, &portfolio, &wallets).await?;
            }
            tracing::info!(accounts = config.accounts.len(), "Using PostgreSQL ledger store");
            Ok(Arc::new(store))
        }
        None => {
            let store = MemoryLedgerStore::new();
            for account in &config.accounts {
                let (user, portfolio, wallets) = account_rows(account);
                store.insert_user(user).await;
                store.insert_portfolio(portfolio).await;
                for wallet in wallets {
                    store.insert_wallet(wallet).await;
                }
            }
            tracing::info!(accounts = config.accounts.len(), "Using in-memory ledger store");
            Ok(Arc::new(store))
        }
    }
}

async fn run_commands<R: AsyncBufRead + Unpin>(
    dispatcher: &Dispatcher,
    reader: R,
) -> anyhow::Result<usize> {
    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();
    let mut handled = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let response = dispatcher.handle_line(line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        handled += 1;
    }
    stdout.flush().await?;
    Ok(handled)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = settlement_engine::logging::init_logging(&app_config);

    tracing::info!(
        "Starting settlement engine in {} mode (build {})",
        env,
        env!("GIT_HASH")
    );

    let store = open_store(&app_config).await?;
    let oracle = Arc::new(app_config.oracle.price_table());
    let engine = SettlementEngine::new(store, oracle, app_config.settlement.clone());
    let dispatcher = Dispatcher::new(Arc::new(engine));

    let handled = match get_arg(&["--input", "-i"]) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input file: {}", path))?;
            run_commands(&dispatcher, BufReader::new(file)).await?
        }
        None => run_commands(&dispatcher, BufReader::new(tokio::io::stdin())).await?,
    };

    tracing::info!(commands = handled, "Input exhausted, shutting down");
    Ok(())
}
