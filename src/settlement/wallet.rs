//! External wallet movements
//!
//! Broadcast and confirmation tracking happen outside the core: a send is
//! debited immediately and recorded `pending`; a receive is reported by the
//! custody collaborator once confirmed and is keyed by its on-chain hash.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    SettlementEngine, credit, debit, fee_amount, ledger_entry, positive_amount, require_wallet,
};
use crate::currency::{CryptoSymbol, Currency};
use crate::error::SettlementError;
use crate::id::{WALLET_TX_PREFIX, generate_id};
use crate::models::{TransactionType, UserId, WalletTransaction, WalletTxStatus, WalletTxType};
use crate::money::{self, CRYPTO_SCALE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub user_id: UserId,
    pub currency: CryptoSymbol,
    pub to_address: String,
    pub amount: Decimal,
    #[serde(default)]
    pub network_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub user_id: UserId,
    pub currency: CryptoSymbol,
    pub from_address: String,
    pub amount: Decimal,
    pub tx_hash: String,
}

pub(super) fn require_text(value: &str, field: &str) -> Result<(), SettlementError> {
    if value.trim().is_empty() {
        return Err(SettlementError::InvalidAmount(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl SettlementEngine {
    /// Debit `amount + network_fee` and record a pending outbound movement
    pub async fn send_crypto(&self, request: SendRequest) -> Result<WalletTransaction, SettlementError> {
        positive_amount(request.amount, CRYPTO_SCALE)?;
        fee_amount(request.network_fee, CRYPTO_SCALE)?;
        require_text(&request.to_address, "to_address")?;
        self.ensure_supported(&request.currency)?;
        let total = money::add(request.amount, request.network_fee)?;

        let tx = atomically!(self.store, self.max_attempts, |unit| {
            let mut wallet = require_wallet(unit.as_mut(), request.user_id, &request.currency).await?;
            let before = wallet.balance;
            wallet.balance = debit(wallet.balance, total, &request.currency)?;
            unit.update_wallet(&wallet).await?;

            let tx = WalletTransaction {
                tx_hash: generate_id(WALLET_TX_PREFIX),
                wallet_id: wallet.wallet_id.clone(),
                user_id: request.user_id,
                tx_type: WalletTxType::Send,
                currency: request.currency.clone(),
                amount: request.amount,
                fee: request.network_fee,
                from_address: wallet.address.clone(),
                to_address: request.to_address.clone(),
                status: WalletTxStatus::Pending,
                created_at: Utc::now(),
            };
            unit.append_wallet_transaction(&tx).await?;
            unit.append_transaction(&ledger_entry(
                request.user_id,
                TransactionType::Withdrawal,
                Currency::Crypto(request.currency.clone()),
                before,
                wallet.balance,
                &tx.tx_hash,
                format!("Send {} {} to {}", request.amount, request.currency, request.to_address),
            ))
            .await?;
            Ok(tx)
        })?;

        info!(
            user_id = tx.user_id,
            tx_hash = %tx.tx_hash,
            currency = %tx.currency,
            amount = %tx.amount,
            "Outbound transfer recorded"
        );
        Ok(tx)
    }

    /// Credit a confirmed inbound movement. Replaying a known `tx_hash` is a no-op.
    pub async fn receive_crypto(
        &self,
        request: ReceiveRequest,
    ) -> Result<WalletTransaction, SettlementError> {
        positive_amount(request.amount, CRYPTO_SCALE)?;
        require_text(&request.tx_hash, "tx_hash")?;
        self.ensure_supported(&request.currency)?;

        let (tx, replayed) = atomically!(self.store, self.max_attempts, |unit| {
            let mut wallet = require_wallet(unit.as_mut(), request.user_id, &request.currency).await?;

            if let Some(existing) = unit.find_wallet_transaction(&request.tx_hash).await? {
                if existing.wallet_id != wallet.wallet_id || existing.tx_type != WalletTxType::Receive {
                    return Err(SettlementError::InvalidAmount(format!(
                        "tx_hash {} already recorded for another movement",
                        request.tx_hash
                    )));
                }
                return Ok((existing, true));
            }

            let before = wallet.balance;
            wallet.balance = credit(wallet.balance, request.amount)?;
            unit.update_wallet(&wallet).await?;

            let tx = WalletTransaction {
                tx_hash: request.tx_hash.clone(),
                wallet_id: wallet.wallet_id.clone(),
                user_id: request.user_id,
                tx_type: WalletTxType::Receive,
                currency: request.currency.clone(),
                amount: request.amount,
                fee: Decimal::ZERO,
                from_address: request.from_address.clone(),
                to_address: wallet.address.clone(),
                status: WalletTxStatus::Confirmed,
                created_at: Utc::now(),
            };
            unit.append_wallet_transaction(&tx).await?;
            unit.append_transaction(&ledger_entry(
                request.user_id,
                TransactionType::Deposit,
                Currency::Crypto(request.currency.clone()),
                before,
                wallet.balance,
                &tx.tx_hash,
                format!("Received {} {} from {}", request.amount, request.currency, request.from_address),
            ))
            .await?;
            Ok((tx, false))
        })?;

        if replayed {
            info!(tx_hash = %tx.tx_hash, "Inbound transfer already recorded");
        } else {
            info!(
                user_id = tx.user_id,
                tx_hash = %tx.tx_hash,
                currency = %tx.currency,
                amount = %tx.amount,
                "Inbound transfer credited"
            );
        }
        Ok(tx)
    }
}
