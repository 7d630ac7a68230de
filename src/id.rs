//! Record ID generation
//!
//! IDs are generated by the engine before a record is constructed, never by
//! the storage layer. Format: `<PREFIX>_<ULID>` (e.g. `TRD_01J9Z8...`), so IDs
//! are unique without coordination and sort by creation time.

/// Executed trade
pub const TRADE_PREFIX: &str = "TRD";
/// Resting order
pub const ORDER_PREFIX: &str = "ORD";
/// Wallet-to-wallet swap
pub const SWAP_PREFIX: &str = "SWAP";
/// Ledger transaction row
pub const TRANSACTION_PREFIX: &str = "TXN";
/// Wallet movement (stands in for an on-chain hash on internal movements)
pub const WALLET_TX_PREFIX: &str = "TX";
/// Naira bank payout
pub const WITHDRAWAL_PREFIX: &str = "WDR";

/// Generate a new prefixed record ID
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, ulid::Ulid::new())
}
