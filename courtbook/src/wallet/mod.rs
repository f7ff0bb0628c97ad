//! Platform balances with an append-only ledger.
//!
//! Every movement carries an idempotency key. Debits are conditional on the
//! balance covering the amount, so concurrent debits can never overdraw an
//! account.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{WalletError, WalletResult};
pub use manager::{WalletManager, settlement_key};
pub use models::{BalanceMovement, EntryDirection, EntryType, Wallet, WalletEntry};
