//! Wallet data models.

use crate::db::StoreError;
use crate::money::Amount;
use crate::reservation::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Account balance held on the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub account_id: AccountId,
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wallet ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    pub reservation_id: Option<Uuid>,
    pub amount: Amount,
    pub balance_after: Amount,
    pub direction: EntryDirection,
    pub entry_type: EntryType,
    pub idempotency_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl std::fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryDirection::Debit => write!(f, "debit"),
            EntryDirection::Credit => write!(f, "credit"),
        }
    }
}

impl FromStr for EntryDirection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryDirection::Debit),
            "credit" => Ok(EntryDirection::Credit),
            other => Err(StoreError::Decode(format!("entry direction '{other}'"))),
        }
    }
}

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Participant share paid from balance
    SharePayment,
    /// Organizer residual debited at closure
    SettlementDebit,
    /// Money returned to the account
    Refund,
    /// Account top-up
    TopUp,
    AdminAdjust,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::SharePayment => write!(f, "share_payment"),
            EntryType::SettlementDebit => write!(f, "settlement_debit"),
            EntryType::Refund => write!(f, "refund"),
            EntryType::TopUp => write!(f, "top_up"),
            EntryType::AdminAdjust => write!(f, "admin_adjust"),
        }
    }
}

impl FromStr for EntryType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "share_payment" => Ok(EntryType::SharePayment),
            "settlement_debit" => Ok(EntryType::SettlementDebit),
            "refund" => Ok(EntryType::Refund),
            "top_up" => Ok(EntryType::TopUp),
            "admin_adjust" => Ok(EntryType::AdminAdjust),
            other => Err(StoreError::Decode(format!("entry type '{other}'"))),
        }
    }
}

/// Balance movement request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceMovement {
    pub account_id: AccountId,
    pub reservation_id: Option<Uuid>,
    pub amount: Amount,
    pub entry_type: EntryType,
    pub idempotency_key: String,
    pub description: Option<String>,
}
