//! Credit ledger data models.

use crate::db::StoreError;
use crate::money::Amount;
use crate::reservation::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Credit entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Active,
    Used,
    Expired,
}

impl CreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditStatus::Active => "active",
            CreditStatus::Used => "used",
            CreditStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CreditStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CreditStatus::Active),
            "used" => Ok(CreditStatus::Used),
            "expired" => Ok(CreditStatus::Expired),
            other => Err(StoreError::Decode(format!("credit status '{other}'"))),
        }
    }
}

/// How a credit was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditSource {
    Referral,
    Loyalty,
    Adjustment,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditSource::Referral => "referral",
            CreditSource::Loyalty => "loyalty",
            CreditSource::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for CreditSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CreditSource {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "referral" => Ok(CreditSource::Referral),
            "loyalty" => Ok(CreditSource::Loyalty),
            "adjustment" => Ok(CreditSource::Adjustment),
            other => Err(StoreError::Decode(format!("credit source '{other}'"))),
        }
    }
}

/// A unit of prepaid value belonging to an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    pub face_value: Amount,
    pub remaining_value: Amount,
    pub status: CreditStatus,
    pub source: CreditSource,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditEntry {
    /// Whether the entry can be spent at `now`
    pub fn is_spendable(&self, now: DateTime<Utc>) -> bool {
        self.status == CreditStatus::Active
            && self.expires_at > now
            && self.remaining_value > Amount::ZERO
    }
}

/// Portion of a single entry taken by a consumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAllocation {
    pub entry_id: Uuid,
    pub amount: Amount,
    /// Remaining value of the entry after this allocation
    pub remaining_after: Amount,
    /// Whether the entry was fully consumed (status becomes `used`)
    pub exhausted: bool,
}

/// Result of a credit consumption
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditConsumption {
    pub allocations: Vec<CreditAllocation>,
    /// Total amount covered by credits
    pub applied: Amount,
    /// Shortfall left to be paid by other means
    pub remaining: Amount,
}

impl CreditConsumption {
    /// Whether the requested amount was fully covered
    pub fn is_fully_covered(&self) -> bool {
        self.remaining == Amount::ZERO
    }
}

/// Data for a credit entry about to be granted
#[derive(Debug, Clone)]
pub struct NewCreditEntry {
    pub account_id: AccountId,
    pub value: Amount,
    pub source: CreditSource,
    pub expires_at: DateTime<Utc>,
}
