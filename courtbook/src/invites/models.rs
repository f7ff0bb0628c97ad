//! Invite data models.

use crate::credits::CreditConsumption;
use crate::money::Amount;
use crate::payments::PaymentRecord;
use crate::reservation::Participant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public invite to join a reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub token: String,
    pub reservation_id: Uuid,
    pub price_per_person: Amount,
    pub max_uses: Option<i32>,
    pub uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max_uses| self.uses >= max_uses)
    }
}

/// Data for an invite about to be created
#[derive(Debug, Clone)]
pub struct NewInvite {
    pub token: String,
    pub reservation_id: Uuid,
    pub price_per_person: Amount,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Details submitted by the person accepting an invite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptInvite {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Outcome of an invite acceptance
#[derive(Debug, Clone, Serialize)]
pub struct InviteAcceptance {
    pub participant: Participant,
    pub credits: CreditConsumption,
    pub payment: Option<PaymentRecord>,
}
