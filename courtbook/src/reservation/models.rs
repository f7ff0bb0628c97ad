//! Reservation and participant data models.

use crate::db::StoreError;
use crate::money::Amount;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Account ID type (organizers, roster members, invite acceptees)
pub type AccountId = Uuid;

/// Reservation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(StoreError::Decode(format!("reservation status '{other}'"))),
        }
    }
}

/// How a reservation's cost is divided among its participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    None,
    Percentage,
    Fixed,
}

impl SplitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitMode::None => "none",
            SplitMode::Percentage => "percentage",
            SplitMode::Fixed => "fixed",
        }
    }
}

impl std::fmt::Display for SplitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SplitMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SplitMode::None),
            "percentage" => Ok(SplitMode::Percentage),
            "fixed" => Ok(SplitMode::Fixed),
            other => Err(StoreError::Decode(format!("split mode '{other}'"))),
        }
    }
}

/// Where a participant came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantOrigin {
    Organizer,
    Roster,
    Invite,
}

impl ParticipantOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantOrigin::Organizer => "organizer",
            ParticipantOrigin::Roster => "roster",
            ParticipantOrigin::Invite => "invite",
        }
    }
}

impl std::fmt::Display for ParticipantOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ParticipantOrigin {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organizer" => Ok(ParticipantOrigin::Organizer),
            "roster" => Ok(ParticipantOrigin::Roster),
            "invite" => Ok(ParticipantOrigin::Invite),
            other => Err(StoreError::Decode(format!("participant origin '{other}'"))),
        }
    }
}

/// Participant payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Free,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Free => "free",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Whether this status counts toward the participants' total at closure
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Free)
    }

    /// Forward-only transition check.
    ///
    /// Same-status writes are allowed (idempotent). Moving a settled
    /// participant back to `pending` is only possible through
    /// [`PaymentStatus::can_refund`].
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => true,
            (PaymentStatus::Pending, _) => true,
            (PaymentStatus::Failed, PaymentStatus::Paid | PaymentStatus::Free) => true,
            _ => false,
        }
    }

    /// Whether an explicit refund may move this status back to `pending`
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "free" => Ok(PaymentStatus::Free),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(StoreError::Decode(format!("payment status '{other}'"))),
        }
    }
}

/// Reservation model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub organizer_id: AccountId,
    pub court_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub total_price: Amount,
    pub status: ReservationStatus,
    pub split_mode: SplitMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Fractional hours between `now` and game start (negative once started)
    pub fn hours_until_game(&self, now: DateTime<Utc>) -> f64 {
        (self.starts_at - now).num_seconds() as f64 / 3600.0
    }
}

/// Participant model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub account_id: Option<AccountId>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub origin: ParticipantOrigin,
    pub split_percentage: Option<Decimal>,
    pub split_fixed: Option<Amount>,
    pub amount_due: Option<Amount>,
    pub amount_paid: Amount,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a participant that is about to be attached to a reservation
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub reservation_id: Uuid,
    pub account_id: Option<AccountId>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub origin: ParticipantOrigin,
    pub amount_due: Option<Amount>,
    pub payment_status: PaymentStatus,
}

/// Split values and computed amount persisted for one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAssignment {
    pub participant_id: Uuid,
    pub split_percentage: Option<Decimal>,
    pub split_fixed: Option<Amount>,
    pub amount_due: Option<Amount>,
}

/// Data for a reservation that is about to be created
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub organizer_id: AccountId,
    pub court_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub total_price: Amount,
}
