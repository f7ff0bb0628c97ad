//! Split policy error types.

use crate::db::StoreError;
use crate::money::Amount;
use crate::reservation::ReservationStatus;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Split validation and persistence errors
#[derive(Debug, Error)]
pub enum SplitError {
    /// Percentages do not add up to 100 within tolerance
    #[error("Split percentages sum to {sum}, expected 100")]
    PercentageSumMismatch { sum: Decimal },

    /// Fixed amounts add up to more than the reservation total
    #[error("Fixed split sum {sum} exceeds reservation total {total}")]
    FixedSumExceedsTotal { sum: Amount, total: Amount },

    /// A participant has no value for the selected mode
    #[error("Participant {0} has no split value")]
    MissingSplitValue(Uuid),

    /// A participant has a negative value
    #[error("Participant {0} has a negative split value")]
    NegativeSplitValue(Uuid),

    /// A share sets a value the selected mode does not use
    #[error("Participant {0} has a split value for another mode")]
    ConflictingSplitValue(Uuid),

    /// Split values add up past the representable range
    #[error("Split values of participant {0} overflow")]
    SplitValueOverflow(Uuid),

    /// The reservation can no longer be split
    #[error("Reservation is {0}, splits can only change while pending")]
    ReservationNotPending(ReservationStatus),

    /// A share names a participant of another reservation
    #[error("Participant {0} does not belong to this reservation")]
    UnknownParticipant(Uuid),

    /// Reservation not found
    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SplitError {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            SplitError::PercentageSumMismatch { .. } => "percentage_sum_mismatch",
            SplitError::FixedSumExceedsTotal { .. } => "fixed_sum_exceeds_total",
            SplitError::MissingSplitValue(_) => "missing_split_value",
            SplitError::NegativeSplitValue(_) => "negative_split_value",
            SplitError::ConflictingSplitValue(_) => "conflicting_split_value",
            SplitError::SplitValueOverflow(_) => "split_value_overflow",
            SplitError::ReservationNotPending(_) => "reservation_not_pending",
            SplitError::UnknownParticipant(_) => "unknown_participant",
            SplitError::ReservationNotFound(_) => "reservation_not_found",
            SplitError::Store(_) => "store_error",
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            SplitError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for split operations
pub type SplitResult<T> = Result<T, SplitError>;
