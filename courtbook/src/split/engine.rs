//! Split validation, calculation and persistence.

use super::errors::{SplitError, SplitResult};
use crate::db::{ReservationRepository, StoreError};
use crate::money::{AMOUNT_TOLERANCE, Amount, round_currency};
use crate::reservation::{Participant, ReservationStatus, SplitAssignment, SplitMode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const FULL_PERCENTAGE: Decimal = dec!(100);

/// Split value submitted for one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShare {
    pub participant_id: Uuid,
    #[serde(default)]
    pub percentage: Option<Decimal>,
    #[serde(default)]
    pub fixed: Option<Amount>,
}

/// Validates and computes how a reservation's cost is divided
#[derive(Clone)]
pub struct SplitPolicyEngine {
    store: Arc<dyn ReservationRepository>,
}

impl SplitPolicyEngine {
    pub fn new(store: Arc<dyn ReservationRepository>) -> Self {
        Self { store }
    }

    /// Check that the participants' split values are consistent with `mode`.
    ///
    /// Pure; a `none` split is always valid.
    pub fn validate(participants: &[Participant], mode: SplitMode, total: Amount) -> SplitResult<()> {
        match mode {
            SplitMode::None => Ok(()),
            SplitMode::Percentage => {
                let mut sum = Decimal::ZERO;
                for participant in participants {
                    let pct = participant
                        .split_percentage
                        .ok_or(SplitError::MissingSplitValue(participant.id))?;
                    if pct < Decimal::ZERO {
                        return Err(SplitError::NegativeSplitValue(participant.id));
                    }
                    sum = sum
                        .checked_add(pct)
                        .ok_or(SplitError::SplitValueOverflow(participant.id))?;
                }

                if (sum - FULL_PERCENTAGE).abs() > AMOUNT_TOLERANCE {
                    return Err(SplitError::PercentageSumMismatch { sum });
                }
                Ok(())
            }
            SplitMode::Fixed => {
                let mut sum = Amount::ZERO;
                for participant in participants {
                    let fixed = participant
                        .split_fixed
                        .ok_or(SplitError::MissingSplitValue(participant.id))?;
                    if fixed < Amount::ZERO {
                        return Err(SplitError::NegativeSplitValue(participant.id));
                    }
                    sum = sum
                        .checked_add(fixed)
                        .ok_or(SplitError::SplitValueOverflow(participant.id))?;
                }

                if sum > total {
                    return Err(SplitError::FixedSumExceedsTotal { sum, total });
                }
                Ok(())
            }
        }
    }

    /// Compute each participant's `amount_due`.
    ///
    /// Percentages are rounded half-up to cents individually; the rounding
    /// remainder is not redistributed. Call [`Self::validate`] first.
    /// Only split values are read, so calculating again is a no-op.
    pub fn calculate(participants: &[Participant], mode: SplitMode, total: Amount) -> Vec<Participant> {
        participants
            .iter()
            .cloned()
            .map(|mut participant| {
                participant.amount_due = match mode {
                    SplitMode::None => None,
                    SplitMode::Percentage => participant
                        .split_percentage
                        .map(|pct| round_currency(pct / FULL_PERCENTAGE * total)),
                    SplitMode::Fixed => participant.split_fixed.map(round_currency),
                };
                participant
            })
            .collect()
    }

    /// Validate, calculate and persist a split for a pending reservation.
    ///
    /// Participants without a submitted share keep their stored values. A
    /// share may only set the field of `mode`. The amounts and the
    /// reservation's split mode are written in one transaction; on any
    /// failure nothing is applied.
    pub async fn apply(
        &self,
        reservation_id: Uuid,
        mode: SplitMode,
        shares: &[SplitShare],
    ) -> SplitResult<Vec<Participant>> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(SplitError::ReservationNotFound(reservation_id))?;
        if reservation.status != ReservationStatus::Pending {
            return Err(SplitError::ReservationNotPending(reservation.status));
        }

        let mut participants = self.store.list_participants(reservation_id).await?;
        let submitted: HashMap<Uuid, &SplitShare> =
            shares.iter().map(|s| (s.participant_id, s)).collect();

        if let Some(unknown) = shares
            .iter()
            .find(|s| !participants.iter().any(|p| p.id == s.participant_id))
        {
            return Err(SplitError::UnknownParticipant(unknown.participant_id));
        }

        if let Some(conflicting) = shares.iter().find(|s| match mode {
            SplitMode::None => s.percentage.is_some() || s.fixed.is_some(),
            SplitMode::Percentage => s.fixed.is_some(),
            SplitMode::Fixed => s.percentage.is_some(),
        }) {
            return Err(SplitError::ConflictingSplitValue(conflicting.participant_id));
        }

        for participant in &mut participants {
            if let Some(share) = submitted.get(&participant.id) {
                participant.split_percentage = share.percentage;
                participant.split_fixed = share.fixed;
            }
        }

        Self::validate(&participants, mode, reservation.total_price)?;
        let calculated = Self::calculate(&participants, mode, reservation.total_price);

        let assignments: Vec<SplitAssignment> = calculated
            .iter()
            .map(|p| SplitAssignment {
                participant_id: p.id,
                split_percentage: p.split_percentage,
                split_fixed: p.split_fixed,
                amount_due: p.amount_due,
            })
            .collect();

        let stored = self
            .store
            .apply_split(reservation_id, mode, &assignments)
            .await
            .map_err(|e| match e {
                // Lost a race with settlement
                StoreError::Conflict(_) => {
                    SplitError::ReservationNotPending(ReservationStatus::Confirmed)
                }
                other => SplitError::Store(other),
            })?;

        log::info!(
            "Applied {} split to reservation {} ({} participants)",
            mode,
            reservation_id,
            stored.len()
        );
        Ok(stored)
    }
}
