//! Joining a reservation through a public invite link.

use super::errors::{InviteError, InviteResult};
use super::models::{AcceptInvite, InviteAcceptance};
use crate::credits::{CreditConsumption, CreditLedger};
use crate::db::{PaymentPosting, SettlementStore, StoreError};
use crate::money::Amount;
use crate::payments::{PaymentMethod, PaymentPurpose};
use crate::reservation::{AccountId, NewParticipant, ParticipantOrigin, PaymentStatus, ReservationStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const MAX_NAME_LEN: usize = 120;

/// Accepts invites and pays the invite fee from the joiner's credits
pub struct InviteAcceptanceCreditConsumer {
    store: Arc<dyn SettlementStore>,
    credits: CreditLedger,
}

impl InviteAcceptanceCreditConsumer {
    pub fn new(store: Arc<dyn SettlementStore>, credits: CreditLedger) -> Self {
        Self { store, credits }
    }

    /// Accept the invite behind `token`.
    ///
    /// Free invites produce a `free` participant. Otherwise the caller's
    /// credits are applied when the caller is known; any shortfall is left
    /// `pending` on the participant. The gateway is never called here.
    ///
    /// # Errors
    ///
    /// * `InviteError::InviteNotFound` - Unknown token
    /// * `InviteError::InviteExpired` - Invite past its expiration
    /// * `InviteError::InviteExhausted` - No uses left
    /// * `InviteError::ReservationNotPending` - Reservation already closed
    pub async fn accept(
        &self,
        token: &str,
        details: AcceptInvite,
        account_id: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> InviteResult<InviteAcceptance> {
        let name = details.name.trim().to_string();
        if name.is_empty() {
            return Err(InviteError::InvalidAcceptance("name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(InviteError::InvalidAcceptance(format!(
                "name is longer than {MAX_NAME_LEN} characters"
            )));
        }

        let invite = self
            .store
            .find_invite_by_token(token)
            .await?
            .ok_or(InviteError::InviteNotFound)?;
        if invite.is_expired(now) {
            return Err(InviteError::InviteExpired);
        }
        if invite.is_exhausted() {
            return Err(InviteError::InviteExhausted);
        }

        let reservation = self
            .store
            .get_reservation(invite.reservation_id)
            .await?
            .ok_or(InviteError::InviteNotFound)?;
        if reservation.status != ReservationStatus::Pending {
            return Err(InviteError::ReservationNotPending);
        }

        let price = invite.price_per_person;
        let initial_status = if price == Amount::ZERO {
            PaymentStatus::Free
        } else {
            PaymentStatus::Pending
        };

        let participant = self
            .store
            .accept_invite(
                invite.id,
                NewParticipant {
                    reservation_id: reservation.id,
                    account_id,
                    name,
                    email: details.email.filter(|e| !e.trim().is_empty()),
                    phone: details.phone.filter(|p| !p.trim().is_empty()),
                    origin: ParticipantOrigin::Invite,
                    amount_due: Some(price),
                    payment_status: initial_status,
                },
            )
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => InviteError::InviteExhausted,
                other => InviteError::Store(other),
            })?;

        log::info!(
            "Participant {} joined reservation {} through invite {}",
            participant.id,
            reservation.id,
            invite.id
        );

        let Some(account_id) = account_id.filter(|_| price > Amount::ZERO) else {
            return Ok(InviteAcceptance {
                participant,
                credits: CreditConsumption::default(),
                payment: None,
            });
        };

        let posting = PaymentPosting {
            reservation_id: reservation.id,
            participant_id: Some(participant.id),
            account_id,
            method: PaymentMethod::Credits,
            purpose: PaymentPurpose::InviteFee,
        };
        let (credits, posted) = self.credits.spend(posting, price, now).await?;
        let Some(posted) = posted else {
            return Ok(InviteAcceptance {
                participant,
                credits,
                payment: None,
            });
        };

        Ok(InviteAcceptance {
            participant: posted.participant.unwrap_or(participant),
            credits,
            payment: Some(posted.payment),
        })
    }
}
