//! Payment initiation for participant shares and reservation totals.

use super::adapter::{PaymentGatewayAdapter, PaymentIntent};
use super::errors::{PaymentError, PaymentResult};
use super::models::{PaymentMethod, PaymentPurpose, PaymentRecord};
use crate::credits::{CreditConsumption, CreditLedger};
use crate::db::{PaymentPosting, SettlementStore};
use crate::money::{Amount, amounts_match, round_currency};
use crate::notifications::{NotificationQueue, SettlementNotification};
use crate::reservation::{AccountId, Participant, PaymentStatus, Reservation, ReservationStatus};
use crate::security::{SecurityEventBuffer, SecurityEventKind};
use crate::wallet::WalletManager;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Payment request submitted by an authenticated account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPayment {
    pub reservation_id: Uuid,
    /// Participant whose share is paid; the reservation total when absent
    #[serde(default)]
    pub participant_id: Option<Uuid>,
    pub amount: Amount,
    pub method: PaymentMethod,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Tokenized card, only for `card`
    #[serde(default, skip_serializing)]
    pub card_token: Option<String>,
}

/// Result of a payment request
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    /// Record created for this request; `None` when no credits applied
    pub payment: Option<PaymentRecord>,
    /// Participant state after the payment, when a share was paid
    pub participant: Option<Participant>,
    /// Credits spent, for the `credits` method
    pub credits: Option<CreditConsumption>,
}

/// What a request pays for once authorization passed
enum Target {
    Share(Participant),
    Total,
}

impl Target {
    fn participant_id(&self) -> Option<Uuid> {
        match self {
            Target::Share(p) => Some(p.id),
            Target::Total => None,
        }
    }

    fn purpose(&self) -> PaymentPurpose {
        match self {
            Target::Share(_) => PaymentPurpose::ParticipantShare,
            Target::Total => PaymentPurpose::OrganizerResidual,
        }
    }
}

/// Routes a payment to the wallet, the credit ledger or the gateway
pub struct PaymentProcessor {
    store: Arc<dyn SettlementStore>,
    wallets: WalletManager,
    credits: CreditLedger,
    adapter: Arc<PaymentGatewayAdapter>,
    notifications: NotificationQueue,
    security: Arc<SecurityEventBuffer>,
}

impl PaymentProcessor {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        wallets: WalletManager,
        credits: CreditLedger,
        adapter: Arc<PaymentGatewayAdapter>,
        notifications: NotificationQueue,
        security: Arc<SecurityEventBuffer>,
    ) -> Self {
        Self {
            store,
            wallets,
            credits,
            adapter,
            notifications,
            security,
        }
    }

    /// Process a payment on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// * `PaymentError::Forbidden` - Caller neither organizes the reservation nor owns the participant
    /// * `PaymentError::AmountMismatch` - Amount differs from what is owed by more than one cent
    /// * `PaymentError::ReservationClosed` - Reservation is no longer pending
    /// * `PaymentError::AlreadyPaid` - Participant already settled
    pub async fn process(
        &self,
        caller: AccountId,
        request: ProcessPayment,
    ) -> PaymentResult<PaymentOutcome> {
        let reservation = self
            .store
            .get_reservation(request.reservation_id)
            .await?
            .ok_or(PaymentError::ReservationNotFound(request.reservation_id))?;

        let target = match request.participant_id {
            Some(participant_id) => {
                let participant = self
                    .store
                    .get_participant(participant_id)
                    .await?
                    .filter(|p| p.reservation_id == reservation.id)
                    .ok_or(PaymentError::ParticipantNotFound(participant_id))?;
                Target::Share(participant)
            }
            None => Target::Total,
        };

        self.authorize(caller, &reservation, &target).await?;

        if reservation.status != ReservationStatus::Pending {
            return Err(PaymentError::ReservationClosed);
        }
        let expected = Self::expected_amount(&reservation, &target)?;
        if !amounts_match(request.amount, expected) {
            return Err(PaymentError::AmountMismatch {
                expected,
                submitted: request.amount,
            });
        }

        log::info!(
            "Processing {} payment of {} for reservation {} by {}",
            request.method,
            expected,
            reservation.id,
            caller
        );

        match request.method {
            PaymentMethod::Balance => {
                self.pay_from_balance(caller, &reservation, target, expected, request.idempotency_key)
                    .await
            }
            PaymentMethod::Credits => self.pay_with_credits(caller, &reservation, target, expected).await,
            PaymentMethod::Card | PaymentMethod::Pix => {
                let record = self
                    .adapter
                    .charge(PaymentIntent {
                        reservation_id: reservation.id,
                        participant_id: target.participant_id(),
                        account_id: Some(caller),
                        amount: expected,
                        method: request.method,
                        purpose: target.purpose(),
                        description: format!("Court reservation {}", reservation.id),
                        card_token: request.card_token,
                    })
                    .await?;
                let participant = match target {
                    Target::Share(p) => Some(p),
                    Target::Total => None,
                };
                Ok(PaymentOutcome {
                    payment: Some(record),
                    participant,
                    credits: None,
                })
            }
        }
    }

    async fn authorize(
        &self,
        caller: AccountId,
        reservation: &Reservation,
        target: &Target,
    ) -> PaymentResult<()> {
        let allowed = caller == reservation.organizer_id
            || matches!(target, Target::Share(p) if p.account_id == Some(caller));
        if allowed {
            return Ok(());
        }

        log::warn!(
            "Account {} tried to pay for reservation {} without a stake in it",
            caller,
            reservation.id
        );
        self.security
            .record(
                SecurityEventKind::ForbiddenPayment,
                json!({
                    "account_id": caller,
                    "reservation_id": reservation.id,
                    "participant_id": target.participant_id(),
                }),
            )
            .await;
        Err(PaymentError::Forbidden)
    }

    fn expected_amount(reservation: &Reservation, target: &Target) -> PaymentResult<Amount> {
        match target {
            Target::Share(participant) => {
                if participant.payment_status.is_settled() {
                    return Err(PaymentError::AlreadyPaid);
                }
                let due = participant
                    .amount_due
                    .ok_or(PaymentError::AmountNotSet(participant.id))?;
                Ok(round_currency((due - participant.amount_paid).max(Amount::ZERO)))
            }
            Target::Total => Ok(round_currency(reservation.total_price)),
        }
    }

    fn posting(
        caller: AccountId,
        reservation: &Reservation,
        target: &Target,
        method: PaymentMethod,
    ) -> PaymentPosting {
        PaymentPosting {
            reservation_id: reservation.id,
            participant_id: target.participant_id(),
            account_id: caller,
            method,
            purpose: target.purpose(),
        }
    }

    async fn pay_from_balance(
        &self,
        caller: AccountId,
        reservation: &Reservation,
        target: Target,
        amount: Amount,
        idempotency_key: Option<String>,
    ) -> PaymentResult<PaymentOutcome> {
        let posting = Self::posting(caller, reservation, &target, PaymentMethod::Balance);
        let posted = self.wallets.pay_share(posting, amount, idempotency_key).await?;

        Ok(PaymentOutcome {
            payment: Some(posted.payment),
            participant: self.announce(posted.participant),
            credits: None,
        })
    }

    async fn pay_with_credits(
        &self,
        caller: AccountId,
        reservation: &Reservation,
        target: Target,
        amount: Amount,
    ) -> PaymentResult<PaymentOutcome> {
        let posting = Self::posting(caller, reservation, &target, PaymentMethod::Credits);
        let (consumption, posted) = self.credits.spend(posting, amount, Utc::now()).await?;

        let Some(posted) = posted else {
            let participant = match target {
                Target::Share(p) => Some(p),
                Target::Total => None,
            };
            return Ok(PaymentOutcome {
                payment: None,
                participant,
                credits: Some(consumption),
            });
        };

        Ok(PaymentOutcome {
            payment: Some(posted.payment),
            participant: self.announce(posted.participant),
            credits: Some(consumption),
        })
    }

    /// Notify when a posting left the participant `paid`
    fn announce(&self, participant: Option<Participant>) -> Option<Participant> {
        if let Some(p) = participant
            .as_ref()
            .filter(|p| p.payment_status == PaymentStatus::Paid)
        {
            self.notifications
                .notify(SettlementNotification::PaymentConfirmed {
                    reservation_id: p.reservation_id,
                    participant_id: p.id,
                    amount: p.amount_paid,
                });
        }
        participant
    }
}
