//! Periodic close-out of reservations approaching their game time.

use super::errors::{SettlementError, SettlementResult};
use crate::credits::CreditLedger;
use crate::db::SettlementStore;
use crate::money::{AMOUNT_TOLERANCE, Amount, amounts_match, round_currency};
use crate::notifications::{NotificationQueue, SettlementNotification};
use crate::payments::{
    PaymentGatewayAdapter, PaymentMethod, PaymentPurpose, PaymentRecord, PaymentRecordStatus,
    ReprocessSummary,
};
use crate::reservation::{Participant, Reservation, ReservationStatus};
use crate::wallet::{WalletError, WalletManager};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Scheduler timing and batch sizes
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// How long before game start a reservation is closed
    pub closing_buffer: Duration,
    /// Extra lookahead so a late tick still catches reservations
    pub window_slack: Duration,
    /// Errored webhooks reprocessed per housekeeping pass
    pub reprocess_batch: i64,
    /// How long a closing run holds a reservation before another may retry it
    pub lease: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            closing_buffer: Duration::hours(2),
            window_slack: Duration::minutes(30),
            reprocess_batch: 50,
            lease: Duration::minutes(10),
        }
    }
}

impl SettlementConfig {
    /// Lookahead window for closing candidates
    pub fn window(&self) -> Duration {
        self.closing_buffer + self.window_slack
    }
}

/// Counters of one settlement run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    /// Reservations confirmed in this run
    pub processed: usize,
    /// Reservations that failed and stay pending
    pub errors: usize,
    /// Candidates found
    pub total: usize,
    /// Candidates confirmed or being closed by another run
    pub skipped: usize,
}

/// How a closed reservation was settled
#[derive(Debug, Clone, Serialize)]
pub struct Closure {
    pub reservation_id: Uuid,
    pub organizer_residual: Amount,
    /// Payment that covered the residual; `None` when nothing was owed
    pub residual_payment: Option<PaymentRecord>,
}

/// Result of the per-tick maintenance work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingSummary {
    pub expired_credits: u64,
    pub webhooks: ReprocessSummary,
}

/// Residual the organizer still owes.
///
/// `total` minus what settled participants paid, the organizer's own share
/// row included, minus residual payments already confirmed, floored at zero.
/// Residual records never touch a participant row, so nothing is counted twice.
pub fn organizer_residual(
    total: Amount,
    participants: &[Participant],
    payments: &[PaymentRecord],
) -> Amount {
    let participants_total: Amount = participants
        .iter()
        .filter(|p| p.payment_status.is_settled())
        .map(|p| p.amount_paid)
        .sum();
    let residual_paid: Amount = payments
        .iter()
        .filter(|p| {
            p.purpose == PaymentPurpose::OrganizerResidual && p.status == PaymentRecordStatus::Paid
        })
        .map(|p| p.amount)
        .sum();

    round_currency((total - participants_total - residual_paid).max(Amount::ZERO))
}

/// Closes out pending reservations shortly before their game
pub struct SettlementScheduler {
    store: Arc<dyn SettlementStore>,
    adapter: Arc<PaymentGatewayAdapter>,
    wallets: WalletManager,
    credits: CreditLedger,
    notifications: NotificationQueue,
    config: SettlementConfig,
}

impl SettlementScheduler {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        adapter: Arc<PaymentGatewayAdapter>,
        wallets: WalletManager,
        credits: CreditLedger,
        notifications: NotificationQueue,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            wallets,
            credits,
            notifications,
            config,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Close every pending reservation whose game starts within the window.
    ///
    /// Reservations are processed one at a time; a failure is counted and
    /// leaves that reservation pending for the next run.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SettlementResult<SettlementSummary> {
        let candidates = self
            .store
            .list_closing_candidates(now, now + self.config.window())
            .await?;
        let mut summary = SettlementSummary {
            total: candidates.len(),
            ..SettlementSummary::default()
        };

        for reservation in &candidates {
            match self.close_reservation(reservation).await {
                Ok(closure) => {
                    summary.processed += 1;
                    log::info!(
                        "Reservation {} confirmed {:.1}h before the game, organizer residual {}",
                        closure.reservation_id,
                        reservation.hours_until_game(now),
                        closure.organizer_residual
                    );
                }
                Err(SettlementError::AlreadySettled(id) | SettlementError::SettlementInProgress(id)) => {
                    summary.skipped += 1;
                    log::debug!("Reservation {id} was settled concurrently");
                }
                Err(e) => {
                    summary.errors += 1;
                    log::error!("Failed to settle reservation {}: {e}", reservation.id);
                    self.notifications
                        .notify(SettlementNotification::SettlementFailed {
                            reservation_id: reservation.id,
                            organizer_id: reservation.organizer_id,
                            reason: e.client_message(),
                        });
                }
            }
        }

        if summary.total > 0 {
            log::info!(
                "Settlement run: {} processed, {} errors, {} skipped of {}",
                summary.processed,
                summary.errors,
                summary.skipped,
                summary.total
            );
        }
        Ok(summary)
    }

    /// Close a reservation by id, regardless of the window
    pub async fn close_by_id(&self, reservation_id: Uuid) -> SettlementResult<Closure> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(SettlementError::ReservationNotFound(reservation_id))?;
        self.close_reservation(&reservation).await
    }

    /// Settle the organizer residual and confirm the reservation.
    ///
    /// The reservation is leased first, so two runs never collect the same
    /// residual. The lease is released when closing fails and cleared by the
    /// confirmation otherwise.
    pub async fn close_reservation(&self, reservation: &Reservation) -> SettlementResult<Closure> {
        if reservation.status != ReservationStatus::Pending {
            return Err(SettlementError::AlreadySettled(reservation.id));
        }

        let now = Utc::now();
        if !self
            .store
            .claim_settlement(reservation.id, now, now + self.config.lease)
            .await?
        {
            return match self.store.get_reservation(reservation.id).await? {
                Some(current) if current.status == ReservationStatus::Pending => {
                    Err(SettlementError::SettlementInProgress(reservation.id))
                }
                _ => Err(SettlementError::AlreadySettled(reservation.id)),
            };
        }

        let result = self.settle_claimed(reservation).await;
        if result.is_err() {
            if let Err(e) = self.store.release_settlement(reservation.id).await {
                log::warn!("Failed to release settlement lease of {}: {e}", reservation.id);
            }
        }
        result
    }

    async fn settle_claimed(&self, reservation: &Reservation) -> SettlementResult<Closure> {
        let participants = self.store.list_participants(reservation.id).await?;
        let payments = self.store.list_payments(reservation.id).await?;
        let residual = organizer_residual(reservation.total_price, &participants, &payments);

        let residual_payment = if residual > Amount::ZERO {
            Some(self.collect_residual(reservation, residual, &payments).await?)
        } else {
            None
        };

        if !self.store.confirm_reservation(reservation.id).await? {
            return Err(SettlementError::AlreadySettled(reservation.id));
        }

        self.notifications
            .notify(SettlementNotification::ReservationConfirmed {
                reservation_id: reservation.id,
                organizer_id: reservation.organizer_id,
                organizer_residual: residual,
            });

        Ok(Closure {
            reservation_id: reservation.id,
            organizer_residual: residual,
            residual_payment,
        })
    }

    async fn collect_residual(
        &self,
        reservation: &Reservation,
        residual: Amount,
        payments: &[PaymentRecord],
    ) -> SettlementResult<PaymentRecord> {
        if let Some(in_flight) = payments.iter().find(|p| {
            p.purpose == PaymentPurpose::OrganizerResidual
                && p.method.is_gateway_backed()
                && p.status == PaymentRecordStatus::Pending
        }) {
            return Err(SettlementError::CaptureInFlight(in_flight.id));
        }

        match self.store.find_active_pre_authorization(reservation.id).await? {
            Some(hold) => self.capture_hold(&hold, residual).await,
            None => self.debit_organizer(reservation, residual).await,
        }
    }

    async fn capture_hold(
        &self,
        hold: &PaymentRecord,
        residual: Amount,
    ) -> SettlementResult<PaymentRecord> {
        if residual > hold.amount + AMOUNT_TOLERANCE {
            return Err(SettlementError::CaptureExceedsHold {
                residual,
                held: hold.amount,
            });
        }

        let capture = self
            .adapter
            .capture_authorized(hold, residual)
            .await
            .map_err(SettlementError::CaptureFailed)?;
        if capture.status != PaymentRecordStatus::Paid {
            // Gateway accepted but confirms later through the webhook
            return Err(SettlementError::CaptureInFlight(capture.id));
        }
        Ok(capture)
    }

    async fn debit_organizer(
        &self,
        reservation: &Reservation,
        residual: Amount,
    ) -> SettlementResult<PaymentRecord> {
        match self
            .wallets
            .debit_for_settlement(reservation.organizer_id, reservation.id, residual)
            .await
        {
            Ok(posted) => Ok(posted.payment),
            Err(WalletError::DuplicateTransaction(key)) => {
                // A debit under this key committed together with its record
                let payments = self.store.list_payments(reservation.id).await?;
                payments
                    .into_iter()
                    .find(|p| {
                        p.purpose == PaymentPurpose::OrganizerResidual
                            && p.method == PaymentMethod::Balance
                            && p.status == PaymentRecordStatus::Paid
                            && amounts_match(p.amount, residual)
                    })
                    .ok_or(SettlementError::Wallet(WalletError::DuplicateTransaction(key)))
            }
            Err(WalletError::InsufficientBalance {
                available,
                required,
            }) => Err(SettlementError::InsufficientOrganizerBalance {
                available,
                required,
            }),
            Err(WalletError::WalletNotFound(_)) => {
                Err(SettlementError::InsufficientOrganizerBalance {
                    available: Amount::ZERO,
                    required: residual,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Expire stale credits and retry errored webhooks.
    ///
    /// Failures are logged and never abort the tick.
    pub async fn housekeeping(&self, now: DateTime<Utc>) -> HousekeepingSummary {
        let mut summary = HousekeepingSummary::default();

        match self.credits.expire_stale(now).await {
            Ok(expired) => summary.expired_credits = expired,
            Err(e) => log::error!("Credit expiration failed: {e}"),
        }
        match self.adapter.reprocess_failed(self.config.reprocess_batch).await {
            Ok(webhooks) => summary.webhooks = webhooks,
            Err(e) => log::error!("Webhook reprocessing failed: {e}"),
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::{ParticipantOrigin, PaymentStatus};
    use rust_decimal_macros::dec;

    fn participant(origin: ParticipantOrigin, status: PaymentStatus, paid: Amount) -> Participant {
        let now = Utc::now();
        Participant {
            id: Uuid::new_v4(),
            reservation_id: Uuid::nil(),
            account_id: None,
            name: "p".to_string(),
            email: None,
            phone: None,
            origin,
            split_percentage: None,
            split_fixed: None,
            amount_due: None,
            amount_paid: paid,
            payment_status: status,
            created_at: now,
            updated_at: now,
        }
    }

    fn residual_payment(amount: Amount, status: PaymentRecordStatus) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            id: Uuid::new_v4(),
            reservation_id: Uuid::nil(),
            participant_id: None,
            account_id: None,
            amount,
            method: PaymentMethod::Balance,
            purpose: PaymentPurpose::OrganizerResidual,
            external_id: None,
            status,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_residual_ignores_unsettled_rows() {
        let participants = vec![
            participant(ParticipantOrigin::Roster, PaymentStatus::Paid, dec!(25)),
            participant(ParticipantOrigin::Invite, PaymentStatus::Pending, dec!(10)),
            participant(ParticipantOrigin::Invite, PaymentStatus::Free, dec!(0)),
        ];

        assert_eq!(organizer_residual(dec!(100), &participants, &[]), dec!(75));
    }

    #[test]
    fn test_residual_counts_organizer_share_once() {
        let participants = vec![
            participant(ParticipantOrigin::Organizer, PaymentStatus::Paid, dec!(60)),
            participant(ParticipantOrigin::Roster, PaymentStatus::Paid, dec!(40)),
        ];

        assert_eq!(organizer_residual(dec!(100), &participants, &[]), dec!(0));
    }

    #[test]
    fn test_residual_subtracts_confirmed_residual_payments() {
        let participants = vec![participant(
            ParticipantOrigin::Roster,
            PaymentStatus::Paid,
            dec!(40),
        )];
        let payments = vec![
            residual_payment(dec!(60), PaymentRecordStatus::Paid),
            residual_payment(dec!(60), PaymentRecordStatus::Failed),
        ];

        assert_eq!(organizer_residual(dec!(100), &participants, &payments), dec!(0));
    }

    #[test]
    fn test_residual_never_negative() {
        let participants = vec![participant(
            ParticipantOrigin::Roster,
            PaymentStatus::Paid,
            dec!(120),
        )];

        assert_eq!(organizer_residual(dec!(100), &participants, &[]), dec!(0));
    }

    #[test]
    fn test_default_window_is_two_and_a_half_hours() {
        let config = SettlementConfig::default();
        assert_eq!(config.window(), Duration::minutes(150));
        assert_eq!(config.reprocess_batch, 50);
    }
}
