//! PostgreSQL implementation of the repository traits.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::repository::{
    CreditRepository, InviteRepository, PaymentPosting, PaymentRepository, PostedPayment,
    PostingRepository, ReservationRepository, WalletRepository, WebhookLogRepository,
    WebhookLogUpdate,
};
use super::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_default_timeout, with_timeout};
use crate::credits::{CreditConsumption, CreditEntry, CreditStatus, NewCreditEntry, plan_consumption};
use crate::invites::{Invite, NewInvite};
use crate::money::{Amount, round_currency};
use crate::payments::{
    NewPaymentRecord, PaymentRecord, PaymentRecordStatus, PaymentUpdate, WebhookLogEntry,
    WebhookStatus,
};
use crate::reservation::{
    AccountId, NewParticipant, NewReservation, Participant, PaymentStatus, Reservation,
    ReservationStatus, SplitAssignment, SplitMode,
};
use crate::wallet::{
    BalanceMovement, EntryDirection, Wallet, WalletEntry, WalletError, WalletResult,
};

const RESERVATION_COLUMNS: &str =
    "id, organizer_id, court_id, starts_at, total_price, status, split_mode, created_at, updated_at";

const PARTICIPANT_COLUMNS: &str = "id, reservation_id, account_id, name, email, phone, origin, \
     split_percentage, split_fixed, amount_due, amount_paid, payment_status, created_at, updated_at";

const CREDIT_COLUMNS: &str = "id, account_id, face_value, remaining_value, status, source, \
     expires_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, reservation_id, participant_id, account_id, amount, method, \
     purpose, external_id, status, failure_reason, created_at, updated_at";

const WEBHOOK_COLUMNS: &str = "request_id, gateway, event_type, payment_external_id, \
     signature_valid, status, attempts, error, processing_ms, payload, received_at, updated_at";

const WALLET_ENTRY_COLUMNS: &str = "id, account_id, reservation_id, amount, balance_after, \
     direction, entry_type, idempotency_key, description, created_at";

const INVITE_COLUMNS: &str =
    "id, token, reservation_id, price_per_person, max_uses, uses, expires_at, created_at";

fn reservation_from_row(row: &PgRow) -> StoreResult<Reservation> {
    Ok(Reservation {
        id: row.get("id"),
        organizer_id: row.get("organizer_id"),
        court_id: row.get("court_id"),
        starts_at: row.get("starts_at"),
        total_price: row.get("total_price"),
        status: row.get::<String, _>("status").parse()?,
        split_mode: row.get::<String, _>("split_mode").parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn participant_from_row(row: &PgRow) -> StoreResult<Participant> {
    Ok(Participant {
        id: row.get("id"),
        reservation_id: row.get("reservation_id"),
        account_id: row.get("account_id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        origin: row.get::<String, _>("origin").parse()?,
        split_percentage: row.get("split_percentage"),
        split_fixed: row.get("split_fixed"),
        amount_due: row.get("amount_due"),
        amount_paid: row.get("amount_paid"),
        payment_status: row.get::<String, _>("payment_status").parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn credit_from_row(row: &PgRow) -> StoreResult<CreditEntry> {
    Ok(CreditEntry {
        id: row.get("id"),
        account_id: row.get("account_id"),
        face_value: row.get("face_value"),
        remaining_value: row.get("remaining_value"),
        status: row.get::<String, _>("status").parse()?,
        source: row.get::<String, _>("source").parse()?,
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<PaymentRecord> {
    Ok(PaymentRecord {
        id: row.get("id"),
        reservation_id: row.get("reservation_id"),
        participant_id: row.get("participant_id"),
        account_id: row.get("account_id"),
        amount: row.get("amount"),
        method: row.get::<String, _>("method").parse()?,
        purpose: row.get::<String, _>("purpose").parse()?,
        external_id: row.get("external_id"),
        status: row.get::<String, _>("status").parse()?,
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn webhook_from_row(row: &PgRow) -> StoreResult<WebhookLogEntry> {
    Ok(WebhookLogEntry {
        request_id: row.get("request_id"),
        gateway: row.get("gateway"),
        event_type: row.get("event_type"),
        payment_external_id: row.get("payment_external_id"),
        signature_valid: row.get("signature_valid"),
        status: row.get::<String, _>("status").parse()?,
        attempts: row.get("attempts"),
        error: row.get("error"),
        processing_ms: row.get("processing_ms"),
        payload: row.get("payload"),
        received_at: row.get("received_at"),
        updated_at: row.get("updated_at"),
    })
}

fn wallet_entry_from_row(row: &PgRow) -> StoreResult<WalletEntry> {
    Ok(WalletEntry {
        id: row.get("id"),
        account_id: row.get("account_id"),
        reservation_id: row.get("reservation_id"),
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        direction: row.get::<String, _>("direction").parse()?,
        entry_type: row.get::<String, _>("entry_type").parse()?,
        idempotency_key: row.get("idempotency_key"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

fn invite_from_row(row: &PgRow) -> Invite {
    Invite {
        id: row.get("id"),
        token: row.get("token"),
        reservation_id: row.get("reservation_id"),
        price_per_person: row.get("price_per_person"),
        max_uses: row.get("max_uses"),
        uses: row.get("uses"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Repository backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn lock_participant(
        tx: &mut Transaction<'_, Postgres>,
        participant_id: Uuid,
    ) -> StoreResult<Participant> {
        let row = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1 FOR UPDATE"
        ))
        .bind(participant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::not_found("participant", participant_id))?;

        participant_from_row(&row)
    }

    /// Lock a participant a posting pays into; settled participants are refused
    async fn lock_posting_target(
        tx: &mut Transaction<'_, Postgres>,
        participant_id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<Participant> {
        let current = Self::lock_participant(tx, participant_id).await?;
        if current.payment_status.is_settled()
            || !current.payment_status.can_transition_to(status)
        {
            return Err(StoreError::invalid_transition(
                "participant payment",
                current.payment_status,
                status,
            ));
        }
        Ok(current)
    }

    /// Lock the participant, check the move to `status` and add `paid_delta`
    async fn settle_participant(
        tx: &mut Transaction<'_, Postgres>,
        participant_id: Uuid,
        status: PaymentStatus,
        paid_delta: Amount,
    ) -> StoreResult<Participant> {
        let current = Self::lock_participant(tx, participant_id).await?;

        if !current.payment_status.can_transition_to(status) {
            return Err(StoreError::invalid_transition(
                "participant payment",
                current.payment_status,
                status,
            ));
        }

        let amount_paid = round_currency(current.amount_paid + paid_delta);
        Self::store_participant_payment(tx, participant_id, status, amount_paid).await
    }

    async fn store_participant_payment(
        tx: &mut Transaction<'_, Postgres>,
        participant_id: Uuid,
        status: PaymentStatus,
        amount_paid: Amount,
    ) -> StoreResult<Participant> {
        let row = sqlx::query(&format!(
            "UPDATE participants
             SET payment_status = $1, amount_paid = $2, updated_at = NOW()
             WHERE id = $3
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(amount_paid)
        .bind(participant_id)
        .fetch_one(&mut **tx)
        .await?;

        participant_from_row(&row)
    }

    async fn insert_participant(
        tx: &mut Transaction<'_, Postgres>,
        participant: NewParticipant,
    ) -> StoreResult<Participant> {
        let row = sqlx::query(&format!(
            "INSERT INTO participants
                (id, reservation_id, account_id, name, email, phone, origin, amount_due, amount_paid, payment_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9)
             RETURNING {PARTICIPANT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(participant.reservation_id)
        .bind(participant.account_id)
        .bind(&participant.name)
        .bind(&participant.email)
        .bind(&participant.phone)
        .bind(participant.origin.as_str())
        .bind(participant.amount_due.map(round_currency))
        .bind(participant.payment_status.as_str())
        .fetch_one(&mut **tx)
        .await?;

        participant_from_row(&row)
    }

    async fn insert_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment: &NewPaymentRecord,
    ) -> StoreResult<PaymentRecord> {
        let result = sqlx::query(&format!(
            "INSERT INTO payment_records
                (id, reservation_id, participant_id, account_id, amount, method, purpose, external_id, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(payment.reservation_id)
        .bind(payment.participant_id)
        .bind(payment.account_id)
        .bind(round_currency(payment.amount))
        .bind(payment.method.as_str())
        .bind(payment.purpose.as_str())
        .bind(&payment.external_id)
        .bind(payment.status.as_str())
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => payment_from_row(&row),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "payment for reservation {} conflicts with an existing {} record",
                payment.reservation_id, payment.purpose
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Spendable credits for `account_id`, locked in consumption order
    async fn lock_spendable_credits(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<CreditEntry>> {
        // Concurrent consumers queue behind these row locks
        let rows = sqlx::query(&format!(
            "SELECT {CREDIT_COLUMNS} FROM credit_entries
             WHERE account_id = $1 AND status = 'active' AND expires_at > $2 AND remaining_value > 0
             ORDER BY expires_at, created_at, id
             FOR UPDATE"
        ))
        .bind(account_id)
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;

        rows.iter().map(credit_from_row).collect()
    }

    async fn store_consumption(
        tx: &mut Transaction<'_, Postgres>,
        consumption: &CreditConsumption,
    ) -> StoreResult<()> {
        for allocation in &consumption.allocations {
            let status = if allocation.exhausted {
                CreditStatus::Used
            } else {
                CreditStatus::Active
            };
            sqlx::query(
                "UPDATE credit_entries
                 SET remaining_value = $1, status = $2, updated_at = NOW()
                 WHERE id = $3",
            )
            .bind(allocation.remaining_after)
            .bind(status.as_str())
            .bind(allocation.entry_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Debit inside `tx`, refusing to overdraw
    async fn debit(
        tx: &mut Transaction<'_, Postgres>,
        movement: BalanceMovement,
    ) -> WalletResult<WalletEntry> {
        let amount = round_currency(movement.amount);
        if amount <= Amount::ZERO {
            return Err(WalletError::InvalidAmount(movement.amount));
        }

        Self::ensure_unused_key(tx, &movement.idempotency_key).await?;

        // Check and update in one statement so concurrent debits cannot overdraw
        let wallet_result = sqlx::query(
            "UPDATE wallets
             SET balance = balance - $1, updated_at = NOW()
             WHERE account_id = $2 AND balance >= $1
             RETURNING balance",
        )
        .bind(amount)
        .bind(movement.account_id)
        .fetch_optional(&mut **tx)
        .await?;

        let balance_after: Amount = match wallet_result {
            Some(row) => row.get("balance"),
            None => {
                let check_wallet = sqlx::query("SELECT balance FROM wallets WHERE account_id = $1")
                    .bind(movement.account_id)
                    .fetch_optional(&mut **tx)
                    .await?;

                return match check_wallet {
                    Some(row) => Err(WalletError::InsufficientBalance {
                        available: row.get("balance"),
                        required: amount,
                    }),
                    None => Err(WalletError::WalletNotFound(movement.account_id)),
                };
            }
        };

        Self::create_wallet_entry(tx, movement, -amount, balance_after, EntryDirection::Debit)
            .await
    }

    async fn ensure_unused_key(
        tx: &mut Transaction<'_, Postgres>,
        idempotency_key: &str,
    ) -> WalletResult<()> {
        let existing = sqlx::query("SELECT id FROM wallet_entries WHERE idempotency_key = $1")
            .bind(idempotency_key)
            .fetch_optional(&mut **tx)
            .await?;

        if existing.is_some() {
            return Err(WalletError::DuplicateTransaction(idempotency_key.to_string()));
        }
        Ok(())
    }

    /// Create a wallet entry
    async fn create_wallet_entry(
        tx: &mut Transaction<'_, Postgres>,
        movement: BalanceMovement,
        signed_amount: Amount,
        balance_after: Amount,
        direction: EntryDirection,
    ) -> WalletResult<WalletEntry> {
        let row = sqlx::query(&format!(
            "INSERT INTO wallet_entries
                (id, account_id, reservation_id, amount, balance_after, direction, entry_type, idempotency_key, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {WALLET_ENTRY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(movement.account_id)
        .bind(movement.reservation_id)
        .bind(signed_amount)
        .bind(balance_after)
        .bind(direction.to_string())
        .bind(movement.entry_type.to_string())
        .bind(&movement.idempotency_key)
        .bind(&movement.description)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                WalletError::DuplicateTransaction(movement.idempotency_key.clone())
            } else {
                WalletError::from(e)
            }
        })?;

        Ok(wallet_entry_from_row(&row)?)
    }
}

#[async_trait]
impl ReservationRepository for PgStore {
    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "INSERT INTO reservations (id, organizer_id, court_id, starts_at, total_price)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {RESERVATION_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(reservation.organizer_id)
            .bind(reservation.court_id)
            .bind(reservation.starts_at)
            .bind(round_currency(reservation.total_price))
            .fetch_one(self.pool.as_ref()),
        )
        .await?;

        reservation_from_row(&row)
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
            ))
            .bind(reservation_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn list_closing_candidates(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations
                 WHERE status = 'pending' AND starts_at > $1 AND starts_at <= $2
                 ORDER BY starts_at, created_at"
            ))
            .bind(after)
            .bind(until)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(reservation_from_row).collect()
    }

    async fn add_participant(&self, participant: NewParticipant) -> StoreResult<Participant> {
        let mut tx = self.pool.begin().await?;
        let participant = Self::insert_participant(&mut tx, participant).await?;
        tx.commit().await?;
        Ok(participant)
    }

    async fn get_participant(&self, participant_id: Uuid) -> StoreResult<Option<Participant>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1"
            ))
            .bind(participant_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(participant_from_row).transpose()
    }

    async fn list_participants(&self, reservation_id: Uuid) -> StoreResult<Vec<Participant>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE reservation_id = $1
                 ORDER BY created_at, id"
            ))
            .bind(reservation_id)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(participant_from_row).collect()
    }

    async fn apply_split(
        &self,
        reservation_id: Uuid,
        mode: SplitMode,
        assignments: &[SplitAssignment],
    ) -> StoreResult<Vec<Participant>> {
        with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query("SELECT status FROM reservations WHERE id = $1 FOR UPDATE")
                .bind(reservation_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::not_found("reservation", reservation_id))?;
            let status: ReservationStatus = row.get::<String, _>("status").parse()?;
            if status != ReservationStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "reservation {reservation_id} is {status}"
                )));
            }

            for assignment in assignments {
                let updated = sqlx::query(
                    "UPDATE participants
                     SET split_percentage = $1, split_fixed = $2, amount_due = $3, updated_at = NOW()
                     WHERE id = $4 AND reservation_id = $5",
                )
                .bind(assignment.split_percentage)
                .bind(assignment.split_fixed)
                .bind(assignment.amount_due)
                .bind(assignment.participant_id)
                .bind(reservation_id)
                .execute(&mut *tx)
                .await?;

                // Dropping the transaction rolls back earlier assignments
                if updated.rows_affected() == 0 {
                    return Err(StoreError::not_found(
                        "participant",
                        assignment.participant_id,
                    ));
                }
            }

            sqlx::query("UPDATE reservations SET split_mode = $1, updated_at = NOW() WHERE id = $2")
                .bind(mode.as_str())
                .bind(reservation_id)
                .execute(&mut *tx)
                .await?;

            let rows = sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE reservation_id = $1
                 ORDER BY created_at, id"
            ))
            .bind(reservation_id)
            .fetch_all(&mut *tx)
            .await?;
            let participants = rows
                .iter()
                .map(participant_from_row)
                .collect::<StoreResult<Vec<_>>>()?;

            tx.commit().await?;
            Ok::<_, StoreError>(participants)
        })
        .await
    }

    async fn apply_participant_payment(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
        paid_delta: Amount,
    ) -> StoreResult<Participant> {
        let mut tx = self.pool.begin().await?;
        let participant = Self::settle_participant(&mut tx, participant_id, status, paid_delta).await?;
        tx.commit().await?;
        Ok(participant)
    }

    async fn refund_participant_payment(
        &self,
        participant_id: Uuid,
        amount: Amount,
    ) -> StoreResult<Participant> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_participant(&mut tx, participant_id).await?;

        if !current.payment_status.can_refund() {
            return Err(StoreError::invalid_transition(
                "participant payment",
                current.payment_status,
                PaymentStatus::Pending,
            ));
        }

        let amount_paid = round_currency((current.amount_paid - amount).max(Amount::ZERO));
        let participant = Self::store_participant_payment(
            &mut tx,
            participant_id,
            PaymentStatus::Pending,
            amount_paid,
        )
        .await?;
        tx.commit().await?;
        Ok(participant)
    }

    async fn confirm_reservation(&self, reservation_id: Uuid) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE reservations
                 SET status = 'confirmed', settlement_claimed_until = NULL, updated_at = NOW()
                 WHERE id = $1 AND status = 'pending'",
            )
            .bind(reservation_id)
            .execute(self.pool.as_ref()),
        )
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_reservation(reservation_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("reservation", reservation_id)),
        }
    }

    async fn claim_settlement(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE reservations
                 SET settlement_claimed_until = $3, updated_at = NOW()
                 WHERE id = $1 AND status = 'pending'
                   AND (settlement_claimed_until IS NULL OR settlement_claimed_until <= $2)",
            )
            .bind(reservation_id)
            .bind(now)
            .bind(until)
            .execute(self.pool.as_ref()),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_settlement(&self, reservation_id: Uuid) -> StoreResult<()> {
        with_default_timeout(
            sqlx::query(
                "UPDATE reservations SET settlement_claimed_until = NULL WHERE id = $1",
            )
            .bind(reservation_id)
            .execute(self.pool.as_ref()),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CreditRepository for PgStore {
    async fn grant_credit(&self, credit: NewCreditEntry) -> StoreResult<CreditEntry> {
        let value = round_currency(credit.value);
        let row = with_default_timeout(
            sqlx::query(&format!(
                "INSERT INTO credit_entries (id, account_id, face_value, remaining_value, source, expires_at)
                 VALUES ($1, $2, $3, $3, $4, $5)
                 RETURNING {CREDIT_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(credit.account_id)
            .bind(value)
            .bind(credit.source.as_str())
            .bind(credit.expires_at)
            .fetch_one(self.pool.as_ref()),
        )
        .await?;

        credit_from_row(&row)
    }

    async fn list_credits(&self, account_id: AccountId) -> StoreResult<Vec<CreditEntry>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {CREDIT_COLUMNS} FROM credit_entries
                 WHERE account_id = $1
                 ORDER BY expires_at, created_at, id"
            ))
            .bind(account_id)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(credit_from_row).collect()
    }

    async fn expire_credits(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE credit_entries
                 SET status = 'expired', updated_at = NOW()
                 WHERE status = 'active' AND expires_at <= $1",
            )
            .bind(now)
            .execute(self.pool.as_ref()),
        )
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn create_payment(&self, payment: NewPaymentRecord) -> StoreResult<PaymentRecord> {
        with_default_timeout(async {
            let mut tx = self.pool.begin().await?;
            let record = Self::insert_payment(&mut tx, &payment).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(record)
        })
        .await
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE id = $1"
            ))
            .bind(payment_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<PaymentRecord>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE external_id = $1"
            ))
            .bind(external_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        update: PaymentUpdate,
    ) -> StoreResult<PaymentRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM payment_records WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("payment", payment_id))?;
        let current: PaymentRecordStatus = row.get::<String, _>("status").parse()?;

        if !current.can_transition_to(update.status) {
            return Err(StoreError::invalid_transition(
                "payment",
                current,
                update.status,
            ));
        }

        let row = sqlx::query(&format!(
            "UPDATE payment_records
             SET status = $1,
                 external_id = COALESCE($2, external_id),
                 failure_reason = COALESCE($3, failure_reason),
                 updated_at = NOW()
             WHERE id = $4
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(update.status.as_str())
        .bind(&update.external_id)
        .bind(&update.failure_reason)
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        payment_from_row(&row)
    }

    async fn find_active_pre_authorization(
        &self,
        reservation_id: Uuid,
    ) -> StoreResult<Option<PaymentRecord>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payment_records
                 WHERE reservation_id = $1
                   AND purpose = 'pre_authorization'
                   AND status IN ('pending', 'authorized')"
            ))
            .bind(reservation_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_payments(&self, reservation_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payment_records
                 WHERE reservation_id = $1
                 ORDER BY created_at, id"
            ))
            .bind(reservation_id)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(payment_from_row).collect()
    }
}

#[async_trait]
impl PostingRepository for PgStore {
    async fn post_balance_payment(
        &self,
        movement: BalanceMovement,
        posting: PaymentPosting,
    ) -> WalletResult<PostedPayment> {
        let mut tx = self.pool.begin().await?;

        // Lock the participant first so a refused transition leaves no debit
        if let Some(participant_id) = posting.participant_id {
            Self::lock_posting_target(&mut tx, participant_id, PaymentStatus::Paid).await?;
        }

        let entry = Self::debit(&mut tx, movement).await?;
        let payment = Self::insert_payment(&mut tx, &posting.record(-entry.amount)).await?;
        let participant = match posting.participant_id {
            Some(id) => Some(
                Self::settle_participant(&mut tx, id, PaymentStatus::Paid, payment.amount).await?,
            ),
            None => None,
        };

        tx.commit().await?;
        Ok(PostedPayment {
            payment,
            participant,
        })
    }

    async fn post_credit_payment(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
        posting: PaymentPosting,
    ) -> StoreResult<(CreditConsumption, Option<PostedPayment>)> {
        with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;
            let entries = Self::lock_spendable_credits(&mut tx, posting.account_id, now).await?;
            let consumption = plan_consumption(&entries, amount, now);
            if consumption.applied == Amount::ZERO {
                return Ok::<_, StoreError>((consumption, None));
            }

            let status = if consumption.is_fully_covered() {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Pending
            };
            let participant = match posting.participant_id {
                Some(id) => {
                    Self::lock_posting_target(&mut tx, id, status).await?;
                    Some(Self::settle_participant(&mut tx, id, status, consumption.applied).await?)
                }
                None => None,
            };
            Self::store_consumption(&mut tx, &consumption).await?;
            let payment = Self::insert_payment(&mut tx, &posting.record(consumption.applied)).await?;

            tx.commit().await?;
            Ok((
                consumption,
                Some(PostedPayment {
                    payment,
                    participant,
                }),
            ))
        })
        .await
    }
}

#[async_trait]
impl WebhookLogRepository for PgStore {
    async fn record_webhook_received(
        &self,
        request_id: &str,
        gateway: &str,
        payload: &str,
    ) -> StoreResult<WebhookLogEntry> {
        // Re-deliveries keep status and updated_at so a live claim is not refreshed
        let row = with_default_timeout(
            sqlx::query(&format!(
                "INSERT INTO webhook_logs (request_id, gateway, payload, status, attempts)
                 VALUES ($1, $2, $3, 'received', 1)
                 ON CONFLICT (request_id)
                 DO UPDATE SET attempts = webhook_logs.attempts + 1
                 RETURNING {WEBHOOK_COLUMNS}"
            ))
            .bind(request_id)
            .bind(gateway)
            .bind(payload)
            .fetch_one(self.pool.as_ref()),
        )
        .await?;

        webhook_from_row(&row)
    }

    async fn claim_webhook(
        &self,
        request_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE webhook_logs
                 SET status = 'processing', updated_at = NOW()
                 WHERE request_id = $1
                   AND (status NOT IN ('success', 'processing')
                        OR (status = 'processing' AND updated_at < $2))",
            )
            .bind(request_id)
            .bind(stale_before)
            .execute(self.pool.as_ref()),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_webhook(
        &self,
        request_id: &str,
        update: WebhookLogUpdate,
    ) -> StoreResult<WebhookLogEntry> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "UPDATE webhook_logs
                 SET status = $1,
                     event_type = COALESCE($2, event_type),
                     payment_external_id = COALESCE($3, payment_external_id),
                     signature_valid = COALESCE($4, signature_valid),
                     error = COALESCE($5, error),
                     processing_ms = COALESCE($6, processing_ms),
                     updated_at = NOW()
                 WHERE request_id = $7
                 RETURNING {WEBHOOK_COLUMNS}"
            ))
            .bind(update.status.as_str())
            .bind(&update.event_type)
            .bind(&update.payment_external_id)
            .bind(update.signature_valid)
            .bind(&update.error)
            .bind(update.processing_ms)
            .bind(request_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?
        .ok_or_else(|| StoreError::not_found("webhook", request_id))?;

        webhook_from_row(&row)
    }

    async fn get_webhook(&self, request_id: &str) -> StoreResult<Option<WebhookLogEntry>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {WEBHOOK_COLUMNS} FROM webhook_logs WHERE request_id = $1"
            ))
            .bind(request_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn list_webhooks_by_status(
        &self,
        status: WebhookStatus,
        limit: i64,
    ) -> StoreResult<Vec<WebhookLogEntry>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {WEBHOOK_COLUMNS} FROM webhook_logs
                 WHERE status = $1
                 ORDER BY received_at
                 LIMIT $2"
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(webhook_from_row).collect()
    }
}

#[async_trait]
impl WalletRepository for PgStore {
    async fn get_wallet(&self, account_id: AccountId) -> WalletResult<Wallet> {
        let row = sqlx::query(
            r#"
            SELECT account_id, balance, created_at, updated_at
            FROM wallets
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(WalletError::WalletNotFound(account_id))?;

        Ok(Wallet {
            account_id: row.get("account_id"),
            balance: row.get("balance"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn credit_wallet(&self, movement: BalanceMovement) -> WalletResult<WalletEntry> {
        let amount = round_currency(movement.amount);
        if amount <= Amount::ZERO {
            return Err(WalletError::InvalidAmount(movement.amount));
        }

        let mut tx = self.pool.begin().await?;
        Self::ensure_unused_key(&mut tx, &movement.idempotency_key).await?;

        let row = sqlx::query(
            "INSERT INTO wallets (account_id, balance, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (account_id)
             DO UPDATE SET
                balance = wallets.balance + EXCLUDED.balance,
                updated_at = NOW()
             RETURNING balance",
        )
        .bind(movement.account_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;
        let balance_after: Amount = row.get("balance");

        let entry = Self::create_wallet_entry(
            &mut tx,
            movement,
            amount,
            balance_after,
            EntryDirection::Credit,
        )
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn wallet_entries(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> WalletResult<Vec<WalletEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_ENTRY_COLUMNS} FROM wallet_entries
             WHERE account_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .iter()
            .map(wallet_entry_from_row)
            .collect::<StoreResult<Vec<_>>>()?)
    }
}

#[async_trait]
impl InviteRepository for PgStore {
    async fn create_invite(&self, invite: NewInvite) -> StoreResult<Invite> {
        let result = with_default_timeout(
            sqlx::query(&format!(
                "INSERT INTO invites (id, token, reservation_id, price_per_person, max_uses, expires_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING {INVITE_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(&invite.token)
            .bind(invite.reservation_id)
            .bind(round_currency(invite.price_per_person))
            .bind(invite.max_uses)
            .bind(invite.expires_at)
            .fetch_one(self.pool.as_ref()),
        )
        .await;

        match result {
            Ok(row) => Ok(invite_from_row(&row)),
            Err(StoreError::Database(e)) if is_unique_violation(&e) => Err(StoreError::Conflict(
                format!("invite token {} already exists", invite.token),
            )),
            Err(e) => Err(e),
        }
    }

    async fn find_invite_by_token(&self, token: &str) -> StoreResult<Option<Invite>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {INVITE_COLUMNS} FROM invites WHERE token = $1"
            ))
            .bind(token)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        Ok(row.as_ref().map(invite_from_row))
    }

    async fn accept_invite(
        &self,
        invite_id: Uuid,
        participant: NewParticipant,
    ) -> StoreResult<Participant> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE invites
             SET uses = uses + 1
             WHERE id = $1 AND (max_uses IS NULL OR uses < max_uses)",
        )
        .bind(invite_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let exists = sqlx::query("SELECT id FROM invites WHERE id = $1")
                .bind(invite_id)
                .fetch_optional(&mut *tx)
                .await?;
            return match exists {
                Some(_) => Err(StoreError::Conflict(format!("invite {invite_id} is exhausted"))),
                None => Err(StoreError::not_found("invite", invite_id)),
            };
        }

        let participant = Self::insert_participant(&mut tx, participant).await?;
        tx.commit().await?;
        Ok(participant)
    }
}
