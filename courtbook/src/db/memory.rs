//! In-process store used by tests and local runs without PostgreSQL.
//!
//! All state sits behind one async mutex, so every trait method is atomic
//! with respect to the others, mirroring the row locks and conditional
//! updates of [`PgStore`](super::PgStore).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::repository::{
    CreditRepository, InviteRepository, PaymentPosting, PaymentRepository, PostedPayment,
    PostingRepository, ReservationRepository, WalletRepository, WebhookLogRepository,
    WebhookLogUpdate,
};
use crate::credits::{CreditConsumption, CreditEntry, CreditStatus, NewCreditEntry, plan_consumption};
use crate::invites::{Invite, NewInvite};
use crate::money::{Amount, round_currency};
use crate::payments::{
    NewPaymentRecord, PaymentPurpose, PaymentRecord, PaymentRecordStatus, PaymentUpdate,
    WebhookLogEntry, WebhookStatus,
};
use crate::reservation::{
    AccountId, NewParticipant, NewReservation, Participant, PaymentStatus, Reservation,
    ReservationStatus, SplitAssignment, SplitMode,
};
use crate::wallet::{
    BalanceMovement, EntryDirection, Wallet, WalletEntry, WalletError, WalletResult,
};

#[derive(Default)]
struct MemoryState {
    reservations: HashMap<Uuid, Reservation>,
    participants: Vec<Participant>,
    credits: Vec<CreditEntry>,
    payments: Vec<PaymentRecord>,
    webhooks: Vec<WebhookLogEntry>,
    wallets: HashMap<AccountId, Wallet>,
    wallet_entries: Vec<WalletEntry>,
    invites: Vec<Invite>,
    settlement_leases: HashMap<Uuid, DateTime<Utc>>,
}

impl MemoryState {
    fn participant_mut(&mut self, participant_id: Uuid) -> StoreResult<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| StoreError::not_found("participant", participant_id))
    }

    fn webhook_mut(&mut self, request_id: &str) -> StoreResult<&mut WebhookLogEntry> {
        self.webhooks
            .iter_mut()
            .find(|w| w.request_id == request_id)
            .ok_or_else(|| StoreError::not_found("webhook", request_id))
    }

    fn insert_participant(&mut self, participant: NewParticipant) -> StoreResult<Participant> {
        if !self.reservations.contains_key(&participant.reservation_id) {
            return Err(StoreError::not_found(
                "reservation",
                participant.reservation_id,
            ));
        }

        let now = Utc::now();
        let participant = Participant {
            id: Uuid::new_v4(),
            reservation_id: participant.reservation_id,
            account_id: participant.account_id,
            name: participant.name,
            email: participant.email,
            phone: participant.phone,
            origin: participant.origin,
            split_percentage: None,
            split_fixed: None,
            amount_due: participant.amount_due.map(round_currency),
            amount_paid: round_currency(Amount::ZERO),
            payment_status: participant.payment_status,
            created_at: now,
            updated_at: now,
        };
        self.participants.push(participant.clone());
        Ok(participant)
    }

    fn push_wallet_entry(
        &mut self,
        movement: BalanceMovement,
        signed_amount: Amount,
        balance_after: Amount,
        direction: EntryDirection,
    ) -> WalletEntry {
        let entry = WalletEntry {
            id: Uuid::new_v4(),
            account_id: movement.account_id,
            reservation_id: movement.reservation_id,
            amount: signed_amount,
            balance_after,
            direction,
            entry_type: movement.entry_type,
            idempotency_key: movement.idempotency_key,
            description: movement.description,
            created_at: Utc::now(),
        };
        self.wallet_entries.push(entry.clone());
        entry
    }

    fn check_idempotency(&self, key: &str) -> WalletResult<()> {
        if self.wallet_entries.iter().any(|e| e.idempotency_key == key) {
            return Err(WalletError::DuplicateTransaction(key.to_string()));
        }
        Ok(())
    }

    fn check_participant_transition(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<()> {
        let participant = self
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| StoreError::not_found("participant", participant_id))?;
        if !participant.payment_status.can_transition_to(status) {
            return Err(StoreError::invalid_transition(
                "participant payment",
                participant.payment_status,
                status,
            ));
        }
        Ok(())
    }

    /// A posting may only pay into a participant that is not settled yet
    fn check_posting_target(&self, participant_id: Uuid, status: PaymentStatus) -> StoreResult<()> {
        let current = self
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .map(|p| p.payment_status)
            .ok_or_else(|| StoreError::not_found("participant", participant_id))?;
        if current.is_settled() {
            return Err(StoreError::invalid_transition(
                "participant payment",
                current,
                status,
            ));
        }
        self.check_participant_transition(participant_id, status)
    }

    fn apply_participant_payment(
        &mut self,
        participant_id: Uuid,
        status: PaymentStatus,
        paid_delta: Amount,
    ) -> StoreResult<Participant> {
        self.check_participant_transition(participant_id, status)?;
        let participant = self.participant_mut(participant_id)?;
        participant.payment_status = status;
        participant.amount_paid = round_currency(participant.amount_paid + paid_delta);
        participant.updated_at = Utc::now();
        Ok(participant.clone())
    }

    fn check_new_payment(&self, payment: &NewPaymentRecord) -> StoreResult<()> {
        if payment.purpose == PaymentPurpose::PreAuthorization
            && matches!(
                payment.status,
                PaymentRecordStatus::Pending | PaymentRecordStatus::Authorized
            )
            && self.payments.iter().any(|p| {
                p.reservation_id == payment.reservation_id && is_active_pre_authorization(p)
            })
        {
            return Err(StoreError::Conflict(format!(
                "reservation {} already has an active pre-authorization",
                payment.reservation_id
            )));
        }

        if let Some(external_id) = &payment.external_id {
            if self
                .payments
                .iter()
                .any(|p| p.external_id.as_deref() == Some(external_id.as_str()))
            {
                return Err(StoreError::Conflict(format!(
                    "external id {external_id} already recorded"
                )));
            }
        }
        Ok(())
    }

    fn insert_payment(&mut self, payment: NewPaymentRecord) -> StoreResult<PaymentRecord> {
        self.check_new_payment(&payment)?;

        let now = Utc::now();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            reservation_id: payment.reservation_id,
            participant_id: payment.participant_id,
            account_id: payment.account_id,
            amount: round_currency(payment.amount),
            method: payment.method,
            purpose: payment.purpose,
            external_id: payment.external_id,
            status: payment.status,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.payments.push(record.clone());
        Ok(record)
    }

    fn debit(&mut self, movement: BalanceMovement) -> WalletResult<WalletEntry> {
        let amount = round_currency(movement.amount);
        if amount <= Amount::ZERO {
            return Err(WalletError::InvalidAmount(movement.amount));
        }
        self.check_idempotency(&movement.idempotency_key)?;

        let wallet = self
            .wallets
            .get_mut(&movement.account_id)
            .ok_or(WalletError::WalletNotFound(movement.account_id))?;
        if wallet.balance < amount {
            return Err(WalletError::InsufficientBalance {
                available: wallet.balance,
                required: amount,
            });
        }
        wallet.balance = round_currency(wallet.balance - amount);
        wallet.updated_at = Utc::now();
        let balance_after = wallet.balance;

        Ok(self.push_wallet_entry(movement, -amount, balance_after, EntryDirection::Debit))
    }

    fn plan_credits(
        &self,
        account_id: AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> CreditConsumption {
        let spendable: Vec<CreditEntry> = self
            .credits
            .iter()
            .filter(|c| c.account_id == account_id && c.is_spendable(now))
            .cloned()
            .collect();
        plan_consumption(&spendable, amount, now)
    }

    fn apply_consumption(&mut self, consumption: &CreditConsumption, now: DateTime<Utc>) {
        for allocation in &consumption.allocations {
            if let Some(entry) = self.credits.iter_mut().find(|c| c.id == allocation.entry_id) {
                entry.remaining_value = allocation.remaining_after;
                if allocation.exhausted {
                    entry.status = CreditStatus::Used;
                }
                entry.updated_at = now;
            }
        }
    }
}

/// Store keeping every table in memory
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationRepository for InMemoryStore {
    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation> {
        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            organizer_id: reservation.organizer_id,
            court_id: reservation.court_id,
            starts_at: reservation.starts_at,
            total_price: round_currency(reservation.total_price),
            status: ReservationStatus::Pending,
            split_mode: SplitMode::None,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock().await;
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.get(&reservation_id).cloned())
    }

    async fn list_closing_candidates(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Pending && r.starts_at > after && r.starts_at <= until
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|r| (r.starts_at, r.created_at));
        Ok(candidates)
    }

    async fn add_participant(&self, participant: NewParticipant) -> StoreResult<Participant> {
        let mut state = self.state.lock().await;
        state.insert_participant(participant)
    }

    async fn get_participant(&self, participant_id: Uuid) -> StoreResult<Option<Participant>> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned())
    }

    async fn list_participants(&self, reservation_id: Uuid) -> StoreResult<Vec<Participant>> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn apply_split(
        &self,
        reservation_id: Uuid,
        mode: SplitMode,
        assignments: &[SplitAssignment],
    ) -> StoreResult<Vec<Participant>> {
        let mut state = self.state.lock().await;

        let reservation = state
            .reservations
            .get(&reservation_id)
            .ok_or_else(|| StoreError::not_found("reservation", reservation_id))?;
        if reservation.status != ReservationStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "reservation {reservation_id} is {}",
                reservation.status
            )));
        }

        // Validate every target before touching anything
        for assignment in assignments {
            let belongs = state
                .participants
                .iter()
                .any(|p| p.id == assignment.participant_id && p.reservation_id == reservation_id);
            if !belongs {
                return Err(StoreError::not_found("participant", assignment.participant_id));
            }
        }

        let now = Utc::now();
        for assignment in assignments {
            let participant = state.participant_mut(assignment.participant_id)?;
            participant.split_percentage = assignment.split_percentage;
            participant.split_fixed = assignment.split_fixed;
            participant.amount_due = assignment.amount_due;
            participant.updated_at = now;
        }

        if let Some(reservation) = state.reservations.get_mut(&reservation_id) {
            reservation.split_mode = mode;
            reservation.updated_at = now;
        }

        Ok(state
            .participants
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn apply_participant_payment(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
        paid_delta: Amount,
    ) -> StoreResult<Participant> {
        let mut state = self.state.lock().await;
        state.apply_participant_payment(participant_id, status, paid_delta)
    }

    async fn refund_participant_payment(
        &self,
        participant_id: Uuid,
        amount: Amount,
    ) -> StoreResult<Participant> {
        let mut state = self.state.lock().await;
        let participant = state.participant_mut(participant_id)?;

        if !participant.payment_status.can_refund() {
            return Err(StoreError::invalid_transition(
                "participant payment",
                participant.payment_status,
                PaymentStatus::Pending,
            ));
        }

        participant.amount_paid = round_currency((participant.amount_paid - amount).max(Amount::ZERO));
        participant.payment_status = PaymentStatus::Pending;
        participant.updated_at = Utc::now();
        Ok(participant.clone())
    }

    async fn confirm_reservation(&self, reservation_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let confirmed = match state.reservations.get_mut(&reservation_id) {
            Some(reservation) if reservation.status == ReservationStatus::Pending => {
                reservation.status = ReservationStatus::Confirmed;
                reservation.updated_at = Utc::now();
                true
            }
            Some(_) => false,
            None => return Err(StoreError::not_found("reservation", reservation_id)),
        };
        if confirmed {
            state.settlement_leases.remove(&reservation_id);
        }
        Ok(confirmed)
    }

    async fn claim_settlement(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let reservation = state
            .reservations
            .get(&reservation_id)
            .ok_or_else(|| StoreError::not_found("reservation", reservation_id))?;
        if reservation.status != ReservationStatus::Pending {
            return Ok(false);
        }
        if state
            .settlement_leases
            .get(&reservation_id)
            .is_some_and(|held_until| *held_until > now)
        {
            return Ok(false);
        }

        state.settlement_leases.insert(reservation_id, until);
        Ok(true)
    }

    async fn release_settlement(&self, reservation_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.settlement_leases.remove(&reservation_id);
        Ok(())
    }
}

#[async_trait]
impl CreditRepository for InMemoryStore {
    async fn grant_credit(&self, credit: NewCreditEntry) -> StoreResult<CreditEntry> {
        let now = Utc::now();
        let value = round_currency(credit.value);
        let entry = CreditEntry {
            id: Uuid::new_v4(),
            account_id: credit.account_id,
            face_value: value,
            remaining_value: value,
            status: CreditStatus::Active,
            source: credit.source,
            expires_at: credit.expires_at,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock().await;
        state.credits.push(entry.clone());
        Ok(entry)
    }

    async fn list_credits(&self, account_id: AccountId) -> StoreResult<Vec<CreditEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .credits
            .iter()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn expire_credits(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for entry in state
            .credits
            .iter_mut()
            .filter(|c| c.status == CreditStatus::Active && c.expires_at <= now)
        {
            entry.status = CreditStatus::Expired;
            entry.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }
}

fn is_active_pre_authorization(payment: &PaymentRecord) -> bool {
    payment.purpose == PaymentPurpose::PreAuthorization
        && matches!(
            payment.status,
            PaymentRecordStatus::Pending | PaymentRecordStatus::Authorized
        )
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn create_payment(&self, payment: NewPaymentRecord) -> StoreResult<PaymentRecord> {
        let mut state = self.state.lock().await;
        state.insert_payment(payment)
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        let state = self.state.lock().await;
        Ok(state.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<PaymentRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        update: PaymentUpdate,
    ) -> StoreResult<PaymentRecord> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| StoreError::not_found("payment", payment_id))?;

        if !payment.status.can_transition_to(update.status) {
            return Err(StoreError::invalid_transition(
                "payment",
                payment.status,
                update.status,
            ));
        }

        payment.status = update.status;
        if update.external_id.is_some() {
            payment.external_id = update.external_id;
        }
        if update.failure_reason.is_some() {
            payment.failure_reason = update.failure_reason;
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn find_active_pre_authorization(
        &self,
        reservation_id: Uuid,
    ) -> StoreResult<Option<PaymentRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.reservation_id == reservation_id && is_active_pre_authorization(p))
            .cloned())
    }

    async fn list_payments(&self, reservation_id: Uuid) -> StoreResult<Vec<PaymentRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PostingRepository for InMemoryStore {
    async fn post_balance_payment(
        &self,
        movement: BalanceMovement,
        posting: PaymentPosting,
    ) -> WalletResult<PostedPayment> {
        let mut state = self.state.lock().await;

        // Validate every step before the debit so a refusal leaves no trace
        let record = posting.record(round_currency(movement.amount));
        state.check_new_payment(&record)?;
        if let Some(participant_id) = posting.participant_id {
            state.check_posting_target(participant_id, PaymentStatus::Paid)?;
        }

        let entry = state.debit(movement)?;
        let payment = state.insert_payment(posting.record(-entry.amount))?;
        let participant = posting
            .participant_id
            .map(|id| state.apply_participant_payment(id, PaymentStatus::Paid, payment.amount))
            .transpose()?;

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
        let mut state = self.state.lock().await;

        let consumption = state.plan_credits(posting.account_id, amount, now);
        if consumption.applied == Amount::ZERO {
            return Ok((consumption, None));
        }
        let status = if consumption.is_fully_covered() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        };
        let record = posting.record(consumption.applied);
        state.check_new_payment(&record)?;
        if let Some(participant_id) = posting.participant_id {
            state.check_posting_target(participant_id, status)?;
        }

        state.apply_consumption(&consumption, now);
        let payment = state.insert_payment(record)?;
        let participant = posting
            .participant_id
            .map(|id| state.apply_participant_payment(id, status, consumption.applied))
            .transpose()?;

        Ok((
            consumption,
            Some(PostedPayment {
                payment,
                participant,
            }),
        ))
    }
}

#[async_trait]
impl WebhookLogRepository for InMemoryStore {
    async fn record_webhook_received(
        &self,
        request_id: &str,
        gateway: &str,
        payload: &str,
    ) -> StoreResult<WebhookLogEntry> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Ok(existing) = state.webhook_mut(request_id) {
            existing.attempts += 1;
            return Ok(existing.clone());
        }

        let entry = WebhookLogEntry {
            request_id: request_id.to_string(),
            gateway: gateway.to_string(),
            event_type: None,
            payment_external_id: None,
            signature_valid: None,
            status: WebhookStatus::Received,
            attempts: 1,
            error: None,
            processing_ms: None,
            payload: payload.to_string(),
            received_at: now,
            updated_at: now,
        };
        state.webhooks.push(entry.clone());
        Ok(entry)
    }

    async fn claim_webhook(
        &self,
        request_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let entry = state.webhook_mut(request_id)?;

        let claimable = match entry.status {
            WebhookStatus::Success => false,
            WebhookStatus::Processing => entry.updated_at < stale_before,
            _ => true,
        };
        if claimable {
            entry.status = WebhookStatus::Processing;
            entry.updated_at = Utc::now();
        }
        Ok(claimable)
    }

    async fn update_webhook(
        &self,
        request_id: &str,
        update: WebhookLogUpdate,
    ) -> StoreResult<WebhookLogEntry> {
        let mut state = self.state.lock().await;
        let entry = state.webhook_mut(request_id)?;

        entry.status = update.status;
        if update.event_type.is_some() {
            entry.event_type = update.event_type;
        }
        if update.payment_external_id.is_some() {
            entry.payment_external_id = update.payment_external_id;
        }
        if update.signature_valid.is_some() {
            entry.signature_valid = update.signature_valid;
        }
        if update.error.is_some() {
            entry.error = update.error;
        }
        if update.processing_ms.is_some() {
            entry.processing_ms = update.processing_ms;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn get_webhook(&self, request_id: &str) -> StoreResult<Option<WebhookLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .webhooks
            .iter()
            .find(|w| w.request_id == request_id)
            .cloned())
    }

    async fn list_webhooks_by_status(
        &self,
        status: WebhookStatus,
        limit: i64,
    ) -> StoreResult<Vec<WebhookLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .webhooks
            .iter()
            .filter(|w| w.status == status)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn get_wallet(&self, account_id: AccountId) -> WalletResult<Wallet> {
        let state = self.state.lock().await;
        state
            .wallets
            .get(&account_id)
            .cloned()
            .ok_or(WalletError::WalletNotFound(account_id))
    }

    async fn credit_wallet(&self, movement: BalanceMovement) -> WalletResult<WalletEntry> {
        let amount = round_currency(movement.amount);
        if amount <= Amount::ZERO {
            return Err(WalletError::InvalidAmount(movement.amount));
        }

        let mut state = self.state.lock().await;
        state.check_idempotency(&movement.idempotency_key)?;

        let now = Utc::now();
        let wallet = state
            .wallets
            .entry(movement.account_id)
            .or_insert_with(|| Wallet {
                account_id: movement.account_id,
                balance: round_currency(Amount::ZERO),
                created_at: now,
                updated_at: now,
            });
        wallet.balance = round_currency(wallet.balance + amount);
        wallet.updated_at = now;
        let balance_after = wallet.balance;

        Ok(state.push_wallet_entry(movement, amount, balance_after, EntryDirection::Credit))
    }

    async fn wallet_entries(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> WalletResult<Vec<WalletEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .wallet_entries
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InviteRepository for InMemoryStore {
    async fn create_invite(&self, invite: NewInvite) -> StoreResult<Invite> {
        let mut state = self.state.lock().await;

        if !state.reservations.contains_key(&invite.reservation_id) {
            return Err(StoreError::not_found("reservation", invite.reservation_id));
        }
        if state.invites.iter().any(|i| i.token == invite.token) {
            return Err(StoreError::Conflict(format!(
                "invite token {} already exists",
                invite.token
            )));
        }

        let invite = Invite {
            id: Uuid::new_v4(),
            token: invite.token,
            reservation_id: invite.reservation_id,
            price_per_person: round_currency(invite.price_per_person),
            max_uses: invite.max_uses,
            uses: 0,
            expires_at: invite.expires_at,
            created_at: Utc::now(),
        };
        state.invites.push(invite.clone());
        Ok(invite)
    }

    async fn find_invite_by_token(&self, token: &str) -> StoreResult<Option<Invite>> {
        let state = self.state.lock().await;
        Ok(state.invites.iter().find(|i| i.token == token).cloned())
    }

    async fn accept_invite(
        &self,
        invite_id: Uuid,
        participant: NewParticipant,
    ) -> StoreResult<Participant> {
        let mut state = self.state.lock().await;

        let invite = state
            .invites
            .iter()
            .find(|i| i.id == invite_id)
            .ok_or_else(|| StoreError::not_found("invite", invite_id))?;
        if invite.is_exhausted() {
            return Err(StoreError::Conflict(format!("invite {invite_id} is exhausted")));
        }

        let participant = state.insert_participant(participant)?;
        if let Some(invite) = state.invites.iter_mut().find(|i| i.id == invite_id) {
            invite.uses += 1;
        }
        Ok(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::ParticipantOrigin;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    async fn reservation(store: &InMemoryStore) -> Reservation {
        store
            .create_reservation(NewReservation {
                organizer_id: Uuid::new_v4(),
                court_id: Uuid::new_v4(),
                starts_at: Utc::now() + Duration::hours(2),
                total_price: dec!(100),
            })
            .await
            .unwrap()
    }

    fn roster(reservation_id: Uuid, name: &str) -> NewParticipant {
        NewParticipant {
            reservation_id,
            account_id: Some(Uuid::new_v4()),
            name: name.to_string(),
            email: None,
            phone: None,
            origin: ParticipantOrigin::Roster,
            amount_due: None,
            payment_status: PaymentStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_confirm_reservation_is_conditional() {
        let store = InMemoryStore::new();
        let reservation = reservation(&store).await;

        assert!(store.confirm_reservation(reservation.id).await.unwrap());
        assert!(!store.confirm_reservation(reservation.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_participant_payment_is_forward_only() {
        let store = InMemoryStore::new();
        let reservation = reservation(&store).await;
        let participant = store
            .add_participant(roster(reservation.id, "Ana"))
            .await
            .unwrap();

        let paid = store
            .apply_participant_payment(participant.id, PaymentStatus::Paid, dec!(25))
            .await
            .unwrap();
        assert_eq!(paid.amount_paid, dec!(25.00));

        let result = store
            .apply_participant_payment(participant.id, PaymentStatus::Failed, Amount::ZERO)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));

        let refunded = store
            .refund_participant_payment(participant.id, dec!(40))
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Pending);
        assert_eq!(refunded.amount_paid, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_single_active_pre_authorization() {
        let store = InMemoryStore::new();
        let reservation = reservation(&store).await;
        let hold = NewPaymentRecord {
            reservation_id: reservation.id,
            participant_id: None,
            account_id: Some(reservation.organizer_id),
            amount: dec!(100),
            method: crate::payments::PaymentMethod::Card,
            purpose: PaymentPurpose::PreAuthorization,
            external_id: None,
            status: PaymentRecordStatus::Authorized,
        };

        store.create_payment(hold.clone()).await.unwrap();
        let second = store.create_payment(hold).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_webhook_claim_skips_success_and_fresh_processing() {
        let store = InMemoryStore::new();
        store
            .record_webhook_received("req-1", "asaas", "{}")
            .await
            .unwrap();
        let stale_before = Utc::now() - Duration::minutes(30);

        assert!(store.claim_webhook("req-1", stale_before).await.unwrap());
        assert!(!store.claim_webhook("req-1", stale_before).await.unwrap());

        // A claim older than the cutoff can be taken over
        assert!(
            store
                .claim_webhook("req-1", Utc::now() + Duration::seconds(1))
                .await
                .unwrap()
        );

        store
            .update_webhook("req-1", WebhookLogUpdate::status(WebhookStatus::Success))
            .await
            .unwrap();
        assert!(
            !store
                .claim_webhook("req-1", Utc::now() + Duration::seconds(1))
                .await
                .unwrap()
        );

        let again = store
            .record_webhook_received("req-1", "asaas", "{}")
            .await
            .unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.status, WebhookStatus::Success);
    }

    #[tokio::test]
    async fn test_balance_posting_checks_balance_and_key() {
        let store = InMemoryStore::new();
        let reservation = reservation(&store).await;
        let account_id = Uuid::new_v4();
        let movement = |amount, key: &str| BalanceMovement {
            account_id,
            reservation_id: Some(reservation.id),
            amount,
            entry_type: crate::wallet::EntryType::SharePayment,
            idempotency_key: key.to_string(),
            description: None,
        };
        let posting = PaymentPosting {
            reservation_id: reservation.id,
            participant_id: None,
            account_id,
            method: crate::payments::PaymentMethod::Balance,
            purpose: PaymentPurpose::OrganizerResidual,
        };

        store.credit_wallet(movement(dec!(50), "top-up")).await.unwrap();

        let shortfall = store
            .post_balance_payment(movement(dec!(80), "debit-1"), posting.clone())
            .await;
        assert!(matches!(
            shortfall,
            Err(WalletError::InsufficientBalance { .. })
        ));

        let posted = store
            .post_balance_payment(movement(dec!(30), "debit-1"), posting.clone())
            .await
            .unwrap();
        assert_eq!(posted.payment.amount, dec!(30.00));
        assert_eq!(store.get_wallet(account_id).await.unwrap().balance, dec!(20.00));

        let duplicate = store
            .post_balance_payment(movement(dec!(5), "debit-1"), posting)
            .await;
        assert!(matches!(
            duplicate,
            Err(WalletError::DuplicateTransaction(_))
        ));
        assert_eq!(store.list_payments(reservation.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refused_share_posting_moves_no_money() {
        let store = InMemoryStore::new();
        let reservation = reservation(&store).await;
        let participant = store
            .add_participant(roster(reservation.id, "Ana"))
            .await
            .unwrap();
        let account_id = participant.account_id.unwrap();
        store
            .apply_participant_payment(participant.id, PaymentStatus::Paid, dec!(25))
            .await
            .unwrap();
        store
            .credit_wallet(BalanceMovement {
                account_id,
                reservation_id: None,
                amount: dec!(50),
                entry_type: crate::wallet::EntryType::TopUp,
                idempotency_key: "top-up".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let posting = PaymentPosting {
            reservation_id: reservation.id,
            participant_id: Some(participant.id),
            account_id,
            method: crate::payments::PaymentMethod::Balance,
            purpose: PaymentPurpose::ParticipantShare,
        };

        let result = store
            .post_balance_payment(
                BalanceMovement {
                    account_id,
                    reservation_id: Some(reservation.id),
                    amount: dec!(25),
                    entry_type: crate::wallet::EntryType::SharePayment,
                    idempotency_key: "share-again".to_string(),
                    description: None,
                },
                posting,
            )
            .await;
        assert!(matches!(
            result,
            Err(WalletError::Store(StoreError::InvalidTransition { .. }))
        ));
        assert_eq!(store.get_wallet(account_id).await.unwrap().balance, dec!(50.00));
        assert_eq!(store.wallet_entries(account_id, 10).await.unwrap().len(), 1);
        assert!(store.list_payments(reservation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_lease_blocks_until_expiry() {
        let store = InMemoryStore::new();
        let reservation = reservation(&store).await;
        let now = Utc::now();

        assert!(store
            .claim_settlement(reservation.id, now, now + Duration::minutes(5))
            .await
            .unwrap());
        assert!(!store
            .claim_settlement(reservation.id, now, now + Duration::minutes(5))
            .await
            .unwrap());

        let after = now + Duration::minutes(6);
        assert!(store
            .claim_settlement(reservation.id, after, after + Duration::minutes(5))
            .await
            .unwrap());

        store.release_settlement(reservation.id).await.unwrap();
        assert!(store.confirm_reservation(reservation.id).await.unwrap());
        assert!(!store
            .claim_settlement(reservation.id, after, after + Duration::minutes(5))
            .await
            .unwrap());
    }
}
