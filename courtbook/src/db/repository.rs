//! Repository trait definitions for testability and dependency injection.
//!
//! Every settlement component depends on these traits rather than on a
//! concrete database, so tests run against [`InMemoryStore`](super::InMemoryStore)
//! and production runs against [`PgStore`](super::PgStore).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::StoreResult;
use crate::credits::{CreditConsumption, CreditEntry, NewCreditEntry};
use crate::invites::{Invite, NewInvite};
use crate::money::Amount;
use crate::payments::{
    NewPaymentRecord, PaymentMethod, PaymentPurpose, PaymentRecord, PaymentRecordStatus,
    PaymentUpdate, WebhookLogEntry, WebhookStatus,
};
use crate::reservation::{
    AccountId, NewParticipant, NewReservation, Participant, PaymentStatus, Reservation,
    SplitAssignment, SplitMode,
};
use crate::wallet::{BalanceMovement, Wallet, WalletEntry, WalletResult};

/// Trait for reservation and participant operations
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Create a reservation in `pending` status
    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation>;

    /// Find reservation by ID
    async fn get_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>>;

    /// Pending reservations whose game starts in `(after, until]`, earliest first
    async fn list_closing_candidates(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>>;

    /// Attach a participant to a reservation
    async fn add_participant(&self, participant: NewParticipant) -> StoreResult<Participant>;

    /// Find participant by ID
    async fn get_participant(&self, participant_id: Uuid) -> StoreResult<Option<Participant>>;

    /// All participants of a reservation, oldest first
    async fn list_participants(&self, reservation_id: Uuid) -> StoreResult<Vec<Participant>>;

    /// Persist split values, computed amounts and the split mode in one transaction.
    ///
    /// Fails with `Conflict` unless the reservation is still `pending`.
    async fn apply_split(
        &self,
        reservation_id: Uuid,
        mode: SplitMode,
        assignments: &[SplitAssignment],
    ) -> StoreResult<Vec<Participant>>;

    /// Move a participant's payment status forward and add `paid_delta` to
    /// the amount paid. Backward moves fail with `InvalidTransition`.
    async fn apply_participant_payment(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
        paid_delta: Amount,
    ) -> StoreResult<Participant>;

    /// Explicit refund: subtract `amount` (floored at zero) and return the
    /// participant to `pending`
    async fn refund_participant_payment(
        &self,
        participant_id: Uuid,
        amount: Amount,
    ) -> StoreResult<Participant>;

    /// Conditional `pending -> confirmed`, releasing any settlement lease.
    /// Returns `false` when the reservation was not pending.
    async fn confirm_reservation(&self, reservation_id: Uuid) -> StoreResult<bool>;

    /// Take the settlement lease of a pending reservation until `until`.
    ///
    /// Returns `false` when the reservation is not pending or another run
    /// holds a lease that has not expired at `now`.
    async fn claim_settlement(
        &self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Drop the settlement lease after a failed closure
    async fn release_settlement(&self, reservation_id: Uuid) -> StoreResult<()>;
}

/// Trait for credit ledger operations
#[async_trait]
pub trait CreditRepository: Send + Sync {
    /// Grant a new active credit entry
    async fn grant_credit(&self, credit: NewCreditEntry) -> StoreResult<CreditEntry>;

    /// All entries of an account, including used and expired ones
    async fn list_credits(&self, account_id: AccountId) -> StoreResult<Vec<CreditEntry>>;

    /// Mark active entries past their expiration as `expired`
    async fn expire_credits(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Trait for payment record operations
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Create a payment record. A second active pre-authorization for the
    /// same reservation fails with `Conflict`.
    async fn create_payment(&self, payment: NewPaymentRecord) -> StoreResult<PaymentRecord>;

    /// Find payment by ID
    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>>;

    /// Find payment by gateway transaction ID
    async fn find_payment_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<PaymentRecord>>;

    /// Apply a status update, enforcing the record's state machine
    async fn update_payment(
        &self,
        payment_id: Uuid,
        update: PaymentUpdate,
    ) -> StoreResult<PaymentRecord>;

    /// The pre-authorization in `pending` or `authorized` status, if any
    async fn find_active_pre_authorization(
        &self,
        reservation_id: Uuid,
    ) -> StoreResult<Option<PaymentRecord>>;

    /// All payment records of a reservation, oldest first
    async fn list_payments(&self, reservation_id: Uuid) -> StoreResult<Vec<PaymentRecord>>;
}

/// Status change recorded on a webhook log entry
#[derive(Debug, Clone)]
pub struct WebhookLogUpdate {
    pub status: WebhookStatus,
    pub event_type: Option<String>,
    pub payment_external_id: Option<String>,
    pub signature_valid: Option<bool>,
    pub error: Option<String>,
    pub processing_ms: Option<i64>,
}

impl WebhookLogUpdate {
    pub fn status(status: WebhookStatus) -> Self {
        Self {
            status,
            event_type: None,
            payment_external_id: None,
            signature_valid: None,
            error: None,
            processing_ms: None,
        }
    }
}

/// Trait for webhook audit log operations
#[async_trait]
pub trait WebhookLogRepository: Send + Sync {
    /// Record a delivery. New request ids start in `received`; repeated ids
    /// keep their status and bump `attempts`.
    async fn record_webhook_received(
        &self,
        request_id: &str,
        gateway: &str,
        payload: &str,
    ) -> StoreResult<WebhookLogEntry>;

    /// Claim exclusive processing rights. Succeeds when the entry is neither
    /// `success` nor `processing`, or when a `processing` claim is older than
    /// `stale_before`.
    async fn claim_webhook(
        &self,
        request_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Update status and details of an entry; `None` fields keep their value
    async fn update_webhook(
        &self,
        request_id: &str,
        update: WebhookLogUpdate,
    ) -> StoreResult<WebhookLogEntry>;

    /// Find entry by request ID
    async fn get_webhook(&self, request_id: &str) -> StoreResult<Option<WebhookLogEntry>>;

    /// Entries in `status`, oldest first
    async fn list_webhooks_by_status(
        &self,
        status: WebhookStatus,
        limit: i64,
    ) -> StoreResult<Vec<WebhookLogEntry>>;
}

/// Trait for wallet repository operations
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Get wallet for account
    async fn get_wallet(&self, account_id: AccountId) -> WalletResult<Wallet>;

    /// Credit an account, creating its wallet when missing
    async fn credit_wallet(&self, movement: BalanceMovement) -> WalletResult<WalletEntry>;

    /// Get wallet entries (transaction history), newest first
    async fn wallet_entries(&self, account_id: AccountId, limit: i64)
    -> WalletResult<Vec<WalletEntry>>;
}

/// Trait for invite operations
#[async_trait]
pub trait InviteRepository: Send + Sync {
    /// Create an invite
    async fn create_invite(&self, invite: NewInvite) -> StoreResult<Invite>;

    /// Find invite by its public token
    async fn find_invite_by_token(&self, token: &str) -> StoreResult<Option<Invite>>;

    /// Increment the invite's use count (checking `max_uses`) and attach the
    /// participant in one transaction. Exhausted invites fail with `Conflict`.
    async fn accept_invite(
        &self,
        invite_id: Uuid,
        participant: NewParticipant,
    ) -> StoreResult<Participant>;
}

/// Where an internal money movement is booked
#[derive(Debug, Clone)]
pub struct PaymentPosting {
    pub reservation_id: Uuid,
    /// Participant whose share the movement pays, if any
    pub participant_id: Option<Uuid>,
    pub account_id: AccountId,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
}

impl PaymentPosting {
    /// `paid` record for `amount` moved under this posting
    pub fn record(&self, amount: Amount) -> NewPaymentRecord {
        NewPaymentRecord {
            reservation_id: self.reservation_id,
            participant_id: self.participant_id,
            account_id: Some(self.account_id),
            amount,
            method: self.method,
            purpose: self.purpose,
            external_id: None,
            status: PaymentRecordStatus::Paid,
        }
    }
}

/// Rows written by a posting
#[derive(Debug, Clone)]
pub struct PostedPayment {
    pub payment: PaymentRecord,
    /// Participant after the amount was applied
    pub participant: Option<Participant>,
}

/// Money movements committed together with their payment record.
///
/// The debit or consumption, the `paid` record and the participant update
/// either all commit or none do, so no money moves without a record.
#[async_trait]
pub trait PostingRepository: Send + Sync {
    /// Debit a wallet, record the payment and mark the participant `paid`.
    ///
    /// The debit checks the balance and the idempotency key atomically.
    /// The participant transition is checked before anything is written.
    async fn post_balance_payment(
        &self,
        movement: BalanceMovement,
        posting: PaymentPosting,
    ) -> WalletResult<PostedPayment>;

    /// Consume up to `amount` of credits and record what applied.
    ///
    /// Implementations must read, plan (with
    /// [`plan_consumption`](crate::credits::plan_consumption)) and write under
    /// one per-account lock so concurrent consumers cannot spend the same entry.
    ///
    /// The participant becomes `paid` on full coverage and otherwise stays
    /// `pending` with the partial amount. Nothing is written when no credit
    /// applies.
    async fn post_credit_payment(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
        posting: PaymentPosting,
    ) -> StoreResult<(CreditConsumption, Option<PostedPayment>)>;
}

/// Everything the settlement engine persists
pub trait SettlementStore:
    ReservationRepository
    + CreditRepository
    + PaymentRepository
    + PostingRepository
    + WebhookLogRepository
    + WalletRepository
    + InviteRepository
{
}

impl<T> SettlementStore for T where
    T: ReservationRepository
        + CreditRepository
        + PaymentRepository
        + PostingRepository
        + WebhookLogRepository
        + WalletRepository
        + InviteRepository
{
}
