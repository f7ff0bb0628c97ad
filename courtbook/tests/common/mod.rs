//! Shared fixtures for the settlement integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use courtbook::context::{ContextConfig, SettlementContext};
use courtbook::db::{InMemoryStore, ReservationRepository};
use courtbook::money::Amount;
use courtbook::notifications::{NotificationQueue, SettlementNotification};
use courtbook::payments::{
    ChargeRequest, GatewayError, GatewayResponse, GatewayResult, PaymentGateway,
    PaymentRecordStatus,
};
use courtbook::reservation::{
    AccountId, NewParticipant, NewReservation, Participant, ParticipantOrigin, PaymentStatus,
    Reservation,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";

/// Gateway call as seen by the fake
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Charge(Amount),
    PreAuthorize(Amount),
    Capture(String, Amount),
    Refund(String, Option<Amount>),
}

/// In-process gateway with scripted answers.
///
/// Queued outcomes are returned first; afterwards every call succeeds with
/// `default_status` and a fresh `pay_N` id.
pub struct FakeGateway {
    default_status: Mutex<PaymentRecordStatus>,
    script: Mutex<VecDeque<GatewayResult<GatewayResponse>>>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl FakeGateway {
    pub fn new(default_status: PaymentRecordStatus) -> Self {
        Self {
            default_status: Mutex::new(default_status),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_default_status(&self, status: PaymentRecordStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn push_outcome(&self, outcome: GatewayResult<GatewayResponse>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_timeout(&self) {
        self.push_outcome(Err(GatewayError::Timeout(std::time::Duration::from_secs(15))));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, call: GatewayCall) -> GatewayResult<GatewayResponse> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(GatewayResponse {
            external_id: format!("pay_{}", calls.len()),
            status: *self.default_status.lock().unwrap(),
        })
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &str {
        "fake"
    }

    async fn charge(&self, request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
        self.answer(GatewayCall::Charge(request.amount))
    }

    async fn pre_authorize(&self, request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
        self.answer(GatewayCall::PreAuthorize(request.amount))
    }

    async fn capture(&self, external_id: &str, amount: Amount) -> GatewayResult<GatewayResponse> {
        self.answer(GatewayCall::Capture(external_id.to_string(), amount))
    }

    async fn refund(
        &self,
        external_id: &str,
        amount: Option<Amount>,
    ) -> GatewayResult<GatewayResponse> {
        self.answer(GatewayCall::Refund(external_id.to_string(), amount))
    }
}

/// Context over a fresh in-memory store
pub struct Harness {
    pub context: SettlementContext,
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifications: mpsc::Receiver<SettlementNotification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway_status(PaymentRecordStatus::Pending)
    }

    pub fn with_gateway_status(status: PaymentRecordStatus) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakeGateway::new(status));
        let (queue, notifications) = NotificationQueue::channel(64);
        let context = SettlementContext::new(
            store.clone(),
            gateway.clone(),
            queue,
            ContextConfig::new(WEBHOOK_SECRET),
        );

        Self {
            context,
            store,
            gateway,
            notifications,
        }
    }

    /// Pending reservation starting `hours_ahead` from now
    pub async fn reservation(&self, total: Amount, hours_ahead: i64) -> Reservation {
        self.store
            .create_reservation(NewReservation {
                organizer_id: Uuid::new_v4(),
                court_id: Uuid::new_v4(),
                starts_at: Utc::now() + Duration::hours(hours_ahead),
                total_price: total,
            })
            .await
            .unwrap()
    }

    pub async fn participant(
        &self,
        reservation: &Reservation,
        account_id: Option<AccountId>,
        amount_due: Option<Amount>,
    ) -> Participant {
        self.store
            .add_participant(NewParticipant {
                reservation_id: reservation.id,
                account_id,
                name: "Player".to_string(),
                email: None,
                phone: None,
                origin: ParticipantOrigin::Roster,
                amount_due,
                payment_status: PaymentStatus::Pending,
            })
            .await
            .unwrap()
    }

    pub async fn organizer_row(&self, reservation: &Reservation) -> Participant {
        self.store
            .add_participant(NewParticipant {
                reservation_id: reservation.id,
                account_id: Some(reservation.organizer_id),
                name: "Organizer".to_string(),
                email: None,
                phone: None,
                origin: ParticipantOrigin::Organizer,
                amount_due: None,
                payment_status: PaymentStatus::Pending,
            })
            .await
            .unwrap()
    }

    /// Drain every queued notification
    pub fn drain_notifications(&mut self) -> Vec<SettlementNotification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            drained.push(notification);
        }
        drained
    }
}

/// Signed webhook body for `event` on `external_id`
pub fn signed_webhook(event: &str, external_id: &str) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&serde_json::json!({
        "event": event,
        "payment": { "id": external_id },
    }))
    .unwrap();
    let signature = courtbook::payments::signature::sign(WEBHOOK_SECRET, &body);
    (body, signature)
}
