//! Gateway adapter: records every outbound call and reconciles webhooks.
//!
//! Outbound calls follow one rule: the payment record is written `pending`
//! before the network call and updated after it. If the call times out the
//! record stays `pending`; the gateway may still have acted and the webhook
//! settles it later.
//!
//! Inbound webhooks are logged by request id before anything else happens.
//! A request id that already reached `success` is never applied again, and
//! a conditional claim keeps concurrent deliveries from overlapping.

use super::errors::{GatewayError, GatewayResult, WebhookError, WebhookResult};
use super::gateway::{ChargeRequest, GatewayResponse, PaymentGateway};
use super::models::{
    NewPaymentRecord, PaymentMethod, PaymentPurpose, PaymentRecord, PaymentRecordStatus,
    PaymentUpdate, WebhookAck, WebhookEvent, WebhookLogEntry, WebhookPayload, WebhookStatus,
};
use super::signature;
use crate::db::{SettlementStore, StoreError, WebhookLogUpdate};
use crate::money::{Amount, round_currency};
use crate::notifications::{NotificationQueue, SettlementNotification};
use crate::reservation::{AccountId, PaymentStatus};
use crate::security::{SecurityEventBuffer, SecurityEventKind};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// A `processing` claim older than this is considered abandoned
pub const STALE_PROCESSING_MINUTES: i64 = 30;

/// Outbound money movement to be recorded and sent to the gateway
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub reservation_id: Uuid,
    pub participant_id: Option<Uuid>,
    pub account_id: Option<AccountId>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
    pub description: String,
    pub card_token: Option<String>,
}

/// Outcome of a reprocessing pass over errored webhooks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprocessSummary {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Bridge between the engine and the external payment gateway
pub struct PaymentGatewayAdapter {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn PaymentGateway>,
    webhook_secret: String,
    notifications: NotificationQueue,
    security: Arc<SecurityEventBuffer>,
}

impl PaymentGatewayAdapter {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        webhook_secret: String,
        notifications: NotificationQueue,
        security: Arc<SecurityEventBuffer>,
    ) -> Self {
        Self {
            store,
            gateway,
            webhook_secret,
            notifications,
            security,
        }
    }

    /// Name of the configured gateway
    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// Collect money through the gateway
    pub async fn charge(&self, intent: PaymentIntent) -> GatewayResult<PaymentRecord> {
        let (record, request) = self.open_record(intent).await?;
        let outcome = self.gateway.charge(&request).await;
        self.close_record(&record, outcome, true).await
    }

    /// Place a hold on the organizer's card
    pub async fn pre_authorize(&self, intent: PaymentIntent) -> GatewayResult<PaymentRecord> {
        let intent = PaymentIntent {
            purpose: PaymentPurpose::PreAuthorization,
            ..intent
        };
        let (record, request) = self.open_record(intent).await?;
        let outcome = self.gateway.pre_authorize(&request).await;
        self.close_record(&record, outcome, true).await
    }

    /// Capture `amount` of an authorized hold.
    ///
    /// A separate `organizer_residual` record tracks the capture; the hold
    /// itself moves to `paid` once the gateway confirms.
    pub async fn capture_authorized(
        &self,
        hold: &PaymentRecord,
        amount: Amount,
    ) -> GatewayResult<PaymentRecord> {
        if hold.status != PaymentRecordStatus::Authorized {
            return Err(GatewayError::Rejected(format!(
                "hold {} is {}",
                hold.id, hold.status
            )));
        }
        let external_id = hold
            .external_id
            .as_deref()
            .ok_or_else(|| GatewayError::Rejected(format!("hold {} has no gateway id", hold.id)))?;

        let capture = self
            .store
            .create_payment(NewPaymentRecord {
                reservation_id: hold.reservation_id,
                participant_id: None,
                account_id: hold.account_id,
                amount,
                method: hold.method,
                purpose: PaymentPurpose::OrganizerResidual,
                external_id: None,
                status: PaymentRecordStatus::Pending,
            })
            .await?;

        let outcome = self.gateway.capture(external_id, amount).await;
        let captured = self.close_record(&capture, outcome, false).await?;

        if captured.status == PaymentRecordStatus::Paid {
            match self
                .store
                .update_payment(hold.id, PaymentUpdate::status(PaymentRecordStatus::Paid))
                .await
            {
                Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => log::error!("Capture {} recorded but hold {} not updated: {e}", captured.id, hold.id),
            }
        }

        log::info!(
            "Captured {} of hold {} for reservation {}",
            amount,
            hold.id,
            hold.reservation_id
        );
        Ok(captured)
    }

    /// Refund a gateway payment, fully when `amount` is `None`.
    ///
    /// A `refund` record is written `pending` before the gateway call and
    /// follows the gateway's answer. The original moves to `refunded` only
    /// when the whole amount came back; a partial refund leaves it `paid`.
    /// A timeout leaves the refund record `pending` for the webhook.
    pub async fn refund(
        &self,
        payment: &PaymentRecord,
        amount: Option<Amount>,
    ) -> GatewayResult<PaymentRecord> {
        let external_id = payment.external_id.as_deref().ok_or_else(|| {
            GatewayError::Rejected(format!("payment {} has no gateway id", payment.id))
        })?;
        if !payment.status.can_transition_to(PaymentRecordStatus::Refunded) {
            return Err(GatewayError::Rejected(format!(
                "payment {} is {}",
                payment.id, payment.status
            )));
        }
        let refund_amount = round_currency(amount.unwrap_or(payment.amount));
        if refund_amount <= Amount::ZERO || refund_amount > payment.amount {
            return Err(GatewayError::Rejected(format!(
                "refund of {refund_amount} outside payment {} of {}",
                payment.id, payment.amount
            )));
        }

        let record = self
            .store
            .create_payment(NewPaymentRecord {
                reservation_id: payment.reservation_id,
                participant_id: payment.participant_id,
                account_id: payment.account_id,
                amount: refund_amount,
                method: payment.method,
                purpose: PaymentPurpose::Refund,
                external_id: None,
                status: PaymentRecordStatus::Pending,
            })
            .await?;

        let outcome = self.gateway.refund(external_id, amount).await;
        // Some gateways answer with the original payment's id
        let attach_external_id = matches!(&outcome, Ok(r) if r.external_id != external_id);
        let refund = self.close_record(&record, outcome, attach_external_id).await?;
        if refund.status != PaymentRecordStatus::Paid {
            log::info!(
                "Refund {} of payment {} is {} at the gateway",
                refund.id,
                payment.id,
                refund.status
            );
            return Ok(refund);
        }

        let mut cascaded = false;
        if refund_amount == payment.amount {
            match self
                .store
                .update_payment(payment.id, PaymentUpdate::status(PaymentRecordStatus::Refunded))
                .await
            {
                Ok(_) => {}
                // The refund webhook got there first and already cascaded
                Err(StoreError::InvalidTransition { .. }) => cascaded = true,
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(participant_id) = payment.participant_id.filter(|_| !cascaded) {
            self.store
                .refund_participant_payment(participant_id, refund_amount)
                .await?;
        }

        log::info!(
            "Refunded {} of payment {} for reservation {}",
            refund_amount,
            payment.id,
            payment.reservation_id
        );
        Ok(refund)
    }

    async fn open_record(
        &self,
        intent: PaymentIntent,
    ) -> GatewayResult<(PaymentRecord, ChargeRequest)> {
        let record = self
            .store
            .create_payment(NewPaymentRecord {
                reservation_id: intent.reservation_id,
                participant_id: intent.participant_id,
                account_id: intent.account_id,
                amount: intent.amount,
                method: intent.method,
                purpose: intent.purpose,
                external_id: None,
                status: PaymentRecordStatus::Pending,
            })
            .await?;

        let request = ChargeRequest {
            reference: record.id,
            account_id: intent.account_id,
            amount: record.amount,
            method: intent.method,
            description: intent.description,
            card_token: intent.card_token,
        };
        Ok((record, request))
    }

    async fn close_record(
        &self,
        record: &PaymentRecord,
        outcome: GatewayResult<GatewayResponse>,
        attach_external_id: bool,
    ) -> GatewayResult<PaymentRecord> {
        match outcome {
            Ok(response) => {
                let update = PaymentUpdate {
                    status: response.status,
                    external_id: attach_external_id.then_some(response.external_id),
                    failure_reason: None,
                };
                Ok(self.store.update_payment(record.id, update).await?)
            }
            Err(error) if error.is_outcome_unknown() => {
                log::warn!(
                    "Gateway outcome unknown for payment {}, left pending: {error}",
                    record.id
                );
                Err(error)
            }
            Err(error) => {
                let update = PaymentUpdate {
                    status: PaymentRecordStatus::Failed,
                    external_id: None,
                    failure_reason: Some(error.to_string()),
                };
                if let Err(store_error) = self.store.update_payment(record.id, update).await {
                    log::error!(
                        "Failed to mark payment {} as failed: {store_error}",
                        record.id
                    );
                }
                Err(error)
            }
        }
    }

    /// Handle one webhook delivery.
    ///
    /// Returns an error only when the delivery could not even be logged, so
    /// the transport can ask the gateway to retry.
    pub async fn ingest(
        &self,
        request_id: Option<String>,
        raw_payload: &[u8],
        signature: Option<&str>,
    ) -> WebhookResult<WebhookAck> {
        let request_id = request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let payload = String::from_utf8_lossy(raw_payload);

        let entry = self
            .store
            .record_webhook_received(&request_id, self.gateway.name(), &payload)
            .await?;

        let signature_valid = signature
            .is_some_and(|sig| signature::verify(&self.webhook_secret, raw_payload, sig));
        if !signature_valid {
            return self.reject(entry).await;
        }

        if entry.status == WebhookStatus::Success {
            log::debug!("Webhook {request_id} already processed, ignoring replay");
            return Ok(WebhookAck::Replayed { request_id });
        }

        let stale_before = Utc::now() - Duration::minutes(STALE_PROCESSING_MINUTES);
        if !self.store.claim_webhook(&request_id, stale_before).await? {
            let current = self.store.get_webhook(&request_id).await?;
            if current.is_some_and(|e| e.status == WebhookStatus::Success) {
                return Ok(WebhookAck::Replayed { request_id });
            }
            log::debug!("Webhook {request_id} is being processed by another delivery");
            return Ok(WebhookAck::InFlight { request_id });
        }

        let ok = self.process_claimed(&request_id, &payload).await?;
        Ok(WebhookAck::Processed { request_id, ok })
    }

    async fn reject(&self, entry: WebhookLogEntry) -> WebhookResult<WebhookAck> {
        // Never downgrade a delivery that already succeeded
        if entry.status != WebhookStatus::Success {
            let update = WebhookLogUpdate {
                signature_valid: Some(false),
                ..WebhookLogUpdate::status(WebhookStatus::InvalidSignature)
            };
            self.store.update_webhook(&entry.request_id, update).await?;
        }

        self.security
            .record(
                SecurityEventKind::InvalidWebhookSignature,
                json!({
                    "request_id": entry.request_id,
                    "gateway": entry.gateway,
                    "attempts": entry.attempts,
                }),
            )
            .await;

        Ok(WebhookAck::Rejected {
            request_id: entry.request_id,
        })
    }

    /// Apply a claimed entry and record the outcome. Returns whether it succeeded.
    async fn process_claimed(&self, request_id: &str, payload: &str) -> WebhookResult<bool> {
        let started = Instant::now();

        let parsed: Result<WebhookPayload, _> = serde_json::from_str(payload);
        let (event_type, external_id) = match &parsed {
            Ok(p) => (Some(p.event.clone()), Some(p.payment.id.clone())),
            Err(_) => (None, None),
        };

        let result = match parsed {
            Ok(payload) => self.apply_event(&payload).await,
            Err(e) => Err(WebhookError::MalformedPayload(e)),
        };
        let processing_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let update = match &result {
            Ok(()) => WebhookLogUpdate {
                event_type,
                payment_external_id: external_id,
                signature_valid: Some(true),
                processing_ms: Some(processing_ms),
                ..WebhookLogUpdate::status(WebhookStatus::Success)
            },
            Err(e) => {
                log::warn!("Webhook {request_id} failed: {e}");
                WebhookLogUpdate {
                    event_type,
                    payment_external_id: external_id,
                    signature_valid: Some(true),
                    error: Some(e.to_string()),
                    processing_ms: Some(processing_ms),
                    ..WebhookLogUpdate::status(WebhookStatus::Error)
                }
            }
        };
        self.store.update_webhook(request_id, update).await?;

        Ok(result.is_ok())
    }

    /// Re-run stored payloads of webhooks that ended in `error`
    pub async fn reprocess_failed(&self, limit: i64) -> WebhookResult<ReprocessSummary> {
        let failed = self
            .store
            .list_webhooks_by_status(WebhookStatus::Error, limit)
            .await?;
        let mut summary = ReprocessSummary::default();

        for entry in failed {
            let stale_before = Utc::now() - Duration::minutes(STALE_PROCESSING_MINUTES);
            if !self.store.claim_webhook(&entry.request_id, stale_before).await? {
                continue;
            }

            summary.attempted += 1;
            if self.process_claimed(&entry.request_id, &entry.payload).await? {
                summary.succeeded += 1;
            }
        }

        if summary.attempted > 0 {
            log::info!(
                "Reprocessed {} failed webhooks, {} succeeded",
                summary.attempted,
                summary.succeeded
            );
        }
        Ok(summary)
    }

    async fn apply_event(&self, payload: &WebhookPayload) -> WebhookResult<()> {
        let event = WebhookEvent::parse(&payload.event);
        let Some(target) = event.target_status() else {
            log::info!("Ignoring webhook event {}", payload.event);
            return Ok(());
        };

        let record = self
            .store
            .find_payment_by_external_id(&payload.payment.id)
            .await?
            .ok_or_else(|| WebhookError::UnknownPayment(payload.payment.id.clone()))?;

        if record.status == target {
            return Ok(());
        }
        if !record.status.can_transition_to(target) {
            log::warn!(
                "Ignoring {} for payment {}: {} -> {} not allowed",
                payload.event,
                record.id,
                record.status,
                target
            );
            return Ok(());
        }

        let update = PaymentUpdate {
            status: target,
            external_id: None,
            failure_reason: (target == PaymentRecordStatus::Failed).then(|| payload.event.clone()),
        };
        let updated = self.store.update_payment(record.id, update).await?;
        log::info!(
            "Payment {} moved {} -> {} by {}",
            updated.id,
            record.status,
            updated.status,
            payload.event
        );

        self.cascade(&updated).await
    }

    /// Propagate a payment record change to its participant, pending captures
    /// or pending refunds
    async fn cascade(&self, payment: &PaymentRecord) -> WebhookResult<()> {
        if payment.purpose == PaymentPurpose::Refund {
            if let Some(participant_id) =
                payment.participant_id.filter(|_| payment.status == PaymentRecordStatus::Paid)
            {
                match self
                    .store
                    .refund_participant_payment(participant_id, payment.amount)
                    .await
                {
                    Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(());
        }

        if let Some(participant_id) = payment.participant_id {
            match payment.status {
                PaymentRecordStatus::Paid => {
                    self.store
                        .apply_participant_payment(participant_id, PaymentStatus::Paid, payment.amount)
                        .await?;
                    self.notifications
                        .notify(SettlementNotification::PaymentConfirmed {
                            reservation_id: payment.reservation_id,
                            participant_id,
                            amount: payment.amount,
                        });
                }
                PaymentRecordStatus::Failed => {
                    let participant = self.store.get_participant(participant_id).await?;
                    if participant.is_some_and(|p| p.payment_status == PaymentStatus::Pending) {
                        self.store
                            .apply_participant_payment(
                                participant_id,
                                PaymentStatus::Failed,
                                Amount::ZERO,
                            )
                            .await?;
                    }
                }
                PaymentRecordStatus::Refunded => {
                    self.store
                        .refund_participant_payment(participant_id, payment.amount)
                        .await?;
                }
                PaymentRecordStatus::Pending | PaymentRecordStatus::Authorized => {}
            }
        }

        if payment.purpose == PaymentPurpose::PreAuthorization {
            self.settle_pending_captures(payment).await?;
        }
        if payment.status == PaymentRecordStatus::Refunded {
            self.settle_pending_refunds(payment).await?;
        }
        Ok(())
    }

    /// Mark refund records left `pending` by a timeout as `paid`
    async fn settle_pending_refunds(&self, original: &PaymentRecord) -> WebhookResult<()> {
        let pending_refunds = self
            .store
            .list_payments(original.reservation_id)
            .await?
            .into_iter()
            .filter(|p| {
                p.purpose == PaymentPurpose::Refund
                    && p.status == PaymentRecordStatus::Pending
                    && p.participant_id == original.participant_id
                    && p.method == original.method
            });

        for refund in pending_refunds {
            self.store
                .update_payment(refund.id, PaymentUpdate::status(PaymentRecordStatus::Paid))
                .await?;
        }
        Ok(())
    }

    /// Resolve captures whose gateway outcome was unknown once the hold settles
    async fn settle_pending_captures(&self, hold: &PaymentRecord) -> WebhookResult<()> {
        let target = match hold.status {
            PaymentRecordStatus::Paid => PaymentRecordStatus::Paid,
            PaymentRecordStatus::Failed | PaymentRecordStatus::Refunded => {
                PaymentRecordStatus::Failed
            }
            _ => return Ok(()),
        };

        let pending_captures = self
            .store
            .list_payments(hold.reservation_id)
            .await?
            .into_iter()
            .filter(|p| {
                p.purpose == PaymentPurpose::OrganizerResidual
                    && p.method.is_gateway_backed()
                    && p.status == PaymentRecordStatus::Pending
            });

        for capture in pending_captures {
            let update = PaymentUpdate {
                status: target,
                external_id: None,
                failure_reason: (target == PaymentRecordStatus::Failed)
                    .then(|| format!("hold {} is {}", hold.id, hold.status)),
            };
            self.store.update_payment(capture.id, update).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::db::repository::{PaymentRepository, ReservationRepository, WebhookLogRepository};
    use crate::reservation::{NewParticipant, NewReservation, ParticipantOrigin, Participant};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "whsec_adapter_test";

    /// Gateway answering every call with a fixed outcome
    struct ScriptedGateway {
        status: PaymentRecordStatus,
        fail_with_timeout: bool,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn answering(status: PaymentRecordStatus) -> Self {
            Self {
                status,
                fail_with_timeout: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn timing_out() -> Self {
            Self {
                fail_with_timeout: true,
                ..Self::answering(PaymentRecordStatus::Pending)
            }
        }

        fn respond(&self) -> GatewayResult<GatewayResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_timeout {
                return Err(GatewayError::Timeout(std::time::Duration::from_secs(15)));
            }
            Ok(GatewayResponse {
                external_id: format!("pay_{call}"),
                status: self.status,
            })
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn charge(&self, _request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
            self.respond()
        }

        async fn pre_authorize(&self, _request: &ChargeRequest) -> GatewayResult<GatewayResponse> {
            self.respond()
        }

        async fn capture(&self, _external_id: &str, _amount: Amount) -> GatewayResult<GatewayResponse> {
            self.respond()
        }

        async fn refund(
            &self,
            _external_id: &str,
            _amount: Option<Amount>,
        ) -> GatewayResult<GatewayResponse> {
            self.respond()
        }
    }

    fn adapter(
        store: Arc<InMemoryStore>,
        gateway: ScriptedGateway,
    ) -> (PaymentGatewayAdapter, Arc<SecurityEventBuffer>) {
        let security = Arc::new(SecurityEventBuffer::default());
        let adapter = PaymentGatewayAdapter::new(
            store,
            Arc::new(gateway),
            SECRET.to_string(),
            NotificationQueue::disabled(),
            security.clone(),
        );
        (adapter, security)
    }

    async fn participant(store: &InMemoryStore) -> Participant {
        let reservation = store
            .create_reservation(NewReservation {
                organizer_id: Uuid::new_v4(),
                court_id: Uuid::new_v4(),
                starts_at: Utc::now() + Duration::hours(5),
                total_price: dec!(100),
            })
            .await
            .unwrap();
        store
            .add_participant(NewParticipant {
                reservation_id: reservation.id,
                account_id: None,
                name: "Bruna".to_string(),
                email: None,
                phone: None,
                origin: ParticipantOrigin::Invite,
                amount_due: Some(dec!(25)),
                payment_status: PaymentStatus::Pending,
            })
            .await
            .unwrap()
    }

    fn intent(participant: &Participant) -> PaymentIntent {
        PaymentIntent {
            reservation_id: participant.reservation_id,
            participant_id: Some(participant.id),
            account_id: None,
            amount: dec!(25),
            method: PaymentMethod::Pix,
            purpose: PaymentPurpose::ParticipantShare,
            description: "share".to_string(),
            card_token: None,
        }
    }

    fn webhook_body(event: &str, external_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": event,
            "payment": { "id": external_id },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_charge_timeout_leaves_record_pending() {
        let store = Arc::new(InMemoryStore::new());
        let participant = participant(&store).await;
        let (adapter, _) = adapter(store.clone(), ScriptedGateway::timing_out());

        let result = adapter.charge(intent(&participant)).await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));

        let payments = store.list_payments(participant.reservation_id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentRecordStatus::Pending);
        assert!(payments[0].external_id.is_none());
    }

    #[tokio::test]
    async fn test_webhook_confirms_payment_exactly_once() {
        let store = Arc::new(InMemoryStore::new());
        let participant = participant(&store).await;
        let (adapter, _) = adapter(
            store.clone(),
            ScriptedGateway::answering(PaymentRecordStatus::Pending),
        );

        let record = adapter.charge(intent(&participant)).await.unwrap();
        let external_id = record.external_id.clone().unwrap();
        let body = webhook_body("PAYMENT_RECEIVED", &external_id);
        let signature = signature::sign(SECRET, &body);

        let first = adapter
            .ingest(Some("req-1".to_string()), &body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            first,
            WebhookAck::Processed {
                request_id: "req-1".to_string(),
                ok: true
            }
        );

        let replay = adapter
            .ingest(Some("req-1".to_string()), &body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            replay,
            WebhookAck::Replayed {
                request_id: "req-1".to_string()
            }
        );

        let paid = store.get_participant(participant.id).await.unwrap().unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.amount_paid, dec!(25));

        let log = store.get_webhook("req-1").await.unwrap().unwrap();
        assert_eq!(log.status, WebhookStatus::Success);
        assert_eq!(log.attempts, 2);
    }

    #[tokio::test]
    async fn test_invalid_signature_is_rejected_and_audited() {
        let store = Arc::new(InMemoryStore::new());
        let (adapter, security) = adapter(
            store.clone(),
            ScriptedGateway::answering(PaymentRecordStatus::Pending),
        );
        let body = webhook_body("PAYMENT_RECEIVED", "pay_0");

        let ack = adapter
            .ingest(Some("req-bad".to_string()), &body, Some("deadbeef"))
            .await
            .unwrap();
        assert!(matches!(ack, WebhookAck::Rejected { .. }));

        let missing = adapter
            .ingest(Some("req-none".to_string()), &body, None)
            .await
            .unwrap();
        assert!(matches!(missing, WebhookAck::Rejected { .. }));

        let log = store.get_webhook("req-bad").await.unwrap().unwrap();
        assert_eq!(log.status, WebhookStatus::InvalidSignature);
        assert_eq!(log.signature_valid, Some(false));
        assert_eq!(security.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_payment_is_reprocessed_later() {
        let store = Arc::new(InMemoryStore::new());
        let participant = participant(&store).await;
        let (adapter, _) = adapter(
            store.clone(),
            ScriptedGateway::answering(PaymentRecordStatus::Pending),
        );

        let body = webhook_body("PAYMENT_CONFIRMED", "pay_0");
        let signature = signature::sign(SECRET, &body);
        let ack = adapter
            .ingest(Some("req-early".to_string()), &body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            ack,
            WebhookAck::Processed {
                request_id: "req-early".to_string(),
                ok: false
            }
        );

        // The charge response lands after the webhook
        adapter.charge(intent(&participant)).await.unwrap();

        let summary = adapter.reprocess_failed(10).await.unwrap();
        assert_eq!(
            summary,
            ReprocessSummary {
                attempted: 1,
                succeeded: 1
            }
        );
        let paid = store.get_participant(participant.id).await.unwrap().unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_capture_moves_hold_to_paid() {
        let store = Arc::new(InMemoryStore::new());
        let participant = participant(&store).await;
        let (adapter, _) = adapter(
            store.clone(),
            ScriptedGateway::answering(PaymentRecordStatus::Authorized),
        );

        let hold = adapter
            .pre_authorize(PaymentIntent {
                participant_id: None,
                method: PaymentMethod::Card,
                amount: dec!(100),
                ..intent(&participant)
            })
            .await
            .unwrap();
        assert_eq!(hold.status, PaymentRecordStatus::Authorized);
        assert_eq!(hold.purpose, PaymentPurpose::PreAuthorization);

        // Captures answer with the scripted status; force a paid answer
        let paying = PaymentGatewayAdapter::new(
            store.clone(),
            Arc::new(ScriptedGateway::answering(PaymentRecordStatus::Paid)),
            SECRET.to_string(),
            NotificationQueue::disabled(),
            Arc::new(SecurityEventBuffer::default()),
        );
        let capture = paying.capture_authorized(&hold, dec!(40)).await.unwrap();
        assert_eq!(capture.status, PaymentRecordStatus::Paid);
        assert_eq!(capture.purpose, PaymentPurpose::OrganizerResidual);

        let hold = store.get_payment(hold.id).await.unwrap().unwrap();
        assert_eq!(hold.status, PaymentRecordStatus::Paid);
        assert!(paying.capture_authorized(&hold, dec!(40)).await.is_err());
    }
}
