//! Payment record and webhook log models.

use crate::db::StoreError;
use crate::money::Amount;
use crate::reservation::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Pix,
    Card,
    Balance,
    Credits,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::Card => "card",
            PaymentMethod::Balance => "balance",
            PaymentMethod::Credits => "credits",
        }
    }

    /// Whether money moves through the external gateway
    pub fn is_gateway_backed(&self) -> bool {
        matches!(self, PaymentMethod::Pix | PaymentMethod::Card)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(PaymentMethod::Pix),
            "card" => Ok(PaymentMethod::Card),
            "balance" => Ok(PaymentMethod::Balance),
            "credits" => Ok(PaymentMethod::Credits),
            other => Err(StoreError::Decode(format!("payment method '{other}'"))),
        }
    }
}

/// What a payment record pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// A participant paying their share
    ParticipantShare,
    /// Organizer hold on funds, captured at closure
    PreAuthorization,
    /// Organizer residual settled at closure
    OrganizerResidual,
    /// Per-person price of an accepted invite
    InviteFee,
    /// Money returned for an earlier gateway payment
    Refund,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::ParticipantShare => "participant_share",
            PaymentPurpose::PreAuthorization => "pre_authorization",
            PaymentPurpose::OrganizerResidual => "organizer_residual",
            PaymentPurpose::InviteFee => "invite_fee",
            PaymentPurpose::Refund => "refund",
        }
    }
}

impl std::fmt::Display for PaymentPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentPurpose {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "participant_share" => Ok(PaymentPurpose::ParticipantShare),
            "pre_authorization" => Ok(PaymentPurpose::PreAuthorization),
            "organizer_residual" => Ok(PaymentPurpose::OrganizerResidual),
            "invite_fee" => Ok(PaymentPurpose::InviteFee),
            "refund" => Ok(PaymentPurpose::Refund),
            other => Err(StoreError::Decode(format!("payment purpose '{other}'"))),
        }
    }
}

/// Payment record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRecordStatus {
    Pending,
    Authorized,
    Paid,
    Failed,
    Refunded,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Authorized => "authorized",
            PaymentRecordStatus::Paid => "paid",
            PaymentRecordStatus::Failed => "failed",
            PaymentRecordStatus::Refunded => "refunded",
        }
    }

    /// Allowed transitions. Writing the current status again is a no-op.
    pub fn can_transition_to(&self, next: PaymentRecordStatus) -> bool {
        use PaymentRecordStatus::*;

        match (self, next) {
            (current, next) if *current == next => true,
            (Pending, Authorized | Paid | Failed) => true,
            (Authorized, Paid | Failed | Refunded) => true,
            (Paid, Refunded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PaymentRecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentRecordStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentRecordStatus::Pending),
            "authorized" => Ok(PaymentRecordStatus::Authorized),
            "paid" => Ok(PaymentRecordStatus::Paid),
            "failed" => Ok(PaymentRecordStatus::Failed),
            "refunded" => Ok(PaymentRecordStatus::Refunded),
            other => Err(StoreError::Decode(format!("payment record status '{other}'"))),
        }
    }
}

/// One attempt to move money for a reservation or participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub participant_id: Option<Uuid>,
    pub account_id: Option<AccountId>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
    pub external_id: Option<String>,
    pub status: PaymentRecordStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a payment record about to be created
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub reservation_id: Uuid,
    pub participant_id: Option<Uuid>,
    pub account_id: Option<AccountId>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
    pub external_id: Option<String>,
    pub status: PaymentRecordStatus,
}

/// Update applied to a payment record after a gateway response or event
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentRecordStatus,
    pub external_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl PaymentUpdate {
    pub fn status(status: PaymentRecordStatus) -> Self {
        Self {
            status,
            external_id: None,
            failure_reason: None,
        }
    }
}

/// Webhook processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    Processing,
    Success,
    Error,
    InvalidSignature,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Received => "received",
            WebhookStatus::Processing => "processing",
            WebhookStatus::Success => "success",
            WebhookStatus::Error => "error",
            WebhookStatus::InvalidSignature => "invalid_signature",
        }
    }
}

impl std::fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(WebhookStatus::Received),
            "processing" => Ok(WebhookStatus::Processing),
            "success" => Ok(WebhookStatus::Success),
            "error" => Ok(WebhookStatus::Error),
            "invalid_signature" => Ok(WebhookStatus::InvalidSignature),
            other => Err(StoreError::Decode(format!("webhook status '{other}'"))),
        }
    }
}

/// Audit record of an inbound gateway callback, keyed by request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLogEntry {
    pub request_id: String,
    pub gateway: String,
    pub event_type: Option<String>,
    pub payment_external_id: Option<String>,
    pub signature_valid: Option<bool>,
    pub status: WebhookStatus,
    pub attempts: i32,
    pub error: Option<String>,
    pub processing_ms: Option<i64>,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Gateway event types the engine reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentConfirmed,
    PaymentReceived,
    PaymentAuthorized,
    PaymentRefused,
    PaymentOverdue,
    PaymentDeleted,
    AuthorizationExpired,
    PaymentRefunded,
    /// Any event the engine does not act on
    Other(String),
}

impl WebhookEvent {
    /// Parse the gateway's event name
    pub fn parse(name: &str) -> Self {
        match name {
            "PAYMENT_CONFIRMED" => WebhookEvent::PaymentConfirmed,
            "PAYMENT_RECEIVED" => WebhookEvent::PaymentReceived,
            "PAYMENT_AUTHORIZED" => WebhookEvent::PaymentAuthorized,
            "PAYMENT_REFUSED" | "PAYMENT_REPROVED_BY_RISK_ANALYSIS" => WebhookEvent::PaymentRefused,
            "PAYMENT_OVERDUE" => WebhookEvent::PaymentOverdue,
            "PAYMENT_DELETED" => WebhookEvent::PaymentDeleted,
            "PAYMENT_AUTHORIZATION_EXPIRED" => WebhookEvent::AuthorizationExpired,
            "PAYMENT_REFUNDED" => WebhookEvent::PaymentRefunded,
            other => WebhookEvent::Other(other.to_string()),
        }
    }

    /// Payment record status this event moves the record to, if any
    pub fn target_status(&self) -> Option<PaymentRecordStatus> {
        match self {
            WebhookEvent::PaymentConfirmed | WebhookEvent::PaymentReceived => {
                Some(PaymentRecordStatus::Paid)
            }
            WebhookEvent::PaymentAuthorized => Some(PaymentRecordStatus::Authorized),
            WebhookEvent::PaymentRefused
            | WebhookEvent::PaymentOverdue
            | WebhookEvent::PaymentDeleted
            | WebhookEvent::AuthorizationExpired => Some(PaymentRecordStatus::Failed),
            WebhookEvent::PaymentRefunded => Some(PaymentRecordStatus::Refunded),
            WebhookEvent::Other(_) => None,
        }
    }
}

/// Payment object carried by a webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayment {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub value: Option<Amount>,
}

/// Body of an inbound webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub payment: WebhookPayment,
}

/// What the webhook endpoint tells the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookAck {
    /// Signature verification failed; the payload was not processed
    Rejected { request_id: String },
    /// This request id already completed successfully
    Replayed { request_id: String },
    /// Another delivery of this request id is being processed
    InFlight { request_id: String },
    /// Processing ran; `ok = false` means the failure was logged for reprocessing
    Processed { request_id: String, ok: bool },
}

impl WebhookAck {
    pub fn request_id(&self) -> &str {
        match self {
            WebhookAck::Rejected { request_id }
            | WebhookAck::Replayed { request_id }
            | WebhookAck::InFlight { request_id }
            | WebhookAck::Processed { request_id, .. } => request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_record_transitions() {
        use PaymentRecordStatus::*;

        assert!(Pending.can_transition_to(Authorized));
        assert!(Pending.can_transition_to(Paid));
        assert!(Authorized.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Refunded));
        assert!(Paid.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn test_webhook_event_mapping() {
        assert_eq!(
            WebhookEvent::parse("PAYMENT_CONFIRMED").target_status(),
            Some(PaymentRecordStatus::Paid)
        );
        assert_eq!(
            WebhookEvent::parse("PAYMENT_OVERDUE").target_status(),
            Some(PaymentRecordStatus::Failed)
        );
        assert_eq!(
            WebhookEvent::parse("PAYMENT_REFUNDED").target_status(),
            Some(PaymentRecordStatus::Refunded)
        );
        assert_eq!(
            WebhookEvent::parse("PAYMENT_CREATED"),
            WebhookEvent::Other("PAYMENT_CREATED".to_string())
        );
        assert_eq!(WebhookEvent::parse("PAYMENT_CREATED").target_status(), None);
    }

    #[test]
    fn test_webhook_payload_parses_numeric_value() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"event":"PAYMENT_RECEIVED","payment":{"id":"pay_123","status":"RECEIVED","value":15.5}}"#,
        )
        .unwrap();
        assert_eq!(payload.payment.id, "pay_123");
        assert_eq!(payload.payment.value, Some(rust_decimal_macros::dec!(15.5)));
    }
}
