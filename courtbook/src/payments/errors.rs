//! Payment error types.

use crate::credits::CreditError;
use crate::db::StoreError;
use crate::money::Amount;
use crate::wallet::WalletError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the external payment gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No response in time; the outcome is unknown
    #[error("Gateway timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or protocol failure; the outcome is unknown
    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered and refused the operation
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),

    /// The gateway answered with something we could not read
    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),

    /// Persistence error while recording the call
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Whether the gateway may have acted despite the error
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::Transport(_)
                | GatewayError::InvalidResponse(_)
        )
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Rejected(_) => "Payment was declined".to_string(),
            GatewayError::Timeout(_) | GatewayError::Transport(_) => {
                "Payment provider unavailable, the payment is pending".to_string()
            }
            GatewayError::InvalidResponse(_) | GatewayError::Store(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            GatewayError::InvalidResponse(error.to_string())
        } else {
            GatewayError::Transport(error.to_string())
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors while processing an inbound webhook payload
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Body is not the expected JSON shape
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// No payment record carries the referenced gateway id
    #[error("No payment record for external id {0}")]
    UnknownPayment(String),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for webhook processing
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Errors from payment initiation
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Caller has no stake in the reservation or participant
    #[error("Caller is not allowed to pay for this reservation")]
    Forbidden,

    /// Submitted amount differs from the amount due
    #[error("Amount mismatch: expected {expected}, got {submitted}")]
    AmountMismatch { expected: Amount, submitted: Amount },

    /// Reservation not found
    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    /// Participant not found on the reservation
    #[error("Participant not found: {0}")]
    ParticipantNotFound(Uuid),

    /// Reservation no longer accepts payments
    #[error("Reservation is not open for payment")]
    ReservationClosed,

    /// Participant already settled
    #[error("Participant has already paid")]
    AlreadyPaid,

    /// Split not configured yet for the participant
    #[error("No amount due is set for participant {0}")]
    AmountNotSet(Uuid),

    /// Wallet error
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// Credit ledger error
    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    /// Gateway error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PaymentError {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Forbidden => "forbidden",
            PaymentError::AmountMismatch { .. } => "amount_mismatch",
            PaymentError::ReservationNotFound(_) => "reservation_not_found",
            PaymentError::ParticipantNotFound(_) => "participant_not_found",
            PaymentError::ReservationClosed => "reservation_closed",
            PaymentError::AlreadyPaid => "already_paid",
            PaymentError::AmountNotSet(_) => "amount_not_set",
            PaymentError::Wallet(WalletError::InsufficientBalance { .. }) => "insufficient_balance",
            PaymentError::Wallet(_) => "wallet_error",
            PaymentError::Credit(_) => "credit_error",
            PaymentError::Gateway(_) => "gateway_error",
            PaymentError::Store(_) => "store_error",
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            PaymentError::Wallet(e) => e.client_message(),
            PaymentError::Credit(e) => e.client_message(),
            PaymentError::Gateway(e) => e.client_message(),
            PaymentError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for payment initiation
pub type PaymentResult<T> = Result<T, PaymentError>;
