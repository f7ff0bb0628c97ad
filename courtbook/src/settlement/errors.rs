//! Settlement error types.

use crate::db::StoreError;
use crate::money::Amount;
use crate::payments::GatewayError;
use crate::wallet::WalletError;
use thiserror::Error;
use uuid::Uuid;

/// Errors while closing out a reservation
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Organizer wallet cannot cover the residual
    #[error("Organizer balance {available} does not cover residual {required}")]
    InsufficientOrganizerBalance { available: Amount, required: Amount },

    /// Capturing the organizer's hold failed
    #[error("Capture failed: {0}")]
    CaptureFailed(#[source] GatewayError),

    /// Residual is larger than the amount held on the organizer's card
    #[error("Residual {residual} exceeds held amount {held}")]
    CaptureExceedsHold { residual: Amount, held: Amount },

    /// An organizer payment is still awaiting the gateway
    #[error("Organizer payment {0} is still pending at the gateway")]
    CaptureInFlight(Uuid),

    /// Another run holds the reservation's settlement lease
    #[error("Reservation {0} is being settled by another run")]
    SettlementInProgress(Uuid),

    /// The reservation was no longer pending when confirming it
    #[error("Reservation {0} is already settled")]
    AlreadySettled(Uuid),

    /// Reservation not found
    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Wallet error
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

impl SettlementError {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InsufficientOrganizerBalance { .. } => "insufficient_organizer_balance",
            SettlementError::CaptureFailed(_) => "capture_failed",
            SettlementError::CaptureExceedsHold { .. } => "capture_exceeds_hold",
            SettlementError::CaptureInFlight(_) => "capture_in_flight",
            SettlementError::SettlementInProgress(_) => "settlement_in_progress",
            SettlementError::AlreadySettled(_) => "already_settled",
            SettlementError::ReservationNotFound(_) => "reservation_not_found",
            SettlementError::Store(_) => "store_error",
            SettlementError::Wallet(_) => "wallet_error",
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            SettlementError::CaptureFailed(e) => e.client_message(),
            SettlementError::Store(e) => e.client_message(),
            SettlementError::Wallet(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;
