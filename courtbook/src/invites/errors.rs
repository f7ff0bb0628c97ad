//! Invite acceptance error types.

use crate::credits::CreditError;
use crate::db::StoreError;
use thiserror::Error;

/// Invite acceptance errors
#[derive(Debug, Error)]
pub enum InviteError {
    /// No invite with this token
    #[error("Invite not found")]
    InviteNotFound,

    /// Invite passed its expiration
    #[error("Invite has expired")]
    InviteExpired,

    /// Invite reached its maximum number of uses
    #[error("Invite has no uses left")]
    InviteExhausted,

    /// Reservation no longer accepts participants
    #[error("Reservation is no longer open")]
    ReservationNotPending,

    /// Submitted details are unusable
    #[error("Invalid acceptance: {0}")]
    InvalidAcceptance(String),

    /// Credit ledger error
    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl InviteError {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            InviteError::InviteNotFound => "invite_not_found",
            InviteError::InviteExpired => "invite_expired",
            InviteError::InviteExhausted => "invite_exhausted",
            InviteError::ReservationNotPending => "reservation_not_pending",
            InviteError::InvalidAcceptance(_) => "invalid_acceptance",
            InviteError::Credit(e) => e.code(),
            InviteError::Store(_) => "store_error",
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            InviteError::Credit(e) => e.client_message(),
            InviteError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for invite operations
pub type InviteResult<T> = Result<T, InviteError>;
