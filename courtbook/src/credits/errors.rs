//! Credit ledger error types.

use crate::db::StoreError;
use crate::money::Amount;
use thiserror::Error;

/// Credit ledger errors
#[derive(Debug, Error)]
pub enum CreditError {
    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Negative consumption or non-positive grant
    #[error("Invalid credit amount: {0}")]
    InvalidAmount(Amount),

    /// Grant that would already be expired
    #[error("Credit expiration must be in the future")]
    ExpiredOnGrant,
}

impl CreditError {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            CreditError::Store(_) => "store_error",
            CreditError::InvalidAmount(_) => "invalid_amount",
            CreditError::ExpiredOnGrant => "expired_on_grant",
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            CreditError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for credit ledger operations
pub type CreditResult<T> = Result<T, CreditError>;
