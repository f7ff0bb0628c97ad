//! Persistence error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the repository implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Query did not finish in time
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or state conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Status change not allowed by the entity's state machine
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Stored value could not be decoded
    #[error("Unknown {0}")]
    Decode(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        StoreError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            StoreError::Database(_) | StoreError::Timeout(_) | StoreError::Decode(_) => {
                "Internal server error".to_string()
            }
            StoreError::NotFound { entity, .. } => format!("{entity} not found"),
            _ => self.to_string(),
        }
    }
}

/// Result type for repository operations
pub type StoreResult<T> = Result<T, StoreError>;
