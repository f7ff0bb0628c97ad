//! Authentication error types.

use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token in the request
    #[error("Missing access token")]
    MissingToken,

    /// Token signature, shape or claims rejected
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// Signing secret too short to be safe
    #[error("JWT secret must be at least {0} characters")]
    WeakSecret(usize),
}

impl AuthError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            // Don't expose token structure
            AuthError::JwtError(_) => "Authentication failed".to_string(),
            AuthError::WeakSecret(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
