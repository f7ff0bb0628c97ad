//! Access token verification.
//!
//! Accounts are authenticated by the platform's identity service; this crate
//! only checks the HS256 access tokens it issues.

use super::{
    errors::{AuthError, AuthResult},
    models::AccessTokenClaims,
};
use crate::reservation::AccountId;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

/// Shortest accepted signing secret
pub const MIN_SECRET_LEN: usize = 32;

/// Verifies (and, for tooling and tests, issues) access tokens
#[derive(Clone)]
pub struct TokenVerifier {
    jwt_secret: String,
    access_token_duration: Duration,
}

impl TokenVerifier {
    /// Create a verifier for `jwt_secret`
    ///
    /// # Errors
    ///
    /// * `AuthError::WeakSecret` - Secret shorter than [`MIN_SECRET_LEN`]
    pub fn new(jwt_secret: String) -> AuthResult<Self> {
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret(MIN_SECRET_LEN));
        }

        Ok(Self {
            jwt_secret,
            access_token_duration: Duration::minutes(15),
        })
    }

    /// Verify an access token
    ///
    /// # Arguments
    ///
    /// * `token` - JWT access token
    ///
    /// # Returns
    ///
    /// * `AuthResult<AccessTokenClaims>` - Decoded claims or error
    pub fn verify_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(token_data.claims)
    }

    /// Issue an access token for `account_id`
    pub fn issue_access_token(&self, account_id: AccountId) -> AuthResult<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: account_id,
            exp: (now + self.access_token_duration).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }
}
