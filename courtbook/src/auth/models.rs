//! Authentication data models.

use crate::reservation::AccountId;
use serde::{Deserialize, Serialize};

/// JWT claims for access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: AccountId, // Account ID
    pub exp: i64,       // Expiration timestamp
    pub iat: i64,       // Issued at timestamp
}
