//! Access token verification for account-facing endpoints.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{AuthError, AuthResult};
pub use manager::{MIN_SECRET_LEN, TokenVerifier};
pub use models::AccessTokenClaims;
