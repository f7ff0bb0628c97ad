//! Authentication middleware.
//!
//! Extracts the JWT access token from the `Authorization: Bearer <token>`
//! header and injects the verified identity into request extensions.
//!
//! In handler functions, extract it from request extensions:
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use courtbook::auth::AccessTokenClaims;
//!
//! async fn protected_handler(Extension(claims): Extension<AccessTokenClaims>) -> String {
//!     format!("Authenticated as account {}", claims.sub)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use courtbook::auth::AccessTokenClaims;
use courtbook::reservation::AccountId;
use courtbook::security::SecurityEventKind;
use serde_json::json;

use super::{ApiError, AppState, api_error};

/// Identity of an optionally authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Option<AccountId>);

/// Bearer token of the request, if any
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Rejects the request unless it carries a valid access token.
///
/// - **Success**: injects [`AccessTokenClaims`] and calls the next handler
/// - **Missing or malformed header**: `401 Unauthorized`
/// - **Invalid or expired token**: `401 Unauthorized`, recorded as a security event
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(request.headers()) else {
        return Err(unauthorized());
    };

    let claims = verify(&state, token, request.uri().path()).await?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Accepts anonymous requests; a token that is present must be valid.
///
/// Always injects a [`Caller`].
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = match bearer_token(request.headers()) {
        Some(token) => Some(verify(&state, token, request.uri().path()).await?.sub),
        None => None,
    };

    request.extensions_mut().insert(Caller(caller));
    Ok(next.run(request).await)
}

async fn verify(state: &AppState, token: &str, path: &str) -> Result<AccessTokenClaims, ApiError> {
    match state.tokens.verify_access_token(token) {
        Ok(claims) => Ok(claims),
        Err(e) => {
            tracing::debug!(path = path, "Access token rejected: {}", e);
            state
                .context
                .security
                .record(
                    SecurityEventKind::InvalidAccessToken,
                    json!({ "path": path }),
                )
                .await;
            Err(unauthorized())
        }
    }
}

fn unauthorized() -> ApiError {
    api_error(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Authentication failed",
    )
}
