//! Invite acceptance.
//!
//! Anonymous guests may accept an invite; a signed-in guest's credits are
//! applied to the invite fee.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/invites/TOKEN/accept \
//!   -H "Content-Type: application/json" \
//!   -d '{"name":"Carla","email":"carla@example.com"}'
//! ```

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use courtbook::credits::CreditError;
use courtbook::invites::{AcceptInvite, InviteAcceptance, InviteError};

use super::middleware::Caller;
use super::{ApiError, AppState, api_error};
use crate::metrics;

/// Accept the invite behind `token`.
///
/// # Response
///
/// - `201 Created` with the new participant and any credits applied
/// - `404 Not Found` for an unknown token
/// - `409 Conflict` when the invite is used up or the reservation closed
/// - `410 Gone` for an expired invite
/// - `422 Unprocessable Entity` for unusable guest details
pub async fn accept_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Extension(Caller(account_id)): Extension<Caller>,
    Json(request): Json<AcceptInvite>,
) -> Result<(StatusCode, Json<InviteAcceptance>), ApiError> {
    match state
        .context
        .invites
        .accept(&token, request, account_id, Utc::now())
        .await
    {
        Ok(acceptance) => {
            metrics::invite_accepted(acceptance.payment.is_some());
            Ok((StatusCode::CREATED, Json(acceptance)))
        }
        Err(e) => {
            let status = invite_error_status(&e);
            if status.is_server_error() {
                tracing::error!("Invite acceptance failed: {}", e);
            } else {
                tracing::info!("Invite acceptance refused: {}", e);
            }
            Err(api_error(status, e.code(), e.client_message()))
        }
    }
}

fn invite_error_status(error: &InviteError) -> StatusCode {
    match error {
        InviteError::InviteNotFound => StatusCode::NOT_FOUND,
        InviteError::InviteExpired => StatusCode::GONE,
        InviteError::InviteExhausted | InviteError::ReservationNotPending => StatusCode::CONFLICT,
        InviteError::InvalidAcceptance(_) => StatusCode::UNPROCESSABLE_ENTITY,
        InviteError::Credit(CreditError::InvalidAmount(_)) => StatusCode::BAD_REQUEST,
        InviteError::Credit(_) | InviteError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_error_status() {
        assert_eq!(
            invite_error_status(&InviteError::InviteExpired),
            StatusCode::GONE
        );
        assert_eq!(
            invite_error_status(&InviteError::InviteExhausted),
            StatusCode::CONFLICT
        );
        assert_eq!(
            invite_error_status(&InviteError::InvalidAcceptance("name".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
