//! Payment initiation.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/payments/process \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"reservation_id":"…","participant_id":"…","amount":"35.00","method":"pix"}'
//! ```

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
};
use courtbook::auth::AccessTokenClaims;
use courtbook::payments::{GatewayError, PaymentError, PaymentOutcome, ProcessPayment};
use courtbook::wallet::WalletError;

use super::{ApiError, AppState, api_error};
use crate::metrics;

/// Start a payment for a participant share or a reservation total.
///
/// Wallet and credit payments complete synchronously. Card and pix payments
/// answer with a `pending` record that the gateway's webhook completes.
///
/// # Response
///
/// - `200 OK` with the payment outcome
/// - `403 Forbidden` when the caller has no stake in the reservation
/// - `404 Not Found` for an unknown reservation or participant
/// - `409 Conflict` when the reservation is closed or the share already paid
/// - `422 Unprocessable Entity` for an amount mismatch or insufficient balance
/// - `502 Bad Gateway` when the gateway refused or did not answer
pub async fn process_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessTokenClaims>,
    Json(request): Json<ProcessPayment>,
) -> Result<Json<PaymentOutcome>, ApiError> {
    let method = request.method;
    let reservation_id = request.reservation_id;

    match state.context.processor.process(claims.sub, request).await {
        Ok(outcome) => {
            metrics::payment_initiated(method.as_str(), "accepted");
            Ok(Json(outcome))
        }
        Err(e) => {
            metrics::payment_initiated(method.as_str(), e.code());
            let status = payment_error_status(&e);
            if status.is_server_error() {
                tracing::error!(
                    account_id = %claims.sub,
                    reservation_id = %reservation_id,
                    "Payment failed: {}",
                    e
                );
            } else {
                tracing::warn!(
                    account_id = %claims.sub,
                    reservation_id = %reservation_id,
                    "Payment refused: {}",
                    e
                );
            }
            Err(api_error(status, e.code(), e.client_message()))
        }
    }
}

fn payment_error_status(error: &PaymentError) -> StatusCode {
    match error {
        PaymentError::Forbidden => StatusCode::FORBIDDEN,
        PaymentError::ReservationNotFound(_) | PaymentError::ParticipantNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        PaymentError::ReservationClosed | PaymentError::AlreadyPaid => StatusCode::CONFLICT,
        PaymentError::AmountMismatch { .. } | PaymentError::AmountNotSet(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PaymentError::Wallet(WalletError::InsufficientBalance { .. })
        | PaymentError::Wallet(WalletError::WalletNotFound(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentError::Wallet(WalletError::InvalidAmount(_)) => StatusCode::BAD_REQUEST,
        PaymentError::Wallet(WalletError::DuplicateTransaction(_)) => StatusCode::CONFLICT,
        PaymentError::Credit(courtbook::credits::CreditError::InvalidAmount(_)) => {
            StatusCode::BAD_REQUEST
        }
        PaymentError::Gateway(GatewayError::Rejected(_)) => StatusCode::PAYMENT_REQUIRED,
        PaymentError::Gateway(GatewayError::Store(_))
        | PaymentError::Wallet(_)
        | PaymentError::Credit(_)
        | PaymentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
    }
}
