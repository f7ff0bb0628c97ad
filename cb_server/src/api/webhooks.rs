//! Inbound payment gateway callbacks.
//!
//! The body is verified against `x-gateway-signature` before it is parsed.
//! Anything past signature verification answers `200`, including processing
//! failures: those are logged for reprocessing, and a non-2xx answer would
//! only make the gateway redeliver a payload that fails the same way.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use courtbook::payments::WebhookAck;

use super::request_id::RequestId;
use super::{AppState, api_error};
use crate::{logging, metrics};

/// Header carrying the hex HMAC-SHA256 of the raw body
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Receive a webhook from `gateway`.
///
/// # Response
///
/// - `200 OK` with the acknowledgement (`processed`, `replayed`, `in_flight`)
/// - `401 Unauthorized` when the signature does not match
/// - `404 Not Found` for a gateway this server is not configured for
/// - `503 Service Unavailable` when the delivery could not be recorded
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let adapter = &state.context.adapter;
    if gateway != adapter.gateway_name() {
        return api_error(StatusCode::NOT_FOUND, "unknown_gateway", "Unknown gateway")
            .into_response();
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match adapter
        .ingest(Some(request_id.into_string()), &body, signature)
        .await
    {
        Ok(ack) => {
            logging::log_webhook(&gateway, &ack);
            metrics::webhook_received(&gateway, &ack);

            let status = match ack {
                WebhookAck::Rejected { .. } => StatusCode::UNAUTHORIZED,
                _ => StatusCode::OK,
            };
            (status, Json(ack)).into_response()
        }
        Err(e) => {
            tracing::error!(gateway = %gateway, "Failed to record webhook: {}", e);
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "webhook_unavailable",
                "Temporarily unavailable",
            )
            .into_response()
        }
    }
}
