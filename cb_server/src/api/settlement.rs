//! Settlement trigger and operator endpoints.
//!
//! Both endpoints authenticate with `Authorization: Bearer <CRON_SECRET>`,
//! compared in constant time.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/settlement/run \
//!   -H "Authorization: Bearer $CRON_SECRET"
//! # {"processed":2,"errors":0,"total":2}
//! ```

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use courtbook::SettlementContext;
use courtbook::security::{SecurityEvent, SecurityEventKind};
use courtbook::settlement::{SettlementResult, SettlementSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use subtle::ConstantTimeEq;

use super::middleware::bearer_token;
use super::{ApiError, AppState, api_error};
use crate::{logging, metrics};

/// Default number of security events returned
const DEFAULT_EVENT_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub processed: usize,
    pub errors: usize,
    pub total: usize,
}

impl From<SettlementSummary> for RunResponse {
    fn from(summary: SettlementSummary) -> Self {
        Self {
            processed: summary.processed,
            errors: summary.errors,
            total: summary.total,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub capacity: usize,
    pub events: Vec<SecurityEvent>,
}

/// One scheduler tick: close due reservations, then housekeeping.
///
/// Shared by the HTTP trigger and the in-process interval loop.
pub async fn run_tick(
    context: &SettlementContext,
    trigger: &str,
) -> SettlementResult<SettlementSummary> {
    let started = Instant::now();
    let now = Utc::now();

    let summary = match context.scheduler.run_once(now).await {
        Ok(summary) => summary,
        Err(e) => {
            metrics::settlement_run_failed();
            tracing::error!(trigger = trigger, "Settlement run failed: {}", e);
            return Err(e);
        }
    };

    let elapsed = started.elapsed();
    logging::log_settlement_run(trigger, &summary, elapsed.as_millis() as u64);
    metrics::settlement_run(&summary, elapsed.as_secs_f64() * 1000.0);

    let housekeeping = context.scheduler.housekeeping(now).await;
    metrics::housekeeping(
        housekeeping.expired_credits,
        housekeeping.webhooks.attempted,
        housekeeping.webhooks.succeeded,
    );

    Ok(summary)
}

/// Run settlement for the reservations entering the closing window.
///
/// # Response
///
/// - `200 OK` with `{processed, errors, total}`
/// - `401 Unauthorized` for a missing or wrong secret
/// - `500 Internal Server Error` when the candidates could not be listed
pub async fn run_settlement(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RunResponse>, ApiError> {
    require_cron_secret(&state, &headers, "/api/v1/settlement/run").await?;

    let summary = run_tick(&state.context, "cron").await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            e.code(),
            e.client_message(),
        )
    })?;

    Ok(Json(summary.into()))
}

/// Most recent security events, newest first.
pub async fn security_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    require_cron_secret(&state, &headers, "/api/v1/security/events").await?;

    let security = &state.context.security;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(security.capacity());

    Ok(Json(EventsResponse {
        capacity: security.capacity(),
        events: security.recent(limit).await,
    }))
}

async fn require_cron_secret(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
) -> Result<(), ApiError> {
    let presented = bearer_token(headers).unwrap_or_default();
    if secrets_match(presented, &state.cron_secret) {
        return Ok(());
    }

    logging::log_security_event(
        "invalid_cron_secret",
        None,
        "Cron endpoint called without a valid secret",
    );
    state
        .context
        .security
        .record(SecurityEventKind::InvalidCronSecret, json!({ "path": path }))
        .await;

    Err(api_error(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Unauthorized",
    ))
}

/// Constant-time comparison of two secrets
fn secrets_match(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("cron-secret-value", "cron-secret-value"));
        assert!(!secrets_match("cron-secret-valuE", "cron-secret-value"));
        assert!(!secrets_match("", "cron-secret-value"));
        assert!(!secrets_match("", ""));
    }

    #[test]
    fn test_run_response_drops_skipped() {
        let response = RunResponse::from(SettlementSummary {
            processed: 2,
            errors: 1,
            total: 4,
            skipped: 1,
        });
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body, json!({"processed": 2, "errors": 1, "total": 4}));
    }
}
