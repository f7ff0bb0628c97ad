//! Structured logging configuration.
//!
//! The library crate logs through the `log` facade; the subscriber installed
//! here also receives those records, so settlement and webhook logs carry the
//! same format as the request logs.

use courtbook::payments::WebhookAck;
use courtbook::settlement::SettlementSummary;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use cb_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Example
///
/// ```
/// use cb_server::logging::log_security_event;
///
/// log_security_event("invalid_cron_secret", None, "Settlement trigger rejected");
/// ```
pub fn log_security_event(event_type: &str, account_id: Option<&str>, message: &str) {
    tracing::warn!(
        event_type = event_type,
        account_id = account_id,
        "SECURITY: {}",
        message
    );
}

/// Log the outcome of one settlement batch
pub fn log_settlement_run(trigger: &str, summary: &SettlementSummary, duration_ms: u64) {
    if summary.errors > 0 {
        tracing::warn!(
            trigger = trigger,
            processed = summary.processed,
            errors = summary.errors,
            total = summary.total,
            skipped = summary.skipped,
            duration_ms = duration_ms,
            "Settlement run finished with errors"
        );
    } else {
        tracing::info!(
            trigger = trigger,
            processed = summary.processed,
            total = summary.total,
            skipped = summary.skipped,
            duration_ms = duration_ms,
            "Settlement run finished"
        );
    }
}

/// Log an acknowledged webhook delivery
pub fn log_webhook(gateway: &str, ack: &WebhookAck) {
    match ack {
        WebhookAck::Rejected { request_id } => tracing::warn!(
            gateway = gateway,
            request_id = %request_id,
            "Webhook rejected: invalid signature"
        ),
        WebhookAck::Replayed { request_id } => tracing::debug!(
            gateway = gateway,
            request_id = %request_id,
            "Webhook already processed"
        ),
        WebhookAck::InFlight { request_id } => tracing::debug!(
            gateway = gateway,
            request_id = %request_id,
            "Webhook delivery in flight elsewhere"
        ),
        WebhookAck::Processed { request_id, ok } => tracing::info!(
            gateway = gateway,
            request_id = %request_id,
            ok = *ok,
            "Webhook processed"
        ),
    }
}

/// Log API request/response
pub fn log_api_request(method: &str, path: &str, status_code: u16, duration_ms: u64) {
    if status_code >= 500 {
        tracing::warn!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request failed"
        );
    } else {
        tracing::info!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request completed"
        );
    }
}
