//! Prometheus metrics for monitoring settlement health.
//!
//! Metrics are exposed in Prometheus text format on a dedicated listener when
//! `METRICS_BIND` is set. Without an installed recorder every call here is a
//! no-op, which keeps handlers and tests free of conditionals.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use cb_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/payments/process", 200);
//! ```

use courtbook::payments::WebhookAck;
use courtbook::settlement::SettlementSummary;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Settlement Metrics
// ============================================================================

/// Record the counters of one settlement batch.
pub fn settlement_run(summary: &SettlementSummary, duration_ms: f64) {
    metrics::counter!("settlement_runs_total").increment(1);
    metrics::counter!("settlement_closures_total").increment(summary.processed as u64);
    metrics::counter!("settlement_failures_total").increment(summary.errors as u64);
    metrics::counter!("settlement_skipped_total").increment(summary.skipped as u64);
    metrics::histogram!("settlement_run_duration_ms").record(duration_ms);
}

/// Record a settlement batch that could not list its candidates.
pub fn settlement_run_failed() {
    metrics::counter!("settlement_run_failures_total").increment(1);
}

/// Record credits expired and webhooks retried by housekeeping.
pub fn housekeeping(expired_credits: u64, reprocessed: usize, recovered: usize) {
    metrics::counter!("credits_expired_total").increment(expired_credits);
    metrics::counter!("webhooks_reprocessed_total").increment(reprocessed as u64);
    metrics::counter!("webhooks_recovered_total").increment(recovered as u64);
}

// ============================================================================
// Webhook Metrics
// ============================================================================

/// Increment the webhook counter labelled with its outcome.
pub fn webhook_received(gateway: &str, ack: &WebhookAck) {
    let outcome = match ack {
        WebhookAck::Rejected { .. } => "rejected",
        WebhookAck::Replayed { .. } => "replayed",
        WebhookAck::InFlight { .. } => "in_flight",
        WebhookAck::Processed { ok: true, .. } => "processed",
        WebhookAck::Processed { ok: false, .. } => "errored",
    };
    metrics::counter!("webhooks_total",
        "gateway" => gateway.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// Payment Metrics
// ============================================================================

/// Increment the payment initiation counter.
pub fn payment_initiated(method: &str, outcome: &str) {
    metrics::counter!("payment_initiations_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Increment the invite acceptance counter.
pub fn invite_accepted(paid_with_credits: bool) {
    metrics::counter!("invite_acceptances_total",
        "credits" => paid_with_credits.to_string()
    )
    .increment(1);
}
