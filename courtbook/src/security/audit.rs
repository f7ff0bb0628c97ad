//! Bounded in-process buffer of security events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default number of events kept
pub const DEFAULT_EVENT_CAPACITY: usize = 500;

/// Security event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Security event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Webhook body did not match its signature
    InvalidWebhookSignature,

    /// Payment attempted on a reservation the caller has no stake in
    ForbiddenPayment,

    /// Cron endpoint called with a wrong or missing secret
    InvalidCronSecret,

    /// Bearer token could not be verified
    InvalidAccessToken,
}

impl SecurityEventKind {
    /// Severity recorded when no explicit one is given
    pub fn default_severity(&self) -> Severity {
        match self {
            SecurityEventKind::ForbiddenPayment => Severity::High,
            SecurityEventKind::InvalidWebhookSignature | SecurityEventKind::InvalidCronSecret => {
                Severity::Medium
            }
            SecurityEventKind::InvalidAccessToken => Severity::Low,
        }
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityEventKind::InvalidWebhookSignature => write!(f, "invalid_webhook_signature"),
            SecurityEventKind::ForbiddenPayment => write!(f, "forbidden_payment"),
            SecurityEventKind::InvalidCronSecret => write!(f, "invalid_cron_secret"),
            SecurityEventKind::InvalidAccessToken => write!(f, "invalid_access_token"),
        }
    }
}

/// Recorded security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Ring buffer of the most recent security events.
///
/// Owned by the process context and shared by reference; once `capacity`
/// is reached the oldest event is dropped.
#[derive(Debug)]
pub struct SecurityEventBuffer {
    capacity: usize,
    events: RwLock<VecDeque<SecurityEvent>>,
}

impl SecurityEventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an event with the kind's default severity
    pub async fn record(&self, kind: SecurityEventKind, details: serde_json::Value) {
        self.record_with_severity(kind, kind.default_severity(), details)
            .await;
    }

    pub async fn record_with_severity(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        details: serde_json::Value,
    ) {
        if severity >= Severity::High {
            log::warn!("Security event {kind} ({severity}): {details}");
        } else {
            log::info!("Security event {kind} ({severity}): {details}");
        }

        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(SecurityEvent {
            kind,
            severity,
            details,
            recorded_at: Utc::now(),
        });
    }

    /// Most recent events, newest first
    pub async fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Drop every recorded event
    pub async fn reset(&self) {
        self.events.write().await.clear();
    }
}

impl Default for SecurityEventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
