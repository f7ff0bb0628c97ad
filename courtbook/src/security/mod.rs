//! Security audit trail.
//!
//! Rejected webhooks, forbidden payment attempts and bad credentials are
//! recorded in a bounded [`SecurityEventBuffer`] that the server exposes to
//! operators. The buffer is created with the process context and can be
//! reset explicitly.

pub mod audit;

pub use audit::{
    DEFAULT_EVENT_CAPACITY, SecurityEvent, SecurityEventBuffer, SecurityEventKind, Severity,
};
