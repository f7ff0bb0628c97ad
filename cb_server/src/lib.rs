//! HTTP surface of the courtbook settlement engine.
//!
//! Exposes the settlement trigger, gateway webhooks, payment initiation and
//! invite acceptance over axum, plus the configuration, logging and metrics
//! the `cb_server` binary wires together.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
