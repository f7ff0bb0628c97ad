//! # Courtbook
//!
//! Settlement engine for shared court reservations.
//!
//! An organizer books a court and invites others to share the cost. The
//! engine decides who owes what, takes payments through a gateway, the
//! platform wallet or prepaid credits, reconciles the gateway's webhooks,
//! and shortly before the game charges the organizer whatever the group did
//! not cover.
//!
//! ## Lifecycle
//!
//! - **Split**: the organizer picks `none`, `percentage` or `fixed`; the
//!   [`split`] engine validates the values and computes each amount due
//! - **Payment**: participants pay by `pix`, `card`, `balance` or `credits`
//!   through the [`payments`] processor; gateway payments complete when the
//!   webhook arrives
//! - **Invite**: people joining through a link pay the invite fee from their
//!   [`credits`] when they have any
//! - **Close-out**: the [`settlement`] scheduler captures the organizer's card
//!   hold or debits their [`wallet`] for the residual and confirms the
//!   reservation
//!
//! ## Core Modules
//!
//! - [`db`]: Repository traits with PostgreSQL and in-memory implementations
//! - [`payments`]: Gateway adapter, webhook reconciliation, payment initiation
//! - [`context`]: Wiring of every component over one store and gateway
//!
//! ## Example
//!
//! ```no_run
//! use courtbook::context::{ContextConfig, SettlementContext};
//! use courtbook::db::InMemoryStore;
//! use courtbook::notifications::NotificationQueue;
//! use courtbook::payments::{GatewayConfig, HttpPaymentGateway};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = HttpPaymentGateway::new(GatewayConfig::default())?;
//! let context = SettlementContext::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(gateway),
//!     NotificationQueue::disabled(),
//!     ContextConfig::new("webhook_secret_value"),
//! );
//!
//! let summary = context.scheduler.run_once(chrono::Utc::now()).await?;
//! println!("Confirmed {} reservations", summary.processed);
//! # Ok(())
//! # }
//! ```

/// Access token verification.
pub mod auth;

/// Component wiring.
pub mod context;

/// Prepaid credits.
pub mod credits;

/// Persistence.
pub mod db;

/// Public invites.
pub mod invites;

pub mod money;
pub mod notifications;
pub mod payments;
pub mod reservation;
pub mod security;
pub mod settlement;
pub mod split;
pub mod wallet;

pub use context::{ContextConfig, SettlementContext};
pub use money::Amount;
