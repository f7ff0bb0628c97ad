//! Reservation close-out.
//!
//! Shortly before a game, whatever the participants have not covered is
//! charged to the organizer: captured from a card hold when one exists,
//! otherwise debited from the organizer's wallet. Only then is the
//! reservation confirmed.

pub mod errors;
pub mod scheduler;

pub use errors::{SettlementError, SettlementResult};
pub use scheduler::{
    Closure, HousekeepingSummary, SettlementConfig, SettlementScheduler, SettlementSummary,
    organizer_residual,
};
