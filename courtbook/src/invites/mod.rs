//! Public invites to join a reservation.

pub mod acceptance;
pub mod errors;
pub mod models;

pub use acceptance::InviteAcceptanceCreditConsumer;
pub use errors::{InviteError, InviteResult};
pub use models::{AcceptInvite, Invite, InviteAcceptance, NewInvite};
