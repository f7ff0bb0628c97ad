//! Reservations and their participants.
//!
//! Reservations are created by the booking flow (outside this crate); the
//! settlement engine only reads them, configures their split, and closes them
//! out. Participants join through the organizer, a team roster, or a public
//! invite.

pub mod models;

pub use models::{
    AccountId, NewParticipant, NewReservation, Participant, ParticipantOrigin, PaymentStatus,
    Reservation, ReservationStatus, SplitAssignment, SplitMode,
};
