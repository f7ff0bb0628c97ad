//! Split-billing policy.
//!
//! A reservation's cost is either carried by the organizer (`none`), divided
//! by percentages that add up to 100, or assigned as fixed amounts whose sum
//! may stay below the total (the organizer covers the difference at closure).

pub mod engine;
pub mod errors;

pub use engine::{SplitPolicyEngine, SplitShare};
pub use errors::{SplitError, SplitResult};
