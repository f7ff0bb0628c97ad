//! Credit ledger.
//!
//! Accounts accumulate prepaid credits (referrals, loyalty, adjustments) that
//! are spent soonest-to-expire first when a share or invite fee is paid.
//! Entries are never deleted; they move from `active` to `used` or `expired`.

pub mod errors;
pub mod ledger;
pub mod models;

pub use errors::{CreditError, CreditResult};
pub use ledger::{CreditLedger, plan_consumption};
pub use models::{
    CreditAllocation, CreditConsumption, CreditEntry, CreditSource, CreditStatus, NewCreditEntry,
};
