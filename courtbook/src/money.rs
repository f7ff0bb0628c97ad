//! Currency helpers.
//!
//! The platform settles in a single currency with two minor-unit digits.
//! Every amount that is persisted or compared goes through [`round_currency`].

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Monetary amount in the platform currency
pub type Amount = Decimal;

/// Number of decimal places of the currency's minor unit
pub const CURRENCY_SCALE: u32 = 2;

/// Tolerance used when comparing amounts submitted by clients
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

/// Round to the currency's minor unit using half-up rounding.
///
/// `MidpointAwayFromZero` is half-up for the non-negative amounts this
/// engine handles.
pub fn round_currency(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// Whether two amounts are equal within [`AMOUNT_TOLERANCE`].
///
/// A difference too large to represent never matches.
pub fn amounts_match(a: Decimal, b: Decimal) -> bool {
    a.checked_sub(b)
        .is_some_and(|difference| difference.abs() <= AMOUNT_TOLERANCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_currency(dec!(10.005)), dec!(10.01));
        assert_eq!(round_currency(dec!(10.004)), dec!(10.00));
        assert_eq!(round_currency(dec!(33.333333)), dec!(33.33));
        assert_eq!(round_currency(dec!(66.666666)), dec!(66.67));
    }

    #[test]
    fn test_amounts_match_tolerance() {
        assert!(amounts_match(dec!(100.00), dec!(100.01)));
        assert!(amounts_match(dec!(100.00), dec!(99.99)));
        assert!(!amounts_match(dec!(100.00), dec!(100.02)));
    }

    #[test]
    fn test_amounts_match_survives_overflow() {
        assert!(!amounts_match(Decimal::MIN, dec!(100.00)));
        assert!(!amounts_match(Decimal::MAX, dec!(-100.00)));
        assert!(amounts_match(Decimal::MAX, Decimal::MAX));
    }
}
