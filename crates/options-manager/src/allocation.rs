//! Position sizing.
//!
//! Entry size is the budget divided by the combined premium of both legs;
//! exit sizes are fractions of whatever is still open.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Smallest size the broker accepts.
pub const MIN_DEAL_SIZE: Decimal = dec!(0.01);

/// Size for each leg of a strangle.
///
/// `floor(budget / premium)` to a multiple of `granularity`, never less than
/// one granularity unit. Returns `None` when the premium is not positive or
/// the size does not fit a `Decimal`.
#[must_use]
pub fn entry_size(budget: Decimal, premium: Decimal, granularity: Decimal) -> Option<Decimal> {
    if premium <= Decimal::ZERO || granularity <= Decimal::ZERO {
        return None;
    }
    let raw = budget.checked_div(premium)?;
    let units = raw.checked_div(granularity)?.floor();
    Some(units.checked_mul(granularity)?.max(granularity).normalize())
}

/// Size to sell for `fraction` of `remaining`.
///
/// Rounded to 2 decimal places, at least [`MIN_DEAL_SIZE`] and never more than
/// `remaining`, so a close request cannot exceed the open size.
#[must_use]
pub fn sell_size(remaining: Decimal, fraction: Decimal) -> Decimal {
    if remaining <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (remaining * fraction)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(MIN_DEAL_SIZE)
        .min(remaining)
}

/// Limit level for an entry: double the offer, so the order fills at the
/// prevailing price instead of resting.
#[must_use]
pub fn entry_limit(offer: Decimal) -> Decimal {
    offer * Decimal::TWO
}

/// Limit level for an exit: half the bid.
#[must_use]
pub fn exit_limit(bid: Decimal) -> Decimal {
    (bid / Decimal::TWO).round_dp(2)
}
