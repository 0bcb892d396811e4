// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-point money helpers.
//!
//! Amounts are plain [`Decimal`] values. Everything the engine stores is
//! quantized to two decimal places; the helpers here are the only place that
//! decides how that quantization happens.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places carried by every stored amount.
pub const DECIMAL_PLACES: u32 = 2;

/// Smallest amount a single share may carry (0.01).
pub const MIN_UNIT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rounds to two decimal places, midpoint away from zero (`2.345 -> 2.35`).
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns `true` when `amount` carries no more than two significant decimal
/// places. Trailing zeros do not count: `1.500` is accepted.
pub fn has_valid_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= DECIMAL_PLACES
}

/// `MIN_UNIT * count`: the amount that must stay in a pool to serve `count`
/// more claimants.
pub fn min_reserve(count: u32) -> Decimal {
    MIN_UNIT * Decimal::from(count)
}

/// Whole number of cents in `amount`, truncated toward zero.
///
/// Exact for every `Decimal`: the 96-bit mantissa times 100 fits an `i128`.
pub fn to_cents(amount: Decimal) -> i128 {
    let truncated = amount.trunc_with_scale(DECIMAL_PLACES);
    truncated.mantissa() * 10i128.pow(DECIMAL_PLACES - truncated.scale())
}

/// Converts a number of cents back into a two-place amount, or `None` if it
/// does not fit a `Decimal`.
pub fn from_cents(cents: i128) -> Option<Decimal> {
    Decimal::try_from_i128_with_scale(cents, DECIMAL_PLACES).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn min_unit_is_one_cent() {
        assert_eq!(MIN_UNIT, dec!(0.01));
    }

    #[test]
    fn rounds_midpoint_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(2.344)), dec!(2.34));
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
        assert_eq!(round_money(dec!(10) / dec!(3)), dec!(3.33));
    }

    #[test]
    fn scale_check_ignores_trailing_zeros() {
        assert!(has_valid_scale(dec!(10)));
        assert!(has_valid_scale(dec!(10.5)));
        assert!(has_valid_scale(dec!(10.55)));
        assert!(has_valid_scale(dec!(10.500)));
        assert!(!has_valid_scale(dec!(10.555)));
        assert!(!has_valid_scale(dec!(0.001)));
    }

    #[test]
    fn cents_conversion_truncates() {
        assert_eq!(to_cents(dec!(1.239)), 123);
        assert_eq!(to_cents(dec!(0)), 0);
        assert_eq!(to_cents(dec!(5)), 500);
        assert_eq!(from_cents(123), Some(dec!(1.23)));
    }

    #[test]
    fn cents_conversion_covers_large_pools() {
        assert_eq!(to_cents(dec!(1e18)), 100_000_000_000_000_000_000);
        assert_eq!(to_cents(Decimal::MAX), Decimal::MAX.mantissa() * 100);
        assert_eq!(from_cents(to_cents(dec!(1e18))), Some(dec!(1e18)));
        assert_eq!(from_cents(to_cents(Decimal::MAX)), None);
    }

    #[test]
    fn reserve_scales_with_count() {
        assert_eq!(min_reserve(0), Decimal::ZERO);
        assert_eq!(min_reserve(5), dec!(0.05));
    }
}
