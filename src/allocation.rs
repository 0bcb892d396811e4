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

//! Share allocation.
//!
//! Pure functions: given the pool state and a caller-supplied random number
//! generator, compute the share of the next claimant. `count` always
//! includes that claimant.
//!
//! | Kind | Share |
//! |------|-------|
//! | Fixed | `round(total / total_count, 2)`, last claimant takes the rest |
//! | Random | uniform cents in `[0.01, min(2 * avg, remaining - 0.01 * (count - 1))]` |
//!
//! Whenever the pool can still serve everyone, a share leaves at least
//! `0.01` for each claimant after it.

use crate::envelope::{Envelope, EnvelopeKind};
use crate::money::{MIN_UNIT, from_cents, min_reserve, round_money, to_cents};
use rand::Rng;
use rust_decimal::Decimal;

/// Share for the next claimant of `envelope`.
pub fn compute_share<R: Rng + ?Sized>(envelope: &Envelope, rng: &mut R) -> Decimal {
    match envelope.kind {
        EnvelopeKind::Fixed => fixed_share(
            envelope.total_amount,
            envelope.total_count,
            envelope.remaining_amount,
            envelope.remaining_count,
        ),
        EnvelopeKind::Random => {
            random_share(envelope.remaining_amount, envelope.remaining_count, rng)
        }
    }
}

/// Fixed split. The terminal claimant takes `remaining` verbatim so rounding
/// never leaves dust behind.
pub fn fixed_share(total: Decimal, total_count: u32, remaining: Decimal, count: u32) -> Decimal {
    if count <= 1 || total_count == 0 {
        return remaining;
    }
    let share = round_money(total / Decimal::from(total_count));
    // Half-up rounding can overshoot: 1.50 / 100 rounds to 0.02 per share.
    let ceiling = remaining - min_reserve(count - 1);
    if ceiling < MIN_UNIT {
        return even_split(remaining, count);
    }
    share.min(ceiling)
}

/// Double-average split.
pub fn random_share<R: Rng + ?Sized>(remaining: Decimal, count: u32, rng: &mut R) -> Decimal {
    if count <= 1 {
        return remaining;
    }
    if remaining < min_reserve(count) {
        return even_split(remaining, count);
    }

    let avg = remaining / Decimal::from(count);
    let mut upper = avg * Decimal::TWO;
    let ceiling = remaining - min_reserve(count - 1);
    if upper > ceiling {
        upper = ceiling;
    }
    if upper < MIN_UNIT {
        upper = MIN_UNIT;
    }

    let spread = to_cents(upper - MIN_UNIT);
    if spread <= 0 {
        return MIN_UNIT;
    }
    let drawn = rng.gen_range(0..=spread);
    match from_cents(drawn) {
        Some(extra) => round_money(MIN_UNIT + extra),
        None => even_split(remaining, count),
    }
}

fn even_split(remaining: Decimal, count: u32) -> Decimal {
    round_money(remaining / Decimal::from(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    fn drain_random(total: Decimal, count: u32, seed: u64) -> Vec<Decimal> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut remaining = total;
        let mut shares = Vec::new();
        for left in (1..=count).rev() {
            let share = random_share(remaining, left, &mut rng);
            remaining -= share;
            shares.push(share);
        }
        shares
    }

    #[test]
    fn fixed_even_split_with_terminal_remainder() {
        let total = dec!(10.00);
        let mut remaining = total;
        let mut shares = Vec::new();
        for left in (1..=3).rev() {
            let share = fixed_share(total, 3, remaining, left);
            remaining -= share;
            shares.push(share);
        }
        assert_eq!(shares, vec![dec!(3.33), dec!(3.33), dec!(3.34)]);
        assert_eq!(remaining, Decimal::ZERO);
    }

    #[test]
    fn fixed_share_is_capped_when_rounding_overshoots() {
        // 0.015 per share rounds up to 0.02; the pool cannot pay that to everyone.
        let total = dec!(1.50);
        let mut remaining = total;
        for left in (1..=100).rev() {
            let share = fixed_share(total, 100, remaining, left);
            assert!(share >= MIN_UNIT, "share {share} below minimum");
            remaining -= share;
            assert!(remaining >= min_reserve(left - 1));
        }
        assert_eq!(remaining, Decimal::ZERO);
    }

    #[test]
    fn single_claimant_takes_everything() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(random_share(dec!(7.77), 1, &mut rng), dec!(7.77));
        assert_eq!(fixed_share(dec!(10), 3, dec!(3.34), 1), dec!(3.34));
    }

    #[test]
    fn random_shares_respect_bounds() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let remaining = dec!(100.00);
            let count = 10;
            let share = random_share(remaining, count, &mut rng);
            assert!(share >= MIN_UNIT);
            assert!(share <= remaining - min_reserve(count - 1));
            assert!(share <= (remaining / Decimal::from(count)) * Decimal::TWO);
            assert_eq!(share, round_money(share));
        }
    }

    #[test]
    fn random_shares_spread_across_large_pools() {
        let remaining = dec!(1000000000000000000);
        let ceiling = remaining - min_reserve(1);
        let mut above_floor = 0;
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let share = random_share(remaining, 2, &mut rng);
            assert!(share >= MIN_UNIT);
            assert!(share <= ceiling);
            if share > MIN_UNIT {
                above_floor += 1;
            }
        }
        assert!(above_floor > 0);
    }

    #[test]
    fn random_drain_conserves_total() {
        for seed in 0..50 {
            let shares = drain_random(dec!(20.00), 7, seed);
            assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(20.00));
            assert!(shares.iter().all(|s| *s >= MIN_UNIT));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        assert_eq!(drain_random(dec!(50.00), 8, 42), drain_random(dec!(50.00), 8, 42));
    }

    #[test]
    fn tight_pool_gives_minimum_units() {
        let mut rng = StdRng::seed_from_u64(9);
        // Exactly one cent per claimant: nothing to randomize.
        assert_eq!(random_share(dec!(0.05), 5, &mut rng), MIN_UNIT);
    }

    #[test]
    fn underfunded_pool_falls_back_to_even_split() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(random_share(dec!(0.04), 5, &mut rng), dec!(0.01));
        assert_eq!(random_share(dec!(0.02), 5, &mut rng), dec!(0.00));
    }
}
