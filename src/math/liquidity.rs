//! Amount/liquidity conversions for concentrated-liquidity ranges.
//!
//! All quantities are non-negative big integers; divisions truncate, which
//! for non-negative operands matches the reference floor semantics.

use num_bigint::BigInt;
use num_traits::Zero;

use super::tick::q96;

/// Token0 owed for `liquidity` over [sqrt_a, sqrt_b] at the current price.
///
/// Above the range the position holds no token0; below it the full range
/// converts; in range only the [price, sqrt_b] half does.
pub fn amount0_for_liquidity(
    sqrt_price_x96: &BigInt,
    sqrt_a_x96: &BigInt,
    sqrt_b_x96: &BigInt,
    liquidity: &BigInt,
) -> BigInt {
    let (sqrt_a_x96, sqrt_b_x96) = ordered(sqrt_a_x96, sqrt_b_x96);

    if sqrt_price_x96 <= sqrt_a_x96 {
        calc_amount0(sqrt_a_x96, sqrt_b_x96, liquidity)
    } else if sqrt_price_x96 >= sqrt_b_x96 {
        BigInt::zero()
    } else {
        calc_amount0(sqrt_price_x96, sqrt_b_x96, liquidity)
    }
}

/// Token1 owed for `liquidity` over [sqrt_a, sqrt_b] at the current price.
pub fn amount1_for_liquidity(
    sqrt_price_x96: &BigInt,
    sqrt_a_x96: &BigInt,
    sqrt_b_x96: &BigInt,
    liquidity: &BigInt,
) -> BigInt {
    let (sqrt_a_x96, sqrt_b_x96) = ordered(sqrt_a_x96, sqrt_b_x96);

    if sqrt_price_x96 <= sqrt_a_x96 {
        BigInt::zero()
    } else if sqrt_price_x96 >= sqrt_b_x96 {
        calc_amount1(sqrt_a_x96, sqrt_b_x96, liquidity)
    } else {
        calc_amount1(sqrt_a_x96, sqrt_price_x96, liquidity)
    }
}

/// Maximum liquidity mintable from `amount0`/`amount1` over [sqrt_a, sqrt_b].
/// In range this is the minimum of the two one-sided liquidities.
pub fn liquidity_for_amounts(
    sqrt_price_x96: &BigInt,
    sqrt_a_x96: &BigInt,
    sqrt_b_x96: &BigInt,
    amount0: &BigInt,
    amount1: &BigInt,
) -> BigInt {
    let (sqrt_a_x96, sqrt_b_x96) = ordered(sqrt_a_x96, sqrt_b_x96);

    if sqrt_price_x96 <= sqrt_a_x96 {
        liquidity_for_amount0(sqrt_a_x96, sqrt_b_x96, amount0)
    } else if sqrt_price_x96 >= sqrt_b_x96 {
        liquidity_for_amount1(sqrt_a_x96, sqrt_b_x96, amount1)
    } else {
        let l0 = liquidity_for_amount0(sqrt_price_x96, sqrt_b_x96, amount0);
        let l1 = liquidity_for_amount1(sqrt_a_x96, sqrt_price_x96, amount1);
        l0.min(l1)
    }
}

fn ordered<'a>(sqrt_a_x96: &'a BigInt, sqrt_b_x96: &'a BigInt) -> (&'a BigInt, &'a BigInt) {
    if sqrt_a_x96 > sqrt_b_x96 {
        (sqrt_b_x96, sqrt_a_x96)
    } else {
        (sqrt_a_x96, sqrt_b_x96)
    }
}

// amount0 = L * Q96 * (sqrt_b - sqrt_a) / (sqrt_a * sqrt_b)
fn calc_amount0(sqrt_a_x96: &BigInt, sqrt_b_x96: &BigInt, liquidity: &BigInt) -> BigInt {
    let diff = sqrt_b_x96 - sqrt_a_x96;
    let numerator = liquidity * diff * q96();
    let denominator = sqrt_a_x96 * sqrt_b_x96;
    if denominator.is_zero() {
        return BigInt::zero();
    }
    numerator / denominator
}

// amount1 = L * (sqrt_b - sqrt_a) / Q96
fn calc_amount1(sqrt_a_x96: &BigInt, sqrt_b_x96: &BigInt, liquidity: &BigInt) -> BigInt {
    (liquidity * (sqrt_b_x96 - sqrt_a_x96)) / q96()
}

// L = amount0 * (sqrt_a * sqrt_b / Q96) / (sqrt_b - sqrt_a)
fn liquidity_for_amount0(sqrt_a_x96: &BigInt, sqrt_b_x96: &BigInt, amount0: &BigInt) -> BigInt {
    if amount0.is_zero() {
        return BigInt::zero();
    }
    let diff = sqrt_b_x96 - sqrt_a_x96;
    if diff.is_zero() {
        return BigInt::zero();
    }
    let product = (sqrt_a_x96 * sqrt_b_x96) / q96();
    (amount0 * product) / diff
}

// L = amount1 * Q96 / (sqrt_b - sqrt_a)
fn liquidity_for_amount1(sqrt_a_x96: &BigInt, sqrt_b_x96: &BigInt, amount1: &BigInt) -> BigInt {
    if amount1.is_zero() {
        return BigInt::zero();
    }
    let diff = sqrt_b_x96 - sqrt_a_x96;
    if diff.is_zero() {
        return BigInt::zero();
    }
    (amount1 * q96()) / diff
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::math::tick::sqrt_ratio_at_tick;

    fn big(v: u128) -> BigInt {
        BigInt::from(v)
    }

    #[test]
    fn amounts_vanish_on_the_wrong_side_of_the_range() {
        let sqrt_a = sqrt_ratio_at_tick(-1000).expect("tick in range");
        let sqrt_b = sqrt_ratio_at_tick(1000).expect("tick in range");
        let liquidity = big(1_000_000_000_000);

        // Price far above the range: the position is all token1.
        let above = sqrt_ratio_at_tick(5000).expect("tick in range");
        assert!(amount0_for_liquidity(&above, &sqrt_a, &sqrt_b, &liquidity).is_zero());
        assert!(amount1_for_liquidity(&above, &sqrt_a, &sqrt_b, &liquidity) > BigInt::zero());

        // Price far below: all token0.
        let below = sqrt_ratio_at_tick(-5000).expect("tick in range");
        assert!(amount1_for_liquidity(&below, &sqrt_a, &sqrt_b, &liquidity).is_zero());
        assert!(amount0_for_liquidity(&below, &sqrt_a, &sqrt_b, &liquidity) > BigInt::zero());
    }

    #[test]
    fn in_range_position_holds_both_tokens() {
        let sqrt_p = sqrt_ratio_at_tick(0).expect("tick in range");
        let sqrt_a = sqrt_ratio_at_tick(-600).expect("tick in range");
        let sqrt_b = sqrt_ratio_at_tick(600).expect("tick in range");
        let liquidity = big(1_000_000_000_000);

        let amount0 = amount0_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &liquidity);
        let amount1 = amount1_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &liquidity);
        assert!(amount0 > BigInt::zero());
        assert!(amount1 > BigInt::zero());

        // Symmetric range around tick 0 at price 1 implies near-equal sides.
        let diff = (&amount0 - &amount1).magnitude().clone();
        let bound = amount0.magnitude() / 100u32;
        assert!(diff < bound, "amount0 {amount0} vs amount1 {amount1}");
    }

    #[test]
    fn endpoint_order_does_not_matter() {
        let sqrt_p = sqrt_ratio_at_tick(10).expect("tick in range");
        let sqrt_a = sqrt_ratio_at_tick(-300).expect("tick in range");
        let sqrt_b = sqrt_ratio_at_tick(300).expect("tick in range");
        let liquidity = big(77_777_777);

        assert_eq!(
            amount0_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &liquidity),
            amount0_for_liquidity(&sqrt_p, &sqrt_b, &sqrt_a, &liquidity),
        );
        assert_eq!(
            amount1_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &liquidity),
            amount1_for_liquidity(&sqrt_p, &sqrt_b, &sqrt_a, &liquidity),
        );
    }

    #[test]
    fn zero_liquidity_yields_zero_amounts() {
        let sqrt_p = sqrt_ratio_at_tick(0).expect("tick in range");
        let sqrt_a = sqrt_ratio_at_tick(-100).expect("tick in range");
        let sqrt_b = sqrt_ratio_at_tick(100).expect("tick in range");

        assert!(amount0_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &BigInt::zero()).is_zero());
        assert!(amount1_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &BigInt::zero()).is_zero());
        assert!(
            liquidity_for_amounts(&sqrt_p, &sqrt_a, &sqrt_b, &BigInt::zero(), &BigInt::zero())
                .is_zero()
        );
    }

    #[test]
    fn degenerate_range_yields_zero_liquidity() {
        let sqrt_p = sqrt_ratio_at_tick(0).expect("tick in range");
        let sqrt_a = sqrt_ratio_at_tick(100).expect("tick in range");

        let liquidity =
            liquidity_for_amounts(&sqrt_p, &sqrt_a, &sqrt_a, &big(1_000_000), &big(1_000_000));
        assert!(liquidity.is_zero());
    }

    proptest! {
        // Converting L to amounts and back loses at most the truncation dust:
        // L' <= L and L' >= 0.99 * L.
        #[test]
        fn liquidity_round_trip_is_nearly_exact(
            tick_lower in -10_000i32..9_000,
            width in 10i32..4_000,
            price_tick in -12_000i32..12_000,
            liquidity_raw in 1_000_000_000u64..u64::MAX,
        ) {
            let tick_upper = tick_lower + width;
            let sqrt_a = sqrt_ratio_at_tick(tick_lower).expect("tick in range");
            let sqrt_b = sqrt_ratio_at_tick(tick_upper).expect("tick in range");
            let sqrt_p = sqrt_ratio_at_tick(price_tick).expect("tick in range");
            let liquidity = BigInt::from(liquidity_raw);

            let amount0 = amount0_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &liquidity);
            let amount1 = amount1_for_liquidity(&sqrt_p, &sqrt_a, &sqrt_b, &liquidity);
            let back = liquidity_for_amounts(&sqrt_p, &sqrt_a, &sqrt_b, &amount0, &amount1);

            prop_assert!(back <= liquidity);
            prop_assert!(&back * 100u32 >= &liquidity * 99u32, "L {liquidity} -> L' {back}");
        }
    }
}
