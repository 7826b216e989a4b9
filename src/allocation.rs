//! Fund allocation across target segments.
//!
//! Two branches: value-proportional when the vault may swap between its
//! assets, fit-to-balance when it may not. All token/value arithmetic is
//! arbitrary-precision; price-squared terms never truncate early.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::coverage::Segment;
use crate::math::tick::{TickMathError, q96, q192, sqrt_ratio_at_tick};
use crate::math::{amount0_for_liquidity, amount1_for_liquidity, liquidity_for_amounts};

const WEIGHT_SCALE: u64 = 1_000_000_000_000_000_000;

/// Vault funds available for allocation, in raw token units.
#[derive(Debug, Clone)]
pub struct UserFunds {
    pub amount0: BigInt,
    pub amount1: BigInt,
}

/// Pool state snapshot the allocator prices against.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub sqrt_price_x96: BigInt,
    pub current_tick: i32,
    pub decimals0: u8,
    pub decimals1: u8,
}

/// A single planned position.
#[derive(Debug, Clone)]
pub struct PositionPlan {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: BigInt,
    pub amount0: BigInt,
    pub amount1: BigInt,
    pub weight: f64,
}

/// The swap required to realize a value-proportional plan.
#[derive(Debug, Clone)]
pub struct SwapPlan {
    /// Input amount in source-token units.
    pub amount_in: BigInt,
    /// true: token0 -> token1, false: token1 -> token0.
    pub zero_for_one: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationResult {
    pub positions: Vec<PositionPlan>,
    pub total_amount0: BigInt,
    pub total_amount1: BigInt,
    pub swap: Option<SwapPlan>,
}

#[derive(Debug)]
pub enum AllocationError {
    TickMath(TickMathError),
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TickMath(err) => write!(f, "segment tick out of range: {err}"),
        }
    }
}

impl std::error::Error for AllocationError {}

impl From<TickMathError> for AllocationError {
    fn from(value: TickMathError) -> Self {
        Self::TickMath(value)
    }
}

/// Distributes `funds` across `segments` proportionally to segment heights.
/// An empty segment list yields an empty plan with zero totals.
pub fn allocate(
    segments: &[Segment],
    funds: &UserFunds,
    pool: &PoolState,
    swap_allowed: bool,
) -> Result<AllocationResult, AllocationError> {
    if segments.is_empty() {
        return Ok(AllocationResult::default());
    }

    let weights = normalize_weights(segments);

    if swap_allowed {
        allocate_with_swap(segments, &weights, funds, pool)
    } else {
        allocate_without_swap(segments, &weights, funds, pool)
    }
}

/// Value-proportional branch: price everything in token1 units, split the
/// total by weight, solve each share for liquidity, then derive the swap
/// that covers whichever token runs short.
fn allocate_with_swap(
    segments: &[Segment],
    weights: &[f64],
    funds: &UserFunds,
    pool: &PoolState,
) -> Result<AllocationResult, AllocationError> {
    let total_value = total_value_in_token1(funds, pool);

    let mut positions = Vec::with_capacity(segments.len());
    let mut total_amount0 = BigInt::zero();
    let mut total_amount1 = BigInt::zero();

    for (segment, &weight) in segments.iter().zip(weights) {
        let allocated_value = mul_weight_floor(&total_value, weight);
        let position = position_for_value(
            &allocated_value,
            segment.tick_lower,
            segment.tick_upper,
            weight,
            pool,
        )?;

        total_amount0 += &position.amount0;
        total_amount1 += &position.amount1;
        positions.push(position);
    }

    let swap = swap_needed(&total_amount0, &total_amount1, funds, pool);

    Ok(AllocationResult {
        positions,
        total_amount0,
        total_amount1,
        swap,
    })
}

/// Fit-to-balance branch: split each token balance by weight and mint the
/// largest liquidity both per-segment budgets afford. Consumes at most the
/// available funds; never swaps.
fn allocate_without_swap(
    segments: &[Segment],
    weights: &[f64],
    funds: &UserFunds,
    pool: &PoolState,
) -> Result<AllocationResult, AllocationError> {
    let mut positions = Vec::with_capacity(segments.len());
    let mut total_amount0 = BigInt::zero();
    let mut total_amount1 = BigInt::zero();

    for (segment, &weight) in segments.iter().zip(weights) {
        let budget0 = mul_weight_floor(&funds.amount0, weight);
        let budget1 = mul_weight_floor(&funds.amount1, weight);

        let sqrt_a = sqrt_ratio_at_tick(segment.tick_lower)?;
        let sqrt_b = sqrt_ratio_at_tick(segment.tick_upper)?;

        let liquidity =
            liquidity_for_amounts(&pool.sqrt_price_x96, &sqrt_a, &sqrt_b, &budget0, &budget1);
        let amount0 = amount0_for_liquidity(&pool.sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);
        let amount1 = amount1_for_liquidity(&pool.sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);

        total_amount0 += &amount0;
        total_amount1 += &amount1;
        positions.push(PositionPlan {
            tick_lower: segment.tick_lower,
            tick_upper: segment.tick_upper,
            liquidity,
            amount0,
            amount1,
            weight,
        });
    }

    Ok(AllocationResult {
        positions,
        total_amount0,
        total_amount1,
        swap: None,
    })
}

/// Normalizes segment heights into weights summing to 1; equal weights when
/// every height is zero.
fn normalize_weights(segments: &[Segment]) -> Vec<f64> {
    let heights: Vec<f64> = segments
        .iter()
        .map(|s| s.liquidity_added.to_f64().unwrap_or(0.0).max(0.0))
        .collect();
    let total: f64 = heights.iter().sum();

    if total == 0.0 {
        return vec![1.0 / segments.len() as f64; segments.len()];
    }
    heights.iter().map(|h| h / total).collect()
}

/// totalValue = amount0 * sqrtPrice^2 / Q192 + amount1.
fn total_value_in_token1(funds: &UserFunds, pool: &PoolState) -> BigInt {
    let sqrt_price_squared = &pool.sqrt_price_x96 * &pool.sqrt_price_x96;
    (&funds.amount0 * sqrt_price_squared) / q192() + &funds.amount1
}

/// floor(value * weight) via an 18-decimal fixed-point scale.
fn mul_weight_floor(value: &BigInt, weight: f64) -> BigInt {
    let scaled = BigInt::from((weight.clamp(0.0, 1.0) * WEIGHT_SCALE as f64) as u64);
    (value * scaled) / BigInt::from(WEIGHT_SCALE)
}

/// Solves one segment for the liquidity consuming exactly `value` token1
/// units at the current price, then derives its token amounts.
fn position_for_value(
    value: &BigInt,
    tick_lower: i32,
    tick_upper: i32,
    weight: f64,
    pool: &PoolState,
) -> Result<PositionPlan, AllocationError> {
    let sqrt_a = sqrt_ratio_at_tick(tick_lower)?;
    let sqrt_b = sqrt_ratio_at_tick(tick_upper)?;

    let liquidity = liquidity_from_value(value, &pool.sqrt_price_x96, &sqrt_a, &sqrt_b);
    let amount0 = amount0_for_liquidity(&pool.sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);
    let amount1 = amount1_for_liquidity(&pool.sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);

    Ok(PositionPlan {
        tick_lower,
        tick_upper,
        liquidity,
        amount0,
        amount1,
        weight,
    })
}

/// Closed-form value -> liquidity, split on where the price sits relative
/// to the range.
fn liquidity_from_value(
    value: &BigInt,
    sqrt_price_x96: &BigInt,
    sqrt_a_x96: &BigInt,
    sqrt_b_x96: &BigInt,
) -> BigInt {
    let (sqrt_a_x96, sqrt_b_x96) = if sqrt_a_x96 > sqrt_b_x96 {
        (sqrt_b_x96, sqrt_a_x96)
    } else {
        (sqrt_a_x96, sqrt_b_x96)
    };
    let diff = sqrt_b_x96 - sqrt_a_x96;
    if diff.is_zero() {
        return BigInt::zero();
    }

    if sqrt_price_x96 <= sqrt_a_x96 {
        // Below range, all token0:
        // L = value * sqrtA * sqrtB * Q96 * Q192 / (sqrtP^2 * (sqrtB - sqrtA))
        let numerator = value * sqrt_a_x96 * sqrt_b_x96 * q96() * q192();
        let sqrt_price_squared = sqrt_price_x96 * sqrt_price_x96;
        let denominator = sqrt_price_squared * diff;
        if denominator.is_zero() {
            return BigInt::zero();
        }
        numerator / denominator
    } else if sqrt_price_x96 >= sqrt_b_x96 {
        // Above range, all token1: L = value * Q96 / (sqrtB - sqrtA)
        (value * q96()) / diff
    } else {
        // In range: value = L * ((sqrtB - sqrtP) * price / (sqrtP * sqrtB) + (sqrtP - sqrtA))
        let diff_bp = sqrt_b_x96 - sqrt_price_x96;
        let sqrt_price_squared = sqrt_price_x96 * sqrt_price_x96;
        let term1 = (diff_bp * sqrt_price_squared) / (sqrt_price_x96 * sqrt_b_x96);
        let term2 = sqrt_price_x96 - sqrt_a_x96;
        let coef = term1 + term2;
        if coef.is_zero() {
            return BigInt::zero();
        }
        (value * q96()) / coef
    }
}

/// Compares planned totals against available funds; at most one token can
/// run short, and that deficit fixes the swap direction and input amount.
fn swap_needed(
    total_needed0: &BigInt,
    total_needed1: &BigInt,
    funds: &UserFunds,
    pool: &PoolState,
) -> Option<SwapPlan> {
    let deficit0 = total_needed0 - &funds.amount0;
    let deficit1 = total_needed1 - &funds.amount1;
    let sqrt_price_squared = &pool.sqrt_price_x96 * &pool.sqrt_price_x96;

    if deficit0 > BigInt::zero() {
        // Short of token0: swap token1 -> token0.
        // amountIn (token1) = deficit0 * sqrtP^2 / Q192
        let amount_in = (deficit0 * sqrt_price_squared) / q192();
        return Some(SwapPlan {
            amount_in,
            zero_for_one: false,
        });
    }
    if deficit1 > BigInt::zero() {
        // Short of token1: swap token0 -> token1.
        // amountIn (token0) = deficit1 * Q192 / sqrtP^2
        if sqrt_price_squared.is_zero() {
            return None;
        }
        let amount_in = (deficit1 * q192()) / sqrt_price_squared;
        return Some(SwapPlan {
            amount_in,
            zero_for_one: true,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use num_traits::One;

    use super::*;

    fn segment(tick_lower: i32, tick_upper: i32, height: u64) -> Segment {
        Segment {
            tick_lower,
            tick_upper,
            liquidity_added: BigInt::from(height),
        }
    }

    fn pool_at_price_one() -> PoolState {
        PoolState {
            sqrt_price_x96: q96().clone(),
            current_tick: 0,
            decimals0: 18,
            decimals1: 18,
        }
    }

    fn one_token() -> BigInt {
        BigInt::from(10u8).pow(18)
    }

    #[test]
    fn empty_segments_yield_empty_plan() {
        let funds = UserFunds {
            amount0: one_token(),
            amount1: one_token(),
        };
        let result =
            allocate(&[], &funds, &pool_at_price_one(), true).expect("empty plan should not fail");

        assert!(result.positions.is_empty());
        assert!(result.total_amount0.is_zero());
        assert!(result.total_amount1.is_zero());
        assert!(result.swap.is_none());
    }

    #[test]
    fn swap_branch_respects_segment_weights() {
        // Heights 1/2/1 => weights 0.25 / 0.5 / 0.25.
        let segments = vec![
            segment(-1000, -500, 1),
            segment(-500, 500, 2),
            segment(500, 1000, 1),
        ];
        let funds = UserFunds {
            amount0: one_token(),
            amount1: one_token(),
        };

        let result = allocate(&segments, &funds, &pool_at_price_one(), true)
            .expect("allocation should succeed");

        assert_eq!(result.positions.len(), 3);
        for position in &result.positions {
            assert!(position.liquidity > BigInt::zero(), "zero L at {position:?}");
        }
        let weights: Vec<f64> = result.positions.iter().map(|p| p.weight).collect();
        assert!((weights[0] - 0.25).abs() < 0.01);
        assert!((weights[1] - 0.50).abs() < 0.01);
        assert!((weights[2] - 0.25).abs() < 0.01);
    }

    #[test]
    fn swap_branch_buys_missing_token0() {
        // All funds in token1, target is a below-range segment that wants
        // only token0: roughly half the token1 must be swapped over.
        let segments = vec![segment(1000, 2000, 1)];
        let funds = UserFunds {
            amount0: BigInt::zero(),
            amount1: &one_token() * 2u8,
        };
        let pool = pool_at_price_one();

        let result = allocate(&segments, &funds, &pool, true).expect("allocation should succeed");

        let swap = result.swap.expect("a swap should be required");
        assert!(!swap.zero_for_one, "must swap token1 -> token0");

        // At price 1 the deficit in token0 converts 1:1 into token1 input.
        let expected = result.total_amount0.clone();
        let tolerance = &expected / 100u8 + BigInt::one();
        let delta = (&swap.amount_in - &expected).magnitude().clone();
        assert!(
            delta <= *tolerance.magnitude(),
            "swap {} vs expected {}",
            swap.amount_in,
            expected
        );
        assert!(swap.amount_in > &one_token() / 2u8);
    }

    #[test]
    fn swap_branch_produces_at_most_one_direction() {
        let segments = vec![segment(-600, 600, 3), segment(600, 1200, 1)];
        let funds = UserFunds {
            amount0: one_token(),
            amount1: one_token(),
        };

        let result = allocate(&segments, &funds, &pool_at_price_one(), true)
            .expect("allocation should succeed");

        if let Some(swap) = &result.swap {
            assert!(swap.amount_in > BigInt::zero());
        }
    }

    #[test]
    fn no_swap_branch_never_exceeds_funds() {
        let segments = vec![
            segment(-2000, -1000, 2),
            segment(-1000, 1000, 5),
            segment(1000, 2000, 2),
        ];
        let funds = UserFunds {
            amount0: one_token(),
            amount1: &one_token() * 3u8,
        };

        let result = allocate(&segments, &funds, &pool_at_price_one(), false)
            .expect("allocation should succeed");

        assert!(result.swap.is_none());
        assert!(result.total_amount0 <= funds.amount0);
        assert!(result.total_amount1 <= funds.amount1);
    }

    #[test]
    fn zero_heights_fall_back_to_equal_weights() {
        let segments = vec![segment(-500, 0, 0), segment(0, 500, 0)];
        let weights = normalize_weights(&segments);
        assert_eq!(weights, vec![0.5, 0.5]);
    }

    #[test]
    fn total_value_prices_token0_through_the_pool() {
        let funds = UserFunds {
            amount0: one_token(),
            amount1: one_token(),
        };
        // price == 1: total value is simply the sum.
        let value = total_value_in_token1(&funds, &pool_at_price_one());
        assert_eq!(value, &one_token() * 2u8);
    }

    #[test]
    fn liquidity_from_value_covers_all_three_price_cases() {
        let value = one_token();
        let sqrt_a = sqrt_ratio_at_tick(-1000).expect("tick in range");
        let sqrt_b = sqrt_ratio_at_tick(1000).expect("tick in range");

        let below = sqrt_ratio_at_tick(-2000).expect("tick in range");
        let inside = q96().clone();
        let above = sqrt_ratio_at_tick(2000).expect("tick in range");

        for sqrt_p in [&below, &inside, &above] {
            let liquidity = liquidity_from_value(&value, sqrt_p, &sqrt_a, &sqrt_b);
            assert!(liquidity > BigInt::zero(), "zero L at price {sqrt_p}");

            // The liquidity's value at that price should reproduce the input
            // value closely.
            let amount0 = amount0_for_liquidity(sqrt_p, &sqrt_a, &sqrt_b, &liquidity);
            let amount1 = amount1_for_liquidity(sqrt_p, &sqrt_a, &sqrt_b, &liquidity);
            let realized = (&amount0 * sqrt_p * sqrt_p) / q192() + &amount1;
            let delta = (&realized - &value).magnitude().clone();
            let bound = value.magnitude() / 50u8;
            assert!(delta <= bound, "value {value} realized as {realized}");
        }
    }

    #[test]
    fn weight_multiplication_truncates() {
        let value = BigInt::from(1_000_000u64);
        assert_eq!(mul_weight_floor(&value, 0.5), BigInt::from(500_000u64));
        assert_eq!(mul_weight_floor(&value, 0.0), BigInt::zero());
        assert_eq!(mul_weight_floor(&value, 1.0), value);
    }
}
