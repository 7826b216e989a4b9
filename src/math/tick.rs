use std::fmt;
use std::sync::OnceLock;

use alloy_primitives::U256;
use num_bigint::{BigInt, Sign};
use uniswap_v3_math::error::UniswapV3MathError;
use uniswap_v3_math::tick_math;

/// Lowest tick representable by the pool: log base 1.0001 of 2^-128.
pub const MIN_TICK: i32 = -887272;
/// Highest tick representable by the pool.
pub const MAX_TICK: i32 = 887272;

/// Q96 = 2^96, the fixed-point scale of sqrtPriceX96.
pub fn q96() -> &'static BigInt {
    static Q96: OnceLock<BigInt> = OnceLock::new();
    Q96.get_or_init(|| BigInt::from(1u8) << 96)
}

/// Q192 = 2^192, the scale of sqrtPriceX96 squared.
pub fn q192() -> &'static BigInt {
    static Q192: OnceLock<BigInt> = OnceLock::new();
    Q192.get_or_init(|| BigInt::from(1u8) << 192)
}

#[derive(Debug)]
pub enum TickMathError {
    /// sqrt ratio does not fit the uint160 range the pool contract accepts.
    SqrtRatioOutOfBounds(BigInt),
    Math(UniswapV3MathError),
}

impl fmt::Display for TickMathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqrtRatioOutOfBounds(value) => {
                write!(f, "sqrt ratio {value} outside the valid uint160 range")
            }
            Self::Math(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TickMathError {}

impl From<UniswapV3MathError> for TickMathError {
    fn from(value: UniswapV3MathError) -> Self {
        Self::Math(value)
    }
}

/// Converts an unsigned chain word to a big integer.
pub fn u256_to_big(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// Converts a non-negative big integer back to a chain word.
/// Fails for negative values or values wider than 256 bits.
pub fn big_to_u256(value: &BigInt) -> Option<U256> {
    if value.sign() == Sign::Minus {
        return None;
    }
    let (_, bytes) = value.to_bytes_be();
    if bytes.len() > 32 {
        return None;
    }
    Some(U256::from_be_slice(&bytes))
}

/// sqrt(1.0001^tick) * 2^96, exact per the reference fixed-point port.
/// Fails when |tick| exceeds [`MAX_TICK`].
pub fn sqrt_ratio_at_tick(tick: i32) -> Result<BigInt, TickMathError> {
    let ratio = tick_math::get_sqrt_ratio_at_tick(tick)?;
    Ok(u256_to_big(ratio))
}

/// Greatest tick whose sqrt ratio is <= the input.
/// Fails when the input lies outside [MIN_SQRT_RATIO, MAX_SQRT_RATIO).
pub fn tick_at_sqrt_ratio(sqrt_price_x96: &BigInt) -> Result<i32, TickMathError> {
    let word = big_to_u256(sqrt_price_x96)
        .ok_or_else(|| TickMathError::SqrtRatioOutOfBounds(sqrt_price_x96.clone()))?;
    Ok(tick_math::get_tick_at_sqrt_ratio(word)?)
}

#[cfg(test)]
mod tests {
    use num_traits::Zero;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn q_constants_are_powers_of_two() {
        assert_eq!(q96(), &(BigInt::from(1u8) << 96));
        assert_eq!(q192(), &(q96() * q96()));
    }

    #[test]
    fn sqrt_ratio_at_tick_zero_is_q96() {
        let ratio = sqrt_ratio_at_tick(0).expect("tick 0 should be valid");
        assert_eq!(&ratio, q96());
    }

    #[test]
    fn sqrt_ratio_matches_reference_bounds() {
        let min = sqrt_ratio_at_tick(MIN_TICK).expect("min tick should be valid");
        assert_eq!(min, BigInt::from(4295128739u64));

        let max = sqrt_ratio_at_tick(MAX_TICK).expect("max tick should be valid");
        let expected: BigInt = "1461446703485210103287273052203988822378723970342"
            .parse()
            .expect("max sqrt ratio literal should parse");
        assert_eq!(max, expected);
    }

    #[test]
    fn sqrt_ratio_rejects_out_of_range_tick() {
        assert!(sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(sqrt_ratio_at_tick(MIN_TICK - 1).is_err());
    }

    #[test]
    fn tick_at_sqrt_ratio_rejects_negative_input() {
        let negative = BigInt::from(-1);
        assert!(tick_at_sqrt_ratio(&negative).is_err());
    }

    #[test]
    fn tick_at_sqrt_ratio_rejects_below_min() {
        let below = BigInt::from(4295128738u64);
        assert!(tick_at_sqrt_ratio(&below).is_err());
    }

    #[test]
    fn u256_round_trip() {
        let value = BigInt::from(123456789u64) << 96;
        let word = big_to_u256(&value).expect("positive value should convert");
        assert_eq!(u256_to_big(word), value);
        assert!(big_to_u256(&BigInt::from(-5)).is_none());
        assert_eq!(u256_to_big(U256::ZERO), BigInt::zero());
    }

    proptest! {
        // tick_at_sqrt_ratio(sqrt_ratio_at_tick(t)) must land within one tick of t.
        // MAX_TICK itself is excluded: its ratio equals MAX_SQRT_RATIO, which the
        // inverse rejects (the valid interval is half-open).
        #[test]
        fn tick_round_trip_within_one(tick in MIN_TICK..MAX_TICK) {
            let ratio = sqrt_ratio_at_tick(tick).expect("tick in range");
            let back = tick_at_sqrt_ratio(&ratio).expect("ratio in range");
            prop_assert!((back - tick).abs() <= 1, "tick {tick} -> {back}");
        }
    }
}
