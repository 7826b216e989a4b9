pub mod liquidity;
pub mod tick;

pub use liquidity::{amount0_for_liquidity, amount1_for_liquidity, liquidity_for_amounts};
pub use tick::{
    MAX_TICK, MIN_TICK, TickMathError, big_to_u256, q96, q192, sqrt_ratio_at_tick,
    tick_at_sqrt_ratio, u256_to_big,
};
