//! Builds the binned liquidity distribution from raw tick data.

use alloy_primitives::U256;
use num_bigint::BigInt;
use num_traits::Zero;

use super::{Distribution, DistributionParams, LiquidityBin, MarketError, TickDataSource, TickInfo};

const BITS_PER_WORD: usize = 256;
const WORD_SHIFT: i32 = 8;

/// Produces liquidity distributions for pools via a tick data source.
#[derive(Debug, Clone)]
pub struct MarketService<R> {
    reader: R,
}

impl<R: TickDataSource> MarketService<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the pool state around the current tick and aggregates the
    /// initialized ticks into fixed-width bins.
    pub async fn get_distribution(
        &self,
        params: &DistributionParams,
    ) -> Result<Distribution, MarketError> {
        validate_params(params)?;
        let pool_key = &params.pool_key;

        tracing::info!(
            currency0 = %pool_key.currency0,
            currency1 = %pool_key.currency1,
            tick_spacing = pool_key.tick_spacing,
            bin_size = params.bin_size_ticks,
            tick_range = params.tick_range,
            "reading liquidity distribution"
        );

        let slot0 = self.reader.slot0(pool_key).await?;
        tracing::info!(
            current_tick = slot0.tick,
            sqrt_price_x96 = %slot0.sqrt_price_x96,
            "pool slot0"
        );

        let ticks = self
            .initialized_ticks(params, slot0.tick, pool_key.tick_spacing)
            .await?;
        tracing::info!(count = ticks.len(), "initialized ticks");

        let active = active_liquidity_prefix(&ticks);
        let bins = aggregate_bins(&ticks, &active, params.bin_size_ticks);
        tracing::info!(count = bins.len(), "liquidity bins aggregated");

        Ok(Distribution {
            current_tick: slot0.tick,
            sqrt_price_x96: slot0.sqrt_price_x96,
            initialized_ticks: ticks,
            bins,
        })
    }

    /// Scans the tick bitmap words covering [current - range, current + range]
    /// and batch-fetches info for every initialized tick inside the window.
    async fn initialized_ticks(
        &self,
        params: &DistributionParams,
        current_tick: i32,
        tick_spacing: i32,
    ) -> Result<Vec<TickInfo>, MarketError> {
        let tick_lower = current_tick - params.tick_range;
        let tick_upper = current_tick + params.tick_range;

        let word_lower = word_pos(tick_lower, tick_spacing);
        let word_upper = word_pos(tick_upper, tick_spacing);

        let mut candidates = Vec::new();
        for word in word_lower..=word_upper {
            let bitmap = self.reader.tick_bitmap(&params.pool_key, word).await?;
            for tick in ticks_in_word(bitmap, word, tick_spacing) {
                if tick >= tick_lower && tick <= tick_upper {
                    candidates.push(tick);
                }
            }
        }

        let mut ticks = self.reader.tick_infos(&params.pool_key, &candidates).await?;
        ticks.sort_by_key(|info| info.tick);
        Ok(ticks)
    }
}

fn validate_params(params: &DistributionParams) -> Result<(), MarketError> {
    if params.bin_size_ticks <= 0 {
        return Err(MarketError::InvalidBinSize(params.bin_size_ticks));
    }
    if params.tick_range <= 0 {
        return Err(MarketError::InvalidTickRange(params.tick_range));
    }
    params.pool_key.validate()?;
    Ok(())
}

/// Bitmap word index for a tick: compress by spacing (truncating division,
/// sign preserved), then each word covers 256 compressed positions.
fn word_pos(tick: i32, tick_spacing: i32) -> i16 {
    let compressed = tick / tick_spacing;
    (compressed >> WORD_SHIFT) as i16
}

/// Expands a bitmap word into the ticks its set bits stand for.
fn ticks_in_word(bitmap: U256, word: i16, tick_spacing: i32) -> Vec<i32> {
    if bitmap.is_zero() {
        return Vec::new();
    }

    let mut ticks = Vec::new();
    for bit in 0..BITS_PER_WORD {
        if bitmap.bit(bit) {
            let compressed = ((word as i32) << WORD_SHIFT) + bit as i32;
            ticks.push(compressed * tick_spacing);
        }
    }
    ticks
}

/// Running sum of liquidityNet in ascending tick order: the pool's active
/// liquidity after crossing each tick.
fn active_liquidity_prefix(ticks: &[TickInfo]) -> Vec<BigInt> {
    let mut prefix = Vec::with_capacity(ticks.len());
    let mut current = BigInt::zero();
    for info in ticks {
        current += &info.liquidity_net;
        prefix.push(current.clone());
    }
    prefix
}

/// Splits [min tick, max tick] into bins of `bin_size_ticks` and samples the
/// active liquidity at each bin midpoint.
fn aggregate_bins(ticks: &[TickInfo], active: &[BigInt], bin_size_ticks: i32) -> Vec<LiquidityBin> {
    let Some(first) = ticks.first() else {
        return Vec::new();
    };
    let min_tick = first.tick;
    let max_tick = ticks[ticks.len() - 1].tick;

    let mut bins = Vec::new();
    let mut tick_lower = min_tick;
    while tick_lower <= max_tick {
        let tick_upper = tick_lower + bin_size_ticks;
        let midpoint = tick_lower + bin_size_ticks / 2;
        bins.push(LiquidityBin {
            tick_lower,
            tick_upper,
            active_liquidity: active_liquidity_at(ticks, active, midpoint),
        });
        tick_lower = tick_upper;
    }
    bins
}

/// Active liquidity at a tick: the prefix value of the greatest initialized
/// tick <= target, zero when no tick precedes it.
fn active_liquidity_at(ticks: &[TickInfo], active: &[BigInt], target: i32) -> BigInt {
    let idx = ticks.partition_point(|info| info.tick <= target);
    if idx == 0 {
        return BigInt::zero();
    }
    active[idx - 1].clone()
}
