//! Target position planning: market distribution in, coverage segments out.

use num_bigint::BigInt;

use crate::coverage::{self, Bin, Config, Metrics, Segment};
use crate::market::{Distribution, DistributionParams, MarketError, MarketService, TickDataSource};
use crate::pool::PoolKey;

/// Inputs for one planning pass.
#[derive(Debug, Clone)]
pub struct ComputeParams {
    pub pool_key: PoolKey,
    pub bin_size_ticks: i32,
    /// Scan radius around the current tick.
    pub tick_range: i32,
    pub algo: Config,
    /// Vault bounds; bins outside are never proposed.
    pub allowed_tick_lower: i32,
    pub allowed_tick_upper: i32,
}

/// The plan for a pool at a point in time.
#[derive(Debug, Clone)]
pub struct ComputeResult {
    pub current_tick: i32,
    pub sqrt_price_x96: BigInt,
    pub segments: Vec<Segment>,
    pub bins: Vec<Bin>,
    pub metrics: Metrics,
}

/// Computes target LP positions from the market liquidity shape.
#[derive(Debug, Clone)]
pub struct TargetPlanner<R> {
    market: MarketService<R>,
}

impl<R: TickDataSource> TargetPlanner<R> {
    pub fn new(market: MarketService<R>) -> Self {
        Self { market }
    }

    pub async fn compute_target_positions(
        &self,
        params: &ComputeParams,
    ) -> Result<ComputeResult, MarketError> {
        let distribution = self
            .market
            .get_distribution(&DistributionParams {
                pool_key: params.pool_key.clone(),
                bin_size_ticks: params.bin_size_ticks,
                tick_range: params.tick_range,
            })
            .await?;

        let bins = coverage_bins(
            &distribution,
            params.allowed_tick_lower,
            params.allowed_tick_upper,
        );
        if bins.is_empty() {
            return Ok(ComputeResult {
                current_tick: distribution.current_tick,
                sqrt_price_x96: distribution.sqrt_price_x96,
                segments: Vec::new(),
                bins: Vec::new(),
                metrics: Metrics::default(),
            });
        }

        let result = coverage::run(&bins, &params.algo);

        Ok(ComputeResult {
            current_tick: distribution.current_tick,
            sqrt_price_x96: distribution.sqrt_price_x96,
            segments: result.segments,
            bins,
            metrics: result.metrics,
        })
    }
}

/// Converts distribution bins to planner bins, keeping only bins fully
/// inside the vault's allowed tick range.
fn coverage_bins(distribution: &Distribution, allowed_lower: i32, allowed_upper: i32) -> Vec<Bin> {
    distribution
        .bins
        .iter()
        .filter(|bin| bin.tick_lower >= allowed_lower && bin.tick_upper <= allowed_upper)
        .map(|bin| Bin {
            tick_lower: bin.tick_lower,
            tick_upper: bin.tick_upper,
            liquidity: bin.active_liquidity.clone(),
            is_current: distribution.current_tick >= bin.tick_lower
                && distribution.current_tick < bin.tick_upper,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use num_traits::Zero;

    use super::*;
    use crate::market::LiquidityBin;
    use crate::math::q96;

    fn distribution_with_bins(bins: Vec<LiquidityBin>, current_tick: i32) -> Distribution {
        Distribution {
            current_tick,
            sqrt_price_x96: q96().clone(),
            initialized_ticks: Vec::new(),
            bins,
        }
    }

    fn bin(tick_lower: i32, tick_upper: i32, liquidity: u64) -> LiquidityBin {
        LiquidityBin {
            tick_lower,
            tick_upper,
            active_liquidity: BigInt::from(liquidity),
        }
    }

    #[test]
    fn bins_outside_allowed_range_are_dropped() {
        let distribution = distribution_with_bins(
            vec![
                bin(-240, -120, 100),
                bin(-120, 0, 200),
                bin(0, 120, 300),
                bin(120, 240, 400),
            ],
            10,
        );

        let bins = coverage_bins(&distribution, -120, 120);

        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].tick_lower, -120);
        assert_eq!(bins[1].tick_upper, 120);
    }

    #[test]
    fn partially_overlapping_bins_are_excluded() {
        let distribution = distribution_with_bins(vec![bin(-60, 60, 100)], 0);
        // Bin sticks out one tick past the allowed upper bound.
        let bins = coverage_bins(&distribution, -60, 59);
        assert!(bins.is_empty());
    }

    #[test]
    fn current_bin_is_flagged_with_half_open_bounds() {
        let distribution = distribution_with_bins(
            vec![bin(-120, 0, 100), bin(0, 120, 100), bin(120, 240, 100)],
            120,
        );

        let bins = coverage_bins(&distribution, -1000, 1000);

        assert!(!bins[0].is_current);
        assert!(!bins[1].is_current, "tick 120 is not inside [0, 120)");
        assert!(bins[2].is_current);
    }

    #[test]
    fn zero_liquidity_bins_survive_conversion() {
        let distribution = distribution_with_bins(vec![bin(0, 60, 0)], 0);
        let bins = coverage_bins(&distribution, -1000, 1000);
        assert_eq!(bins.len(), 1);
        assert!(bins[0].liquidity.is_zero());
    }
}
