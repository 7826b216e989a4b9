//! Market liquidity data: pool state reads and the binned distribution.

mod reader;
mod service;

use std::fmt;

use alloy_primitives::U256;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::pool::{PoolKey, PoolKeyError};

pub use reader::StateViewReader;
pub use service::MarketService;

/// Minimal pool state snapshot: current sqrt price and tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot0 {
    pub sqrt_price_x96: BigInt,
    pub tick: i32,
}

/// Liquidity bookkeeping at one initialized tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickInfo {
    pub tick: i32,
    pub liquidity_gross: BigInt,
    pub liquidity_net: BigInt,
}

/// A fixed-width slice of the liquidity histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityBin {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub active_liquidity: BigInt,
}

/// Parameters for a distribution query.
#[derive(Debug, Clone)]
pub struct DistributionParams {
    pub pool_key: PoolKey,
    /// Width of each bin in ticks.
    pub bin_size_ticks: i32,
    /// Scan radius in ticks around the current tick.
    pub tick_range: i32,
}

/// The binned market liquidity around the current price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    pub current_tick: i32,
    pub sqrt_price_x96: BigInt,
    pub initialized_ticks: Vec<TickInfo>,
    pub bins: Vec<LiquidityBin>,
}

/// Chain adapter surface the market service consumes. Implemented by the
/// StateView reader and by in-memory fakes in tests.
pub trait TickDataSource {
    fn slot0(
        &self,
        pool_key: &PoolKey,
    ) -> impl Future<Output = Result<Slot0, MarketError>> + Send;

    fn tick_bitmap(
        &self,
        pool_key: &PoolKey,
        word_pos: i16,
    ) -> impl Future<Output = Result<U256, MarketError>> + Send;

    /// Fetches tick info for every tick in `ticks`, batched; all-or-nothing.
    fn tick_infos(
        &self,
        pool_key: &PoolKey,
        ticks: &[i32],
    ) -> impl Future<Output = Result<Vec<TickInfo>, MarketError>> + Send;
}

#[derive(Debug)]
pub enum MarketError {
    InvalidBinSize(i32),
    InvalidTickRange(i32),
    InvalidPoolKey(PoolKeyError),
    Provider(String),
    /// A multicall sub-call reverted or returned an undecodable payload.
    BatchCallFailed { tick: i32, detail: String },
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBinSize(size) => write!(f, "bin size must be positive, got {size}"),
            Self::InvalidTickRange(range) => {
                write!(f, "tick range must be positive, got {range}")
            }
            Self::InvalidPoolKey(err) => write!(f, "{err}"),
            Self::Provider(detail) => write!(f, "provider error: {detail}"),
            Self::BatchCallFailed { tick, detail } => {
                write!(f, "tick info call failed for tick {tick}: {detail}")
            }
        }
    }
}

impl std::error::Error for MarketError {}

impl From<PoolKeyError> for MarketError {
    fn from(value: PoolKeyError) -> Self {
        Self::InvalidPoolKey(value)
    }
}
