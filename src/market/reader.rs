//! StateView chain adapter: slot0, tick bitmaps, and batched tick info.

use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes, U256, address, aliases::I24};
use futures_util::future;
use num_bigint::BigInt;

use super::{MarketError, Slot0, TickDataSource, TickInfo};
use crate::math::tick::u256_to_big;
use crate::pool::PoolKey;

// Multicall3 is deployed at the same address on every EVM chain.
const MULTICALL3_ADDRESS: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

/// Ticks per multicall batch. Chunks run in parallel; forked nodes resolve
/// each storage read against the remote RPC, so batches stay small.
const MULTICALL_CHUNK_SIZE: usize = 30;

sol! {
    #[sol(rpc)]
    contract Multicall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
}

sol! {
    #[sol(rpc)]
    contract StateView {
        function getSlot0(bytes32 poolId) external view returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee);
        function getTickBitmap(bytes32 poolId, int16 tick) external view returns (uint256 tickBitmap);
        function getTickInfo(bytes32 poolId, int24 tick) external view returns (uint128 liquidityGross, int128 liquidityNet, uint256 feeGrowthOutside0X128, uint256 feeGrowthOutside1X128);
    }
}

/// Reads pool state through the StateView lens contract.
#[derive(Debug, Clone)]
pub struct StateViewReader<P> {
    provider: P,
    state_view: Address,
}

impl<P: Provider + Clone> StateViewReader<P> {
    pub fn new(provider: P, state_view: Address) -> Self {
        Self { provider, state_view }
    }

    async fn fetch_tick_info_chunk(
        &self,
        pool_id: alloy_primitives::B256,
        ticks: &[i32],
    ) -> Result<Vec<TickInfo>, MarketError> {
        let mut calls = Vec::with_capacity(ticks.len());
        for &tick in ticks {
            let tick_i24 = I24::try_from(tick)
                .map_err(|_| MarketError::BatchCallFailed {
                    tick,
                    detail: "tick does not fit int24".to_string(),
                })?;
            let call_data = StateView::getTickInfoCall { poolId: pool_id, tick: tick_i24 };
            calls.push(Multicall3::Call3 {
                target: self.state_view,
                allowFailure: false,
                callData: Bytes::from(call_data.abi_encode()),
            });
        }

        let multicall = Multicall3::new(MULTICALL3_ADDRESS, self.provider.clone());
        let results = multicall
            .aggregate3(calls)
            .call()
            .await
            .map_err(|err| MarketError::Provider(err.to_string()))?;

        if results.len() != ticks.len() {
            return Err(MarketError::Provider(format!(
                "multicall returned {} results, expected {}",
                results.len(),
                ticks.len()
            )));
        }

        let mut infos = Vec::with_capacity(ticks.len());
        for (&tick, result) in ticks.iter().zip(results) {
            if !result.success {
                return Err(MarketError::BatchCallFailed {
                    tick,
                    detail: "call reverted".to_string(),
                });
            }
            let decoded = StateView::getTickInfoCall::abi_decode_returns(&result.returnData)
                .map_err(|err| MarketError::BatchCallFailed {
                    tick,
                    detail: err.to_string(),
                })?;
            infos.push(TickInfo {
                tick,
                liquidity_gross: BigInt::from(decoded.liquidityGross),
                liquidity_net: BigInt::from(decoded.liquidityNet),
            });
        }
        Ok(infos)
    }
}

impl<P: Provider + Clone> TickDataSource for StateViewReader<P> {
    async fn slot0(&self, pool_key: &PoolKey) -> Result<Slot0, MarketError> {
        let state_view = StateView::new(self.state_view, self.provider.clone());
        let slot0 = state_view
            .getSlot0(pool_key.id())
            .call()
            .await
            .map_err(|err| MarketError::Provider(err.to_string()))?;

        Ok(Slot0 {
            sqrt_price_x96: u256_to_big(U256::from(slot0.sqrtPriceX96)),
            tick: slot0.tick.as_i32(),
        })
    }

    async fn tick_bitmap(&self, pool_key: &PoolKey, word_pos: i16) -> Result<U256, MarketError> {
        let state_view = StateView::new(self.state_view, self.provider.clone());
        state_view
            .getTickBitmap(pool_key.id(), word_pos)
            .call()
            .await
            .map_err(|err| MarketError::Provider(err.to_string()))
    }

    async fn tick_infos(
        &self,
        pool_key: &PoolKey,
        ticks: &[i32],
    ) -> Result<Vec<TickInfo>, MarketError> {
        if ticks.is_empty() {
            return Ok(Vec::new());
        }

        let pool_id = pool_key.id();

        // Chunks run concurrently; any failed chunk fails the whole read so
        // the distribution is never built from partial data.
        let chunk_futures: Vec<_> = ticks
            .chunks(MULTICALL_CHUNK_SIZE)
            .map(|chunk| self.fetch_tick_info_chunk(pool_id, chunk))
            .collect();

        let chunks = future::try_join_all(chunk_futures).await?;
        Ok(chunks.into_iter().flatten().collect())
    }
}
