//! Adapters for the on-chain vault, position manager, and ERC-20 surface.

use std::fmt;

use alloy::network::ReceiptResponse as _;
use alloy::providers::Provider;
use alloy::sol;
use alloy_primitives::{Address, B256, U256};
use num_bigint::BigInt;

use crate::math::tick::u256_to_big;
use crate::pool::PoolKey;

sol! {
    #[sol(rpc)]
    contract AgenticVault {
        function agent() external view returns (address);
        function agentPaused() external view returns (bool);
        function swapAllowed() external view returns (bool);
        function allowedTickLower() external view returns (int24);
        function allowedTickUpper() external view returns (int24);
        function maxPositionsK() external view returns (uint256);
        function getPoolKey() external view returns (address currency0, address currency1, uint24 fee, int24 tickSpacing, address hooks);
        function poolId() external view returns (bytes32);
        function posm() external view returns (address);
        function positionsLength() external view returns (uint256);
        function positionIds(uint256 index) external view returns (uint256);
        function positionTickLower(uint256 tokenId) external view returns (int24);
        function positionTickUpper(uint256 tokenId) external view returns (int24);

        function mintPosition(int24 tickLower, int24 tickUpper, uint256 liquidity, uint256 amount0Max, uint256 amount1Max, uint256 deadline) external returns (uint256 tokenId);
        function increaseLiquidity(uint256 tokenId, uint256 liquidity, uint256 amount0Max, uint256 amount1Max, uint256 deadline) external;
        function decreaseLiquidityToVault(uint256 tokenId, uint256 liquidity, uint256 amount0Min, uint256 amount1Min, uint256 deadline) external;
        function collectFeesToVault(uint256 tokenId, uint256 amount0Min, uint256 amount1Min, uint256 deadline) external;
        function burnPositionToVault(uint256 tokenId, uint256 amount0Min, uint256 amount1Min, uint256 deadline) external;
        function swapExactInputSingle(bool zeroForOne, uint256 amountIn, uint256 minAmountOut, uint256 deadline) external returns (uint256 amountOut);
    }
}

sol! {
    #[sol(rpc)]
    contract PositionManager {
        function getPositionLiquidity(uint256 tokenId) external view returns (uint128 liquidity);
    }
}

sol! {
    #[sol(rpc)]
    contract Erc20 {
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// A managed LP position. Liquidity is read lazily from the position
/// manager and stays `None` until fetched.
#[derive(Debug, Clone)]
pub struct Position {
    pub token_id: U256,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: Option<BigInt>,
}

/// Read-only snapshot of a vault's configuration.
#[derive(Debug, Clone)]
pub struct VaultState {
    pub agent: Address,
    pub agent_paused: bool,
    pub swap_allowed: bool,
    pub allowed_tick_lower: i32,
    pub allowed_tick_upper: i32,
    pub max_positions_k: U256,
    pub pool_key: PoolKey,
    pub pool_id: B256,
    pub posm: Address,
    pub positions_length: U256,
}

#[derive(Debug)]
pub enum VaultError {
    Provider(String),
    /// A state-changing call was mined but reverted.
    TxReverted { operation: &'static str, tx_hash: B256 },
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(detail) => write!(f, "provider error: {detail}"),
            Self::TxReverted { operation, tx_hash } => {
                write!(f, "{operation} transaction {tx_hash} reverted")
            }
        }
    }
}

impl std::error::Error for VaultError {}

/// Client over one vault contract. The provider carries the agent signer,
/// so state-changing calls are signed sends.
#[derive(Debug, Clone)]
pub struct VaultClient<P> {
    address: Address,
    provider: P,
}

impl<P: Provider + Clone> VaultClient<P> {
    pub fn new(address: Address, provider: P) -> Self {
        Self { address, provider }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn contract(&self) -> AgenticVault::AgenticVaultInstance<P> {
        AgenticVault::new(self.address, self.provider.clone())
    }

    pub async fn get_state(&self) -> Result<VaultState, VaultError> {
        let vault = self.contract();

        let agent = vault.agent().call().await.map_err(provider_err)?;
        let agent_paused = vault.agentPaused().call().await.map_err(provider_err)?;
        let swap_allowed = vault.swapAllowed().call().await.map_err(provider_err)?;
        let allowed_tick_lower = vault.allowedTickLower().call().await.map_err(provider_err)?;
        let allowed_tick_upper = vault.allowedTickUpper().call().await.map_err(provider_err)?;
        let max_positions_k = vault.maxPositionsK().call().await.map_err(provider_err)?;
        let pool_key = vault.getPoolKey().call().await.map_err(provider_err)?;
        let pool_id = vault.poolId().call().await.map_err(provider_err)?;
        let posm = vault.posm().call().await.map_err(provider_err)?;
        let positions_length = vault.positionsLength().call().await.map_err(provider_err)?;

        Ok(VaultState {
            agent,
            agent_paused,
            swap_allowed,
            allowed_tick_lower: allowed_tick_lower.as_i32(),
            allowed_tick_upper: allowed_tick_upper.as_i32(),
            max_positions_k,
            pool_key: PoolKey {
                currency0: pool_key.currency0,
                currency1: pool_key.currency1,
                fee: pool_key.fee.to::<u32>(),
                tick_spacing: pool_key.tickSpacing.as_i32(),
                hooks: pool_key.hooks,
            },
            pool_id,
            posm,
            positions_length,
        })
    }

    /// Enumerates managed positions with their tick ranges. Liquidity is
    /// left unset; callers fetch it from the position manager as needed.
    pub async fn get_positions(&self) -> Result<Vec<Position>, VaultError> {
        let vault = self.contract();
        let length = vault.positionsLength().call().await.map_err(provider_err)?;

        let count = u64::try_from(length)
            .map_err(|_| VaultError::Provider(format!("positionsLength {length} out of range")))?;
        let mut positions = Vec::with_capacity(count as usize);
        for index in 0..count {
            let token_id = vault
                .positionIds(U256::from(index))
                .call()
                .await
                .map_err(provider_err)?;
            let tick_lower = vault
                .positionTickLower(token_id)
                .call()
                .await
                .map_err(provider_err)?;
            let tick_upper = vault
                .positionTickUpper(token_id)
                .call()
                .await
                .map_err(provider_err)?;

            positions.push(Position {
                token_id,
                tick_lower: tick_lower.as_i32(),
                tick_upper: tick_upper.as_i32(),
                liquidity: None,
            });
        }
        Ok(positions)
    }

    pub async fn mint_position(
        &self,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: U256,
        amount0_max: U256,
        amount1_max: U256,
        deadline: U256,
    ) -> Result<(), VaultError> {
        let tick_lower = to_i24(tick_lower)?;
        let tick_upper = to_i24(tick_upper)?;
        let contract = self.contract();
        let call = contract
            .mintPosition(tick_lower, tick_upper, liquidity, amount0_max, amount1_max, deadline);
        send_and_wait("mint", call.send().await).await
    }

    pub async fn burn_position(
        &self,
        token_id: U256,
        amount0_min: U256,
        amount1_min: U256,
        deadline: U256,
    ) -> Result<(), VaultError> {
        let contract = self.contract();
        let call = contract
            .burnPositionToVault(token_id, amount0_min, amount1_min, deadline);
        send_and_wait("burn", call.send().await).await
    }

    pub async fn swap_exact_input_single(
        &self,
        zero_for_one: bool,
        amount_in: U256,
        min_amount_out: U256,
        deadline: U256,
    ) -> Result<(), VaultError> {
        let contract = self.contract();
        let call = contract
            .swapExactInputSingle(zero_for_one, amount_in, min_amount_out, deadline);
        send_and_wait("swap", call.send().await).await
    }
}

fn to_i24(tick: i32) -> Result<alloy_primitives::aliases::I24, VaultError> {
    alloy_primitives::aliases::I24::try_from(tick)
        .map_err(|_| VaultError::Provider(format!("tick {tick} does not fit int24")))
}

fn provider_err(err: impl fmt::Display) -> VaultError {
    VaultError::Provider(err.to_string())
}

/// Waits for a sent transaction to mine and checks its receipt status.
async fn send_and_wait(
    operation: &'static str,
    sent: Result<
        alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
        alloy::contract::Error,
    >,
) -> Result<(), VaultError> {
    let pending = sent.map_err(provider_err)?;
    let tx_hash = *pending.tx_hash();
    tracing::info!(operation, tx = %tx_hash, "transaction sent");

    let receipt = pending.get_receipt().await.map_err(provider_err)?;
    if !receipt.status() {
        return Err(VaultError::TxReverted { operation, tx_hash });
    }

    tracing::info!(
        operation,
        tx = %tx_hash,
        block = receipt.block_number.unwrap_or_default(),
        "transaction confirmed"
    );
    Ok(())
}

/// Fetches a position's liquidity via the position manager.
pub async fn position_liquidity<P: Provider + Clone>(
    provider: P,
    posm: Address,
    token_id: U256,
) -> Result<BigInt, VaultError> {
    let manager = PositionManager::new(posm, provider);
    let liquidity = manager
        .getPositionLiquidity(token_id)
        .call()
        .await
        .map_err(provider_err)?;
    Ok(BigInt::from(liquidity))
}

/// ERC-20 balance of `owner` as a big integer.
pub async fn token_balance<P: Provider + Clone>(
    provider: P,
    token: Address,
    owner: Address,
) -> Result<BigInt, VaultError> {
    let erc20 = Erc20::new(token, provider);
    let balance = erc20.balanceOf(owner).call().await.map_err(provider_err)?;
    Ok(u256_to_big(balance))
}

/// ERC-20 decimals.
pub async fn token_decimals<P: Provider + Clone>(
    provider: P,
    token: Address,
) -> Result<u8, VaultError> {
    let erc20 = Erc20::new(token, provider);
    erc20.decimals().call().await.map_err(provider_err)
}
