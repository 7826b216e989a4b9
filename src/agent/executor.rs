//! Executes a rebalance plan: burn, swap, refit, mint.
//!
//! Every on-chain step re-reads the state it depends on. After the swap the
//! price may have moved, so planned positions are refitted to the vault's
//! actual balances before any mint: out-of-range positions keep their
//! liquidity and get repriced amounts, the single in-range position absorbs
//! whatever balance remains.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::providers::Provider;
use alloy_primitives::{Address, U256};
use num_bigint::BigInt;
use num_traits::{One, Zero};

use super::{ProtectionSettings, ShutdownToken};
use crate::allocation::{AllocationResult, PositionPlan};
use crate::market::TickDataSource;
use crate::math::tick::{TickMathError, big_to_u256, q192, sqrt_ratio_at_tick};
use crate::math::{amount0_for_liquidity, amount1_for_liquidity, liquidity_for_amounts};
use crate::pool::PoolKey;
use crate::vault::{Position, VaultClient, VaultError, token_balance};

const DEADLINE_SECS: u64 = 20 * 60;
const BPS_DENOMINATOR: u32 = 10_000;
const WEI_PER_GWEI: f64 = 1e9;

#[derive(Debug)]
pub enum ExecutionError {
    GasPriceTooHigh { current_wei: u128, limit_wei: u128 },
    Vault(VaultError),
    Provider(String),
    TickMath(TickMathError),
    AmountOverflow(&'static str),
    ShuttingDown,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GasPriceTooHigh { current_wei, limit_wei } => {
                write!(f, "gas price too high: {current_wei} > {limit_wei}")
            }
            Self::Vault(err) => write!(f, "{err}"),
            Self::Provider(detail) => write!(f, "provider error: {detail}"),
            Self::TickMath(err) => write!(f, "{err}"),
            Self::AmountOverflow(what) => write!(f, "{what} does not fit uint256"),
            Self::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<VaultError> for ExecutionError {
    fn from(value: VaultError) -> Self {
        Self::Vault(value)
    }
}

impl From<TickMathError> for ExecutionError {
    fn from(value: TickMathError) -> Self {
        Self::TickMath(value)
    }
}

/// Drives the burn -> swap -> refit -> mint sequence for one vault.
#[allow(clippy::too_many_arguments)]
pub(super) async fn execute_rebalance<P, R>(
    provider: &P,
    reader: &R,
    vault: &VaultClient<P>,
    old_positions: &[Position],
    result: &mut AllocationResult,
    current_sqrt_price: &BigInt,
    token0: Address,
    token1: Address,
    pool_key: &PoolKey,
    settings: &ProtectionSettings,
    shutdown: &ShutdownToken,
) -> Result<(), ExecutionError>
where
    P: Provider + Clone,
    R: TickDataSource,
{
    // Gas gate before anything irreversible.
    let gas_price = provider
        .get_gas_price()
        .await
        .map_err(|err| ExecutionError::Provider(err.to_string()))?;
    let limit_wei = (settings.max_gas_price_gwei * WEI_PER_GWEI) as u128;
    if gas_price > limit_wei {
        tracing::warn!(current = %gas_price, limit = %limit_wei, "gas price too high, skipping");
        return Err(ExecutionError::GasPriceTooHigh {
            current_wei: gas_price,
            limit_wei,
        });
    }

    let deadline = deadline_from_now();

    // Burn every old position back into the vault.
    for position in old_positions {
        ensure_running(shutdown)?;
        vault
            .burn_position(position.token_id, U256::ZERO, U256::ZERO, deadline)
            .await?;
    }

    // Swap, with a spot-price minimum-output bound.
    if let Some(swap) = &result.swap
        && swap.amount_in > BigInt::zero()
    {
        ensure_running(shutdown)?;
        let expected = expected_swap_output(&swap.amount_in, current_sqrt_price, swap.zero_for_one);
        let min_out = min_amount_out(&expected, settings.swap_slippage_bps);

        tracing::info!(
            amount_in = %swap.amount_in,
            min_amount_out = %min_out,
            zero_for_one = swap.zero_for_one,
            "executing swap"
        );
        vault
            .swap_exact_input_single(
                swap.zero_for_one,
                to_u256(&swap.amount_in, "swap input")?,
                to_u256(&min_out, "swap minimum output")?,
                deadline,
            )
            .await?;
    }

    // Re-read balances and refresh the price; the swap moves both.
    let post_swap0 = token_balance(provider.clone(), token0, vault.address()).await?;
    let post_swap1 = token_balance(provider.clone(), token1, vault.address()).await?;

    let effective_sqrt_price = match reader.slot0(pool_key).await {
        Ok(slot0) => slot0.sqrt_price_x96,
        Err(err) => {
            tracing::warn!(error = %err, "failed to refresh slot0 after swap, keeping pre-swap price");
            current_sqrt_price.clone()
        }
    };

    let (total0, total1) = refit_positions(
        &mut result.positions,
        &effective_sqrt_price,
        &post_swap0,
        &post_swap1,
    )?;
    result.total_amount0 = total0;
    result.total_amount1 = total1;

    // Mint the refitted plan in order.
    for (index, plan) in result.positions.iter().enumerate() {
        ensure_running(shutdown)?;

        let pre_mint0 = token_balance(provider.clone(), token0, vault.address()).await?;
        let pre_mint1 = token_balance(provider.clone(), token1, vault.address()).await?;

        let mint = fit_plan_to_balances(plan, &effective_sqrt_price, &pre_mint0, &pre_mint1)?;
        if mint.rescaled {
            tracing::info!(
                index,
                original_liquidity = %plan.liquidity,
                adjusted_liquidity = %mint.liquidity,
                "adjusted liquidity to fit vault balance"
            );
        }

        tracing::info!(
            index,
            tick_lower = plan.tick_lower,
            tick_upper = plan.tick_upper,
            liquidity = %mint.liquidity,
            amount0_max = %mint.amount0_max,
            amount1_max = %mint.amount1_max,
            "minting position"
        );
        vault
            .mint_position(
                plan.tick_lower,
                plan.tick_upper,
                to_u256(&mint.liquidity, "mint liquidity")?,
                to_u256(&mint.amount0_max, "mint amount0 cap")?,
                to_u256(&mint.amount1_max, "mint amount1 cap")?,
                deadline,
            )
            .await?;
    }

    let final0 = token_balance(provider.clone(), token0, vault.address()).await?;
    let final1 = token_balance(provider.clone(), token1, vault.address()).await?;
    tracing::info!(
        token0_remaining = %final0,
        token1_remaining = %final1,
        "rebalance complete"
    );

    Ok(())
}

fn ensure_running(shutdown: &ShutdownToken) -> Result<(), ExecutionError> {
    if shutdown.is_cancelled() {
        return Err(ExecutionError::ShuttingDown);
    }
    Ok(())
}

/// Absolute unix-seconds deadline for all transactions of this round.
fn deadline_from_now() -> U256 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    U256::from(now + DEADLINE_SECS)
}

/// Spot-price output estimate: in * price (0 -> 1) or in / price (1 -> 0),
/// price = sqrtP^2 / Q192.
pub(super) fn expected_swap_output(
    amount_in: &BigInt,
    sqrt_price_x96: &BigInt,
    zero_for_one: bool,
) -> BigInt {
    let sqrt_price_squared = sqrt_price_x96 * sqrt_price_x96;
    if zero_for_one {
        (amount_in * sqrt_price_squared) / q192()
    } else if sqrt_price_squared.is_zero() {
        BigInt::zero()
    } else {
        (amount_in * q192()) / sqrt_price_squared
    }
}

/// expected * (10000 - slippageBps) / 10000.
pub(super) fn min_amount_out(expected: &BigInt, slippage_bps: u32) -> BigInt {
    let keep = BPS_DENOMINATOR.saturating_sub(slippage_bps);
    (expected * BigInt::from(keep)) / BigInt::from(BPS_DENOMINATOR)
}

/// Refits planned positions to the vault's post-swap balances at the
/// refreshed price. Out-of-range positions keep their liquidity and only
/// reprice their amounts; the single in-range position (range strictly
/// containing the price) is re-solved from the remaining balances.
/// Returns the new (total0, total1).
pub(super) fn refit_positions(
    positions: &mut [PositionPlan],
    sqrt_price_x96: &BigInt,
    balance0: &BigInt,
    balance1: &BigInt,
) -> Result<(BigInt, BigInt), TickMathError> {
    let mut remaining0 = balance0.clone();
    let mut remaining1 = balance1.clone();
    let mut in_range_idx = None;

    for (index, plan) in positions.iter_mut().enumerate() {
        let sqrt_a = sqrt_ratio_at_tick(plan.tick_lower)?;
        let sqrt_b = sqrt_ratio_at_tick(plan.tick_upper)?;

        if sqrt_price_x96 > &sqrt_a && sqrt_price_x96 < &sqrt_b {
            in_range_idx = Some(index);
            continue;
        }

        plan.amount0 = amount0_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &plan.liquidity);
        plan.amount1 = amount1_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &plan.liquidity);
        remaining0 -= &plan.amount0;
        remaining1 -= &plan.amount1;
    }

    if let Some(index) = in_range_idx {
        let plan = &mut positions[index];
        let sqrt_a = sqrt_ratio_at_tick(plan.tick_lower)?;
        let sqrt_b = sqrt_ratio_at_tick(plan.tick_upper)?;

        if remaining0 < BigInt::zero() {
            remaining0 = BigInt::zero();
        }
        if remaining1 < BigInt::zero() {
            remaining1 = BigInt::zero();
        }

        plan.liquidity =
            liquidity_for_amounts(sqrt_price_x96, &sqrt_a, &sqrt_b, &remaining0, &remaining1);
        plan.amount0 = amount0_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &plan.liquidity);
        plan.amount1 = amount1_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &plan.liquidity);

        tracing::info!(
            index,
            remaining0 = %remaining0,
            remaining1 = %remaining1,
            liquidity = %plan.liquidity,
            "refitted in-range position to post-swap balances"
        );
    }

    let mut total0 = BigInt::zero();
    let mut total1 = BigInt::zero();
    for plan in positions.iter() {
        total0 += &plan.amount0;
        total1 += &plan.amount1;
    }
    Ok((total0, total1))
}

#[derive(Debug, Clone)]
pub(super) struct MintAmounts {
    pub liquidity: BigInt,
    pub amount0_max: BigInt,
    pub amount1_max: BigInt,
    pub rescaled: bool,
}

/// Caps a planned mint at `amount + 1` per token (the callee rounds its
/// requirements up by at most one wei). When a cap exceeds the vault
/// balance, liquidity is re-solved from `balance - 1` so the padded cap
/// still fits.
pub(super) fn fit_plan_to_balances(
    plan: &PositionPlan,
    sqrt_price_x96: &BigInt,
    balance0: &BigInt,
    balance1: &BigInt,
) -> Result<MintAmounts, TickMathError> {
    let amount0_max = pad_one_wei(&plan.amount0);
    let amount1_max = pad_one_wei(&plan.amount1);

    if amount0_max <= *balance0 && amount1_max <= *balance1 {
        return Ok(MintAmounts {
            liquidity: plan.liquidity.clone(),
            amount0_max,
            amount1_max,
            rescaled: false,
        });
    }

    let available0 = shrink_one_wei(balance0);
    let available1 = shrink_one_wei(balance1);

    let sqrt_a = sqrt_ratio_at_tick(plan.tick_lower)?;
    let sqrt_b = sqrt_ratio_at_tick(plan.tick_upper)?;

    let liquidity =
        liquidity_for_amounts(sqrt_price_x96, &sqrt_a, &sqrt_b, &available0, &available1);
    let amount0 = amount0_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);
    let amount1 = amount1_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);

    Ok(MintAmounts {
        amount0_max: pad_one_wei(&amount0),
        amount1_max: pad_one_wei(&amount1),
        liquidity,
        rescaled: true,
    })
}

fn pad_one_wei(amount: &BigInt) -> BigInt {
    if amount.is_zero() {
        BigInt::zero()
    } else {
        amount + BigInt::one()
    }
}

fn shrink_one_wei(balance: &BigInt) -> BigInt {
    if *balance > BigInt::zero() {
        balance - BigInt::one()
    } else {
        BigInt::zero()
    }
}

fn to_u256(value: &BigInt, what: &'static str) -> Result<U256, ExecutionError> {
    big_to_u256(value).ok_or(ExecutionError::AmountOverflow(what))
}
