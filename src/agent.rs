//! Per-vault rebalance pipeline.
//!
//! One round walks every vault sequentially: snapshot state and positions,
//! plan target segments from the market shape, value the vault's assets,
//! allocate, gate on deviation, then execute. A vault's failure maps to a
//! coarse reason code and never poisons the rest of the round.

pub mod deviation;
mod executor;
mod source;

use std::fmt;

use alloy::providers::Provider;
use alloy_primitives::Address;
use num_bigint::BigInt;
use num_traits::Zero;
use tokio::sync::watch;

use crate::allocation::{self, PoolState, UserFunds};
use crate::coverage::Config;
use crate::market::{MarketService, TickDataSource};
use crate::math::{amount0_for_liquidity, amount1_for_liquidity, sqrt_ratio_at_tick};
use crate::strategy::{ComputeParams, TargetPlanner};
use crate::vault::{Position, VaultClient, position_liquidity, token_balance, token_decimals};

pub use executor::ExecutionError;
pub use source::{SourceError, VaultSource};

const BPS_DENOMINATOR: u32 = 10_000;

/// Why a vault round ended the way it did. `DeviationBelowThreshold` is a
/// successful no-op, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Success,
    DeviationBelowThreshold,
    AgentPaused,
    ShuttingDown,
    SignerError,
    VaultClientError,
    GetStateError,
    StrategyError,
    TokenError,
    BalanceError,
    GetPositionsError,
    AllocationError,
    ExecutionError,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::DeviationBelowThreshold => "deviation_below_threshold",
            Self::AgentPaused => "agent_paused",
            Self::ShuttingDown => "shutting_down",
            Self::SignerError => "signer_error",
            Self::VaultClientError => "vault_client_error",
            Self::GetStateError => "get_state_error",
            Self::StrategyError => "strategy_error",
            Self::TokenError => "token_error",
            Self::BalanceError => "balance_error",
            Self::GetPositionsError => "get_positions_error",
            Self::AllocationError => "allocation_error",
            Self::ExecutionError => "execution_error",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one vault round.
#[derive(Debug, Clone)]
pub struct RebalanceResult {
    pub vault: Address,
    pub rebalanced: bool,
    pub reason: Reason,
}

impl RebalanceResult {
    fn skipped(vault: Address, reason: Reason) -> Self {
        Self { vault, rebalanced: false, reason }
    }
}

/// Slippage and gas protection knobs.
#[derive(Debug, Clone, Copy)]
pub struct ProtectionSettings {
    pub swap_slippage_bps: u32,
    pub mint_slippage_bps: u32,
    pub max_gas_price_gwei: f64,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            swap_slippage_bps: 50,
            mint_slippage_bps: 50,
            max_gas_price_gwei: 1.0,
        }
    }
}

/// Cooperative shutdown flag handed down from the scheduler. Blocking steps
/// check it between vaults and before every transaction send.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Returns the sender half (flip to `true` to cancel) and the token.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag flips, or immediately if it already has.
    /// A dropped sender counts as cancellation.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

/// The rebalance agent for a set of vaults.
#[derive(Debug, Clone)]
pub struct Service<P, R> {
    provider: P,
    source: VaultSource,
    reader: R,
    planner: TargetPlanner<R>,
    settings: ProtectionSettings,
    deviation_threshold: f64,
    tick_range_override: Option<i32>,
    shutdown: ShutdownToken,
}

impl<P, R> Service<P, R>
where
    P: Provider + Clone,
    R: TickDataSource + Clone,
{
    pub fn new(provider: P, source: VaultSource, reader: R, shutdown: ShutdownToken) -> Self {
        Self {
            provider,
            source,
            planner: TargetPlanner::new(MarketService::new(reader.clone())),
            reader,
            settings: ProtectionSettings::default(),
            deviation_threshold: 0.1,
            tick_range_override: None,
            shutdown,
        }
    }

    pub fn with_protection_settings(mut self, settings: ProtectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_deviation_threshold(mut self, threshold: f64) -> Self {
        self.deviation_threshold = threshold;
        self
    }

    /// Caps the market scan radius to +/- `tick_range` around the current
    /// tick when narrower than the vault's allowed range.
    pub fn with_tick_range_override(mut self, tick_range: Option<i32>) -> Self {
        self.tick_range_override = tick_range.filter(|&range| range > 0);
        self
    }

    /// Runs one round over every vault, sequentially.
    pub async fn run(&self) -> Result<Vec<RebalanceResult>, SourceError> {
        let addresses = self.source.vault_addresses(&self.provider).await?;
        tracing::info!(vault_count = addresses.len(), "starting rebalance run");

        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            if self.shutdown.is_cancelled() {
                results.push(RebalanceResult::skipped(address, Reason::ShuttingDown));
                continue;
            }
            results.push(self.process_vault(address).await);
        }
        Ok(results)
    }

    /// One vault, start to finish. Never panics or propagates; the reason
    /// code carries the outcome.
    pub async fn process_vault(&self, vault_addr: Address) -> RebalanceResult {
        tracing::info!(vault = %vault_addr, "processing vault");

        let vault = VaultClient::new(vault_addr, self.provider.clone());

        // Snapshot vault state.
        let state = match vault.get_state().await {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to get vault state");
                return RebalanceResult::skipped(vault_addr, Reason::GetStateError);
            }
        };

        if state.agent_paused {
            tracing::info!(vault = %vault_addr, "agent paused, skipping");
            return RebalanceResult::skipped(vault_addr, Reason::AgentPaused);
        }

        // Scan radius: the allowed range width, optionally capped by the
        // configured override.
        let vault_range = state.allowed_tick_upper - state.allowed_tick_lower;
        let mut tick_range = vault_range;
        if let Some(override_range) = self.tick_range_override
            && tick_range > override_range
        {
            tracing::info!(
                vault_range,
                override_limit = override_range,
                "capping tick range with override"
            );
            tick_range = override_range;
        }

        let mut algo = Config::default();
        if state.max_positions_k > alloy_primitives::U256::ZERO {
            algo.n = usize::try_from(state.max_positions_k).unwrap_or(algo.n);
        }

        let params = ComputeParams {
            pool_key: state.pool_key.clone(),
            bin_size_ticks: state.pool_key.tick_spacing,
            tick_range,
            algo,
            allowed_tick_lower: state.allowed_tick_lower,
            allowed_tick_upper: state.allowed_tick_upper,
        };

        tracing::info!(
            vault = %vault_addr,
            currency0 = %state.pool_key.currency0,
            currency1 = %state.pool_key.currency1,
            tick_spacing = state.pool_key.tick_spacing,
            tick_range,
            max_positions = params.algo.n,
            allowed_lower = state.allowed_tick_lower,
            allowed_upper = state.allowed_tick_upper,
            "computing target positions"
        );

        let target = match self.planner.compute_target_positions(&params).await {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to compute target");
                return RebalanceResult::skipped(vault_addr, Reason::StrategyError);
            }
        };

        tracing::info!(
            vault = %vault_addr,
            segments = target.segments.len(),
            bins = target.bins.len(),
            current_tick = target.current_tick,
            "target positions computed"
        );

        // Value the vault's assets: idle balances plus invested amounts.
        let token0 = state.pool_key.currency0;
        let token1 = state.pool_key.currency1;

        let decimals0 = match token_decimals(self.provider.clone(), token0).await {
            Ok(decimals) => decimals,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to get token0 decimals");
                return RebalanceResult::skipped(vault_addr, Reason::TokenError);
            }
        };
        let decimals1 = match token_decimals(self.provider.clone(), token1).await {
            Ok(decimals) => decimals,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to get token1 decimals");
                return RebalanceResult::skipped(vault_addr, Reason::TokenError);
            }
        };

        let idle0 = match token_balance(self.provider.clone(), token0, vault_addr).await {
            Ok(balance) => balance,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to get token0 balance");
                return RebalanceResult::skipped(vault_addr, Reason::BalanceError);
            }
        };
        let idle1 = match token_balance(self.provider.clone(), token1, vault_addr).await {
            Ok(balance) => balance,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to get token1 balance");
                return RebalanceResult::skipped(vault_addr, Reason::BalanceError);
            }
        };

        let mut positions = match vault.get_positions().await {
            Ok(positions) => positions,
            Err(err) => {
                tracing::error!(vault = %vault_addr, error = %err, "failed to get positions");
                return RebalanceResult::skipped(vault_addr, Reason::GetPositionsError);
            }
        };

        let (invested0, invested1) = match self
            .invested_amounts(&mut positions, state.posm, &target.sqrt_price_x96)
            .await
        {
            Ok(amounts) => amounts,
            Err(reason) => return RebalanceResult::skipped(vault_addr, reason),
        };

        // Gross assets, then the mint-slippage safety buffer so mints still
        // land if the price drifts before execution.
        let keep = BigInt::from(BPS_DENOMINATOR.saturating_sub(self.settings.mint_slippage_bps));
        let denominator = BigInt::from(BPS_DENOMINATOR);
        let available0 = (&idle0 + &invested0) * &keep / &denominator;
        let available1 = (&idle1 + &invested1) * &keep / &denominator;

        tracing::info!(
            vault = %vault_addr,
            decimals0,
            decimals1,
            available0 = %available0,
            available1 = %available1,
            "preparing allocation"
        );

        let pool_state = PoolState {
            sqrt_price_x96: target.sqrt_price_x96.clone(),
            current_tick: target.current_tick,
            decimals0,
            decimals1,
        };
        let funds = UserFunds {
            amount0: available0,
            amount1: available1,
        };

        let mut plan =
            match allocation::allocate(&target.segments, &funds, &pool_state, state.swap_allowed) {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::error!(vault = %vault_addr, error = %err, "failed to allocate");
                    return RebalanceResult::skipped(vault_addr, Reason::AllocationError);
                }
            };

        // Deviation gate: only reshape when the plan differs enough.
        let deviation = deviation::calculate_deviation(&positions, &plan.positions);
        tracing::info!(
            vault = %vault_addr,
            deviation,
            threshold = self.deviation_threshold,
            "deviation calculated"
        );
        if deviation < self.deviation_threshold {
            return RebalanceResult::skipped(vault_addr, Reason::DeviationBelowThreshold);
        }

        tracing::info!(
            vault = %vault_addr,
            new_positions = plan.positions.len(),
            total_amount0 = %plan.total_amount0,
            total_amount1 = %plan.total_amount1,
            swap = plan.swap.is_some(),
            "allocation computed"
        );

        if let Err(err) = executor::execute_rebalance(
            &self.provider,
            &self.reader,
            &vault,
            &positions,
            &mut plan,
            &target.sqrt_price_x96,
            token0,
            token1,
            &state.pool_key,
            &self.settings,
            &self.shutdown,
        )
        .await
        {
            let reason = match err {
                ExecutionError::ShuttingDown => Reason::ShuttingDown,
                _ => Reason::ExecutionError,
            };
            tracing::error!(vault = %vault_addr, error = %err, "failed to execute rebalance");
            return RebalanceResult::skipped(vault_addr, reason);
        }

        RebalanceResult {
            vault: vault_addr,
            rebalanced: true,
            reason: Reason::Success,
        }
    }

    /// Reads each position's liquidity from the position manager and sums
    /// the invested token amounts at the current price. A single position's
    /// read failure downgrades it to empty rather than failing the vault.
    async fn invested_amounts(
        &self,
        positions: &mut [Position],
        posm: Address,
        sqrt_price_x96: &BigInt,
    ) -> Result<(BigInt, BigInt), Reason> {
        let mut invested0 = BigInt::zero();
        let mut invested1 = BigInt::zero();

        for position in positions.iter_mut() {
            let liquidity =
                match position_liquidity(self.provider.clone(), posm, position.token_id).await {
                    Ok(liquidity) => liquidity,
                    Err(err) => {
                        tracing::warn!(
                            token_id = %position.token_id,
                            error = %err,
                            "failed to get position liquidity"
                        );
                        continue;
                    }
                };
            position.liquidity = Some(liquidity.clone());

            if liquidity.is_zero() {
                continue;
            }

            let sqrt_a = match sqrt_ratio_at_tick(position.tick_lower) {
                Ok(ratio) => ratio,
                Err(err) => {
                    tracing::error!(token_id = %position.token_id, error = %err, "bad position range");
                    return Err(Reason::GetPositionsError);
                }
            };
            let sqrt_b = match sqrt_ratio_at_tick(position.tick_upper) {
                Ok(ratio) => ratio,
                Err(err) => {
                    tracing::error!(token_id = %position.token_id, error = %err, "bad position range");
                    return Err(Reason::GetPositionsError);
                }
            };

            invested0 += amount0_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);
            invested1 += amount1_for_liquidity(sqrt_price_x96, &sqrt_a, &sqrt_b, &liquidity);
        }

        Ok((invested0, invested1))
    }
}
