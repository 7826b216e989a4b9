//! Agent configuration from environment variables.
//!
//! Required variables fail startup; protection settings fall back to their
//! defaults when unset and on unparsable values log nothing here — the
//! caller decides how loud to be.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use cron::Schedule;

pub const DEFAULT_SCHEDULE: &str = "*/5 * * * *";
pub const DEFAULT_SWAP_SLIPPAGE_BPS: u32 = 50;
pub const DEFAULT_MINT_SLIPPAGE_BPS: u32 = 50;
pub const DEFAULT_MAX_GAS_PRICE_GWEI: f64 = 1.0;
pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 0.1;

#[derive(Debug)]
pub enum ConfigError {
    MissingEnv(&'static str),
    InvalidEnvValue { name: &'static str, value: String },
    InvalidSchedule { value: String, detail: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnv(name) => write!(f, "required env var {name} is not set"),
            Self::InvalidEnvValue { name, value } => write!(f, "invalid env var {name}={value}"),
            Self::InvalidSchedule { value, detail } => {
                write!(f, "invalid REBALANCE_SCHEDULE {value}: {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything the rebalance binary needs from its environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub rpc_url: String,
    pub factory_address: Address,
    pub state_view_address: Address,
    pub private_key: String,
    pub chain_id: u64,
    pub schedule: Schedule,
    pub swap_slippage_bps: u32,
    pub mint_slippage_bps: u32,
    pub max_gas_price_gwei: f64,
    pub deviation_threshold: f64,
    pub tick_range_override: Option<i32>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = required_env("RPC_URL")?;
        let factory_address = required_address("FACTORY_ADDRESS")?;
        let state_view_address = required_address("STATEVIEW_CONTRACT_ADDR")?;
        let private_key = required_env("AGENT_PRIVATE_KEY")?;
        let chain_id = required_parsed::<u64>("CHAIN_ID")?;

        let schedule = parse_schedule(
            std::env::var("REBALANCE_SCHEDULE")
                .ok()
                .filter(|raw| !raw.trim().is_empty()),
        )?;

        let swap_slippage_bps = parse_env_u32("SWAP_SLIPPAGE_BPS", DEFAULT_SWAP_SLIPPAGE_BPS);
        let mint_slippage_bps = parse_env_u32("MINT_SLIPPAGE_BPS", DEFAULT_MINT_SLIPPAGE_BPS);
        let max_gas_price_gwei = parse_env_f64("MAX_GAS_PRICE_GWEI", DEFAULT_MAX_GAS_PRICE_GWEI);
        let deviation_threshold = parse_env_f64("DEVIATION_THRESHOLD", DEFAULT_DEVIATION_THRESHOLD);
        let tick_range_override = parse_tick_range(std::env::var("TICK_RANGE_AROUND_CURRENT").ok());

        Ok(Self {
            rpc_url,
            factory_address,
            state_view_address,
            private_key,
            chain_id,
            schedule,
            swap_slippage_bps,
            mint_slippage_bps,
            max_gas_price_gwei,
            deviation_threshold,
            tick_range_override,
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    let raw = std::env::var(name)
        .map_err(|_| ConfigError::MissingEnv(name))?
        .trim()
        .to_string();
    if raw.is_empty() {
        return Err(ConfigError::MissingEnv(name));
    }
    Ok(raw)
}

fn required_address(name: &'static str) -> Result<Address, ConfigError> {
    let raw = required_env(name)?;
    Address::from_str(&raw).map_err(|_| ConfigError::InvalidEnvValue { name, value: raw })
}

fn required_parsed<T: FromStr>(name: &'static str) -> Result<T, ConfigError> {
    let raw = required_env(name)?;
    raw.parse::<T>()
        .map_err(|_| ConfigError::InvalidEnvValue { name, value: raw })
}

/// Six-field cron (seconds first); five-field crontab input is promoted by
/// prefixing a zero seconds column.
fn parse_schedule(raw: Option<String>) -> Result<Schedule, ConfigError> {
    let raw = raw.unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());
    let trimmed = raw.trim();

    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|err| ConfigError::InvalidSchedule {
        value: raw,
        detail: err.to_string(),
    })
}

fn parse_env_u32(name: &'static str, default: u32) -> u32 {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    raw.trim().parse::<u32>().unwrap_or(default)
}

fn parse_env_f64(name: &'static str, default: f64) -> f64 {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    raw.trim().parse::<f64>().unwrap_or(default)
}

/// Positive integers only; anything else is ignored with a warning.
fn parse_tick_range(raw: Option<String>) -> Option<i32> {
    let raw = raw?;
    match raw.trim().parse::<i32>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(value = raw, "invalid TICK_RANGE_AROUND_CURRENT, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_fires_every_five_minutes() {
        let schedule = parse_schedule(None).expect("default schedule should parse");
        let mut upcoming = schedule.upcoming(chrono::Utc);
        let first = upcoming.next().expect("schedule should yield fire times");
        let second = upcoming.next().expect("schedule should yield fire times");
        assert_eq!((second - first).num_seconds(), 300);
    }

    #[test]
    fn five_field_crontab_expressions_are_promoted() {
        let schedule = parse_schedule(Some("*/10 * * * *".to_string()))
            .expect("five-field expression should parse");
        let mut upcoming = schedule.upcoming(chrono::Utc);
        let first = upcoming.next().expect("schedule should yield fire times");
        let second = upcoming.next().expect("schedule should yield fire times");
        assert_eq!((second - first).num_seconds(), 600);
    }

    #[test]
    fn invalid_schedule_is_a_config_error() {
        let err = parse_schedule(Some("not a cron".to_string()))
            .expect_err("garbage schedule must fail");
        assert!(matches!(err, ConfigError::InvalidSchedule { .. }));
    }

    #[test]
    fn tick_range_rejects_non_positive_values() {
        assert_eq!(parse_tick_range(Some("500".to_string())), Some(500));
        assert_eq!(parse_tick_range(Some("0".to_string())), None);
        assert_eq!(parse_tick_range(Some("-10".to_string())), None);
        assert_eq!(parse_tick_range(Some("abc".to_string())), None);
        assert_eq!(parse_tick_range(None), None);
    }

    #[test]
    fn config_errors_render_the_variable_name() {
        let missing = ConfigError::MissingEnv("RPC_URL");
        assert!(missing.to_string().contains("RPC_URL"));

        let invalid = ConfigError::InvalidEnvValue {
            name: "CHAIN_ID",
            value: "banana".to_string(),
        };
        assert!(invalid.to_string().contains("CHAIN_ID"));
        assert!(invalid.to_string().contains("banana"));
    }
}
