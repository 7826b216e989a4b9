//! Rebalance agent binary: wires the signer, provider, and services, then
//! drives rounds on the configured cron schedule until a shutdown signal.

use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

use vault_rebalancer::agent::{ProtectionSettings, Service, ShutdownToken, VaultSource};
use vault_rebalancer::config::AgentConfig;
use vault_rebalancer::market::{StateViewReader, TickDataSource};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if dotenvy::dotenv().is_err() {
        tracing::warn!("no .env file found, using process environment");
    }

    if let Err(err) = run().await {
        tracing::error!(error = %err, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AgentConfig::from_env()?;

    let signer: PrivateKeySigner = config.private_key.parse()?;
    tracing::info!(address = %signer.address(), "signer initialized");

    let wallet = EthereumWallet::from(signer);
    let provider = ProviderBuilder::new()
        .wallet(wallet)
        .connect_http(config.rpc_url.parse()?);

    let chain_id = provider.get_chain_id().await?;
    if chain_id != config.chain_id {
        return Err(format!(
            "chain id mismatch: CHAIN_ID={} but rpc reports {chain_id}",
            config.chain_id
        )
        .into());
    }
    tracing::info!(rpc = %config.rpc_url, chain_id, "connected to rpc");

    let (shutdown_tx, shutdown) = ShutdownToken::new();
    spawn_signal_listener(shutdown_tx);

    let reader = StateViewReader::new(provider.clone(), config.state_view_address);
    let source = VaultSource::Factory {
        factory: config.factory_address,
    };

    let service = Service::new(provider, source, reader, shutdown.clone())
        .with_protection_settings(ProtectionSettings {
            swap_slippage_bps: config.swap_slippage_bps,
            mint_slippage_bps: config.mint_slippage_bps,
            max_gas_price_gwei: config.max_gas_price_gwei,
        })
        .with_deviation_threshold(config.deviation_threshold)
        .with_tick_range_override(config.tick_range_override);

    tracing::info!(schedule = %config.schedule, "rebalance agent started");

    // First round fires immediately; later rounds follow the schedule.
    run_once(&service).await;

    let mut loop_token = shutdown.clone();
    loop {
        let Some(next) = config.schedule.upcoming(Utc).next() else {
            tracing::warn!("schedule has no upcoming fire times, exiting");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                run_once(&service).await;
            }
            _ = loop_token.cancelled() => {
                break;
            }
        }
        if shutdown.is_cancelled() {
            break;
        }
    }

    tracing::info!("shutting down");
    Ok(())
}

async fn run_once<P, R>(service: &Service<P, R>)
where
    P: Provider + Clone,
    R: TickDataSource + Clone,
{
    tracing::info!("running rebalance check");

    let results = match service.run().await {
        Ok(results) => results,
        Err(err) => {
            tracing::error!(error = %err, "rebalance run failed");
            return;
        }
    };

    for result in &results {
        tracing::info!(
            vault = %result.vault,
            rebalanced = result.rebalanced,
            reason = result.reason.as_str(),
            "vault processed"
        );
    }
    tracing::info!(vaults = results.len(), "rebalance check completed");
}

/// Flips the shutdown flag on SIGINT, SIGTERM, SIGHUP, or SIGQUIT.
fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGINT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };
        let mut quit = match signal(SignalKind::quit()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGQUIT handler");
                return;
            }
        };

        tokio::select! {
            _ = interrupt.recv() => tracing::info!("received SIGINT"),
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
            _ = hangup.recv() => tracing::info!("received SIGHUP"),
            _ = quit.recv() => tracing::info!("received SIGQUIT"),
        }
        let _ = shutdown_tx.send(true);
    });
}
