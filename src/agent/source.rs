//! Vault discovery: the on-chain factory, or a fixed list for tests.

use std::fmt;

use alloy::providers::Provider;
use alloy::sol;
use alloy_primitives::{Address, U256};

sol! {
    #[sol(rpc)]
    contract VaultFactory {
        function getAllVaults() external view returns (address[] memory);
        function totalVaults() external view returns (uint256);
        function vaults(uint256 index) external view returns (address);
    }
}

#[derive(Debug)]
pub enum SourceError {
    FactoryNotSet,
    Provider(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FactoryNotSet => write!(f, "factory address not set"),
            Self::Provider(detail) => write!(f, "provider error: {detail}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Where vault addresses come from.
#[derive(Debug, Clone)]
pub enum VaultSource {
    /// Enumerate vaults from the factory contract.
    Factory { factory: Address },
    /// A fixed address list; used by tests and dry wiring.
    Static { addresses: Vec<Address> },
}

impl VaultSource {
    pub async fn vault_addresses<P: Provider + Clone>(
        &self,
        provider: &P,
    ) -> Result<Vec<Address>, SourceError> {
        match self {
            Self::Static { addresses } => Ok(addresses.clone()),
            Self::Factory { factory } => {
                if *factory == Address::ZERO {
                    return Err(SourceError::FactoryNotSet);
                }
                factory_vaults(provider, *factory).await
            }
        }
    }
}

/// Prefers the aggregate getter; older factories only expose the
/// totalVaults/vaults(i) pair, so a failure falls back to indexing.
async fn factory_vaults<P: Provider + Clone>(
    provider: &P,
    factory_addr: Address,
) -> Result<Vec<Address>, SourceError> {
    let factory = VaultFactory::new(factory_addr, provider.clone());

    match factory.getAllVaults().call().await {
        Ok(addresses) => {
            tracing::info!(
                factory = %factory_addr,
                vault_count = addresses.len(),
                "factory getAllVaults ok"
            );
            return Ok(addresses);
        }
        Err(err) => {
            tracing::warn!(
                factory = %factory_addr,
                error = %err,
                "factory getAllVaults failed, falling back to totalVaults"
            );
        }
    }

    let total = factory
        .totalVaults()
        .call()
        .await
        .map_err(|err| SourceError::Provider(err.to_string()))?;

    let count = u64::try_from(total)
        .map_err(|_| SourceError::Provider(format!("totalVaults {total} out of range")))?;
    let mut addresses = Vec::with_capacity(count as usize);
    for index in 0..count {
        let address = factory
            .vaults(U256::from(index))
            .call()
            .await
            .map_err(|err| SourceError::Provider(err.to_string()))?;
        addresses.push(address);
    }

    tracing::info!(factory = %factory_addr, vault_count = count, "factory vaults indexed");
    Ok(addresses)
}
