//! Pool identity: the v4 pool key and its keccak-derived id.

use std::fmt;

use alloy_primitives::{Address, B256, keccak256};
use serde::{Deserialize, Serialize};

const SLOT_SIZE: usize = 32;
const SLOT_COUNT: usize = 5;
const ADDRESS_OFFSET: usize = 12;
const INT24_OFFSET: usize = 29;

/// Identifies a pool. Valid keys order currencies so that
/// `currency0 < currency1` by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

#[derive(Debug)]
pub enum PoolKeyError {
    /// currency0 must sort strictly below currency1.
    UnorderedCurrencies { currency0: Address, currency1: Address },
    NonPositiveTickSpacing(i32),
}

impl fmt::Display for PoolKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnorderedCurrencies { currency0, currency1 } => {
                write!(f, "pool key currencies out of order: {currency0} >= {currency1}")
            }
            Self::NonPositiveTickSpacing(spacing) => {
                write!(f, "pool key tick spacing must be positive, got {spacing}")
            }
        }
    }
}

impl std::error::Error for PoolKeyError {}

impl PoolKey {
    pub fn validate(&self) -> Result<(), PoolKeyError> {
        if self.currency0 >= self.currency1 {
            return Err(PoolKeyError::UnorderedCurrencies {
                currency0: self.currency0,
                currency1: self.currency1,
            });
        }
        if self.tick_spacing <= 0 {
            return Err(PoolKeyError::NonPositiveTickSpacing(self.tick_spacing));
        }
        Ok(())
    }

    /// PoolId = keccak256 of the 5-slot ABI encoding of the key.
    /// The encoding is identity-defining across systems and must stay bit-exact.
    pub fn id(&self) -> B256 {
        keccak256(self.abi_encoded())
    }

    /// The 160-byte ABI encoding: addresses right-aligned, fee as uint24,
    /// tick spacing as sign-extended int24.
    pub fn abi_encoded(&self) -> [u8; SLOT_SIZE * SLOT_COUNT] {
        let mut data = [0u8; SLOT_SIZE * SLOT_COUNT];

        data[ADDRESS_OFFSET..SLOT_SIZE].copy_from_slice(self.currency0.as_slice());
        data[SLOT_SIZE + ADDRESS_OFFSET..2 * SLOT_SIZE].copy_from_slice(self.currency1.as_slice());

        let fee_slot = &mut data[2 * SLOT_SIZE..3 * SLOT_SIZE];
        fee_slot[INT24_OFFSET] = (self.fee >> 16) as u8;
        fee_slot[INT24_OFFSET + 1] = (self.fee >> 8) as u8;
        fee_slot[INT24_OFFSET + 2] = self.fee as u8;

        let spacing_slot = &mut data[3 * SLOT_SIZE..4 * SLOT_SIZE];
        if self.tick_spacing < 0 {
            spacing_slot[..INT24_OFFSET].fill(0xFF);
        }
        spacing_slot[INT24_OFFSET] = (self.tick_spacing >> 16) as u8;
        spacing_slot[INT24_OFFSET + 1] = (self.tick_spacing >> 8) as u8;
        spacing_slot[INT24_OFFSET + 2] = self.tick_spacing as u8;

        data[4 * SLOT_SIZE + ADDRESS_OFFSET..].copy_from_slice(self.hooks.as_slice());

        data
    }
}
