//! Core types for the transition
//!
//! Defines the data the pipeline passes between components:
//! - Contract kinds of the POSDAO set
//! - Migration parameters (validated once, read-only afterwards)
//! - The transition bundle handed to the spec mutator
//! - Node descriptors of the restart roster

use crate::abi::{checksum, Address, U256};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use ulid::Ulid;

/// Identifier of a transition run (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every contract the transition touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContractKind {
    /// ERC-677 staking token
    Token,
    ValidatorSet,
    Staking,
    BlockReward,
    Random,
    TxPermission,
    Certifier,
    Registry,
    /// Admin upgradeability proxy wrapping the upgradable contracts
    UpgradeProxy,
    /// The POA reward contract being replaced
    LegacyBlockReward,
}

impl ContractKind {
    /// Contract name as it appears in sources and build artifacts
    #[must_use]
    pub fn contract_name(&self) -> &'static str {
        match self {
            Self::Token => "ERC677BridgeTokenRewardableMock",
            Self::ValidatorSet => "ValidatorSetAuRa",
            Self::Staking => "StakingAuRa",
            Self::BlockReward => "BlockRewardAuRa",
            Self::Random => "RandomAuRa",
            Self::TxPermission => "TxPermission",
            Self::Certifier => "Certifier",
            Self::Registry => "Registry",
            Self::UpgradeProxy => "AdminUpgradeabilityProxy",
            Self::LegacyBlockReward => "BlockReward",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.contract_name())
    }
}

/// Inputs of the migration
///
/// `mining_addresses[i]` and `staking_addresses[i]` describe the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationParameters {
    /// Deployment owner, proxy admin and initial permitted sender
    pub owner: Address,
    pub mining_addresses: Vec<Address>,
    pub staking_addresses: Vec<Address>,
    /// Whether the first staking address can never be removed
    pub first_validator_unremovable: bool,
    /// Blocks per randomness collection round
    pub collect_round_length: u64,
    /// Blocks per staking epoch
    pub staking_epoch_duration: u64,
    /// Blocks at the end of an epoch during which withdrawals are refused
    pub stake_withdraw_disallow_period: u64,
    /// Minimum delegator stake, in token base units
    pub delegator_min_stake: U256,
    /// Minimum candidate stake, in token base units
    pub candidate_min_stake: U256,
}

impl MigrationParameters {
    /// Check the cross-field invariants
    ///
    /// # Errors
    /// - `ConfigError::LengthMismatch` if the address lists differ in length
    /// - `ConfigError::Missing` if the lists are empty
    /// - `ConfigError::Duplicate` if an address appears twice in a list
    /// - `ConfigError::Invalid` for a zero round length or an overflowing mint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mining_addresses.len() != self.staking_addresses.len() {
            return Err(ConfigError::LengthMismatch {
                mining: self.mining_addresses.len(),
                staking: self.staking_addresses.len(),
            });
        }
        if self.mining_addresses.is_empty() {
            return Err(ConfigError::Missing("INITIAL_VALIDATORS".to_string()));
        }
        check_unique("INITIAL_VALIDATORS", &self.mining_addresses)?;
        check_unique("STAKING_ADDRESSES", &self.staking_addresses)?;

        if self.collect_round_length == 0 {
            return Err(ConfigError::invalid("COLLECT_ROUND_LENGTH", "must be non-zero"));
        }
        if self.staking_epoch_duration == 0 {
            return Err(ConfigError::invalid("STAKING_EPOCH_DURATION", "must be non-zero"));
        }
        if self.candidate_min_stake.is_zero() {
            return Err(ConfigError::invalid("candidate_min_stake", "must be non-zero"));
        }
        if self.initial_mint().is_none() {
            return Err(ConfigError::invalid(
                "candidate_min_stake",
                "initial mint overflows 256 bits",
            ));
        }
        Ok(())
    }

    /// Number of initial pools
    #[inline]
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.staking_addresses.len()
    }

    /// Total tokens minted to the staking contract: one candidate stake per pool
    #[must_use]
    pub fn initial_mint(&self) -> Option<U256> {
        self.candidate_min_stake
            .checked_mul(U256::from(self.pool_count()))
    }

    /// Expected `unremovableValidator()` after initialization
    #[must_use]
    pub fn expected_unremovable(&self) -> Address {
        if self.first_validator_unremovable {
            self.staking_addresses.first().copied().unwrap_or_else(Address::zero)
        } else {
            Address::zero()
        }
    }
}

fn check_unique(key: &str, addresses: &[Address]) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(addresses.len());
    for address in addresses {
        if !seen.insert(address) {
            return Err(ConfigError::Duplicate {
                key: key.to_string(),
                address: checksum(address),
            });
        }
    }
    Ok(())
}

/// Everything the spec document needs to schedule the transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionBundle {
    /// Block at which the network switches to POSDAO
    pub transition_block: u64,
    pub validator_set: Address,
    pub staking: Address,
    pub block_reward: Address,
    pub random: Address,
    pub tx_permission: Address,
    pub certifier: Address,
    pub registry: Address,
    pub token: Address,
    /// Bridges allowed to mint native-coin rewards
    pub erc_to_native_bridges: Vec<Address>,
}

/// A node of the restart roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Position in the roster
    pub index: usize,
    /// JSON-RPC port the node listens on
    pub rpc_port: u16,
    /// Node-specific config file
    pub config_path: PathBuf,
    /// File the node's output is appended to
    pub log_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn params(k: u8) -> MigrationParameters {
        MigrationParameters {
            owner: addr(0xee),
            mining_addresses: (1..=k).map(addr).collect(),
            staking_addresses: (1..=k).map(|i| addr(0x80 + i)).collect(),
            first_validator_unremovable: true,
            collect_round_length: 100,
            staking_epoch_duration: 1000,
            stake_withdraw_disallow_period: 50,
            delegator_min_stake: U256::from(1_000u64),
            candidate_min_stake: U256::from(20_000u64),
        }
    }

    #[test]
    fn valid_parameters() {
        assert!(params(7).validate().is_ok());
        assert_eq!(params(7).initial_mint(), Some(U256::from(140_000u64)));
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut p = params(3);
        p.staking_addresses.pop();
        assert!(matches!(
            p.validate(),
            Err(ConfigError::LengthMismatch { mining: 3, staking: 2 })
        ));
    }

    #[test]
    fn duplicates_rejected() {
        let mut p = params(3);
        p.mining_addresses[2] = p.mining_addresses[0];
        assert!(matches!(p.validate(), Err(ConfigError::Duplicate { .. })));
    }

    #[test]
    fn overflowing_mint_rejected() {
        let mut p = params(2);
        p.candidate_min_stake = U256::MAX;
        assert_eq!(p.initial_mint(), None);
        assert!(matches!(p.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn zero_round_length_rejected() {
        let mut p = params(3);
        p.collect_round_length = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn expected_unremovable_follows_flag() {
        let mut p = params(3);
        assert_eq!(p.expected_unremovable(), p.staking_addresses[0]);
        p.first_validator_unremovable = false;
        assert_eq!(p.expected_unremovable(), Address::zero());
    }

    #[test]
    fn contract_names() {
        assert_eq!(ContractKind::ValidatorSet.to_string(), "ValidatorSetAuRa");
        assert_eq!(ContractKind::UpgradeProxy.contract_name(), "AdminUpgradeabilityProxy");
    }
}
