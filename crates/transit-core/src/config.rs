//! Configuration
//!
//! Two layers:
//! - Required migration inputs from environment variables (`EnvLookup`)
//! - Optional tuning from a TOML file (`TransitConfig`), every field defaulted
//!
//! All of it is validated before the first network request.

use crate::abi::{parse_address as parse_hex_address, Address, H160, U256};
use crate::chain::{GasSettings, RpcSettings};
use crate::compiler::ContractPaths;
use crate::error::ConfigError;
use crate::restart::RestartPolicy;
use crate::types::{MigrationParameters, NodeDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Deployment owner
pub const ENV_OWNER: &str = "OWNER";
/// Comma-separated mining addresses
pub const ENV_INITIAL_VALIDATORS: &str = "INITIAL_VALIDATORS";
/// Comma-separated staking addresses
pub const ENV_STAKING_ADDRESSES: &str = "STAKING_ADDRESSES";
pub const ENV_FIRST_VALIDATOR_IS_UNREMOVABLE: &str = "FIRST_VALIDATOR_IS_UNREMOVABLE";
pub const ENV_COLLECT_ROUND_LENGTH: &str = "COLLECT_ROUND_LENGTH";
pub const ENV_STAKING_EPOCH_DURATION: &str = "STAKING_EPOCH_DURATION";
pub const ENV_STAKE_WITHDRAW_DISALLOW_PERIOD: &str = "STAKE_WITHDRAW_DISALLOW_PERIOD";

/// Bridge allowed to mint native rewards unless configured otherwise
/// (`0x7301CFA0e1756B71869E93d4e4Dca5c7d0eb0AA6`)
pub const DEFAULT_ERC_TO_NATIVE_BRIDGE: Address = H160([
    0x73, 0x01, 0xcf, 0xa0, 0xe1, 0x75, 0x6b, 0x71, 0x86, 0x9e, 0x93, 0xd4, 0xe4, 0xdc, 0xa5, 0xc7,
    0xd0, 0xeb, 0x0a, 0xa6,
]);

/// Source of environment-style variables
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

fn required(env: &dyn EnvLookup, key: &str) -> Result<String, ConfigError> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    parse_hex_address(value).map_err(|e| ConfigError::invalid(key, e.to_string()))
}

// positions pair mining and staking addresses, so a blank entry is an error
fn parse_address_list(key: &str, value: &str) -> Result<Vec<Address>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .enumerate()
        .map(|(position, item)| {
            if item.is_empty() {
                Err(ConfigError::invalid(key, format!("empty entry at position {position}")))
            } else {
                parse_address(key, item)
            }
        })
        .collect()
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::invalid(key, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::invalid(key, format!("expected true or false, got '{value}'")))
    }
}

impl MigrationParameters {
    /// Read and validate the required inputs
    ///
    /// # Errors
    /// - `ConfigError::Missing` for an absent or empty variable
    /// - `ConfigError::Invalid` for a malformed value
    /// - any error of `MigrationParameters::validate`
    pub fn from_env(env: &dyn EnvLookup, settings: &MigrationSettings) -> Result<Self, ConfigError> {
        let owner = parse_address(ENV_OWNER, &required(env, ENV_OWNER)?)?;
        let mining_addresses =
            parse_address_list(ENV_INITIAL_VALIDATORS, &required(env, ENV_INITIAL_VALIDATORS)?)?;
        let staking_addresses =
            parse_address_list(ENV_STAKING_ADDRESSES, &required(env, ENV_STAKING_ADDRESSES)?)?;
        let first_validator_unremovable = parse_bool(
            ENV_FIRST_VALIDATOR_IS_UNREMOVABLE,
            &required(env, ENV_FIRST_VALIDATOR_IS_UNREMOVABLE)?,
        )?;
        let collect_round_length =
            parse_u64(ENV_COLLECT_ROUND_LENGTH, &required(env, ENV_COLLECT_ROUND_LENGTH)?)?;
        let staking_epoch_duration =
            parse_u64(ENV_STAKING_EPOCH_DURATION, &required(env, ENV_STAKING_EPOCH_DURATION)?)?;
        let stake_withdraw_disallow_period = parse_u64(
            ENV_STAKE_WITHDRAW_DISALLOW_PERIOD,
            &required(env, ENV_STAKE_WITHDRAW_DISALLOW_PERIOD)?,
        )?;

        let params = Self {
            owner,
            mining_addresses,
            staking_addresses,
            first_validator_unremovable,
            collect_round_length,
            staking_epoch_duration,
            stake_withdraw_disallow_period,
            delegator_min_stake: settings.delegator_min_stake_units()?,
            candidate_min_stake: settings.candidate_min_stake_units()?,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Staking token constructor arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            name: "STAKE".to_string(),
            symbol: "STAKE".to_string(),
            decimals: 18,
        }
    }
}

/// Migration tuning that does not come from the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Blocks reserved for the remaining steps and the node restarts
    pub settle_margin: u64,
    /// Whole tokens
    pub delegator_min_stake: u64,
    /// Whole tokens
    pub candidate_min_stake: u64,
    pub token: TokenSettings,
    pub erc_to_native_bridges: Vec<Address>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            settle_margin: 31,
            delegator_min_stake: 1_000,
            candidate_min_stake: 20_000,
            token: TokenSettings::default(),
            erc_to_native_bridges: vec![DEFAULT_ERC_TO_NATIVE_BRIDGE],
        }
    }
}

impl MigrationSettings {
    /// Delegator minimum in token base units
    pub fn delegator_min_stake_units(&self) -> Result<U256, ConfigError> {
        self.to_base_units("delegator_min_stake", self.delegator_min_stake)
    }

    /// Candidate minimum in token base units
    pub fn candidate_min_stake_units(&self) -> Result<U256, ConfigError> {
        self.to_base_units("candidate_min_stake", self.candidate_min_stake)
    }

    fn to_base_units(&self, key: &str, tokens: u64) -> Result<U256, ConfigError> {
        U256::from(10u64)
            .checked_pow(U256::from(self.token.decimals))
            .and_then(|unit| unit.checked_mul(U256::from(tokens)))
            .ok_or_else(|| ConfigError::invalid(key, "overflows 256 bits"))
    }
}

/// The fixed node roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    pub count: usize,
    /// Node `i` listens on `rpc_port_base + i`
    pub rpc_port_base: u16,
    /// `{index}` is replaced by the node index
    pub config_template: String,
    /// `{index}` is replaced by the node index
    pub log_template: String,
    pub binary: PathBuf,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            count: 7,
            rpc_port_base: 8540,
            config_template: "./config/node{index}.toml".to_string(),
            log_template: "./parity-data/node{index}/log".to_string(),
            binary: PathBuf::from("../parity-ethereum/target/release/parity"),
        }
    }
}

impl RosterSettings {
    /// Descriptor of every node
    ///
    /// # Errors
    /// - `ConfigError::Invalid` if a port does not fit in 16 bits
    pub fn descriptors(&self) -> Result<Vec<NodeDescriptor>, ConfigError> {
        (0..self.count)
            .map(|index| {
                let rpc_port = u16::try_from(index)
                    .ok()
                    .and_then(|i| self.rpc_port_base.checked_add(i))
                    .ok_or_else(|| {
                        ConfigError::invalid("nodes.rpc_port_base", format!("no port for node {index}"))
                    })?;
                Ok(NodeDescriptor {
                    index,
                    rpc_port,
                    config_path: expand(&self.config_template, index),
                    log_path: expand(&self.log_template, index),
                })
            })
            .collect()
    }
}

fn expand(template: &str, index: usize) -> PathBuf {
    PathBuf::from(template.replace("{index}", &index.to_string()))
}

/// Complete tuning of a transition run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    pub rpc: RpcSettings,
    pub gas: GasSettings,
    pub migration: MigrationSettings,
    pub contracts: ContractPaths,
    pub spec_path: PathBuf,
    pub nodes: RosterSettings,
    pub restart: RestartPolicy,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            rpc: RpcSettings::default(),
            gas: GasSettings::default(),
            migration: MigrationSettings::default(),
            contracts: ContractPaths::default(),
            spec_path: PathBuf::from("../parity-data/spec.json"),
            nodes: RosterSettings::default(),
            restart: RestartPolicy::default(),
        }
    }
}

impl TransitConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::File {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// - `ConfigError::File` if the file is unreadable or malformed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Node roster
    pub fn descriptors(&self) -> Result<Vec<NodeDescriptor>, ConfigError> {
        self.nodes.descriptors()
    }
}
