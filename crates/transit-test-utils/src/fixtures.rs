//! Sample parameters, rosters and spec documents

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use transit_core::config::MigrationSettings;
use transit_core::spec::SpecStore;
use transit_core::{checksum, Address, MigrationParameters, NodeDescriptor, SpecError};

/// Deterministic address with `tag` in the first byte and `n` in the last two
#[must_use]
pub fn address(tag: u8, n: u16) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = tag;
    bytes[18..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

/// Account deploying the contracts
#[must_use]
pub fn owner() -> Address {
    address(0x0e, 1)
}

/// `k` validators, round length 100, default stakes
#[must_use]
pub fn sample_parameters(k: u16) -> MigrationParameters {
    let settings = MigrationSettings::default();
    MigrationParameters {
        owner: owner(),
        mining_addresses: (0..k).map(|i| address(0xaa, i)).collect(),
        staking_addresses: (0..k).map(|i| address(0xbb, i)).collect(),
        first_validator_unremovable: true,
        collect_round_length: 100,
        staking_epoch_duration: 1_000,
        stake_withdraw_disallow_period: 10,
        delegator_min_stake: settings.delegator_min_stake_units().unwrap(),
        candidate_min_stake: settings.candidate_min_stake_units().unwrap(),
    }
}

/// `n` nodes on ports 8540.., configs `config/nodeN.toml`
#[must_use]
pub fn sample_roster(n: usize) -> Vec<NodeDescriptor> {
    (0..n)
        .map(|index| NodeDescriptor {
            index,
            rpc_port: 8540 + u16::try_from(index).unwrap(),
            config_path: PathBuf::from(format!("config/node{index}.toml")),
            log_path: PathBuf::from(format!("parity-data/node{index}/log")),
        })
        .collect()
}

/// AuRa spec with a single validator list and a legacy reward contract
#[must_use]
pub fn sample_spec_document(legacy_block_reward: Address) -> Value {
    json!({
        "name": "DPoSChain",
        "engine": {
            "authorityRound": {
                "params": {
                    "stepDuration": 5,
                    "blockReward": "0x0",
                    "maximumUncleCountTransition": 0,
                    "maximumUncleCount": 0,
                    "validators": {
                        "list": [checksum(&address(0xaa, 0))]
                    },
                    "blockRewardContractAddress": checksum(&legacy_block_reward),
                    "blockRewardContractTransition": 0
                }
            }
        },
        "params": {
            "gasLimitBoundDivisor": "0x400",
            "maximumExtraDataSize": "0x20",
            "minGasLimit": "0x1388",
            "networkID": "0x65"
        },
        "genesis": {
            "seal": { "authorityRound": { "step": "0x0", "signature": "0x0" } },
            "difficulty": "0x20000",
            "gasLimit": "0x663BE0"
        },
        "accounts": {}
    })
}

/// Spec store holding the document in memory
#[derive(Debug, Clone)]
pub struct MemorySpecStore {
    document: Arc<Mutex<Value>>,
    writes: Arc<Mutex<usize>>,
}

impl MemorySpecStore {
    #[must_use]
    pub fn new(document: Value) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            writes: Arc::new(Mutex::new(0)),
        }
    }

    #[must_use]
    pub fn document(&self) -> Value {
        self.document.lock().clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn read(&self) -> Result<Value, SpecError> {
        Ok(self.document())
    }

    async fn write(&self, document: &Value) -> Result<(), SpecError> {
        *self.document.lock() = document.clone();
        *self.writes.lock() += 1;
        Ok(())
    }
}
