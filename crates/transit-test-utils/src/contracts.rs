//! Interfaces of the simulated contract set and a compiler producing them

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use transit_core::abi::Interface;
use transit_core::compiler::{CompiledContract, ContractCompiler, ContractSource, ImportResolver};
use transit_core::{CompileError, ContractKind, ContractLibrary};

/// Prefix of simulated creation code: `SIM:<ContractName>;`
pub const SIM_BYTECODE_PREFIX: &[u8] = b"SIM:";

/// One ABI function: name, input types, output types
pub type MethodSpec = (&'static str, &'static [&'static str], &'static [&'static str]);

const ADDRESS: &[&str] = &["address"];
const ADDRESSES: &[&str] = &["address[]"];
const BOOL: &[&str] = &["bool"];
const UINT: &[&str] = &["uint256"];
const NONE: &[&str] = &[];

const fn m(
    name: &'static str,
    inputs: &'static [&'static str],
    outputs: &'static [&'static str],
) -> MethodSpec {
    (name, inputs, outputs)
}

const INITIALIZABLE: [MethodSpec; 2] = [
    m("isInitialized", NONE, BOOL),
    m("validatorSetContract", NONE, ADDRESS),
];

/// Constructor inputs and functions of a simulated contract
#[must_use]
pub fn contract_methods(name: &str) -> Option<(&'static [&'static str], Vec<MethodSpec>)> {
    let (constructor, methods): (&'static [&'static str], Vec<MethodSpec>) = match name {
        "ERC677BridgeTokenRewardableMock" => (
            &["string", "string", "uint8"],
            vec![
                m("setStakingContract", ADDRESS, NONE),
                m("stakingContract", NONE, ADDRESS),
                m("setBlockRewardContract", ADDRESS, NONE),
                m("blockRewardContract", NONE, ADDRESS),
                m("mint", &["address", "uint256"], BOOL),
                m("totalSupply", NONE, UINT),
                m("balanceOf", ADDRESS, UINT),
                m("name", NONE, &["string"]),
                m("symbol", NONE, &["string"]),
                m("decimals", NONE, &["uint8"]),
            ],
        ),
        "ValidatorSetAuRa" => (
            NONE,
            vec![
                m("initialize",
                    &["address", "address", "address", "address", "address[]", "address[]", "bool"],
                    NONE,
                ),
                m("isInitialized", NONE, BOOL),
                m("blockRewardContract", NONE, ADDRESS),
                m("randomContract", NONE, ADDRESS),
                m("stakingContract", NONE, ADDRESS),
                m("getValidators", NONE, ADDRESSES),
                m("getPendingValidators", NONE, ADDRESSES),
                m("unremovableValidator", NONE, ADDRESS),
                m("isValidator", ADDRESS, BOOL),
                m("stakingByMiningAddress", ADDRESS, ADDRESS),
            ],
        ),
        "StakingAuRa" => (
            NONE,
            [
                INITIALIZABLE.to_vec(),
                vec![
                    m("initialize",
                        &["address", "address[]", "uint256", "uint256", "uint256", "uint256", "uint256"],
                        NONE,
                    ),
                    m("setErc677TokenContract", ADDRESS, NONE),
                    m("erc677TokenContract", NONE, ADDRESS),
                    m("delegatorMinStake", NONE, UINT),
                    m("candidateMinStake", NONE, UINT),
                    m("stakingEpochDuration", NONE, UINT),
                    m("stakingEpochStartBlock", NONE, UINT),
                    m("stakeWithdrawDisallowPeriod", NONE, UINT),
                    m("getPools", NONE, ADDRESSES),
                    m("initialValidatorStake", UINT, NONE),
                    m("stakeAmount", &["address", "address"], UINT),
                ],
            ]
            .concat(),
        ),
        "BlockRewardAuRa" => (
            NONE,
            [
                INITIALIZABLE.to_vec(),
                vec![
                    m("initialize", &["address", "address"], NONE),
                    m("setErcToNativeBridgesAllowed", ADDRESSES, NONE),
                    m("ercToNativeBridgesAllowed", NONE, ADDRESSES),
                ],
            ]
            .concat(),
        ),
        "RandomAuRa" => (
            NONE,
            [
                INITIALIZABLE.to_vec(),
                vec![
                    m("initialize", &["uint256", "address"], NONE),
                    m("collectRoundLength", NONE, UINT),
                ],
            ]
            .concat(),
        ),
        "TxPermission" => (
            NONE,
            [
                INITIALIZABLE.to_vec(),
                vec![
                    m("initialize", &["address[]", "address"], NONE),
                    m("isSenderAllowed", ADDRESS, BOOL),
                    m("allowedSenders", NONE, ADDRESSES),
                ],
            ]
            .concat(),
        ),
        "Certifier" => (
            NONE,
            [
                INITIALIZABLE.to_vec(),
                vec![
                    m("initialize", &["address[]", "address"], NONE),
                    m("certified", ADDRESS, BOOL),
                ],
            ]
            .concat(),
        ),
        "Registry" => (
            &["address", "address"],
            vec![m("owner", NONE, ADDRESS), m("certifier", NONE, ADDRESS)],
        ),
        "AdminUpgradeabilityProxy" => (
            &["address", "address", "bytes"],
            vec![m("admin", NONE, ADDRESS), m("implementation", NONE, ADDRESS)],
        ),
        "BlockReward" => (NONE, vec![m("lastBlockProcessed", NONE, UINT)]),
        _ => return None,
    };
    Some((constructor, methods))
}

/// JSON ABI of a simulated contract
#[must_use]
pub fn abi_json(name: &str) -> Option<Value> {
    let (constructor, methods) = contract_methods(name)?;
    let params = |types: &[&str]| -> Vec<Value> {
        types
            .iter()
            .enumerate()
            .map(|(i, ty)| json!({ "name": format!("arg{i}"), "type": ty }))
            .collect()
    };

    let mut entries = vec![json!({
        "type": "constructor",
        "inputs": params(constructor),
    })];
    entries.extend(methods.iter().map(|(method, inputs, outputs)| {
        let mutability = if outputs.is_empty() || *method == "mint" {
            "nonpayable"
        } else {
            "view"
        };
        json!({
            "type": "function",
            "name": method,
            "inputs": params(inputs),
            "outputs": params(outputs),
            "stateMutability": mutability,
        })
    }));
    entries.push(json!({
        "type": "event",
        "name": "Initialized",
        "inputs": [],
        "anonymous": false,
    }));
    Some(Value::Array(entries))
}

/// Creation code understood by `SimulatedChain`
#[must_use]
pub fn sim_bytecode(name: &str) -> Vec<u8> {
    let mut code = SIM_BYTECODE_PREFIX.to_vec();
    code.extend_from_slice(name.as_bytes());
    code.push(b';');
    code
}

/// Compiled form of a simulated contract
///
/// # Panics
/// If `name` is not part of the simulated set.
#[must_use]
pub fn compiled(name: &str) -> CompiledContract {
    let abi = abi_json(name).unwrap_or_else(|| panic!("no simulated contract {name}"));
    CompiledContract {
        name: name.to_string(),
        interface: Arc::new(Interface::from_json(&abi).unwrap()),
        bytecode: Arc::new(sim_bytecode(name)),
    }
}

/// Compiler serving the simulated contract set from memory
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedCompiler;

#[async_trait]
impl ContractCompiler for SimulatedCompiler {
    async fn compile(
        &self,
        _source_dir: &Path,
        contract_name: &str,
        _resolver: &ImportResolver,
    ) -> Result<CompiledContract, CompileError> {
        let abi = abi_json(contract_name)
            .ok_or_else(|| CompileError::MissingOutput(contract_name.to_string()))?;
        Ok(CompiledContract {
            name: contract_name.to_string(),
            interface: Arc::new(Interface::from_json(&abi)?),
            bytecode: Arc::new(sim_bytecode(contract_name)),
        })
    }
}

/// Every contract kind served by `SimulatedCompiler`
#[must_use]
pub fn simulated_library() -> ContractLibrary {
    let compiler: Arc<dyn ContractCompiler> = Arc::new(SimulatedCompiler);
    [
        ContractKind::Token,
        ContractKind::ValidatorSet,
        ContractKind::Staking,
        ContractKind::BlockReward,
        ContractKind::Random,
        ContractKind::TxPermission,
        ContractKind::Certifier,
        ContractKind::Registry,
        ContractKind::UpgradeProxy,
        ContractKind::LegacyBlockReward,
    ]
    .into_iter()
    .fold(ContractLibrary::new(), |library, kind| {
        library.with_source(kind, ContractSource::new(Arc::clone(&compiler), "sim", kind))
    })
}
