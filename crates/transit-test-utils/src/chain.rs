//! In-memory chain executing the simulated contract set
//!
//! Every transaction mines one block unless the chain is frozen. Contract
//! storage is a flat key/value map; reads of unset keys return the zero
//! value of the declared output type, as the EVM would.

use crate::contracts::{compiled, contract_methods, SIM_BYTECODE_PREFIX};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use transit_core::abi::{self, checksum, Function, Interface, ParamType};
use transit_core::chain::{ChainClient, TransactionReceipt, TransactionRequest};
use transit_core::{Address, ChainError, Token, H256, U256};

const PROXY: &str = "AdminUpgradeabilityProxy";
const LEGACY_BLOCK_REWARD: &str = "BlockReward";

#[derive(Debug)]
struct SimContract {
    name: String,
    interface: Arc<Interface>,
    storage: HashMap<String, Token>,
}

#[derive(Debug, Default)]
struct State {
    height: u64,
    frozen: bool,
    next_address: u64,
    contracts: HashMap<Address, SimContract>,
    deployed: Vec<(String, Address)>,
    submitted: usize,
    reject_tx: Option<usize>,
    reverts: HashSet<String>,
    overrides: HashMap<String, Token>,
    legacy_stalled_at: Option<u64>,
    disconnected: bool,
    reconnects: usize,
    log: Vec<String>,
}

/// Shared handle to a simulated chain; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct SimulatedChain {
    state: Arc<Mutex<State>>,
}

impl SimulatedChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain already at `height`
    #[must_use]
    pub fn at_height(height: u64) -> Self {
        let chain = Self::new();
        chain.set_height(height);
        chain
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().height = height;
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Stop mining blocks on transactions
    pub fn freeze(&self) {
        self.state.lock().frozen = true;
    }

    /// Deploy the POA reward contract the migration replaces
    #[must_use]
    pub fn install_legacy_block_reward(&self) -> Address {
        let mut state = self.state.lock();
        let address = state.allocate_address();
        let interface = compiled(LEGACY_BLOCK_REWARD).interface;
        state.contracts.insert(
            address,
            SimContract {
                name: LEGACY_BLOCK_REWARD.to_string(),
                interface,
                storage: HashMap::new(),
            },
        );
        address
    }

    /// Legacy rewards stop at `last_processed` regardless of height
    pub fn stall_legacy_rewards(&self, last_processed: u64) {
        self.state.lock().legacy_stalled_at = Some(last_processed);
    }

    /// Refuse the `n`-th submitted transaction (1-based)
    pub fn reject_transaction(&self, n: usize) {
        self.state.lock().reject_tx = Some(n);
    }

    /// Revert every call of `Contract.method`
    pub fn revert_method(&self, contract: &str, method: &str) {
        self.state.lock().reverts.insert(format!("{contract}.{method}"));
    }

    /// Answer reads of `Contract.method` with `value`
    pub fn override_read(&self, contract: &str, method: &str, value: Token) {
        self.state
            .lock()
            .overrides
            .insert(format!("{contract}.{method}"), value);
    }

    /// Make the transport fail until `reconnect`
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    #[must_use]
    pub fn reconnect_count(&self) -> usize {
        self.state.lock().reconnects
    }

    /// Transactions submitted so far, including refused ones
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.state.lock().submitted
    }

    /// `deploy Name` and `Name.method` entries in submission order
    #[must_use]
    pub fn transaction_log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Contracts deployed through transactions, in order
    #[must_use]
    pub fn deployments(&self) -> Vec<(String, Address)> {
        self.state.lock().deployed.clone()
    }

    /// Raw storage value of a deployed contract
    #[must_use]
    pub fn storage(&self, address: Address, key: &str) -> Option<Token> {
        self.state
            .lock()
            .contracts
            .get(&address)
            .and_then(|c| c.storage.get(key).cloned())
    }

    /// Name of the contract whose code runs at `address`
    #[must_use]
    pub fn contract_name(&self, address: Address) -> Option<String> {
        self.state.lock().contracts.get(&address).map(|c| c.name.clone())
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> Result<TransactionReceipt, ChainError> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.submitted += 1;
        if state.reject_tx == Some(state.submitted) {
            return Err(ChainError::Rejected(format!(
                "transaction {} refused by simulated node",
                state.submitted
            )));
        }

        let tx_hash = H256::from_low_u64_be(state.submitted as u64);
        let (success, contract_address) = match tx.to {
            None => {
                let address = state.deploy(&tx.data)?;
                (true, Some(address))
            }
            Some(to) => (state.execute(to, &tx.data).is_ok(), None),
        };

        if !state.frozen {
            state.height += 1;
        }
        Ok(TransactionReceipt {
            tx_hash,
            block_number: state.height,
            contract_address,
            success,
        })
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let state = self.state.lock();
        state.ensure_connected()?;
        let Some(contract) = state.contracts.get(&to) else {
            return Ok(Vec::new());
        };
        let (function, args) = decode_call(&contract.interface, &data)?;

        let key = format!("{}.{}", contract.name, function.name);
        let output = match state.overrides.get(&key) {
            Some(value) => value.clone(),
            None => state.read(contract, &function, &args),
        };
        Ok(ethers::abi::encode(&[output]))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let state = self.state.lock();
        state.ensure_connected()?;
        Ok(state.height)
    }

    async fn is_connected(&self) -> bool {
        !self.state.lock().disconnected
    }

    async fn reconnect(&mut self) -> Result<(), ChainError> {
        let mut state = self.state.lock();
        state.disconnected = false;
        state.reconnects += 1;
        Ok(())
    }
}

impl State {
    fn ensure_connected(&self) -> Result<(), ChainError> {
        if self.disconnected {
            Err(ChainError::Transport("simulated node unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn allocate_address(&mut self) -> Address {
        self.next_address += 1;
        let mut bytes = [0u8; 20];
        bytes[0] = 0xc0;
        bytes[12..].copy_from_slice(&self.next_address.to_be_bytes());
        Address::from(bytes)
    }

    fn deploy(&mut self, data: &[u8]) -> Result<Address, ChainError> {
        let body = data
            .strip_prefix(SIM_BYTECODE_PREFIX)
            .ok_or_else(|| ChainError::Rejected("unknown creation code".to_string()))?;
        let end = body
            .iter()
            .position(|b| *b == b';')
            .ok_or_else(|| ChainError::Rejected("truncated creation code".to_string()))?;
        let name = String::from_utf8_lossy(&body[..end]).into_owned();
        if contract_methods(&name).is_none() {
            return Err(ChainError::Rejected(format!("unknown contract {name}")));
        }
        let types: Vec<ParamType> = compiled(&name)
            .interface
            .constructor()
            .iter()
            .map(|p| p.kind.clone())
            .collect();
        let args = abi::decode_strict(&types, &body[end + 1..])?;

        let (code_name, storage) = if name == PROXY {
            let implementation = args[0].clone().into_address().unwrap_or_default();
            let target = self
                .contracts
                .get(&implementation)
                .map(|c| c.name.clone())
                .ok_or_else(|| ChainError::Rejected("proxy target has no code".to_string()))?;
            let storage = HashMap::from([
                ("implementation".to_string(), args[0].clone()),
                ("admin".to_string(), args[1].clone()),
            ]);
            (target, storage)
        } else {
            (name.clone(), constructor_storage(&name, args))
        };

        let address = self.allocate_address();
        self.log.push(format!("deploy {name}"));
        self.deployed.push((name, address));
        self.contracts.insert(
            address,
            SimContract {
                interface: compiled(&code_name).interface,
                name: code_name,
                storage,
            },
        );
        Ok(address)
    }

    fn execute(&mut self, to: Address, data: &[u8]) -> Result<(), String> {
        let Some(contract) = self.contracts.get_mut(&to) else {
            return Err("no code at target".to_string());
        };
        let (function, args) = decode_call(&contract.interface, data).map_err(|e| e.to_string())?;
        let key = format!("{}.{}", contract.name, function.name);
        self.log.push(key.clone());
        if self.reverts.contains(&key) {
            return Err(format!("{key} reverted"));
        }
        transact(contract, &function.name, args)
    }

    fn read(&self, contract: &SimContract, function: &Function, args: &[Token]) -> Token {
        if contract.name == LEGACY_BLOCK_REWARD && function.name == "lastBlockProcessed" {
            return Token::Uint(U256::from(self.legacy_stalled_at.unwrap_or(self.height)));
        }
        let key = storage_key(&function.name, args);
        contract.storage.get(&key).cloned().unwrap_or_else(|| {
            function
                .outputs
                .first()
                .map_or(Token::Bool(false), zero_value)
        })
    }
}

fn decode_call(interface: &Interface, data: &[u8]) -> Result<(Function, Vec<Token>), ChainError> {
    if data.len() < 4 {
        return Err(ChainError::Decode("call data shorter than a selector".to_string()));
    }
    let function = interface
        .function_by_selector(data)
        .ok_or_else(|| ChainError::Decode("unknown selector".to_string()))?;
    let types: Vec<ParamType> = function.inputs.iter().map(|p| p.kind.clone()).collect();
    let args = abi::decode_strict(&types, &data[4..])?;
    Ok((function.clone(), args))
}

fn storage_key(method: &str, args: &[Token]) -> String {
    args.iter().fold(method.to_string(), |mut key, arg| {
        key.push(':');
        key.push_str(&match arg {
            Token::Address(a) => checksum(a),
            Token::Uint(v) => v.to_string(),
            other => format!("{other:?}"),
        });
        key
    })
}

fn zero_value(param: &abi::Param) -> Token {
    zero_of(&param.kind)
}

fn zero_of(ty: &ParamType) -> Token {
    match ty {
        ParamType::Address => Token::Address(Address::zero()),
        ParamType::Uint(_) => Token::Uint(U256::zero()),
        ParamType::Int(_) => Token::Int(U256::zero()),
        ParamType::Bool => Token::Bool(false),
        ParamType::String => Token::String(String::new()),
        ParamType::Bytes => Token::Bytes(Vec::new()),
        ParamType::FixedBytes(len) => Token::FixedBytes(vec![0; *len]),
        ParamType::Array(_) => Token::Array(Vec::new()),
        ParamType::FixedArray(inner, len) => Token::FixedArray(vec![zero_of(inner); *len]),
        ParamType::Tuple(items) => Token::Tuple(items.iter().map(zero_of).collect()),
    }
}

fn constructor_storage(name: &str, args: Vec<Token>) -> HashMap<String, Token> {
    let keys: &[&str] = match name {
        "ERC677BridgeTokenRewardableMock" => &["name", "symbol", "decimals"],
        "Registry" => &["certifier", "owner"],
        _ => &[],
    };
    keys.iter().map(|k| (*k).to_string()).zip(args).collect()
}

fn addresses_of(token: &Token) -> Vec<Address> {
    match token {
        Token::Array(items) => items
            .iter()
            .filter_map(|t| t.clone().into_address())
            .collect(),
        _ => Vec::new(),
    }
}

fn uint_of(storage: &HashMap<String, Token>, key: &str) -> U256 {
    storage
        .get(key)
        .and_then(|t| t.clone().into_uint())
        .unwrap_or_default()
}

fn transact(contract: &mut SimContract, method: &str, args: Vec<Token>) -> Result<(), String> {
    let storage = &mut contract.storage;
    match method {
        "initialize" => {
            if storage.get("isInitialized") == Some(&Token::Bool(true)) {
                return Err("already initialized".to_string());
            }
            initialize(&contract.name, storage, args)?;
            storage.insert("isInitialized".to_string(), Token::Bool(true));
        }
        "mint" => {
            let [Token::Address(to), Token::Uint(amount)] = args.as_slice() else {
                return Err("mint(address,uint256) expected".to_string());
            };
            let supply = uint_of(storage, "totalSupply")
                .checked_add(*amount)
                .ok_or("total supply overflow")?;
            let balance_key = storage_key("balanceOf", &[Token::Address(*to)]);
            let balance = uint_of(storage, &balance_key)
                .checked_add(*amount)
                .ok_or("balance overflow")?;
            storage.insert("totalSupply".to_string(), Token::Uint(supply));
            storage.insert(balance_key, Token::Uint(balance));
        }
        "initialValidatorStake" => {
            let [Token::Uint(total)] = args.as_slice() else {
                return Err("initialValidatorStake(uint256) expected".to_string());
            };
            let pools = storage.get("getPools").map(addresses_of).unwrap_or_default();
            if pools.is_empty() || total.is_zero() {
                return Err("nothing to stake".to_string());
            }
            let per_pool = *total / U256::from(pools.len());
            for pool in pools {
                let key = storage_key("stakeAmount", &[Token::Address(pool), Token::Address(pool)]);
                storage.insert(key, Token::Uint(per_pool));
            }
        }
        setter if setter.starts_with("set") && args.len() == 1 => {
            let field = &setter[3..];
            let mut getter = field[..1].to_ascii_lowercase();
            getter.push_str(&field[1..]);
            storage.insert(getter, args.into_iter().next().unwrap_or(Token::Bool(false)));
        }
        other => return Err(format!("{other} is not a transaction")),
    }
    Ok(())
}

fn initialize(
    name: &str,
    storage: &mut HashMap<String, Token>,
    mut args: Vec<Token>,
) -> Result<(), String> {
    let mut put = |key: &str, value: Token| {
        storage.insert(key.to_string(), value);
    };
    match name {
        "ValidatorSetAuRa" => {
            if args.len() == 7 {
                put("blockRewardContractPrev", args.remove(0));
            }
            let [block_reward, random, staking, mining, pools, unremovable] =
                <[Token; 6]>::try_from(args).map_err(|_| "ValidatorSet arguments".to_string())?;
            let mining_addresses = addresses_of(&mining);
            let staking_addresses = addresses_of(&pools);
            if mining_addresses.len() != staking_addresses.len() {
                return Err("mining/staking length mismatch".to_string());
            }
            let unremovable = if unremovable == Token::Bool(true) {
                staking_addresses.first().copied().unwrap_or_default()
            } else {
                Address::zero()
            };
            put("blockRewardContract", block_reward);
            put("randomContract", random);
            put("stakingContract", staking);
            put("getValidators", mining.clone());
            put("getPendingValidators", mining);
            put("unremovableValidator", Token::Address(unremovable));
            for (m, s) in mining_addresses.into_iter().zip(staking_addresses) {
                put(&storage_key("isValidator", &[Token::Address(m)]), Token::Bool(true));
                put(
                    &storage_key("stakingByMiningAddress", &[Token::Address(m)]),
                    Token::Address(s),
                );
            }
        }
        "StakingAuRa" => {
            let keys = [
                "validatorSetContract",
                "getPools",
                "delegatorMinStake",
                "candidateMinStake",
                "stakingEpochDuration",
                "stakingEpochStartBlock",
                "stakeWithdrawDisallowPeriod",
            ];
            for (key, value) in keys.into_iter().zip(args) {
                put(key, value);
            }
        }
        "BlockRewardAuRa" => {
            for (key, value) in ["validatorSetContract", "prevBlockRewardContract"].into_iter().zip(args) {
                put(key, value);
            }
        }
        "RandomAuRa" => {
            for (key, value) in ["collectRoundLength", "validatorSetContract"].into_iter().zip(args) {
                put(key, value);
            }
        }
        "TxPermission" | "Certifier" => {
            let flag = if name == "Certifier" { "certified" } else { "isSenderAllowed" };
            let mut args = args.into_iter();
            let listed = args.next().unwrap_or(Token::Array(Vec::new()));
            for address in addresses_of(&listed) {
                put(&storage_key(flag, &[Token::Address(address)]), Token::Bool(true));
            }
            if name == "TxPermission" {
                put("allowedSenders", listed);
            }
            if let Some(validator_set) = args.next() {
                put("validatorSetContract", validator_set);
            }
        }
        other => return Err(format!("{other} has no initializer")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::sim_bytecode;

    fn deploy_data(name: &str, args: &[Token]) -> Vec<u8> {
        compiled(name)
            .interface
            .encode_deploy(&sim_bytecode(name), args)
            .unwrap()
    }

    fn request(to: Option<Address>, data: Vec<u8>) -> TransactionRequest {
        TransactionRequest {
            from: Address::zero(),
            to,
            data,
            gas: 1,
            gas_price: U256::zero(),
        }
    }

    #[tokio::test]
    async fn transactions_mine_blocks() {
        let chain = SimulatedChain::at_height(10);
        let receipt = chain
            .send_transaction(request(None, deploy_data("RandomAuRa", &[])))
            .await
            .unwrap();
        assert_eq!(receipt.block_number, 11);
        assert!(receipt.contract_address.is_some());

        chain.freeze();
        chain
            .send_transaction(request(None, deploy_data("RandomAuRa", &[])))
            .await
            .unwrap();
        assert_eq!(chain.height(), 11);
    }

    #[tokio::test]
    async fn proxy_runs_implementation_code() {
        let chain = SimulatedChain::new();
        let implementation = chain
            .send_transaction(request(None, deploy_data("RandomAuRa", &[])))
            .await
            .unwrap()
            .contract_address
            .unwrap();
        let proxy = chain
            .send_transaction(request(
                None,
                deploy_data(
                    PROXY,
                    &[
                        Token::Address(implementation),
                        Token::Address(Address::zero()),
                        Token::Bytes(Vec::new()),
                    ],
                ),
            ))
            .await
            .unwrap()
            .contract_address
            .unwrap();

        assert_eq!(chain.contract_name(proxy).as_deref(), Some("RandomAuRa"));
        assert_eq!(chain.storage(proxy, "implementation"), Some(Token::Address(implementation)));
    }

    #[tokio::test]
    async fn unset_reads_are_zero() {
        let chain = SimulatedChain::new();
        let address = chain
            .send_transaction(request(None, deploy_data("StakingAuRa", &[])))
            .await
            .unwrap()
            .contract_address
            .unwrap();
        let function = compiled("StakingAuRa")
            .interface
            .function("getPools", 0)
            .unwrap()
            .clone();
        let out = chain
            .call(address, abi::encode_call(&function, &[]).unwrap())
            .await
            .unwrap();
        assert_eq!(abi::decode_output(&function, &out).unwrap(), vec![Token::Array(Vec::new())]);
    }

    #[tokio::test]
    async fn disconnect_until_reconnect() {
        let mut chain = SimulatedChain::new();
        chain.disconnect();
        assert!(!chain.is_connected().await);
        assert!(chain.block_number().await.is_err());
        chain.reconnect().await.unwrap();
        assert_eq!(chain.block_number().await.unwrap(), 0);
        assert_eq!(chain.reconnect_count(), 1);
    }
}
