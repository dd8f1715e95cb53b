//! Chain access
//!
//! `ChainClient` is the transport seam; `ChainConnection` is the owned
//! connection resource every pipeline step borrows. It carries the sending
//! account and gas allowances so steps only say *what* to send.
//! `JsonRpcClient` adapts an `ethers` HTTP provider to the seam.

mod rpc;

pub use rpc::{JsonRpcClient, RpcSettings};

use crate::abi::{Address, H256, U256};
use crate::error::ChainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Transaction to submit from an unlocked account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub data: Vec<u8>,
    pub gas: u64,
    pub gas_price: U256,
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    /// Set for contract creations
    pub contract_address: Option<Address>,
    /// Execution status (`false` = reverted)
    pub success: bool,
}

/// Transport to a chain node
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a transaction and wait for its receipt
    async fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> Result<TransactionReceipt, ChainError>;

    /// Execute a read-only call against the latest block
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError>;

    /// Current block height
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Whether the transport currently answers
    async fn is_connected(&self) -> bool;

    /// Drop and re-establish the transport
    async fn reconnect(&mut self) -> Result<(), ChainError>;
}

/// Gas allowances for migration transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSettings {
    /// Gas per contract creation
    pub deploy_gas: u64,
    /// Gas per initialization/wiring call
    pub call_gas: u64,
    /// Wei per gas unit
    pub gas_price: u64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            deploy_gas: 4_700_000,
            call_gas: 1_000_000,
            gas_price: 0,
        }
    }
}

/// Owned connection used by every step of the run
pub struct ChainConnection {
    client: Box<dyn ChainClient>,
    sender: Address,
    gas: GasSettings,
}

impl std::fmt::Debug for ChainConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConnection")
            .field("sender", &self.sender)
            .field("gas", &self.gas)
            .finish_non_exhaustive()
    }
}

impl ChainConnection {
    /// Wrap a client
    pub fn new(client: impl ChainClient + 'static, sender: Address, gas: GasSettings) -> Self {
        Self {
            client: Box::new(client),
            sender,
            gas,
        }
    }

    /// Account transactions are sent from
    #[inline]
    #[must_use]
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Gas allowances
    #[inline]
    #[must_use]
    pub fn gas(&self) -> &GasSettings {
        &self.gas
    }

    /// Create a contract, returning its address
    ///
    /// # Errors
    /// - `ChainError::Reverted` if the creation reverted
    /// - `ChainError::MissingContractAddress` if the receipt has no address
    pub async fn deploy(&self, creation_data: Vec<u8>) -> Result<Address, ChainError> {
        let receipt = self
            .submit(TransactionRequest {
                from: self.sender,
                to: None,
                data: creation_data,
                gas: self.gas.deploy_gas,
                gas_price: U256::from(self.gas.gas_price),
            })
            .await?;

        receipt
            .contract_address
            .ok_or(ChainError::MissingContractAddress {
                tx_hash: receipt.tx_hash,
            })
    }

    /// Send a state-changing call
    pub async fn transact(
        &self,
        to: Address,
        data: Vec<u8>,
    ) -> Result<TransactionReceipt, ChainError> {
        self.submit(TransactionRequest {
            from: self.sender,
            to: Some(to),
            data,
            gas: self.gas.call_gas,
            gas_price: U256::from(self.gas.gas_price),
        })
        .await
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<TransactionReceipt, ChainError> {
        let receipt = self.client.send_transaction(tx).await?;
        if !receipt.success {
            return Err(ChainError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        tracing::debug!(tx_hash = ?receipt.tx_hash, block = receipt.block_number, "transaction mined");
        Ok(receipt)
    }

    /// Read-only call
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        self.client.call(to, data).await
    }

    /// Current block height
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.client.block_number().await
    }

    /// Re-establish the transport if it stopped answering
    ///
    /// Returns whether a reconnect happened.
    pub async fn reconnect(&mut self) -> Result<bool, ChainError> {
        if self.client.is_connected().await {
            return Ok(false);
        }
        tracing::warn!("chain connection lost, reconnecting");
        self.client.reconnect().await?;
        Ok(true)
    }
}
