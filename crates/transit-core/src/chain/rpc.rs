//! Chain client over an `ethers` HTTP provider

use super::{ChainClient, TransactionReceipt, TransactionRequest};
use crate::abi::{Address, H256};
use crate::error::ChainError;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionReceipt as EthReceipt, TransactionRequest as EthRequest};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// RPC endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// HTTP endpoint of the node the migration talks to
    pub url: String,
    /// Receipt polls before giving up on a transaction
    pub receipt_attempts: u32,
    /// Delay between receipt polls
    pub receipt_interval_ms: u64,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8541".to_string(),
            receipt_attempts: 60,
            receipt_interval_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

/// Chain client speaking Ethereum JSON-RPC through `Provider<Http>`
///
/// Transactions are sent with `eth_sendTransaction`, so the owner account
/// must be unlocked on the node. Receipts are polled a bounded number of
/// times rather than awaited through `PendingTransaction`.
#[derive(Debug)]
pub struct JsonRpcClient {
    settings: RpcSettings,
    provider: Provider<Http>,
}

impl JsonRpcClient {
    /// Create a client; no request is made until first use
    ///
    /// # Errors
    /// - `ChainError::Transport` if the URL is not usable
    pub fn new(settings: RpcSettings) -> Result<Self, ChainError> {
        let provider = connect(&settings)?;
        Ok(Self { settings, provider })
    }

    /// Endpoint URL
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.settings.url
    }

    async fn timed<T>(
        &self,
        method: &str,
        request: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ChainError> {
        let limit = Duration::from_secs(self.settings.request_timeout_secs);
        match tokio::time::timeout(limit, request).await {
            Ok(result) => result.map_err(|e| from_provider(method, e)),
            Err(_) => Err(ChainError::Transport(format!(
                "{method}: no answer within {}s",
                limit.as_secs()
            ))),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<EthReceipt, ChainError> {
        let interval = Duration::from_millis(self.settings.receipt_interval_ms);
        for attempt in 1..=self.settings.receipt_attempts {
            let receipt = self
                .timed(
                    "eth_getTransactionReceipt",
                    self.provider.get_transaction_receipt(tx_hash),
                )
                .await?;
            // pending receipts come back without a block number
            if let Some(receipt) = receipt.filter(|r| r.block_number.is_some()) {
                return Ok(receipt);
            }
            tracing::trace!(?tx_hash, attempt, "receipt not yet available");
            tokio::time::sleep(interval).await;
        }
        Err(ChainError::ReceiptTimeout {
            tx_hash,
            attempts: self.settings.receipt_attempts,
        })
    }
}

fn connect(settings: &RpcSettings) -> Result<Provider<Http>, ChainError> {
    Provider::<Http>::try_from(settings.url.as_str())
        .map_err(|e| ChainError::Transport(format!("{}: {e}", settings.url)))
}

fn from_provider(method: &str, err: ProviderError) -> ChainError {
    if let Some(response) = err.as_error_response() {
        return ChainError::Rpc {
            code: response.code,
            message: response.message.clone(),
        };
    }
    match err {
        ProviderError::SerdeJson(e) => ChainError::Decode(format!("{method}: {e}")),
        other => ChainError::Transport(format!("{method}: {other}")),
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> Result<TransactionReceipt, ChainError> {
        let mut request = EthRequest::new()
            .from(tx.from)
            .data(Bytes::from(tx.data))
            .gas(tx.gas)
            .gas_price(tx.gas_price);
        if let Some(to) = tx.to {
            request = request.to(to);
        }

        let pending = self
            .timed("eth_sendTransaction", self.provider.send_transaction(request, None))
            .await
            .map_err(|e| match e {
                ChainError::Rpc { code, message } => {
                    ChainError::Rejected(format!("{message} (code {code})"))
                }
                other => other,
            })?;
        let tx_hash = *pending;
        tracing::debug!(?tx_hash, "transaction submitted");

        let raw = self.wait_for_receipt(tx_hash).await?;
        Ok(to_receipt(raw))
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let request: TypedTransaction = EthRequest::new().to(to).data(Bytes::from(data)).into();
        let output = self
            .timed("eth_call", self.provider.call(&request, None))
            .await?;
        Ok(output.to_vec())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let height = self
            .timed("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(height.as_u64())
    }

    async fn is_connected(&self) -> bool {
        self.block_number().await.is_ok()
    }

    async fn reconnect(&mut self) -> Result<(), ChainError> {
        self.provider = connect(&self.settings)?;
        self.block_number().await.map(|height| {
            tracing::info!(url = %self.settings.url, height, "reconnected to chain");
        })
    }
}

fn to_receipt(raw: EthReceipt) -> TransactionReceipt {
    TransactionReceipt {
        tx_hash: raw.transaction_hash,
        block_number: raw.block_number.map_or(0, |n| n.as_u64()),
        contract_address: raw.contract_address,
        // pre-Byzantium receipts carry no status field
        success: raw.status.map_or(true, |s| !s.is_zero()),
    }
}
