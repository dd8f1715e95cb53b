//! Live contract handles

use crate::abi::{self, Address, Interface, Token, U256};
use crate::chain::{ChainConnection, TransactionReceipt};
use crate::error::ChainError;
use crate::types::ContractKind;
use std::sync::Arc;

/// A deployed contract bound to its interface
///
/// The address never changes once deployed. For upgradable contracts the
/// address is the proxy's and the interface is the implementation's.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    kind: ContractKind,
    address: Address,
    interface: Arc<Interface>,
    binary: Arc<Vec<u8>>,
    upgrade_proxied: bool,
}

impl ContractHandle {
    /// Bind an interface to an address
    #[must_use]
    pub fn new(
        kind: ContractKind,
        address: Address,
        interface: Arc<Interface>,
        binary: Arc<Vec<u8>>,
        upgrade_proxied: bool,
    ) -> Self {
        Self {
            kind,
            address,
            interface,
            binary,
            upgrade_proxied,
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.contract_name()
    }

    #[inline]
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[inline]
    #[must_use]
    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Implementation bytecode
    #[inline]
    #[must_use]
    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    /// Whether calls route through an admin upgrade proxy
    #[inline]
    #[must_use]
    pub fn is_upgrade_proxied(&self) -> bool {
        self.upgrade_proxied
    }

    /// Send a state-changing call
    pub async fn send(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<TransactionReceipt, ChainError> {
        let function = self.interface.function(method, args.len())?;
        let data = abi::encode_call(function, args)?;
        tracing::debug!(contract = %self.kind, %method, "sending");
        conn.transact(self.address, data).await
    }

    /// Read-only call returning every output
    pub async fn read(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<Vec<Token>, ChainError> {
        let function = self.interface.function(method, args.len())?;
        let data = abi::encode_call(function, args)?;
        let output = conn.call(self.address, data).await?;
        Ok(abi::decode_output(function, &output)?)
    }

    async fn read_single(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<Token, ChainError> {
        self.read(conn, method, args)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.shape_error(method, "a value"))
    }

    pub async fn read_address(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<Address, ChainError> {
        self.read_single(conn, method, args)
            .await?
            .into_address()
            .ok_or_else(|| self.shape_error(method, "an address"))
    }

    pub async fn read_bool(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<bool, ChainError> {
        self.read_single(conn, method, args)
            .await?
            .into_bool()
            .ok_or_else(|| self.shape_error(method, "a bool"))
    }

    pub async fn read_uint(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<U256, ChainError> {
        self.read_single(conn, method, args)
            .await?
            .into_uint()
            .ok_or_else(|| self.shape_error(method, "an integer"))
    }

    pub async fn read_addresses(
        &self,
        conn: &ChainConnection,
        method: &str,
        args: &[Token],
    ) -> Result<Vec<Address>, ChainError> {
        let items = self
            .read_single(conn, method, args)
            .await?
            .into_array()
            .ok_or_else(|| self.shape_error(method, "an array"))?;
        items
            .into_iter()
            .map(|item| {
                item.into_address()
                    .ok_or_else(|| self.shape_error(method, "an address array"))
            })
            .collect()
    }

    fn shape_error(&self, method: &str, expected: &str) -> ChainError {
        ChainError::Decode(format!("{}.{method} did not return {expected}", self.kind))
    }
}
