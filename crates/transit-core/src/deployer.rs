//! Contract deployment
//!
//! Two policies, chosen explicitly by the caller:
//! - `Deployment::Upgradable`: implementation first, then an admin upgrade
//!   proxy pointing at it; the handle binds the implementation's interface
//!   to the proxy's address
//! - `Deployment::Fixed`: a single creation with constructor arguments
//!
//! Each creation costs one transaction with the connection's deploy gas.
//! Nothing is retried.

use crate::abi::{checksum, Address, Token};
use crate::chain::ChainConnection;
use crate::compiler::CompiledContract;
use crate::contract::ContractHandle;
use crate::error::{ChainError, TransitError};
use crate::types::ContractKind;

/// How a contract is put on chain
#[derive(Debug, Clone)]
pub enum Deployment {
    /// Behind an admin upgrade proxy, initialized later through the proxy
    Upgradable { implementation: CompiledContract },
    /// Deployed directly and never upgradable
    Fixed {
        contract: CompiledContract,
        args: Vec<Token>,
    },
}

impl Deployment {
    /// Upgradable deployment of `implementation`
    #[inline]
    #[must_use]
    pub fn upgradable(implementation: CompiledContract) -> Self {
        Self::Upgradable { implementation }
    }

    /// Fixed deployment with constructor arguments
    #[inline]
    #[must_use]
    pub fn fixed(contract: CompiledContract, args: Vec<Token>) -> Self {
        Self::Fixed { contract, args }
    }

    /// Transactions this deployment submits
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        match self {
            Self::Upgradable { .. } => 2,
            Self::Fixed { .. } => 1,
        }
    }
}

/// Deploys contracts from the connection's sender account
#[derive(Debug)]
pub struct ContractDeployer<'a> {
    conn: &'a ChainConnection,
    proxy: &'a CompiledContract,
    admin: Address,
}

impl<'a> ContractDeployer<'a> {
    /// `proxy` is the admin upgrade proxy contract; `admin` becomes its admin
    #[must_use]
    pub fn new(conn: &'a ChainConnection, proxy: &'a CompiledContract, admin: Address) -> Self {
        Self { conn, proxy, admin }
    }

    /// Deploy one contract
    ///
    /// # Errors
    /// - `TransitError::Chain` if any creation is rejected or reverts
    /// - `TransitError::Abi` if constructor arguments do not match
    pub async fn deploy(
        &self,
        kind: ContractKind,
        deployment: Deployment,
    ) -> Result<ContractHandle, TransitError> {
        match deployment {
            Deployment::Fixed { contract, args } => {
                tracing::info!(contract = %kind, "deploying fixed contract");
                let data = contract
                    .interface
                    .encode_deploy(&contract.bytecode, &args)?;
                let address = self.conn.deploy(data).await?;
                tracing::info!(contract = %kind, address = %checksum(&address), "deployed");
                Ok(ContractHandle::new(
                    kind,
                    address,
                    contract.interface,
                    contract.bytecode,
                    false,
                ))
            }
            Deployment::Upgradable { implementation } => {
                tracing::info!(contract = %kind, "deploying upgradable contract");
                let data = implementation
                    .interface
                    .encode_deploy(&implementation.bytecode, &[])?;
                let implementation_address = self.conn.deploy(data).await?;
                tracing::debug!(
                    contract = %kind,
                    address = %checksum(&implementation_address),
                    "implementation deployed"
                );

                let proxy_data = self.proxy.interface.encode_deploy(
                    &self.proxy.bytecode,
                    &[
                        Token::Address(implementation_address),
                        Token::Address(self.admin),
                        Token::Bytes(Vec::new()),
                    ],
                )?;
                let address = self
                    .conn
                    .deploy(proxy_data)
                    .await
                    .map_err(|e| wrap_proxy_error(kind, e))?;
                tracing::info!(
                    contract = %kind,
                    address = %checksum(&address),
                    implementation = %checksum(&implementation_address),
                    "deployed behind proxy"
                );
                Ok(ContractHandle::new(
                    kind,
                    address,
                    implementation.interface,
                    implementation.bytecode,
                    true,
                ))
            }
        }
    }
}

fn wrap_proxy_error(kind: ContractKind, err: ChainError) -> ChainError {
    match err {
        ChainError::Rejected(reason) => {
            ChainError::Rejected(format!("proxy for {kind}: {reason}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Interface;
    use std::sync::Arc;

    fn compiled(name: &str, abi: &str) -> CompiledContract {
        CompiledContract {
            name: name.to_string(),
            interface: Arc::new(Interface::parse(abi).unwrap()),
            bytecode: Arc::new(vec![0x60, 0x80]),
        }
    }

    #[test]
    fn transaction_counts() {
        let c = compiled("X", "[]");
        assert_eq!(Deployment::upgradable(c.clone()).transaction_count(), 2);
        assert_eq!(Deployment::fixed(c, Vec::new()).transaction_count(), 1);
    }

    #[test]
    fn proxy_rejection_names_the_contract() {
        let err = wrap_proxy_error(
            ContractKind::Staking,
            ChainError::Rejected("out of gas".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "transaction rejected: proxy for StakingAuRa: out of gas"
        );
    }
}
