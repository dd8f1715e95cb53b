//! POSDAO Transit Core
//!
//! The engine that moves a live AuRa network from POA block rewards to the
//! POSDAO contract set:
//! - Deploys the POSDAO contracts (fixed or behind an admin upgrade proxy)
//! - Initializes them in dependency order and checks every post-condition
//! - Derives the transition block and writes it into the chain spec
//! - Restarts every node, one at a time, against the new spec
//!
//! # Example
//!
//! ```rust,ignore
//! use transit_core::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransitConfig::load("transit.toml")?;
//! let params = MigrationParameters::from_env(&ProcessEnv, &config.migration)?;
//! let orchestrator = TransitOrchestrator::from_config(config, params, None)?;
//!
//! let report = orchestrator.run().await?;
//! println!("transition at block {}", report.bundle.transition_block);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod abi;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod contract;
pub mod deployer;
pub mod error;
pub mod orchestrator;
pub mod restart;
pub mod sequencer;
pub mod spec;
pub mod types;

// Re-exports for convenience
pub use abi::{checksum, parse_address, Address, Interface, ParamType, Token, H256, U256};
pub use chain::{
    ChainClient, ChainConnection, GasSettings, JsonRpcClient, RpcSettings, TransactionReceipt,
    TransactionRequest,
};
pub use compiler::{CompiledContract, ContractCompiler, ContractLibrary, ImportResolver, ImportStrategy};
pub use config::{EnvLookup, MigrationSettings, ProcessEnv, RosterSettings, TokenSettings, TransitConfig};
pub use contract::ContractHandle;
pub use deployer::{ContractDeployer, Deployment};
pub use error::{
    AbiError, ChainError, CompileError, ConfigError, ErrorClass, InvariantViolation, ProcessError,
    SpecError, TransitError,
};
pub use orchestrator::{TransitOrchestrator, TransitReport};
pub use restart::{
    LaunchCommand, NodeLauncher, NodeRestartState, ProcessControl, ProcessId, RestartCoordinator,
    RestartPolicy, RestartReport, ShellProcessControl,
};
pub use sequencer::{transition_block, DeployedContracts, MigrationOutcome, MigrationSequencer};
pub use spec::{JsonFileSpecStore, SpecMutator, SpecStore};
pub use types::{ContractKind, MigrationParameters, NodeDescriptor, RunId, TransitionBundle};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a transition
    pub use crate::{
        Address, ChainConnection, ContractLibrary, MigrationParameters, NodeDescriptor,
        ProcessEnv, RestartPolicy, TransitConfig, TransitError, TransitOrchestrator,
        TransitReport, TransitionBundle,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
