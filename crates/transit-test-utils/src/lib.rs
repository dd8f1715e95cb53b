//! Testing utilities for the transit workspace
//!
//! In-memory stand-ins for the chain, node processes and the spec file,
//! plus sample fixtures.

#![allow(missing_docs)]

pub mod chain;
pub mod contracts;
pub mod fixtures;
pub mod processes;

pub use chain::SimulatedChain;
pub use contracts::{compiled, simulated_library, SimulatedCompiler};
pub use fixtures::{
    address, owner, sample_parameters, sample_roster, sample_spec_document, MemorySpecStore,
};
pub use processes::{ProcessEvent, SimulatedProcesses};

use std::sync::Arc;
use transit_core::chain::GasSettings;
use transit_core::config::MigrationSettings;
use transit_core::restart::{NodeLauncher, RestartCoordinator, RestartPolicy};
use transit_core::{ChainConnection, TransitOrchestrator};

/// Connection from the sample owner
#[must_use]
pub fn connection(chain: &SimulatedChain) -> ChainConnection {
    ChainConnection::new(chain.clone(), owner(), GasSettings::default())
}

/// Everything a full simulated transition needs
#[derive(Debug, Clone)]
pub struct Harness {
    pub chain: SimulatedChain,
    pub processes: SimulatedProcesses,
    pub spec: MemorySpecStore,
    pub legacy_block_reward: transit_core::Address,
    pub validators: u16,
    pub nodes: usize,
}

impl Harness {
    /// `validators` pools, `nodes` processes, chain at `height`
    #[must_use]
    pub fn new(validators: u16, nodes: usize, height: u64) -> Self {
        let chain = SimulatedChain::at_height(height);
        let legacy_block_reward = chain.install_legacy_block_reward();
        let processes =
            SimulatedProcesses::for_roster(&sample_roster(nodes)).linked_to(chain.clone());
        Self {
            spec: MemorySpecStore::new(sample_spec_document(legacy_block_reward)),
            chain,
            processes,
            legacy_block_reward,
            validators,
            nodes,
        }
    }

    /// Restart coordinator over the simulated processes
    #[must_use]
    pub fn coordinator(&self, seed: u64) -> RestartCoordinator {
        RestartCoordinator::with_seed(
            RestartPolicy::default(),
            Arc::new(self.processes.clone()),
            NodeLauncher::new("parity"),
            seed,
        )
    }

    /// Orchestrator wired to the simulated collaborators
    #[must_use]
    pub fn orchestrator(&self, seed: u64) -> TransitOrchestrator {
        self.orchestrator_with(sample_parameters(self.validators), seed)
    }

    #[must_use]
    pub fn orchestrator_with(
        &self,
        params: transit_core::MigrationParameters,
        seed: u64,
    ) -> TransitOrchestrator {
        TransitOrchestrator::new(
            connection(&self.chain),
            simulated_library(),
            Arc::new(self.spec.clone()),
            self.coordinator(seed),
            sample_roster(self.nodes),
            params,
            MigrationSettings::default(),
        )
    }
}
