//! Transition orchestrator
//!
//! Sequences the whole run and aborts on the first failure. Nothing is
//! retried or rolled back; the error names the step that needs a human.

use crate::chain::{ChainConnection, JsonRpcClient};
use crate::compiler::ContractLibrary;
use crate::config::{MigrationSettings, TransitConfig};
use crate::error::TransitError;
use crate::restart::{NodeLauncher, RestartCoordinator, RestartReport, ShellProcessControl};
use crate::sequencer::MigrationSequencer;
use crate::spec::{JsonFileSpecStore, SpecMutator, SpecStore};
use crate::types::{MigrationParameters, NodeDescriptor, RunId, TransitionBundle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

/// Summary of a completed transition
#[derive(Debug, Clone, Serialize)]
pub struct TransitReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Height at which POSDAO takes over
    pub transition_block: u64,
    /// Chain height once every node is back
    pub current_block: u64,
    pub bundle: TransitionBundle,
    pub restart: RestartReport,
}

/// Runs the transition end to end
pub struct TransitOrchestrator {
    run_id: RunId,
    conn: ChainConnection,
    library: ContractLibrary,
    spec_store: Arc<dyn SpecStore>,
    restart: RestartCoordinator,
    roster: Vec<NodeDescriptor>,
    params: MigrationParameters,
    settings: MigrationSettings,
}

impl std::fmt::Debug for TransitOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitOrchestrator")
            .field("run_id", &self.run_id)
            .field("conn", &self.conn)
            .field("roster", &self.roster)
            .field("restart", &self.restart)
            .finish_non_exhaustive()
    }
}

impl TransitOrchestrator {
    /// Assemble from explicit collaborators
    #[must_use]
    pub fn new(
        conn: ChainConnection,
        library: ContractLibrary,
        spec_store: Arc<dyn SpecStore>,
        restart: RestartCoordinator,
        roster: Vec<NodeDescriptor>,
        params: MigrationParameters,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            conn,
            library,
            spec_store,
            restart,
            roster,
            params,
            settings,
        }
    }

    /// Production wiring: JSON-RPC chain, solc/artifact contracts, JSON spec
    /// file, shell process control
    ///
    /// # Errors
    /// - `TransitError::Chain` if the HTTP client cannot be built
    /// - `TransitError::Config` for an invalid roster
    ///
    /// `restart_seed` fixes the node visitation order; `None` draws it from
    /// the OS.
    pub fn from_config(
        config: TransitConfig,
        params: MigrationParameters,
        restart_seed: Option<u64>,
    ) -> Result<Self, TransitError> {
        let roster = config.descriptors()?;
        let client = JsonRpcClient::new(config.rpc)?;
        let conn = ChainConnection::new(client, params.owner, config.gas);
        let processes = Arc::new(ShellProcessControl);
        let launcher = NodeLauncher::new(config.nodes.binary);
        let restart = match restart_seed {
            Some(seed) => RestartCoordinator::with_seed(config.restart, processes, launcher, seed),
            None => RestartCoordinator::new(config.restart, processes, launcher),
        };

        Ok(Self::new(
            conn,
            ContractLibrary::from_paths(&config.contracts),
            Arc::new(JsonFileSpecStore::new(config.spec_path)),
            restart,
            roster,
            params,
            config.migration,
        ))
    }

    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Execute the transition
    ///
    /// # Workflow
    /// 1. Read the spec and locate the legacy reward contract
    /// 2. Deploy, initialize and verify the contract set
    /// 3. Schedule the transition in the spec and write it atomically
    /// 4. Restart every node against the new spec
    /// 5. Report the current and transition heights
    ///
    /// # Errors
    /// The first failure of any step; `TransitError::class` says which kind.
    pub async fn run(self) -> Result<TransitReport, TransitError> {
        let span = tracing::info_span!("transit", run_id = %self.run_id);
        self.execute().instrument(span).await
    }

    async fn execute(mut self) -> Result<TransitReport, TransitError> {
        let started_at = Utc::now();
        tracing::info!(
            validators = self.params.pool_count(),
            nodes = self.roster.len(),
            "starting POSDAO transition"
        );

        let result = self.steps().await;
        match result {
            Ok((bundle, restart, current_block)) => {
                tracing::info!(
                    current_block,
                    transition_block = bundle.transition_block,
                    "transition scheduled"
                );
                Ok(TransitReport {
                    run_id: self.run_id,
                    started_at,
                    finished_at: Utc::now(),
                    transition_block: bundle.transition_block,
                    current_block,
                    bundle,
                    restart,
                })
            }
            Err(e) => {
                tracing::error!(class = ?e.class(), error = %e, "transition aborted");
                Err(e)
            }
        }
    }

    async fn steps(&mut self) -> Result<(TransitionBundle, RestartReport, u64), TransitError> {
        let document = self.spec_store.read().await?;
        let legacy = SpecMutator::legacy_block_reward(&document)?;

        let outcome = MigrationSequencer::new(
            &self.conn,
            &self.library,
            &self.params,
            &self.settings,
            legacy,
        )
        .run()
        .await?;

        let document = SpecMutator::apply(document, &outcome.bundle)?;
        self.spec_store.write(&document).await?;

        let restart = self.restart.restart_all(&self.roster, &mut self.conn).await?;
        let current_block = self.conn.block_number().await?;
        Ok((outcome.bundle, restart, current_block))
    }
}
