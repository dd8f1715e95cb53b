//! Run preparation and execution

use crate::cli::Cli;
use anyhow::Context;
use transit_core::{
    EnvLookup, MigrationParameters, NodeDescriptor, ProcessEnv, TransitConfig, TransitError,
    TransitOrchestrator, TransitReport,
};

/// Resolved inputs of a run
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Tuning file with overrides applied
    pub config: TransitConfig,
    /// Parameters read from the environment
    pub params: MigrationParameters,
    /// Nodes the restart will visit
    pub roster: Vec<NodeDescriptor>,
}

/// Load the tuning file, apply command line overrides and read the
/// migration parameters
///
/// # Errors
/// Any configuration error, wrapped as `TransitError::Config`; nothing has
/// touched the network yet.
pub fn prepare(cli: &Cli, env: &dyn EnvLookup) -> anyhow::Result<Prepared> {
    let mut config = match &cli.config {
        Some(path) => TransitConfig::load(path)
            .map_err(TransitError::from)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TransitConfig::default(),
    };
    if let Some(url) = &cli.rpc_url {
        config.rpc.url.clone_from(url);
    }
    if let Some(spec) = &cli.spec {
        config.spec_path.clone_from(spec);
    }

    let params = MigrationParameters::from_env(env, &config.migration)
        .map_err(TransitError::from)
        .context("reading migration parameters")?;
    let roster = config
        .descriptors()
        .map_err(TransitError::from)
        .context("building node roster")?;
    Ok(Prepared {
        config,
        params,
        roster,
    })
}

/// Execute the transition, or only validate inputs with `--check`
///
/// Returns `None` for a check run.
///
/// # Errors
/// The first failure; a `transit_core::TransitError` stays downcastable.
pub async fn run(cli: Cli) -> anyhow::Result<Option<TransitReport>> {
    let prepared = prepare(&cli, &ProcessEnv)?;
    tracing::info!(
        rpc = %prepared.config.rpc.url,
        spec = %prepared.config.spec_path.display(),
        validators = prepared.params.pool_count(),
        nodes = prepared.roster.len(),
        "configuration loaded"
    );
    if cli.check {
        tracing::info!("configuration valid, nothing executed");
        return Ok(None);
    }

    let orchestrator = TransitOrchestrator::from_config(prepared.config, prepared.params, cli.seed)?;
    let report = orchestrator.run().await?;

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
    }
    Ok(Some(report))
}
