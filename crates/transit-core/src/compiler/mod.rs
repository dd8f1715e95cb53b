//! Contract compilation
//!
//! Two sources of deployable code:
//! - Solidity sources compiled with `solc` (token and legacy reward contract)
//! - Prebuilt JSON artifacts (the POSDAO set and the upgrade proxy)
//!
//! `ContractLibrary` decides which one backs each `ContractKind`.

mod artifact;
mod solc;

pub use artifact::ArtifactCompiler;
pub use solc::SolcCompiler;

use crate::abi::Interface;
use crate::error::CompileError;
use crate::types::ContractKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Interface and creation bytecode of one contract
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub interface: Arc<Interface>,
    pub bytecode: Arc<Vec<u8>>,
}

/// Turns a contract source into an interface + binary pair
#[async_trait]
pub trait ContractCompiler: Send + Sync {
    /// Compile `contract_name` found under `source_dir`
    async fn compile(
        &self,
        source_dir: &Path,
        contract_name: &str,
        resolver: &ImportResolver,
    ) -> Result<CompiledContract, CompileError>;
}

/// One place an import may live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStrategy {
    /// Relative to the contract's own directory
    SourceDir,
    /// Relative to the parent of the contract's directory
    ParentDir,
    /// Relative to a dependency directory (`node_modules`)
    LibraryDir(PathBuf),
}

impl ImportStrategy {
    fn base(&self, source_dir: &Path) -> PathBuf {
        match self {
            Self::SourceDir => source_dir.to_path_buf(),
            Self::ParentDir => source_dir.join(".."),
            Self::LibraryDir(dir) => dir.clone(),
        }
    }
}

/// Ordered list of import strategies; the first existing file wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResolver {
    source_dir: PathBuf,
    strategies: Vec<ImportStrategy>,
}

impl ImportResolver {
    /// Source dir, then its parent, then `../node_modules`
    #[must_use]
    pub fn for_source_dir(source_dir: impl Into<PathBuf>) -> Self {
        let source_dir = source_dir.into();
        let library = source_dir.join("..").join("node_modules");
        Self::with_strategies(
            source_dir,
            vec![
                ImportStrategy::SourceDir,
                ImportStrategy::ParentDir,
                ImportStrategy::LibraryDir(library),
            ],
        )
    }

    /// Explicit strategy list
    #[must_use]
    pub fn with_strategies(source_dir: impl Into<PathBuf>, strategies: Vec<ImportStrategy>) -> Self {
        Self {
            source_dir: source_dir.into(),
            strategies,
        }
    }

    /// Replace the library directory strategy
    #[must_use]
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.strategies
            .retain(|s| !matches!(s, ImportStrategy::LibraryDir(_)));
        self.strategies.push(ImportStrategy::LibraryDir(dir));
        self
    }

    #[inline]
    #[must_use]
    pub fn strategies(&self) -> &[ImportStrategy] {
        &self.strategies
    }

    /// Every path the strategies would try, in order
    #[must_use]
    pub fn candidates(&self, import: &str) -> Vec<PathBuf> {
        self.strategies
            .iter()
            .map(|s| s.base(&self.source_dir).join(import))
            .collect()
    }

    /// First candidate that exists
    ///
    /// # Errors
    /// - `CompileError::UnresolvedImport` listing every path tried
    pub fn locate(&self, import: &str) -> Result<PathBuf, CompileError> {
        let candidates = self.candidates(import);
        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| CompileError::UnresolvedImport {
                import: import.to_string(),
                tried: candidates,
            })
    }

    /// Read the first candidate that exists
    pub async fn read(&self, import: &str) -> Result<String, CompileError> {
        let path = self.locate(import)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CompileError::io_error(path, e))
    }
}

/// Where contract code comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractPaths {
    /// Prebuilt POSDAO artifacts (`<Name>.json`)
    pub artifacts_dir: PathBuf,
    /// Directory holding the staking token source
    pub token_source_dir: PathBuf,
    /// Directory holding the legacy POA reward contract source
    pub legacy_source_dir: PathBuf,
    /// Overrides the `../node_modules` import fallback
    pub library_dir: Option<PathBuf>,
    /// `solc` binary
    pub solc: PathBuf,
}

impl Default for ContractPaths {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("../posdao-contracts/build/contracts"),
            token_source_dir: PathBuf::from("../posdao-contracts/test/mockContracts"),
            legacy_source_dir: PathBuf::from("../poa-contracts"),
            library_dir: None,
            solc: PathBuf::from("solc"),
        }
    }
}

/// How to obtain one contract
#[derive(Clone)]
pub struct ContractSource {
    pub compiler: Arc<dyn ContractCompiler>,
    pub dir: PathBuf,
    pub contract_name: String,
    pub resolver: ImportResolver,
}

impl std::fmt::Debug for ContractSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractSource")
            .field("dir", &self.dir)
            .field("contract_name", &self.contract_name)
            .finish_non_exhaustive()
    }
}

impl ContractSource {
    /// Source for `kind` under `dir` with the default import chain
    pub fn new(compiler: Arc<dyn ContractCompiler>, dir: impl Into<PathBuf>, kind: ContractKind) -> Self {
        let dir = dir.into();
        Self {
            compiler,
            resolver: ImportResolver::for_source_dir(&dir),
            dir,
            contract_name: kind.contract_name().to_string(),
        }
    }
}

/// Registry of contract sources by kind
#[derive(Debug, Clone, Default)]
pub struct ContractLibrary {
    sources: HashMap<ContractKind, ContractSource>,
}

impl ContractLibrary {
    /// Empty library
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard layout: token and legacy reward from source, the rest prebuilt
    #[must_use]
    pub fn from_paths(paths: &ContractPaths) -> Self {
        let solc: Arc<dyn ContractCompiler> = Arc::new(SolcCompiler::new(&paths.solc));
        let artifacts: Arc<dyn ContractCompiler> = Arc::new(ArtifactCompiler);

        let with_library = |mut source: ContractSource| {
            if let Some(dir) = &paths.library_dir {
                source.resolver = source.resolver.with_library_dir(dir);
            }
            source
        };

        let mut library = Self::new()
            .with_source(
                ContractKind::Token,
                with_library(ContractSource::new(
                    Arc::clone(&solc),
                    &paths.token_source_dir,
                    ContractKind::Token,
                )),
            )
            .with_source(
                ContractKind::LegacyBlockReward,
                with_library(ContractSource::new(
                    solc,
                    &paths.legacy_source_dir,
                    ContractKind::LegacyBlockReward,
                )),
            );

        for kind in [
            ContractKind::ValidatorSet,
            ContractKind::Staking,
            ContractKind::BlockReward,
            ContractKind::Random,
            ContractKind::TxPermission,
            ContractKind::Certifier,
            ContractKind::Registry,
            ContractKind::UpgradeProxy,
        ] {
            library = library.with_source(
                kind,
                ContractSource::new(Arc::clone(&artifacts), &paths.artifacts_dir, kind),
            );
        }
        library
    }

    /// Register (or replace) the source of a kind
    #[must_use]
    pub fn with_source(mut self, kind: ContractKind, source: ContractSource) -> Self {
        self.sources.insert(kind, source);
        self
    }

    /// Registered source of a kind
    #[must_use]
    pub fn source(&self, kind: ContractKind) -> Option<&ContractSource> {
        self.sources.get(&kind)
    }

    /// Compile or load a contract
    ///
    /// # Errors
    /// - `CompileError::NotRegistered` if the kind has no source
    pub async fn load(&self, kind: ContractKind) -> Result<CompiledContract, CompileError> {
        let source = self
            .sources
            .get(&kind)
            .ok_or(CompileError::NotRegistered(kind))?;
        tracing::debug!(contract = %kind, dir = %source.dir.display(), "loading contract");
        source
            .compiler
            .compile(&source.dir, &source.contract_name, &source.resolver)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolver_order() {
        let resolver = ImportResolver::for_source_dir("/src/contracts");
        let candidates = resolver.candidates("lib/Math.sol");
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/src/contracts/lib/Math.sol"),
                PathBuf::from("/src/contracts/../lib/Math.sol"),
                PathBuf::from("/src/contracts/../node_modules/lib/Math.sol"),
            ]
        );
    }

    #[test]
    fn first_existing_candidate_wins() {
        let root = tempfile::tempdir().unwrap();
        let contracts = root.path().join("contracts");
        let modules = root.path().join("node_modules").join("oz");
        std::fs::create_dir_all(&contracts).unwrap();
        std::fs::create_dir_all(&modules).unwrap();
        std::fs::write(modules.join("Ownable.sol"), "contract Ownable {}").unwrap();
        std::fs::write(root.path().join("Shared.sol"), "contract Shared {}").unwrap();

        let resolver = ImportResolver::for_source_dir(&contracts);
        assert_eq!(
            resolver.locate("oz/Ownable.sol").unwrap(),
            contracts.join("..").join("node_modules").join("oz/Ownable.sol")
        );
        assert_eq!(
            resolver.locate("Shared.sol").unwrap(),
            contracts.join("..").join("Shared.sol")
        );

        // a copy in the source dir shadows the parent one
        std::fs::write(contracts.join("Shared.sol"), "contract Shared {}").unwrap();
        assert_eq!(resolver.locate("Shared.sol").unwrap(), contracts.join("Shared.sol"));
    }

    #[test]
    fn unresolved_import_lists_attempts() {
        let root = tempfile::tempdir().unwrap();
        let resolver = ImportResolver::for_source_dir(root.path());
        match resolver.locate("Missing.sol") {
            Err(CompileError::UnresolvedImport { tried, .. }) => assert_eq!(tried.len(), 3),
            other => panic!("expected UnresolvedImport, got {other:?}"),
        }
    }

    #[test]
    fn library_dir_override_replaces_default() {
        let resolver = ImportResolver::for_source_dir("/a").with_library_dir("/deps");
        assert_eq!(resolver.strategies().len(), 3);
        assert_eq!(
            resolver.strategies()[2],
            ImportStrategy::LibraryDir(PathBuf::from("/deps"))
        );
    }

    #[test]
    fn standard_library_layout() {
        let library = ContractLibrary::from_paths(&ContractPaths::default());
        assert!(library.source(ContractKind::Token).is_some());
        assert!(library.source(ContractKind::UpgradeProxy).is_some());
        assert_eq!(
            library.source(ContractKind::Staking).unwrap().contract_name,
            "StakingAuRa"
        );
    }

    #[tokio::test]
    async fn unregistered_kind_fails() {
        let library = ContractLibrary::new();
        assert!(matches!(
            library.load(ContractKind::Random).await,
            Err(CompileError::NotRegistered(ContractKind::Random))
        ));
    }
}
