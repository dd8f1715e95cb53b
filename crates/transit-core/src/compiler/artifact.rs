//! Prebuilt build artifacts (`<Name>.json` with `abi` and `bytecode`)

use super::{CompiledContract, ContractCompiler, ImportResolver};
use crate::abi::Interface;
use crate::error::CompileError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ArtifactFile {
    abi: Value,
    bytecode: String,
}

/// Loads contracts already compiled by the contracts project
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactCompiler;

impl ArtifactCompiler {
    /// Parse artifact JSON text
    ///
    /// # Errors
    /// - `CompileError::Artifact` on malformed JSON, hex or empty bytecode
    pub fn parse(path: &Path, text: &str, contract_name: &str) -> Result<CompiledContract, CompileError> {
        let artifact_err = |message: String| CompileError::Artifact {
            path: path.to_path_buf(),
            message,
        };

        let file: ArtifactFile =
            serde_json::from_str(text).map_err(|e| artifact_err(e.to_string()))?;
        let bytecode = hex::decode(file.bytecode.trim_start_matches("0x"))
            .map_err(|e| artifact_err(format!("bytecode: {e}")))?;
        if bytecode.is_empty() {
            return Err(artifact_err("empty bytecode (abstract contract?)".to_string()));
        }

        Ok(CompiledContract {
            name: contract_name.to_string(),
            interface: Arc::new(Interface::from_json(&file.abi)?),
            bytecode: Arc::new(bytecode),
        })
    }
}

#[async_trait]
impl ContractCompiler for ArtifactCompiler {
    async fn compile(
        &self,
        source_dir: &Path,
        contract_name: &str,
        _resolver: &ImportResolver,
    ) -> Result<CompiledContract, CompileError> {
        let path: PathBuf = source_dir.join(format!("{contract_name}.json"));
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CompileError::io_error(&path, e))?;
        Self::parse(&path, &text, contract_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTIFACT: &str = r#"{
        "contractName": "RandomAuRa",
        "abi": [
            {
                "type": "function",
                "name": "collectRoundLength",
                "inputs": [],
                "outputs": [{ "name": "", "type": "uint256" }],
                "stateMutability": "view"
            }
        ],
        "bytecode": "0x60806040"
    }"#;

    #[tokio::test]
    async fn loads_artifact_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("RandomAuRa.json"), ARTIFACT).unwrap();

        let compiled = ArtifactCompiler
            .compile(
                dir.path(),
                "RandomAuRa",
                &ImportResolver::for_source_dir(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(compiled.name, "RandomAuRa");
        assert_eq!(*compiled.bytecode, vec![0x60, 0x80, 0x60, 0x40]);
        assert!(compiled.interface.function("collectRoundLength", 0).is_ok());
    }

    #[tokio::test]
    async fn missing_artifact_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ArtifactCompiler
            .compile(dir.path(), "Nope", &ImportResolver::for_source_dir(dir.path()))
            .await;
        assert!(matches!(result, Err(CompileError::Io { .. })));
    }

    #[test]
    fn empty_bytecode_rejected() {
        let text = r#"{ "abi": [], "bytecode": "0x" }"#;
        assert!(matches!(
            ArtifactCompiler::parse(Path::new("I.json"), text, "I"),
            Err(CompileError::Artifact { .. })
        ));
    }
}
