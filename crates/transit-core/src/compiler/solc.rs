//! `solc --standard-json` backend
//!
//! The compiler binary cannot call back into us for imports, so the source
//! closure is collected up front: starting from `<Name>.sol`, every import
//! is resolved through the `ImportResolver` and added to the input under its
//! normalized unit name.

use super::{CompiledContract, ContractCompiler, ImportResolver};
use crate::abi::Interface;
use crate::error::CompileError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::io::AsyncWriteExt;

fn import_pattern() -> &'static Regex {
    static IMPORT_RE: OnceLock<Regex> = OnceLock::new();
    IMPORT_RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*import\s+(?:[^;]*?\bfrom\s+)?["']([^"']+)["']"#)
            .expect("import pattern is valid")
    })
}

/// Optimizer runs used for every compilation
pub const OPTIMIZER_RUNS: u32 = 200;

/// Target EVM version
pub const EVM_VERSION: &str = "constantinople";

/// Compiles Solidity sources by shelling out to `solc`
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    binary: PathBuf,
}

impl SolcCompiler {
    /// Use the given `solc` binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Collect the main source and its transitive imports
    ///
    /// Keys are unit names as `solc` sees them after path normalization.
    pub async fn collect_sources(
        source_dir: &Path,
        contract_name: &str,
        resolver: &ImportResolver,
    ) -> Result<BTreeMap<String, String>, CompileError> {
        let main_unit = format!("{contract_name}.sol");
        let main_path = source_dir.join(&main_unit);
        let main = tokio::fs::read_to_string(&main_path)
            .await
            .map_err(|e| CompileError::io_error(&main_path, e))?;

        let mut sources = BTreeMap::new();
        let mut pending: VecDeque<(String, String)> = VecDeque::new();
        pending.push_back((main_unit, main));

        while let Some((unit, content)) = pending.pop_front() {
            for import in imports_of(&content) {
                let target = join_import(&unit, &import);
                if sources.contains_key(&target) || pending.iter().any(|(u, _)| u == &target) {
                    continue;
                }
                tracing::trace!(%unit, import = %target, "resolving import");
                let body = resolver.read(&target).await?;
                pending.push_back((target, body));
            }
            sources.insert(unit, content);
        }
        Ok(sources)
    }

    async fn run(&self, input: &Value) -> Result<Value, CompileError> {
        let mut child = tokio::process::Command::new(&self.binary)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CompileError::Solc(format!("{}: {e}", self.binary.display())))?;

        let payload = serde_json::to_vec(input)
            .map_err(|e| CompileError::Solc(format!("encoding input: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| CompileError::Solc(format!("writing input: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CompileError::Solc(e.to_string()))?;
        if !output.status.success() {
            return Err(CompileError::Solc(format!(
                "exit {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| CompileError::Solc(format!("unreadable output: {e}")))
    }
}

#[async_trait]
impl ContractCompiler for SolcCompiler {
    async fn compile(
        &self,
        source_dir: &Path,
        contract_name: &str,
        resolver: &ImportResolver,
    ) -> Result<CompiledContract, CompileError> {
        let sources = Self::collect_sources(source_dir, contract_name, resolver).await?;
        tracing::info!(contract = contract_name, units = sources.len(), "compiling");

        let input = standard_input(&sources);
        let output = self.run(&input).await?;
        extract_contract(&output, &format!("{contract_name}.sol"), contract_name)
    }
}

/// Import paths named by a source unit
#[must_use]
pub fn imports_of(source: &str) -> Vec<String> {
    import_pattern()
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Normalize an import against the unit that names it
///
/// Relative imports (`./`, `../`) are joined to the importer's directory;
/// anything else is taken as-is.
#[must_use]
pub fn join_import(importer: &str, import: &str) -> String {
    if !(import.starts_with("./") || import.starts_with("../")) {
        return import.to_string();
    }

    let mut parts: Vec<&str> = importer.split('/').collect();
    parts.pop();
    for segment in import.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn standard_input(sources: &BTreeMap<String, String>) -> Value {
    let sources: Map<String, Value> = sources
        .iter()
        .map(|(unit, content)| (unit.clone(), json!({ "content": content })))
        .collect();

    json!({
        "language": "Solidity",
        "sources": sources,
        "settings": {
            "optimizer": { "enabled": true, "runs": OPTIMIZER_RUNS },
            "evmVersion": EVM_VERSION,
            "outputSelection": {
                "*": { "*": ["abi", "evm.bytecode.object", "evm.methodIdentifiers"] }
            }
        }
    })
}

fn extract_contract(
    output: &Value,
    unit: &str,
    contract_name: &str,
) -> Result<CompiledContract, CompileError> {
    let errors: Vec<String> = output
        .get("errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|e| e.get("severity").and_then(Value::as_str) == Some("error"))
        .map(|e| {
            e.get("formattedMessage")
                .or_else(|| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .trim()
                .to_string()
        })
        .collect();
    if !errors.is_empty() {
        return Err(CompileError::Solc(errors.join("\n")));
    }

    let contract = output
        .pointer(&format!("/contracts/{}/{contract_name}", escape_pointer(unit)))
        .ok_or_else(|| CompileError::MissingOutput(contract_name.to_string()))?;

    let abi = contract
        .get("abi")
        .ok_or_else(|| CompileError::MissingOutput(format!("{contract_name}.abi")))?;
    let bytecode = contract
        .pointer("/evm/bytecode/object")
        .and_then(Value::as_str)
        .ok_or_else(|| CompileError::MissingOutput(format!("{contract_name}.evm.bytecode")))?;
    let bytecode = hex::decode(bytecode.trim_start_matches("0x"))
        .map_err(|e| CompileError::Solc(format!("{contract_name} bytecode: {e}")))?;

    Ok(CompiledContract {
        name: contract_name.to_string(),
        interface: Arc::new(Interface::from_json(abi)?),
        bytecode: Arc::new(bytecode),
    })
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_forms() {
        let source = r#"
pragma solidity 0.5.9;
import "./Ownable.sol";
import 'openzeppelin-solidity/contracts/math/SafeMath.sol';
import {IStaking} from "../interfaces/IStaking.sol";
import * as Lib from "./lib/Lib.sol";
// import "Commented.sol";
contract X {}
"#;
        assert_eq!(
            imports_of(source),
            vec![
                "./Ownable.sol",
                "openzeppelin-solidity/contracts/math/SafeMath.sol",
                "../interfaces/IStaking.sol",
                "./lib/Lib.sol",
            ]
        );
    }

    #[test]
    fn relative_imports_join_importer_dir() {
        assert_eq!(join_import("Token.sol", "./Ownable.sol"), "Ownable.sol");
        assert_eq!(
            join_import("lib/Token.sol", "../interfaces/IToken.sol"),
            "interfaces/IToken.sol"
        );
        assert_eq!(
            join_import("a/b/C.sol", "./d/E.sol"),
            "a/b/d/E.sol"
        );
        assert_eq!(
            join_import("a/B.sol", "openzeppelin/Ownable.sol"),
            "openzeppelin/Ownable.sol"
        );
    }

    #[tokio::test]
    async fn source_closure_is_collected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("mock");
        std::fs::create_dir_all(dir.join("lib")).unwrap();
        std::fs::create_dir_all(root.path().join("node_modules/oz")).unwrap();

        std::fs::write(
            dir.join("Token.sol"),
            "import \"./lib/Base.sol\";\nimport \"oz/Ownable.sol\";\ncontract Token {}",
        )
        .unwrap();
        std::fs::write(dir.join("lib/Base.sol"), "import \"oz/Ownable.sol\";\ncontract Base {}")
            .unwrap();
        std::fs::write(root.path().join("node_modules/oz/Ownable.sol"), "contract Ownable {}")
            .unwrap();

        let resolver = ImportResolver::for_source_dir(&dir);
        let sources = SolcCompiler::collect_sources(&dir, "Token", &resolver)
            .await
            .unwrap();
        let units: Vec<&str> = sources.keys().map(String::as_str).collect();
        assert_eq!(units, vec!["Token.sol", "lib/Base.sol", "oz/Ownable.sol"]);
    }

    #[test]
    fn compiler_settings() {
        let mut sources = BTreeMap::new();
        sources.insert("A.sol".to_string(), "contract A {}".to_string());
        let input = standard_input(&sources);
        assert_eq!(input["settings"]["optimizer"]["runs"], 200);
        assert_eq!(input["settings"]["evmVersion"], "constantinople");
        assert_eq!(input["sources"]["A.sol"]["content"], "contract A {}");
    }

    #[test]
    fn extract_reports_compiler_errors() {
        let output = json!({
            "errors": [
                { "severity": "warning", "formattedMessage": "unused variable" },
                { "severity": "error", "formattedMessage": "ParserError: expected ';'" }
            ]
        });
        match extract_contract(&output, "A.sol", "A") {
            Err(CompileError::Solc(msg)) => assert!(msg.contains("ParserError")),
            other => panic!("expected Solc error, got {other:?}"),
        }
    }

    #[test]
    fn extract_contract_output() {
        let output = json!({
            "contracts": {
                "lib/A.sol": {
                    "A": {
                        "abi": [
                            {
                                "type": "function",
                                "name": "ping",
                                "inputs": [],
                                "outputs": [{ "name": "", "type": "bool" }],
                                "stateMutability": "view"
                            }
                        ],
                        "evm": { "bytecode": { "object": "6080" } }
                    }
                }
            }
        });
        let compiled = extract_contract(&output, "lib/A.sol", "A").unwrap();
        assert_eq!(*compiled.bytecode, vec![0x60, 0x80]);
        assert!(compiled.interface.function("ping", 0).is_ok());
        assert!(matches!(
            extract_contract(&output, "lib/A.sol", "B"),
            Err(CompileError::MissingOutput(_))
        ));
    }
}
