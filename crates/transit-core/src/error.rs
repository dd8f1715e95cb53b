//! Error types for the transition engine
//!
//! Every failure is fatal. The taxonomy exists so the operator can tell at a
//! glance which kind of manual remediation is needed:
//! - Chain rejections (a transaction reverted or was refused)
//! - Invariant violations (an on-chain read did not match expectations)
//! - Process control failures (a node could not be restarted)
//! - Configuration errors (raised before any on-chain side effect)

use crate::abi::H256;
use crate::types::ContractKind;
use std::path::PathBuf;

/// Top-level error for a transition run
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// Transaction or RPC failure
    #[error("chain rejection: {0}")]
    Chain(#[from] ChainError),

    /// Post-condition check failed
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// Node restart failed
    #[error("process control failure: {0}")]
    Process(#[from] ProcessError),

    /// Missing or malformed input
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Contract compilation or artifact loading failed
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Spec document could not be read, mutated or written
    #[error("spec error: {0}")]
    Spec(#[from] SpecError),

    /// Call encoding or result decoding failed
    #[error("abi error: {0}")]
    Abi(#[from] AbiError),
}

/// Failure classes an operator acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A submitted transaction was refused or reverted
    ChainRejection,
    /// A post-initialization read disagreed with the expected value
    InvariantViolation,
    /// A node process could not be found, stopped or confirmed restarted
    ProcessControlFailure,
    /// Required input missing or malformed
    ConfigurationError,
}

impl TransitError {
    /// Classify the failure
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Chain(_) => ErrorClass::ChainRejection,
            Self::Invariant(_) | Self::Abi(_) => ErrorClass::InvariantViolation,
            Self::Process(_) => ErrorClass::ProcessControlFailure,
            Self::Config(_) | Self::Compile(_) | Self::Spec(_) => ErrorClass::ConfigurationError,
        }
    }

    /// Every failure leaves the network in a state a human has to inspect
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        true
    }

    /// Nothing is retried automatically; re-running against partial state
    /// can duplicate deployments
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// A post-condition that did not hold
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invariant `{check}` violated: expected {expected}, got {actual}")]
pub struct InvariantViolation {
    /// Name of the check, e.g. `ValidatorSet.getValidators`
    pub check: String,
    /// Expected value
    pub expected: String,
    /// Observed value
    pub actual: String,
}

impl InvariantViolation {
    /// Create a new violation
    pub fn new(
        check: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// ABI encoding/decoding errors
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    /// Address string is not 20 bytes of hex
    #[error("invalid address: '{0}'")]
    InvalidAddress(String),

    /// The codec refused the data or the arguments
    #[error("abi codec: {0}")]
    Codec(#[from] ethers::abi::Error),

    /// Data decodes but is not the canonical encoding of its values
    #[error("non-canonical abi data ({len} bytes)")]
    NonCanonical { len: usize },

    /// Interface has no such function
    #[error("no function `{name}` taking {arity} argument(s)")]
    NoSuchFunction { name: String, arity: usize },

    /// Wrong number of arguments
    #[error("`{function}` expects {expected} argument(s), got {got}")]
    ArgumentCount {
        function: String,
        expected: usize,
        got: usize,
    },

    /// Argument does not match the declared type
    #[error("argument {index} of `{function}` is not a {expected}")]
    ArgumentType {
        function: String,
        index: usize,
        expected: String,
    },

    /// Interface JSON could not be understood
    #[error("invalid interface: {0}")]
    InvalidInterface(String),
}

/// Chain access errors
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Node refused the transaction (funds, gas, nonce...)
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Transaction was mined but reverted
    #[error("transaction {tx_hash:?} reverted")]
    Reverted { tx_hash: H256 },

    /// JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Receipt never appeared
    #[error("no receipt for {tx_hash:?} after {attempts} attempt(s)")]
    ReceiptTimeout { tx_hash: H256, attempts: u32 },

    /// Deployment receipt carries no contract address
    #[error("deployment {tx_hash:?} produced no contract address")]
    MissingContractAddress { tx_hash: H256 },

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Decode(String),

    /// Call data could not be built or decoded
    #[error("abi error: {0}")]
    Abi(#[from] AbiError),
}

/// Contract compilation errors
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// IO error while reading a source or artifact
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No import strategy located the file
    #[error("cannot resolve import '{import}' (tried {tried:?})")]
    UnresolvedImport { import: String, tried: Vec<PathBuf> },

    /// The compiler binary failed or reported errors
    #[error("solc failed: {0}")]
    Solc(String),

    /// Compiler output lacks the requested contract
    #[error("compiler output has no contract `{0}`")]
    MissingOutput(String),

    /// Prebuilt artifact is malformed
    #[error("invalid artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    /// No source registered for a contract kind
    #[error("no source registered for {0}")]
    NotRegistered(ContractKind),

    /// Interface could not be parsed
    #[error("interface error: {0}")]
    Interface(#[from] AbiError),
}

impl CompileError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Spec document errors
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// IO error reading or writing the document
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid JSON
    #[error("spec is not valid json: {0}")]
    Parse(#[from] serde_json::Error),

    /// Required key is absent
    #[error("missing field `{0}`")]
    MissingField(String),

    /// Key exists but is not an object
    #[error("field `{0}` is not an object")]
    NotAnObject(String),

    /// Address field holds something that is not an address
    #[error("field `{field}` is not an address: {reason}")]
    InvalidAddress { field: String, reason: String },
}

impl SpecError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Node process errors
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Nothing listens on the node's port
    #[error("cannot stop node #{node}: nothing listens on port {port}")]
    NotRunning { node: usize, port: u16 },

    /// Port lookup failed
    #[error("lookup of port {port} failed: {reason}")]
    PortLookup { port: u16, reason: String },

    /// Termination signal failed
    #[error("cannot terminate pid {pid}: {reason}")]
    Terminate { pid: u32, reason: String },

    /// Node process could not be launched
    #[error("cannot launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// Node did not come back within the retry budget
    #[error("cannot restart node #{node}: port {port} silent after {attempts} attempt(s)")]
    NotConfirmed {
        node: usize,
        port: u16,
        attempts: u32,
    },

    /// The port is still held by the terminated process
    #[error("cannot restart node #{node}: pid {pid} still holds the port")]
    SamePid { node: usize, pid: u32 },

    /// Restart state machine misuse
    #[error("node #{node}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        node: usize,
        from: crate::restart::NodeRestartState,
        to: crate::restart::NodeRestartState,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required variable absent or empty
    #[error("missing required setting {0}")]
    Missing(String),

    /// Value could not be parsed
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// Mining and staking lists differ in length
    #[error("{mining} mining address(es) but {staking} staking address(es)")]
    LengthMismatch { mining: usize, staking: usize },

    /// Address listed twice
    #[error("duplicate address {address} in {key}")]
    Duplicate { key: String, address: String },

    /// Config file unreadable
    #[error("cannot load {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

impl ConfigError {
    /// Create invalid value error
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for transition operations
pub type TransitResult<T> = Result<T, TransitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_display() {
        let err = InvariantViolation::new("Random.collectRoundLength", "100", "50");
        assert_eq!(
            err.to_string(),
            "invariant `Random.collectRoundLength` violated: expected 100, got 50"
        );
    }

    #[test]
    fn error_classes() {
        let chain: TransitError = ChainError::Rejected("out of gas".to_string()).into();
        assert_eq!(chain.class(), ErrorClass::ChainRejection);

        let invariant: TransitError = InvariantViolation::new("x", "1", "2").into();
        assert_eq!(invariant.class(), ErrorClass::InvariantViolation);

        let process: TransitError = ProcessError::NotRunning { node: 3, port: 8543 }.into();
        assert_eq!(process.class(), ErrorClass::ProcessControlFailure);

        let config: TransitError = ConfigError::Missing("OWNER".to_string()).into();
        assert_eq!(config.class(), ErrorClass::ConfigurationError);
    }

    #[test]
    fn nothing_is_retryable() {
        let err: TransitError = ChainError::Transport("reset".to_string()).into();
        assert!(!err.is_retryable());
        assert!(err.requires_human());
    }

    #[test]
    fn process_error_display() {
        let err = ProcessError::NotConfirmed {
            node: 3,
            port: 8543,
            attempts: 10,
        };
        assert!(err.to_string().contains("node #3"));
    }
}
