//! Contract interfaces parsed from compiler JSON

use super::{check_args, Function, Param, Token};
use crate::error::AbiError;
use ethers::abi::Abi;
use serde_json::Value;

/// Parsed contract interface
///
/// Overloads are told apart by arity, which is all the POSDAO contracts need.
#[derive(Debug, Clone)]
pub struct Interface {
    abi: Abi,
    raw: Value,
}

impl Interface {
    /// Parse from a JSON ABI array
    ///
    /// # Errors
    /// - `AbiError::InvalidInterface` if the value is not a valid ABI
    pub fn from_json(value: &Value) -> Result<Self, AbiError> {
        let abi: Abi = serde_json::from_value(value.clone())
            .map_err(|e| AbiError::InvalidInterface(e.to_string()))?;
        Ok(Self {
            abi,
            raw: value.clone(),
        })
    }

    /// Parse from JSON text
    pub fn parse(text: &str) -> Result<Self, AbiError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| AbiError::InvalidInterface(e.to_string()))?;
        Self::from_json(&value)
    }

    /// Look up a function by name and argument count
    pub fn function(&self, name: &str, arity: usize) -> Result<&Function, AbiError> {
        self.abi
            .functions_by_name(name)
            .ok()
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .ok_or_else(|| AbiError::NoSuchFunction {
                name: name.to_string(),
                arity,
            })
    }

    /// Function whose selector starts `call_data`
    #[must_use]
    pub fn function_by_selector(&self, call_data: &[u8]) -> Option<&Function> {
        let selector = call_data.get(..4)?;
        self.abi.functions().find(|f| f.short_signature() == selector)
    }

    /// All functions
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.abi.functions()
    }

    /// Constructor inputs, empty when the contract declares none
    #[must_use]
    pub fn constructor(&self) -> &[Param] {
        self.abi.constructor().map_or(&[], |c| c.inputs.as_slice())
    }

    /// Creation data: bytecode followed by encoded constructor arguments
    pub fn encode_deploy(&self, bytecode: &[u8], args: &[Token]) -> Result<Vec<u8>, AbiError> {
        check_args("constructor", self.constructor(), args)?;
        let mut data = bytecode.to_vec();
        data.extend(ethers::abi::encode(args));
        Ok(data)
    }

    /// The JSON this interface was parsed from
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
