//! Chain spec document
//!
//! The spec is the network's activation schedule. Entries keyed by block
//! height are only ever added; a re-application at the same height
//! overwrites that height and nothing else.

mod store;

pub use store::JsonFileSpecStore;

use crate::abi::{checksum, parse_address, Address};
use crate::error::SpecError;
use crate::types::TransitionBundle;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Persistence of the spec document
#[async_trait]
pub trait SpecStore: Send + Sync {
    /// Read the whole document
    async fn read(&self) -> Result<Value, SpecError>;

    /// Replace the whole document; readers never observe a partial write
    async fn write(&self, document: &Value) -> Result<(), SpecError>;
}

const ENGINE_PARAMS: [&str; 3] = ["engine", "authorityRound", "params"];

/// Applies a transition bundle to a spec document
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecMutator;

impl SpecMutator {
    /// Schedule the POSDAO contracts at `bundle.transition_block`
    ///
    /// # Errors
    /// - `SpecError::MissingField` if `engine.authorityRound.params`,
    ///   its `validators` or the top-level `params` is absent
    /// - `SpecError::NotAnObject` if a schedule exists but is not a map
    pub fn apply(mut document: Value, bundle: &TransitionBundle) -> Result<Value, SpecError> {
        let height = bundle.transition_block.to_string();

        {
            let engine = object_at(&mut document, &ENGINE_PARAMS)?;

            let validators = engine
                .get_mut("validators")
                .ok_or_else(|| SpecError::MissingField(field(&ENGINE_PARAMS, "validators")))?;
            let multi = validator_schedule(validators)?;
            let mut entry = Map::new();
            entry.insert("contract".to_string(), address_value(bundle.validator_set));
            multi.insert(height.clone(), Value::Object(entry));

            schedule(engine, "blockRewardContractTransitions")?
                .insert(height.clone(), address_value(bundle.block_reward));
            schedule(engine, "randomnessContractAddress")?
                .insert(height.clone(), address_value(bundle.random));
            engine.insert(
                "posdaoTransition".to_string(),
                Value::from(bundle.transition_block),
            );
        }

        let params = object_at(&mut document, &["params"])?;
        params.insert("registrar".to_string(), address_value(bundle.registry));
        params.insert(
            "transactionPermissionContract".to_string(),
            address_value(bundle.tx_permission),
        );
        params.insert(
            "transactionPermissionContractTransition".to_string(),
            Value::from(bundle.transition_block),
        );

        tracing::info!(height = %height, "spec scheduled for POSDAO transition");
        Ok(document)
    }

    /// Address of the POA reward contract the spec currently names
    ///
    /// # Errors
    /// - `SpecError::MissingField` / `SpecError::InvalidAddress`
    pub fn legacy_block_reward(document: &Value) -> Result<Address, SpecError> {
        let name = field(&ENGINE_PARAMS, "blockRewardContractAddress");
        let value = document
            .pointer("/engine/authorityRound/params/blockRewardContractAddress")
            .ok_or_else(|| SpecError::MissingField(name.clone()))?;
        let text = value.as_str().ok_or_else(|| SpecError::InvalidAddress {
            field: name.clone(),
            reason: "not a string".to_string(),
        })?;
        parse_address(text).map_err(|e| SpecError::InvalidAddress {
            field: name,
            reason: e.to_string(),
        })
    }
}

fn field(path: &[&str], key: &str) -> String {
    let mut parts = path.to_vec();
    parts.push(key);
    parts.join(".")
}

fn address_value(address: Address) -> Value {
    Value::String(checksum(&address))
}

fn object_at<'v>(document: &'v mut Value, path: &[&str]) -> Result<&'v mut Map<String, Value>, SpecError> {
    let mut current = document;
    for (depth, key) in path.iter().enumerate() {
        let name = path[..=depth].join(".");
        current = current
            .as_object_mut()
            .ok_or_else(|| SpecError::NotAnObject(name.clone()))?
            .get_mut(*key)
            .ok_or(SpecError::MissingField(name))?;
    }
    let name = path.join(".");
    current.as_object_mut().ok_or(SpecError::NotAnObject(name))
}

/// Existing height-keyed map under `key`, created empty if absent
fn schedule<'m>(
    parent: &'m mut Map<String, Value>,
    key: &str,
) -> Result<&'m mut Map<String, Value>, SpecError> {
    parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| SpecError::NotAnObject(field(&ENGINE_PARAMS, key)))
}

/// The `multi` schedule of the validators config
///
/// A single-source config becomes the genesis entry of a new schedule.
fn validator_schedule(validators: &mut Value) -> Result<&mut Map<String, Value>, SpecError> {
    let name = field(&ENGINE_PARAMS, "validators");
    let config = validators
        .as_object_mut()
        .ok_or_else(|| SpecError::NotAnObject(name.clone()))?;

    if !config.contains_key("multi") {
        let genesis = std::mem::take(config);
        let mut multi = Map::new();
        multi.insert("0".to_string(), Value::Object(genesis));
        config.insert("multi".to_string(), Value::Object(multi));
    }

    config
        .get_mut("multi")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| SpecError::NotAnObject(format!("{name}.multi")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn bundle(height: u64, seed: u8) -> TransitionBundle {
        TransitionBundle {
            transition_block: height,
            validator_set: addr(seed),
            staking: addr(seed + 1),
            block_reward: addr(seed + 2),
            random: addr(seed + 3),
            tx_permission: addr(seed + 4),
            certifier: addr(seed + 5),
            registry: addr(seed + 6),
            token: addr(seed + 7),
            erc_to_native_bridges: vec![addr(0x73)],
        }
    }

    fn document() -> Value {
        json!({
            "name": "DPoSChain",
            "engine": {
                "authorityRound": {
                    "params": {
                        "stepDuration": 5,
                        "blockRewardContractAddress": "0x2000000000000000000000000000000000000001",
                        "validators": {
                            "multi": {
                                "0": { "list": ["0xbbcaa8d48289bb1ffcf9808d9aa4b1d215054c78"] }
                            }
                        }
                    }
                }
            },
            "params": { "networkID": "0x65" },
            "accounts": {}
        })
    }

    #[test]
    fn writes_every_entry() {
        let b = bundle(1101, 0x10);
        let out = SpecMutator::apply(document(), &b).unwrap();
        let engine = &out["engine"]["authorityRound"]["params"];

        assert_eq!(
            engine["validators"]["multi"]["1101"],
            json!({ "contract": checksum(&b.validator_set) })
        );
        assert_eq!(
            engine["blockRewardContractTransitions"]["1101"],
            json!(checksum(&b.block_reward))
        );
        assert_eq!(
            engine["randomnessContractAddress"]["1101"],
            json!(checksum(&b.random))
        );
        assert_eq!(engine["posdaoTransition"], json!(1101));
        assert_eq!(out["params"]["registrar"], json!(checksum(&b.registry)));
        assert_eq!(
            out["params"]["transactionPermissionContract"],
            json!(checksum(&b.tx_permission))
        );
        assert_eq!(out["params"]["transactionPermissionContractTransition"], json!(1101));
        // untouched keys survive
        assert_eq!(engine["validators"]["multi"]["0"]["list"][0], "0xbbcaa8d48289bb1ffcf9808d9aa4b1d215054c78");
        assert_eq!(out["params"]["networkID"], "0x65");
        assert_eq!(engine["stepDuration"], 5);
    }

    #[test]
    fn distinct_heights_accumulate() {
        let once = SpecMutator::apply(document(), &bundle(1101, 0x10)).unwrap();
        let twice = SpecMutator::apply(once, &bundle(2201, 0x40)).unwrap();
        let engine = &twice["engine"]["authorityRound"]["params"];

        let multi = engine["validators"]["multi"].as_object().unwrap();
        assert_eq!(multi.len(), 3);
        assert!(multi.contains_key("1101") && multi.contains_key("2201"));
        assert_eq!(engine["blockRewardContractTransitions"].as_object().unwrap().len(), 2);
        assert_eq!(engine["randomnessContractAddress"].as_object().unwrap().len(), 2);
        assert_eq!(engine["posdaoTransition"], json!(2201));
    }

    #[test]
    fn same_bundle_is_idempotent() {
        let b = bundle(1101, 0x10);
        let once = SpecMutator::apply(document(), &b).unwrap();
        let twice = SpecMutator::apply(once.clone(), &b).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn single_validator_source_becomes_genesis_entry() {
        let mut doc = document();
        doc["engine"]["authorityRound"]["params"]["validators"] =
            json!({ "safeContract": "0x1000000000000000000000000000000000000005" });

        let out = SpecMutator::apply(doc, &bundle(1101, 0x10)).unwrap();
        let multi = &out["engine"]["authorityRound"]["params"]["validators"]["multi"];
        assert_eq!(
            multi["0"],
            json!({ "safeContract": "0x1000000000000000000000000000000000000005" })
        );
        assert!(multi.get("1101").is_some());
    }

    #[test]
    fn non_object_schedule_rejected() {
        let mut doc = document();
        doc["engine"]["authorityRound"]["params"]["randomnessContractAddress"] = json!("0x00");
        assert!(matches!(
            SpecMutator::apply(doc, &bundle(1101, 0x10)),
            Err(SpecError::NotAnObject(_))
        ));
    }

    #[test]
    fn missing_sections_rejected() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("params");
        assert!(matches!(
            SpecMutator::apply(doc, &bundle(1101, 0x10)),
            Err(SpecError::MissingField(f)) if f == "params"
        ));

        let no_engine = json!({ "params": {} });
        assert!(matches!(
            SpecMutator::apply(no_engine, &bundle(1101, 0x10)),
            Err(SpecError::MissingField(f)) if f == "engine"
        ));
    }

    #[test]
    fn legacy_reward_address() {
        let address = SpecMutator::legacy_block_reward(&document()).unwrap();
        assert_eq!(
            address,
            parse_address("0x2000000000000000000000000000000000000001").unwrap()
        );

        let mut doc = document();
        doc["engine"]["authorityRound"]["params"]["blockRewardContractAddress"] = json!("nope");
        assert!(matches!(
            SpecMutator::legacy_block_reward(&doc),
            Err(SpecError::InvalidAddress { .. })
        ));
    }
}
