//! Contract ABI on top of `ethers`
//!
//! The primitives and the codec are the `ethers` ones. This module adds what
//! the pipeline needs around them:
//! - Function lookup by name and arity (`Interface`)
//! - Argument checks that name the offending parameter
//! - Strict decoding: return data must be the canonical encoding of the
//!   values it decodes to, so dirty padding never reaches a read-back check

mod interface;

pub use ethers::abi::{Function, Param, ParamType, Token};
pub use ethers::types::{Address, H160, H256, U256};
pub use interface::Interface;

use crate::error::AbiError;

/// Parse a 20-byte hex address, `0x` prefix optional, any casing
///
/// # Errors
/// - `AbiError::InvalidAddress` for anything but 40 hex digits
pub fn parse_address(text: &str) -> Result<Address, AbiError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let mut bytes = [0u8; 20];
    if digits.len() != 40 || hex::decode_to_slice(digits, &mut bytes).is_err() {
        return Err(AbiError::InvalidAddress(text.to_string()));
    }
    Ok(Address::from(bytes))
}

/// EIP-55 mixed-case form
#[inline]
#[must_use]
pub fn checksum(address: &Address) -> String {
    ethers::utils::to_checksum(address, None)
}

/// `address[]` argument
#[must_use]
pub fn address_array(addresses: &[Address]) -> Token {
    Token::Array(addresses.iter().copied().map(Token::Address).collect())
}

/// Canonical signature, e.g. `initialize(uint256,address)`
#[must_use]
pub fn signature(function: &Function) -> String {
    let params: Vec<String> = function.inputs.iter().map(|p| p.kind.to_string()).collect();
    format!("{}({})", function.name, params.join(","))
}

/// Check arguments against declared types
///
/// # Errors
/// - `AbiError::ArgumentCount` on arity mismatch
/// - `AbiError::ArgumentType` naming the first mismatching argument
pub fn check_args(function: &str, inputs: &[Param], args: &[Token]) -> Result<(), AbiError> {
    if inputs.len() != args.len() {
        return Err(AbiError::ArgumentCount {
            function: function.to_string(),
            expected: inputs.len(),
            got: args.len(),
        });
    }
    for (index, (param, arg)) in inputs.iter().zip(args).enumerate() {
        if !fits(arg, &param.kind) {
            return Err(AbiError::ArgumentType {
                function: function.to_string(),
                index,
                expected: param.kind.to_string(),
            });
        }
    }
    Ok(())
}

// `Token::type_check` ignores integer widths
fn fits(token: &Token, ty: &ParamType) -> bool {
    match (token, ty) {
        (Token::Uint(value), ParamType::Uint(bits)) => value.bits() <= *bits,
        (Token::Array(items), ParamType::Array(inner)) => items.iter().all(|t| fits(t, inner)),
        _ => token.type_check(ty),
    }
}

/// Call data for `function`
///
/// # Errors
/// - any error of `check_args`
pub fn encode_call(function: &Function, args: &[Token]) -> Result<Vec<u8>, AbiError> {
    check_args(&function.name, &function.inputs, args)?;
    Ok(function.encode_input(args)?)
}

/// Decode the return data of `function`
///
/// # Errors
/// - see `decode_strict`
pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<Token>, AbiError> {
    let types: Vec<ParamType> = function.outputs.iter().map(|p| p.kind.clone()).collect();
    decode_strict(&types, data)
}

/// Decode `data`, refusing anything but the canonical encoding
///
/// # Errors
/// - `AbiError::Codec` if `data` does not decode at all
/// - `AbiError::NonCanonical` for dirty padding, stray offsets or trailing bytes
pub fn decode_strict(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    let tokens = ethers::abi::decode(types, data)?;
    if ethers::abi::encode(&tokens) != data {
        return Err(AbiError::NonCanonical { len: data.len() });
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn word(last: u8) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[31] = last;
        word
    }

    #[test]
    fn parse_is_case_insensitive() {
        let lower = parse_address("0x7301cfa0e1756b71869e93d4e4dca5c7d0eb0aa6").unwrap();
        let mixed = parse_address("0x7301CFA0e1756B71869E93d4e4Dca5c7d0eb0AA6").unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(parse_address(" 7301cfa0e1756b71869e93d4e4dca5c7d0eb0aa6 ").unwrap(), lower);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "0x", "0x1234", "0xzz01cfa0e1756b71869e93d4e4dca5c7d0eb0aa6", "nope"] {
            assert!(matches!(parse_address(bad), Err(AbiError::InvalidAddress(_))), "{bad}");
        }
    }

    #[test]
    fn checksum_matches_eip55_vectors() {
        for vector in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        ] {
            assert_eq!(checksum(&parse_address(vector).unwrap()), vector);
        }
    }

    #[test]
    fn dirty_address_word_is_refused() {
        let mut data = word(1);
        data[0] = 0xff;
        assert!(matches!(
            decode_strict(&[ParamType::Address], &data),
            Err(AbiError::NonCanonical { len: 32 })
        ));
        assert_eq!(
            decode_strict(&[ParamType::Address], &word(1)).unwrap(),
            vec![Token::Address(Address::from_low_u64_be(1))]
        );
    }

    #[test]
    fn trailing_bytes_are_refused() {
        let mut data = word(7).to_vec();
        data.push(0);
        assert!(decode_strict(&[ParamType::Uint(256)], &data).is_err());
    }

    #[test]
    fn truncated_data_is_refused() {
        assert!(matches!(
            decode_strict(&[ParamType::Uint(256), ParamType::Uint(256)], &word(7)),
            Err(AbiError::Codec(_))
        ));
    }

    #[test]
    fn uint_width_is_checked() {
        let param = |kind| Param {
            name: "v".to_string(),
            kind,
            internal_type: None,
        };
        assert!(check_args("f", &[param(ParamType::Uint(8))], &[Token::Uint(U256::from(255u64))]).is_ok());
        assert!(matches!(
            check_args("f", &[param(ParamType::Uint(8))], &[Token::Uint(U256::from(256u64))]),
            Err(AbiError::ArgumentType { index: 0, .. })
        ));
        assert!(check_args("f", &[param(ParamType::Uint(256))], &[Token::Uint(U256::MAX)]).is_ok());
    }

    proptest! {
        #[test]
        fn canonical_encodings_decode(
            value in any::<[u64; 4]>(),
            flag in any::<bool>(),
            text in ".{0,80}",
            raw in proptest::collection::vec(any::<[u8; 20]>(), 0..8),
        ) {
            let list: Vec<Address> = raw.into_iter().map(Address::from).collect();
            let tokens = vec![
                Token::Uint(U256(value)),
                Token::String(text),
                address_array(&list),
                Token::Bool(flag),
            ];
            let types = [
                ParamType::Uint(256),
                ParamType::String,
                ParamType::Array(Box::new(ParamType::Address)),
                ParamType::Bool,
            ];
            let decoded = decode_strict(&types, &ethers::abi::encode(&tokens)).unwrap();
            prop_assert_eq!(decoded, tokens);
        }
    }
}
