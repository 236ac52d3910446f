//! Solidity type-string parsing into [`AbiType`].
//!
//! `alloy-json-abi` hands back each parameter's type as a string (`"uint256"`, `"address[3]"`,
//! `"tuple[]"` with `components`); this turns that back into our tagged union without routing
//! through `alloy-dyn-abi`'s `DynSolType` reflection.

use crate::abi::AbiType;
use alloy_json_abi::Param;

/// Parses a single ABI parameter (including nested `tuple` components) into an [`AbiType`].
pub fn abi_type_from_param(param: &Param) -> AbiType {
    parse_type(&param.ty, &param.components)
}

fn parse_type(ty: &str, components: &[Param]) -> AbiType {
    if let Some(inner) = ty.strip_suffix("[]") {
        return AbiType::Array(Box::new(parse_type(inner, components)));
    }
    if let Some(open) = ty.rfind('[') {
        if ty.ends_with(']') {
            if let Ok(len) = ty[open + 1..ty.len() - 1].parse::<usize>() {
                return AbiType::FixedArray(Box::new(parse_type(&ty[..open], components)), len);
            }
        }
    }

    if ty == "tuple" {
        return AbiType::Tuple(components.iter().map(abi_type_from_param).collect());
    }

    parse_elementary(ty)
}

fn parse_elementary(ty: &str) -> AbiType {
    match ty {
        "address" => AbiType::Address,
        "bool" => AbiType::Bool,
        "string" => AbiType::String,
        "bytes" => AbiType::Bytes,
        "uint" => AbiType::Uint(256),
        "int" => AbiType::Int(256),
        _ if ty.starts_with("uint") => AbiType::Uint(ty[4..].parse().unwrap_or(256)),
        _ if ty.starts_with("int") => AbiType::Int(ty[3..].parse().unwrap_or(256)),
        _ if ty.starts_with("bytes") => AbiType::FixedBytes(ty[5..].parse().unwrap_or(32)),
        other => {
            tracing::warn!(ty = other, "unrecognized solidity type, defaulting to bytes");
            AbiType::Bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(json: &str) -> Param {
        serde_json::from_str(json).expect("valid JSON ABI param fixture")
    }

    #[test]
    fn parses_elementary_types() {
        assert_eq!(abi_type_from_param(&param(r#"{"type":"address","name":"a"}"#)), AbiType::Address);
        assert_eq!(abi_type_from_param(&param(r#"{"type":"uint256","name":"a"}"#)), AbiType::Uint(256));
        assert_eq!(abi_type_from_param(&param(r#"{"type":"uint8","name":"a"}"#)), AbiType::Uint(8));
        assert_eq!(abi_type_from_param(&param(r#"{"type":"int16","name":"a"}"#)), AbiType::Int(16));
        assert_eq!(abi_type_from_param(&param(r#"{"type":"bytes32","name":"a"}"#)), AbiType::FixedBytes(32));
        assert_eq!(abi_type_from_param(&param(r#"{"type":"bytes","name":"a"}"#)), AbiType::Bytes);
        assert_eq!(abi_type_from_param(&param(r#"{"type":"string","name":"a"}"#)), AbiType::String);
    }

    #[test]
    fn parses_arrays() {
        assert_eq!(
            abi_type_from_param(&param(r#"{"type":"uint256[]","name":"a"}"#)),
            AbiType::Array(Box::new(AbiType::Uint(256)))
        );
        assert_eq!(
            abi_type_from_param(&param(r#"{"type":"address[3]","name":"a"}"#)),
            AbiType::FixedArray(Box::new(AbiType::Address), 3)
        );
    }

    #[test]
    fn parses_tuples_with_components() {
        let outer = param(
            r#"{"type":"tuple","name":"a","components":[
                {"type":"uint256","name":"x"},
                {"type":"bool","name":"y"}
            ]}"#,
        );
        assert_eq!(abi_type_from_param(&outer), AbiType::Tuple(vec![AbiType::Uint(256), AbiType::Bool]));
    }
}
