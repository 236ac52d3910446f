//! Head/tail ABI encoding over the tagged [`AbiValue`] union — no reflection, per the redesign
//! note in `spec.md` §9 that calls for a recursive descent producing/consuming this union
//! directly.

use crate::abi::{AbiType, AbiValue};
use alloy_primitives::U256;

fn static_encoded_len(ty: &AbiType) -> usize {
    match ty {
        AbiType::FixedArray(inner, n) => static_encoded_len(inner) * n,
        AbiType::Tuple(fields) => fields.iter().map(static_encoded_len).sum(),
        _ => 32,
    }
}

fn pad_right(mut data: Vec<u8>) -> Vec<u8> {
    let rem = data.len() % 32;
    if rem != 0 {
        data.resize(data.len() + (32 - rem), 0);
    }
    data
}

fn encode_static(value: &AbiValue, out: &mut Vec<u8>) {
    match value {
        AbiValue::Address(addr) => {
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(addr.as_slice());
        }
        AbiValue::Bool(b) => {
            out.extend_from_slice(&[0u8; 31]);
            out.push(if *b { 1 } else { 0 });
        }
        AbiValue::Uint(v, _) => out.extend_from_slice(&v.to_be_bytes::<32>()),
        AbiValue::Int(v, _) => out.extend_from_slice(&v.into_raw().to_be_bytes::<32>()),
        AbiValue::FixedBytes(bytes, _) => {
            let mut padded = bytes.clone();
            padded.resize(32, 0);
            out.extend_from_slice(&padded);
        }
        AbiValue::FixedArray(items) => {
            for item in items {
                encode_static(item, out);
            }
        }
        AbiValue::Tuple(fields) => {
            for field in fields {
                encode_static(field, out);
            }
        }
        AbiValue::String(_) | AbiValue::Bytes(_) | AbiValue::Array(_) => {
            unreachable!("dynamic value passed to encode_static")
        }
    }
}

/// Encodes the dynamic "tail" payload for one value (the part a head offset points at).
fn encode_dynamic_tail(value: &AbiValue) -> Vec<u8> {
    match value {
        AbiValue::String(s) => {
            let bytes = s.as_bytes();
            let mut out = U256::from(bytes.len()).to_be_bytes::<32>().to_vec();
            out.extend_from_slice(&pad_right(bytes.to_vec()));
            out
        }
        AbiValue::Bytes(b) => {
            let mut out = U256::from(b.len()).to_be_bytes::<32>().to_vec();
            out.extend_from_slice(&pad_right(b.clone()));
            out
        }
        AbiValue::Array(items) => {
            let mut out = U256::from(items.len()).to_be_bytes::<32>().to_vec();
            out.extend_from_slice(&encode_tuple_like(items));
            out
        }
        AbiValue::FixedArray(items) => encode_tuple_like(items),
        AbiValue::Tuple(fields) => encode_tuple_like(fields),
        _ => unreachable!("static value passed to encode_dynamic_tail"),
    }
}

/// Encodes a flat list of values (array elements, or tuple fields) using the standard head/tail
/// scheme, with no outer length prefix — shared by dynamic arrays, fixed arrays, and tuples.
fn encode_tuple_like(values: &[AbiValue]) -> Vec<u8> {
    let mut head_len = 0usize;
    let mut dynamic_flags = Vec::with_capacity(values.len());
    for v in values {
        let ty = v.abi_type();
        if ty.is_dynamic() {
            dynamic_flags.push(true);
            head_len += 32;
        } else {
            dynamic_flags.push(false);
            head_len += static_encoded_len(&ty);
        }
    }

    let mut heads = Vec::new();
    let mut tails = Vec::new();
    let mut tail_offset = head_len;
    for (value, is_dynamic) in values.iter().zip(dynamic_flags.iter()) {
        if *is_dynamic {
            heads.extend_from_slice(&U256::from(tail_offset).to_be_bytes::<32>());
            let tail = encode_dynamic_tail(value);
            tail_offset += tail.len();
            tails.push(tail);
        } else {
            encode_static(value, &mut heads);
        }
    }

    let mut out = heads;
    for tail in tails {
        out.extend(tail);
    }
    out
}

/// ABI-encodes a full argument list, as it would appear after the 4-byte method selector.
pub fn encode_arguments(values: &[AbiValue]) -> Vec<u8> {
    encode_tuple_like(values)
}

/// Prepends `selector` to the ABI-encoded `values`, producing full calldata.
pub fn encode_calldata(selector: [u8; 4], values: &[AbiValue]) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend(encode_arguments(values));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    #[test]
    fn encodes_simple_static_arguments() {
        let values = vec![AbiValue::Uint(U256::from(42u32), 256), AbiValue::Bool(true)];
        let encoded = encode_arguments(&values);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 42);
        assert_eq!(encoded[63], 1);
    }

    #[test]
    fn encodes_dynamic_string_with_offset_and_length() {
        let values = vec![AbiValue::Uint(U256::from(1u8), 256), AbiValue::String("hi".to_string())];
        let encoded = encode_arguments(&values);
        // head: two 32-byte words (uint, offset)
        assert_eq!(encoded.len(), 32 * 2 + 32 /* length */ + 32 /* padded "hi" */);
        let offset = U256::from_be_slice(&encoded[32..64]);
        assert_eq!(offset, U256::from(64u64));
        let len = U256::from_be_slice(&encoded[64..96]);
        assert_eq!(len, U256::from(2u64));
        assert_eq!(&encoded[96..98], b"hi");
    }

    #[test]
    fn calldata_includes_selector_prefix() {
        let calldata = encode_calldata([0xde, 0xad, 0xbe, 0xef], &[AbiValue::Bool(false)]);
        assert_eq!(&calldata[0..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(calldata.len(), 4 + 32);
    }

    #[test]
    fn encodes_fixed_array_of_static_elements_inline() {
        let values = vec![AbiValue::FixedArray(vec![
            AbiValue::Address(Address::repeat_byte(1)),
            AbiValue::Address(Address::repeat_byte(2)),
        ])];
        let encoded = encode_arguments(&values);
        assert_eq!(encoded.len(), 64);
    }
}
