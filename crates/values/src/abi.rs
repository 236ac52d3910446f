//! A recursive, tagged representation of ABI types and values.
//!
//! The teacher reaches for reflection (`alloy-dyn-abi`'s `DynSolType`/`DynSolValue`) to cover
//! this ground; per the redesign note in the spec we instead keep a small tagged union that the
//! generator and mutator recurse over directly, with no reflection at the boundary.

use alloy_primitives::{Address, I256, U256};

/// An ABI type, as needed to drive generation and mutation.
///
/// `Uint`/`Int` carry their bit width in `8..=256`, always a multiple of 8, matching Solidity's
/// `uintN`/`intN` family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiType {
    Address,
    Bool,
    Uint(u16),
    Int(u16),
    String,
    Bytes,
    FixedBytes(usize),
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
    Tuple(Vec<AbiType>),
}

impl AbiType {
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::String | Self::Bytes | Self::Array(_) => true,
            Self::FixedArray(inner, _) => inner.is_dynamic(),
            Self::Tuple(fields) => fields.iter().any(Self::is_dynamic),
            _ => false,
        }
    }
}

/// A concrete ABI value, tagged with the same shape as [`AbiType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Bool(bool),
    Uint(U256, u16),
    Int(I256, u16),
    String(String),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>, usize),
    Array(Vec<AbiValue>),
    FixedArray(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    /// Recovers the [`AbiType`] that this value was generated for.
    ///
    /// Empty dynamic arrays can't recover their element type; callers that need the type should
    /// carry it alongside the value rather than round-tripping through this.
    pub fn abi_type(&self) -> AbiType {
        match self {
            Self::Address(_) => AbiType::Address,
            Self::Bool(_) => AbiType::Bool,
            Self::Uint(_, w) => AbiType::Uint(*w),
            Self::Int(_, w) => AbiType::Int(*w),
            Self::String(_) => AbiType::String,
            Self::Bytes(_) => AbiType::Bytes,
            Self::FixedBytes(_, n) => AbiType::FixedBytes(*n),
            Self::Array(items) => {
                AbiType::Array(Box::new(items.first().map(Self::abi_type).unwrap_or(AbiType::Bool)))
            }
            Self::FixedArray(items) => AbiType::FixedArray(
                Box::new(items.first().map(Self::abi_type).unwrap_or(AbiType::Bool)),
                items.len(),
            ),
            Self::Tuple(fields) => AbiType::Tuple(fields.iter().map(Self::abi_type).collect()),
        }
    }
}

/// Masks an unsigned integer down to `bits` bits (EVM-style wraparound, not saturation).
pub fn mask_uint(value: U256, bits: u16) -> U256 {
    if bits >= 256 {
        return value;
    }
    let mask = (U256::from(1u8) << bits) - U256::from(1u8);
    value & mask
}

/// Masks a signed integer down to `bits` bits, sign-extending the result the way the EVM does for
/// `intN` wraparound.
pub fn mask_int(value: I256, bits: u16) -> I256 {
    if bits >= 256 {
        return value;
    }
    let unsigned = mask_uint(value.into_raw(), bits);
    let sign_bit = U256::from(1u8) << (bits - 1);
    if unsigned & sign_bit != U256::ZERO {
        // Sign-extend: subtract 2^bits so the top bit becomes negative.
        let wrapped = unsigned - (U256::from(1u8) << bits);
        I256::from_raw(wrapped)
    } else {
        I256::from_raw(unsigned)
    }
}

/// Inclusive bounds for an unsigned integer of the given bit width.
pub fn uint_bounds(bits: u16) -> (U256, U256) {
    let max = if bits >= 256 { U256::MAX } else { (U256::from(1u8) << bits) - U256::from(1u8) };
    (U256::ZERO, max)
}

/// Inclusive bounds for a signed integer of the given bit width.
pub fn int_bounds(bits: u16) -> (I256, I256) {
    if bits >= 256 {
        return (I256::MIN, I256::MAX);
    }
    let max_unsigned = (U256::from(1u8) << (bits - 1)) - U256::from(1u8);
    let min_unsigned = U256::from(1u8) << (bits - 1);
    (mask_int(I256::from_raw(min_unsigned), bits), I256::from_raw(max_unsigned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_uint_wraps_like_evm() {
        let v = U256::from(300u32);
        assert_eq!(mask_uint(v, 8), U256::from(300u32 % 256));
    }

    #[test]
    fn int_bounds_i8() {
        let (min, max) = int_bounds(8);
        assert_eq!(min, I256::try_from(-128i32).unwrap());
        assert_eq!(max, I256::try_from(127i32).unwrap());
    }

    #[test]
    fn mask_int_sign_extends() {
        // 0xFF at 8 bits is -1 as an i8.
        let raw = I256::from_raw(U256::from(0xFFu32));
        assert_eq!(mask_int(raw, 8), I256::try_from(-1i32).unwrap());
    }
}
