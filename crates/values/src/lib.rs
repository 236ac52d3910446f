//! Typed ABI value generation and mutation.
//!
//! This crate has no notion of a chain, a contract, or a call sequence; it only knows how to
//! generate and mutate values matching an [`abi::AbiType`], biased by a [`set::ValueSet`] of
//! literals seeded from source and grown at runtime.

pub mod abi;
pub mod encode;
pub mod generator;
pub mod mutator;
pub mod set;
pub mod solidity;

pub use abi::{mask_int, mask_uint, AbiType, AbiValue};
pub use encode::{encode_arguments, encode_calldata};
pub use generator::{ValueGenerator, ValueGeneratorConfig};
pub use mutator::{MutationBias, ValueMutator};
pub use set::{IntLiteral, SeedLiterals, ValueSet};
pub use solidity::abi_type_from_param;
