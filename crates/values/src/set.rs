//! A mutable set of literal values seeded from source ASTs and grown at runtime.

use alloy_primitives::{Address, I256, U256};
use std::collections::BTreeSet;

/// An integer literal of either signedness, kept exact (no bit-width normalization): `1u8` and
/// `1u256` are distinct entries only in the sense that callers compare the underlying big integer,
/// never the width it was declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntLiteral {
    Unsigned(U256),
    Signed(I256),
}

/// A growing collection of literal values observed in source or at runtime.
///
/// Seeded once from compiled-artifact ASTs at startup (see `seed_from_literals`), then grown as
/// workers observe new addresses (e.g. newly deployed contracts) during execution.
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    integers: BTreeSet<IntLiteral>,
    addresses: BTreeSet<Address>,
    strings: BTreeSet<String>,
    byte_sequences: BTreeSet<Vec<u8>>,
}

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unsigned(&mut self, value: U256) {
        self.integers.insert(IntLiteral::Unsigned(value));
    }

    pub fn add_signed(&mut self, value: I256) {
        self.integers.insert(IntLiteral::Signed(value));
    }

    pub fn add_address(&mut self, value: Address) {
        self.addresses.insert(value);
    }

    pub fn add_string(&mut self, value: String) {
        self.strings.insert(value);
    }

    pub fn add_bytes(&mut self, value: Vec<u8>) {
        self.byte_sequences.insert(value);
    }

    pub fn contains_unsigned(&self, value: &U256) -> bool {
        self.integers.contains(&IntLiteral::Unsigned(*value))
    }

    pub fn contains_signed(&self, value: &I256) -> bool {
        self.integers.contains(&IntLiteral::Signed(*value))
    }

    pub fn contains_address(&self, value: &Address) -> bool {
        self.addresses.contains(value)
    }

    pub fn contains_string(&self, value: &str) -> bool {
        self.strings.contains(value)
    }

    pub fn contains_bytes(&self, value: &[u8]) -> bool {
        self.byte_sequences.contains(value)
    }

    pub fn integers(&self) -> impl Iterator<Item = &IntLiteral> {
        self.integers.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub fn byte_sequences(&self) -> impl Iterator<Item = &[u8]> {
        self.byte_sequences.iter().map(Vec::as_slice)
    }

    pub fn is_address_set_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Seeds the set from literals observed in the compiled artifacts' ASTs.
    ///
    /// Contract compilation is out of scope for this crate; callers extract `SeedLiterals` from
    /// whatever AST representation their `ContractDefinition` source provides and hand it here.
    /// Ether/time denominations (e.g. `1 ether`, `1 days`) are expected to already be expanded to
    /// base units by the caller, matching how the compiler front-end resolves them before this
    /// crate ever sees a literal.
    pub fn seed_from_literals(&mut self, literals: &SeedLiterals) {
        for &v in &literals.unsigned_integers {
            self.add_unsigned(v);
        }
        for &v in &literals.signed_integers {
            self.add_signed(v);
        }
        for &v in &literals.addresses {
            self.add_address(v);
        }
        for v in &literals.strings {
            self.add_string(v.clone());
        }
        for v in &literals.byte_sequences {
            self.add_bytes(v.clone());
        }
    }
}

/// Literal values extracted from source ASTs, handed to [`ValueSet::seed_from_literals`].
#[derive(Debug, Clone, Default)]
pub struct SeedLiterals {
    pub unsigned_integers: Vec<U256>,
    pub signed_integers: Vec<I256>,
    pub addresses: Vec<Address>,
    pub strings: Vec<String>,
    pub byte_sequences: Vec<Vec<u8>>,
}
