//! Type-directed random generation of [`AbiValue`]s.

use crate::{
    abi::{int_bounds, uint_bounds, AbiType, AbiValue},
    set::ValueSet,
};
use alloy_primitives::{Address, I256, U256};
use rand::{Rng, RngCore};

/// Tunables for [`ValueGenerator`], analogous to the dictionary-weight knobs the teacher's fuzz
/// strategies expose (`dictionary_weight` in `samtvlabs-foundry`'s `FuzzConfig`).
#[derive(Debug, Clone)]
pub struct ValueGeneratorConfig {
    /// Probability in `[0.0, 1.0]` of drawing an address from the [`ValueSet`] rather than
    /// uniformly at random.
    pub address_from_set_bias: f64,
    /// Upper bound on generated `string`/`bytes` length.
    pub max_dynamic_len: usize,
    /// Upper bound on generated dynamic array length.
    pub max_array_len: usize,
}

impl Default for ValueGeneratorConfig {
    fn default() -> Self {
        Self { address_from_set_bias: 0.65, max_dynamic_len: 256, max_array_len: 10 }
    }
}

/// Produces typed values matching ABI input types.
///
/// One `ValueGenerator` lives per worker, alongside its own RNG and a clone of the base
/// [`ValueSet`]; no cross-worker sharing or locking is involved (see `spec.md` §5).
pub struct ValueGenerator<R> {
    rng: R,
    config: ValueGeneratorConfig,
}

impl<R: RngCore> ValueGenerator<R> {
    pub fn new(rng: R, config: ValueGeneratorConfig) -> Self {
        Self { rng, config }
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    pub fn generate_address(&mut self, values: &ValueSet) -> Address {
        if !values.is_address_set_empty() && self.rng.gen_bool(self.config.address_from_set_bias) {
            let addresses: Vec<&Address> = values.addresses().collect();
            let idx = self.rng.gen_range(0..addresses.len());
            *addresses[idx]
        } else {
            let mut bytes = [0u8; 20];
            self.rng.fill_bytes(&mut bytes);
            Address::from(bytes)
        }
    }

    pub fn generate_bool(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    pub fn generate_bytes(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(0..=self.config.max_dynamic_len);
        let mut bytes = vec![0u8; len];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    pub fn generate_fixed_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; n];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    pub fn generate_string(&mut self) -> String {
        let len = self.rng.gen_range(0..=self.config.max_dynamic_len);
        // ASCII-only keeps generated strings valid UTF-8 without rejection sampling.
        (0..len).map(|_| self.rng.gen_range(0x20u8..=0x7e) as char).collect()
    }

    pub fn generate_integer(&mut self, signed: bool, bits: u16) -> AbiValue {
        if signed {
            let (min, max) = int_bounds(bits);
            AbiValue::Int(self.gen_i256_in_range(min, max), bits)
        } else {
            let (min, max) = uint_bounds(bits);
            AbiValue::Uint(self.gen_u256_in_range(min, max), bits)
        }
    }

    pub fn generate_array_length(&mut self) -> usize {
        self.rng.gen_range(0..=self.config.max_array_len)
    }

    /// Recursively generates a value matching `ty`, drawing addresses from `values` with bias.
    pub fn generate_abi_value(&mut self, ty: &AbiType, values: &ValueSet) -> AbiValue {
        match ty {
            AbiType::Address => AbiValue::Address(self.generate_address(values)),
            AbiType::Bool => AbiValue::Bool(self.generate_bool()),
            AbiType::Uint(bits) => self.generate_integer(false, *bits),
            AbiType::Int(bits) => self.generate_integer(true, *bits),
            AbiType::String => AbiValue::String(self.generate_string()),
            AbiType::Bytes => AbiValue::Bytes(self.generate_bytes()),
            AbiType::FixedBytes(n) => AbiValue::FixedBytes(self.generate_fixed_bytes(*n), *n),
            AbiType::Array(inner) => {
                let len = self.generate_array_length();
                AbiValue::Array((0..len).map(|_| self.generate_abi_value(inner, values)).collect())
            }
            AbiType::FixedArray(inner, len) => AbiValue::FixedArray(
                (0..*len).map(|_| self.generate_abi_value(inner, values)).collect(),
            ),
            AbiType::Tuple(fields) => {
                AbiValue::Tuple(fields.iter().map(|f| self.generate_abi_value(f, values)).collect())
            }
        }
    }

    fn gen_u256_in_range(&mut self, min: U256, max: U256) -> U256 {
        if min == max {
            return min;
        }
        let span = max - min;
        // `span + 1` can overflow only when `span == U256::MAX`, i.e. the full uint256 range;
        // sample uniformly over the whole space in that case.
        if span == U256::MAX {
            let mut bytes = [0u8; 32];
            self.rng.fill_bytes(&mut bytes);
            return U256::from_be_bytes(bytes);
        }
        let width = span + U256::from(1u8);
        let mut bytes = [0u8; 32];
        self.rng.fill_bytes(&mut bytes);
        min + (U256::from_be_bytes(bytes) % width)
    }

    fn gen_i256_in_range(&mut self, min: I256, max: I256) -> I256 {
        // Shift into unsigned space by subtracting the minimum, sample, shift back.
        let span = max.into_raw().wrapping_sub(min.into_raw());
        let sampled = self.gen_u256_in_range(U256::ZERO, span);
        I256::from_raw(min.into_raw().wrapping_add(sampled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gen() -> ValueGenerator<ChaCha8Rng> {
        ValueGenerator::new(ChaCha8Rng::seed_from_u64(1), ValueGeneratorConfig::default())
    }

    #[test]
    fn generated_unsigned_integers_are_in_bounds() {
        let mut g = gen();
        let values = ValueSet::new();
        for _ in 0..200 {
            if let AbiValue::Uint(v, bits) = g.generate_abi_value(&AbiType::Uint(8), &values) {
                assert!(v <= U256::from(255u32));
                assert_eq!(bits, 8);
            } else {
                panic!("expected uint");
            }
        }
    }

    #[test]
    fn generated_signed_integers_are_in_bounds() {
        let mut g = gen();
        let values = ValueSet::new();
        let (min, max) = int_bounds(8);
        for _ in 0..200 {
            if let AbiValue::Int(v, _) = g.generate_abi_value(&AbiType::Int(8), &values) {
                assert!(v >= min && v <= max);
            } else {
                panic!("expected int");
            }
        }
    }

    #[test]
    fn address_generation_draws_from_set_eventually() {
        let mut g = gen();
        let mut values = ValueSet::new();
        let seeded = Address::repeat_byte(0xAB);
        values.add_address(seeded);
        let mut saw_seeded = false;
        for _ in 0..500 {
            if g.generate_address(&values) == seeded {
                saw_seeded = true;
                break;
            }
        }
        assert!(saw_seeded, "address generator never drew from the seeded ValueSet");
    }

    #[test]
    fn recursive_tuple_and_array_generation() {
        let mut g = gen();
        let values = ValueSet::new();
        let ty = AbiType::Tuple(vec![
            AbiType::Array(Box::new(AbiType::Uint(256))),
            AbiType::FixedArray(Box::new(AbiType::Bool), 3),
        ]);
        let v = g.generate_abi_value(&ty, &values);
        match v {
            AbiValue::Tuple(fields) => {
                assert_eq!(fields.len(), 2);
                assert!(matches!(fields[1], AbiValue::FixedArray(ref a) if a.len() == 3));
            }
            _ => panic!("expected tuple"),
        }
    }
}
