//! Mutation of existing [`AbiValue`]s, biased toward either perturbing or regenerating.

use crate::{
    abi::{int_bounds, mask_int, mask_uint, uint_bounds, AbiType, AbiValue},
    generator::ValueGenerator,
    set::{IntLiteral, ValueSet},
};
use alloy_primitives::{I256, U256};
use rand::{Rng, RngCore};

/// Bias toward regenerating a fresh value instead of perturbing the existing one, per value
/// category. Each is a probability in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct MutationBias {
    pub random_integer: f64,
    pub random_string: f64,
    pub random_bytes: f64,
}

impl Default for MutationBias {
    fn default() -> Self {
        Self { random_integer: 0.1, random_string: 0.1, random_bytes: 0.1 }
    }
}

/// Mutates existing ABI values, or regenerates them entirely per [`MutationBias`].
pub struct ValueMutator<R> {
    generator: ValueGenerator<R>,
    bias: MutationBias,
    max_mutation_rounds: u32,
}

#[derive(Debug, Clone, Copy)]
enum IntOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

const INT_OPS: [IntOp; 5] = [IntOp::Add, IntOp::Sub, IntOp::Mul, IntOp::Div, IntOp::Mod];

impl<R: RngCore> ValueMutator<R> {
    pub fn new(generator: ValueGenerator<R>, bias: MutationBias, max_mutation_rounds: u32) -> Self {
        Self { generator, bias, max_mutation_rounds }
    }

    pub fn generator_mut(&mut self) -> &mut ValueGenerator<R> {
        &mut self.generator
    }

    fn rng(&mut self) -> &mut R {
        self.generator.rng_mut()
    }

    /// Mutates `existing` (assumed to match `ty`), or regenerates a fresh value for `ty`, always
    /// returning a value constrained to `ty`'s bit width / shape.
    pub fn mutate_abi_value(&mut self, ty: &AbiType, existing: &AbiValue, values: &ValueSet) -> AbiValue {
        match ty {
            AbiType::Uint(bits) => {
                if self.rng().gen_bool(self.bias.random_integer) {
                    return self.generator.generate_abi_value(ty, values);
                }
                let start = match existing {
                    AbiValue::Uint(v, _) => *v,
                    _ => U256::ZERO,
                };
                AbiValue::Uint(self.mutate_unsigned(start, *bits, values), *bits)
            }
            AbiType::Int(bits) => {
                if self.rng().gen_bool(self.bias.random_integer) {
                    return self.generator.generate_abi_value(ty, values);
                }
                let start = match existing {
                    AbiValue::Int(v, _) => *v,
                    _ => I256::ZERO,
                };
                AbiValue::Int(self.mutate_signed(start, *bits, values), *bits)
            }
            AbiType::String => {
                if self.rng().gen_bool(self.bias.random_string) {
                    return self.generator.generate_abi_value(ty, values);
                }
                let start = match existing {
                    AbiValue::String(s) => s.clone(),
                    _ => String::new(),
                };
                AbiValue::String(self.mutate_string(start))
            }
            AbiType::Bytes => {
                if self.rng().gen_bool(self.bias.random_bytes) {
                    return self.generator.generate_abi_value(ty, values);
                }
                let start = match existing {
                    AbiValue::Bytes(b) => b.clone(),
                    _ => Vec::new(),
                };
                AbiValue::Bytes(self.mutate_bytes(start))
            }
            AbiType::FixedBytes(n) => {
                if self.rng().gen_bool(self.bias.random_bytes) {
                    return self.generator.generate_abi_value(ty, values);
                }
                let mut start = match existing {
                    AbiValue::FixedBytes(b, _) => b.clone(),
                    _ => vec![0u8; *n],
                };
                if !start.is_empty() {
                    let idx = self.rng().gen_range(0..start.len());
                    start[idx] = self.rng().gen();
                }
                AbiValue::FixedBytes(start, *n)
            }
            AbiType::Address | AbiType::Bool => self.generator.generate_abi_value(ty, values),
            AbiType::Array(inner) => {
                let mut items = match existing {
                    AbiValue::Array(items) => items.clone(),
                    _ => Vec::new(),
                };
                if items.is_empty() {
                    return self.generator.generate_abi_value(ty, values);
                }
                let idx = self.rng().gen_range(0..items.len());
                items[idx] = self.mutate_abi_value(inner, &items[idx].clone(), values);
                AbiValue::Array(items)
            }
            AbiType::FixedArray(inner, len) => {
                let mut items = match existing {
                    AbiValue::FixedArray(items) if items.len() == *len => items.clone(),
                    _ => (0..*len).map(|_| self.generator.generate_abi_value(inner, values)).collect(),
                };
                let idx = self.rng().gen_range(0..*len);
                items[idx] = self.mutate_abi_value(inner, &items[idx].clone(), values);
                AbiValue::FixedArray(items)
            }
            AbiType::Tuple(fields) => {
                let mut items = match existing {
                    AbiValue::Tuple(items) if items.len() == fields.len() => items.clone(),
                    _ => fields.iter().map(|f| self.generator.generate_abi_value(f, values)).collect(),
                };
                if fields.is_empty() {
                    return AbiValue::Tuple(items);
                }
                let idx = self.rng().gen_range(0..fields.len());
                items[idx] = self.mutate_abi_value(&fields[idx], &items[idx].clone(), values);
                AbiValue::Tuple(items)
            }
        }
    }

    fn unsigned_seed_pool(&self, start: U256, values: &ValueSet) -> Vec<U256> {
        let (_, max) = uint_bounds(256);
        let mut pool = vec![start, U256::ZERO, U256::from(1u8), U256::from(2u8), max];
        for lit in values.integers() {
            if let IntLiteral::Unsigned(v) = lit {
                pool.push(*v);
            }
        }
        pool
    }

    fn signed_seed_pool(&self, start: I256, values: &ValueSet) -> Vec<I256> {
        let (min, max) = int_bounds(256);
        let mut pool =
            vec![start, I256::ZERO, I256::try_from(1i32).unwrap(), I256::try_from(-1i32).unwrap(), I256::try_from(2i32).unwrap(), min, max];
        for lit in values.integers() {
            if let IntLiteral::Signed(v) = lit {
                pool.push(*v);
            }
        }
        pool
    }

    fn mutate_unsigned(&mut self, start: U256, bits: u16, values: &ValueSet) -> U256 {
        let pool = self.unsigned_seed_pool(start, values);
        let mut current = start;
        let rounds = self.rng().gen_range(0..=self.max_mutation_rounds);
        for _ in 0..rounds {
            let op = INT_OPS[self.rng().gen_range(0..INT_OPS.len())];
            let idx = self.rng().gen_range(0..pool.len());
            let operand = pool[idx];
            current = match op {
                IntOp::Add => current.wrapping_add(operand),
                IntOp::Sub => current.wrapping_sub(operand),
                IntOp::Mul => current.wrapping_mul(operand),
                IntOp::Div => {
                    if operand.is_zero() {
                        current
                    } else {
                        current / operand
                    }
                }
                IntOp::Mod => {
                    if operand.is_zero() {
                        current
                    } else {
                        current % operand
                    }
                }
            };
        }
        mask_uint(current, bits)
    }

    fn mutate_signed(&mut self, start: I256, bits: u16, values: &ValueSet) -> I256 {
        let pool = self.signed_seed_pool(start, values);
        let mut current = start;
        let rounds = self.rng().gen_range(0..=self.max_mutation_rounds);
        for _ in 0..rounds {
            let op = INT_OPS[self.rng().gen_range(0..INT_OPS.len())];
            let idx = self.rng().gen_range(0..pool.len());
            let operand = pool[idx];
            current = match op {
                IntOp::Add => current.wrapping_add(operand),
                IntOp::Sub => current.wrapping_sub(operand),
                IntOp::Mul => current.wrapping_mul(operand),
                IntOp::Div => {
                    if operand.is_zero() {
                        current
                    } else {
                        current.wrapping_div(operand)
                    }
                }
                IntOp::Mod => {
                    if operand.is_zero() {
                        current
                    } else {
                        current.wrapping_rem(operand)
                    }
                }
            };
        }
        mask_int(current, bits)
    }

    fn mutate_string(&mut self, mut s: String) -> String {
        if s.is_empty() {
            return self.generator.generate_string();
        }
        let mut chars: Vec<char> = s.drain(..).collect();
        match self.rng().gen_range(0..5) {
            0 => {
                // insert
                let idx = self.rng().gen_range(0..=chars.len());
                chars.insert(idx, self.rng().gen_range(0x20u8..=0x7e) as char);
            }
            1 => {
                // replace
                let idx = self.rng().gen_range(0..chars.len());
                chars[idx] = self.rng().gen_range(0x20u8..=0x7e) as char;
            }
            2 => {
                // delete
                let idx = self.rng().gen_range(0..chars.len());
                chars.remove(idx);
            }
            3 => {
                // duplicate a random chunk
                let start = self.rng().gen_range(0..chars.len());
                let end = self.rng().gen_range(start..chars.len().max(start + 1)).min(chars.len());
                let chunk: Vec<char> = chars[start..end].to_vec();
                chars.extend(chunk);
            }
            _ => {
                // random chunk replace
                let start = self.rng().gen_range(0..chars.len());
                let len = self.rng().gen_range(0..(chars.len() - start).max(1));
                for c in chars.iter_mut().skip(start).take(len) {
                    *c = self.rng().gen_range(0x20u8..=0x7e) as char;
                }
            }
        }
        chars.into_iter().collect()
    }

    fn mutate_bytes(&mut self, mut b: Vec<u8>) -> Vec<u8> {
        if b.is_empty() {
            return self.generator.generate_bytes();
        }
        match self.rng().gen_range(0..5) {
            0 => {
                let idx = self.rng().gen_range(0..=b.len());
                b.insert(idx, self.rng().gen());
            }
            1 => {
                let idx = self.rng().gen_range(0..b.len());
                b[idx] = self.rng().gen();
            }
            2 => {
                let idx = self.rng().gen_range(0..b.len());
                b.remove(idx);
            }
            3 => {
                let start = self.rng().gen_range(0..b.len());
                let end = self.rng().gen_range(start..b.len().max(start + 1)).min(b.len());
                let chunk = b[start..end].to_vec();
                b.extend(chunk);
            }
            _ => {
                let start = self.rng().gen_range(0..b.len());
                let len = self.rng().gen_range(0..(b.len() - start).max(1));
                for byte in b.iter_mut().skip(start).take(len) {
                    *byte = self.rng().gen();
                }
            }
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ValueGeneratorConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn mutator() -> ValueMutator<ChaCha8Rng> {
        let gen = ValueGenerator::new(ChaCha8Rng::seed_from_u64(7), ValueGeneratorConfig::default());
        ValueMutator::new(gen, MutationBias::default(), 4)
    }

    #[test]
    fn mutated_uint_stays_in_bounds() {
        let mut m = mutator();
        let values = ValueSet::new();
        for _ in 0..200 {
            let existing = AbiValue::Uint(U256::from(10u32), 8);
            if let AbiValue::Uint(v, _) = m.mutate_abi_value(&AbiType::Uint(8), &existing, &values) {
                assert!(v <= U256::from(255u32));
            }
        }
    }

    #[test]
    fn mutated_int_stays_in_bounds() {
        let mut m = mutator();
        let values = ValueSet::new();
        let (min, max) = int_bounds(16);
        for _ in 0..200 {
            let existing = AbiValue::Int(I256::ZERO, 16);
            if let AbiValue::Int(v, _) = m.mutate_abi_value(&AbiType::Int(16), &existing, &values) {
                assert!(v >= min && v <= max);
            }
        }
    }

    #[test]
    fn division_by_zero_seed_leaves_value_reachable() {
        // Zero is always in the seed pool; ensure we never panic on div/mod by zero.
        let mut m = mutator();
        let values = ValueSet::new();
        let existing = AbiValue::Uint(U256::from(5u32), 8);
        for _ in 0..500 {
            m.mutate_abi_value(&AbiType::Uint(8), &existing, &values);
        }
    }
}
