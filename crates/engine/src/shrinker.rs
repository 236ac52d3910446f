//! Two-pass call-sequence shrinking (`spec.md` §4.6).
//!
//! Pass 1 removes calls, iterating from the end of the sequence toward the start; for each call
//! it first tries plain removal, and if that makes the failure stop reproducing, tries merging
//! the removed call's block/timestamp delay into the next surviving call instead of discarding it
//! outright. Pass 2 round-robins over the surviving calls' ABI arguments, replacing each with a
//! simpler [`ValueMutator`]-produced candidate when doing so still reproduces the failure.
//!
//! The bitset state machine in [`CallSequenceShrinker`] mirrors the `simplify`/`complicate`
//! automaton the teacher's invariant shrinker uses, reversed to walk the sequence tail-first per
//! `spec.md` §4.6, and built on a small inline bitset rather than pulling in a dependency just for
//! this.

use covfuzz_chain::{CallSequence, CallSequenceElement};
use covfuzz_values::{AbiValue, ValueMutator, ValueSet};
use rand::RngCore;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct IncludedCalls(Vec<bool>);

impl IncludedCalls {
    fn saturated(len: usize) -> Self {
        Self(vec![true; len])
    }

    fn test(&self, index: usize) -> bool {
        self.0[index]
    }

    fn clear(&mut self, index: usize) {
        self.0[index] = false;
    }

    fn set(&mut self, index: usize) {
        self.0[index] = true;
    }
}

/// Bitset automaton selecting which calls of a fixed-length sequence survive, one removal at a
/// time, walked from the last index to the first.
#[derive(Debug)]
struct CallSequenceShrinker {
    len: usize,
    included: IncludedCalls,
    cursor: usize,
    prev_removed: Option<usize>,
}

impl CallSequenceShrinker {
    fn new(len: usize) -> Self {
        Self { len, included: IncludedCalls::saturated(len), cursor: len, prev_removed: None }
    }

    /// Removes the next call (walking backward from the end). `false` once every index has been
    /// tried.
    fn simplify(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.included.clear(self.cursor);
        self.prev_removed = Some(self.cursor);
        true
    }

    /// Restores the last removed call (it could not be shrunk away) and moves on to the next one.
    fn complicate(&mut self) -> bool {
        match self.prev_removed.take() {
            Some(idx) => {
                self.included.set(idx);
                self.simplify()
            }
            None => false,
        }
    }
}

fn build_candidate(
    sequence: &CallSequence,
    included: &IncludedCalls,
    delay_overrides: &HashMap<usize, (u64, u64)>,
) -> CallSequence {
    let mut out = CallSequence::new();
    for (i, element) in sequence.elements.iter().enumerate() {
        if !included.test(i) {
            continue;
        }
        let mut element = element.clone();
        if let Some(&(block_number_delay, block_timestamp_delay)) = delay_overrides.get(&i) {
            element.block_number_delay = block_number_delay;
            element.block_timestamp_delay = block_timestamp_delay;
        }
        element.chain_reference = None;
        out.push(element);
    }
    out
}

/// Pass 1: removes calls from `sequence`, keeping only those whose removal (plain, or with its
/// delay merged into the next surviving call) stops the failure from reproducing. `verify` must
/// deterministically replay a candidate sequence and report whether the original failure still
/// reproduces. Spends at most `shrink_limit` verifier calls.
pub fn shrink_call_removal<F>(sequence: &CallSequence, shrink_limit: u64, mut verify: F) -> CallSequence
where
    F: FnMut(&CallSequence) -> bool,
{
    let len = sequence.len();
    if len == 0 {
        return sequence.clone();
    }

    let mut shrinker = CallSequenceShrinker::new(len);
    let mut delay_overrides: HashMap<usize, (u64, u64)> = HashMap::new();
    let mut spent = 0u64;

    loop {
        if spent >= shrink_limit {
            break;
        }
        spent += 1;
        let candidate = build_candidate(sequence, &shrinker.included, &delay_overrides);
        if verify(&candidate) {
            // Current state still reproduces the failure: try removing the next call.
            if !shrinker.simplify() {
                break;
            }
            continue;
        }

        // The most recent removal broke reproduction. Before giving up on it, try merging its
        // delay into the next surviving call instead of discarding it outright.
        let removed_index = shrinker.prev_removed.expect("a failed verify only follows a removal");
        let mut merged_ok = false;
        if spent < shrink_limit {
            if let Some(successor) = ((removed_index + 1)..len).find(|&j| shrinker.included.test(j)) {
                let removed_delays =
                    (sequence.elements[removed_index].block_number_delay, sequence.elements[removed_index].block_timestamp_delay);
                let current = delay_overrides.get(&successor).copied().unwrap_or((
                    sequence.elements[successor].block_number_delay,
                    sequence.elements[successor].block_timestamp_delay,
                ));
                let merged = (current.0 + removed_delays.0, current.1 + removed_delays.1);
                let prior = delay_overrides.insert(successor, merged);

                spent += 1;
                let merged_candidate = build_candidate(sequence, &shrinker.included, &delay_overrides);
                if verify(&merged_candidate) {
                    merged_ok = true;
                } else {
                    match prior {
                        Some(v) => {
                            delay_overrides.insert(successor, v);
                        }
                        None => {
                            delay_overrides.remove(&successor);
                        }
                    }
                }
            }
        }

        if merged_ok {
            if !shrinker.simplify() {
                break;
            }
        } else if !shrinker.complicate() {
            break;
        }
    }

    build_candidate(sequence, &shrinker.included, &delay_overrides)
}

/// Collapses a `U256` to a `u128` magnitude for complexity comparisons: exact for values that fit,
/// saturating to `u128::MAX` for anything larger (we only ever compare two magnitudes, never rely
/// on the absolute number).
fn u256_magnitude(v: alloy_primitives::U256) -> u128 {
    let bytes = v.to_be_bytes::<32>();
    if bytes[..16].iter().any(|&b| b != 0) {
        u128::MAX
    } else {
        u128::from_be_bytes(bytes[16..].try_into().expect("16-byte slice"))
    }
}

/// A rough measure of an ABI value's "size", used by pass 2 to accept only candidates that are no
/// more complex than what they replace.
fn abi_value_complexity(value: &AbiValue) -> u128 {
    match value {
        AbiValue::Address(_) | AbiValue::Bool(_) => 0,
        AbiValue::Uint(v, _) => u256_magnitude(*v),
        AbiValue::Int(v, _) => {
            let raw = v.into_raw();
            let sign_bit = alloy_primitives::U256::from(1u8) << 255;
            if raw & sign_bit != alloy_primitives::U256::ZERO {
                u256_magnitude(raw.wrapping_neg())
            } else {
                u256_magnitude(raw)
            }
        }
        AbiValue::String(s) => s.len() as u128,
        AbiValue::Bytes(b) => b.len() as u128,
        AbiValue::FixedBytes(b, _) => b.iter().map(|&byte| byte as u128).sum(),
        AbiValue::Array(items) | AbiValue::FixedArray(items) | AbiValue::Tuple(items) => {
            items.iter().map(abi_value_complexity).sum()
        }
    }
}

/// Pass 2: round-robins over every surviving call's ABI arguments, replacing each with a
/// [`ValueMutator`]-produced candidate whenever doing so is no more complex and still reproduces
/// the failure. Spends at most `shrink_limit` verifier calls.
pub fn shrink_argument_values<R: RngCore, F>(
    sequence: &CallSequence,
    mutator: &mut ValueMutator<R>,
    values: &ValueSet,
    shrink_limit: u64,
    mut verify: F,
) -> CallSequence
where
    F: FnMut(&CallSequence) -> bool,
{
    let mut current = sequence.clone();
    if current.is_empty() {
        return current;
    }

    let mut spent = 0u64;
    loop {
        if spent >= shrink_limit {
            break;
        }
        let mut changed_this_round = false;

        'elements: for call_index in 0..current.elements.len() {
            let arg_count = current.elements[call_index].call.arguments.len();
            for arg_slot in 0..arg_count {
                if spent >= shrink_limit {
                    break 'elements;
                }

                let existing = current.elements[call_index].call.arguments[arg_slot].clone();
                let ty = existing.abi_type();
                let candidate_value = mutator.mutate_abi_value(&ty, &existing, values);
                if abi_value_complexity(&candidate_value) > abi_value_complexity(&existing) {
                    continue;
                }

                let mut candidate_sequence = current.clone();
                {
                    let element = &mut candidate_sequence.elements[call_index];
                    let selector: Option<[u8; 4]> = element.call.input.get(0..4).and_then(|s| s.try_into().ok());
                    element.call.arguments[arg_slot] = candidate_value;
                    if let Some(selector) = selector {
                        element.call.input = covfuzz_values::encode_calldata(selector, &element.call.arguments).into();
                    }
                }

                spent += 1;
                if verify(&candidate_sequence) {
                    current = candidate_sequence;
                    changed_this_round = true;
                }
            }
        }

        if !changed_this_round {
            break;
        }
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use covfuzz_chain::CallMessage;
    use covfuzz_values::{MutationBias, ValueGenerator, ValueGeneratorConfig};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn call(nonce: u64) -> CallMessage {
        CallMessage {
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            value: U256::ZERO,
            gas_limit: 21_000,
            gas_price: U256::from(1u8),
            nonce,
            input: Bytes::from(vec![nonce as u8]),
            arguments: Vec::new(),
        }
    }

    fn sequence_of(len: usize) -> CallSequence {
        let mut seq = CallSequence::new();
        for i in 0..len {
            seq.push(CallSequenceElement::new(Address::repeat_byte(2), call(i as u64), 0, 0));
        }
        seq
    }

    #[test]
    fn shrinks_to_a_single_required_call() {
        let seq = sequence_of(5);
        // Failure reproduces iff call index 2 (nonce == 2) is present.
        let shrunk = shrink_call_removal(&seq, 1_000, |candidate| {
            candidate.elements.iter().any(|e| e.call.nonce == 2)
        });
        assert_eq!(shrunk.len(), 1);
        assert_eq!(shrunk.elements[0].call.nonce, 2);
    }

    #[test]
    fn delay_merge_preserves_timing_dependent_failures() {
        let mut seq = CallSequence::new();
        seq.push(CallSequenceElement::new(Address::repeat_byte(2), call(0), 2, 0));
        seq.push(CallSequenceElement::new(Address::repeat_byte(2), call(1), 2, 0));
        // Neither call alone carries enough delay; only their combined delay clears the
        // threshold, so shrinking to one call requires merging the removed call's delay into
        // the survivor rather than just dropping it.
        let shrunk = shrink_call_removal(&seq, 1_000, |candidate| {
            let total: u64 = candidate.elements.iter().map(|e| e.block_number_delay).sum();
            total >= 3
        });
        let total: u64 = shrunk.elements.iter().map(|e| e.block_number_delay).sum();
        assert!(total >= 3);
        assert_eq!(shrunk.len(), 1, "the sequence should still shrink to one call");
    }

    #[test]
    fn empty_sequence_shrinks_to_itself() {
        let seq = CallSequence::new();
        let shrunk = shrink_call_removal(&seq, 100, |_| true);
        assert!(shrunk.is_empty());
    }

    #[test]
    fn argument_shrinking_keeps_failure_reproducing() {
        let mut seq = CallSequence::new();
        let mut c = call(0);
        c.arguments = vec![AbiValue::Uint(U256::from(9000u32), 256)];
        c.input = covfuzz_values::encode_calldata([0xde, 0xad, 0xbe, 0xef], &c.arguments).into();
        seq.push(CallSequenceElement::new(Address::repeat_byte(2), c, 0, 0));

        let gen = ValueGenerator::new(ChaCha8Rng::seed_from_u64(11), ValueGeneratorConfig::default());
        let mut mutator = ValueMutator::new(gen, MutationBias::default(), 3);
        let values = ValueSet::new();

        // Failure reproduces as long as the argument stays >= 100.
        let shrunk = shrink_argument_values(&seq, &mut mutator, &values, 200, |candidate| {
            match &candidate.elements[0].call.arguments[0] {
                AbiValue::Uint(v, _) => *v >= U256::from(100u32),
                _ => false,
            }
        });
        match &shrunk.elements[0].call.arguments[0] {
            AbiValue::Uint(v, _) => assert!(*v >= U256::from(100u32)),
            _ => panic!("expected uint"),
        }
    }
}
