//! Call-sequence generation: picks a corpus base sequence and a mutation strategy, then hands out
//! one [`CallSequenceElement`] at a time as the worker steps through a sequence index.

use alloy_json_abi::{Function, StateMutability};
use alloy_primitives::Address;
use covfuzz_chain::{CallMessage, CallSequence, CallSequenceElement, DeployedContract};
use covfuzz_corpus::Corpus;
use covfuzz_values::{encode_calldata, AbiValue, ValueMutator, ValueSet};
use rand::{Rng, RngCore};

/// How a freshly-initialized sequence relates to its corpus base, per `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationStrategy {
    /// Replay the base up to a random point, then synthesize fresh calls for the rest.
    Splice,
    /// Replay a random-length head of the base verbatim, synthesize the tail.
    HeadReplayRandomTail,
    /// Replay the base's structure, but mutate each call's ABI arguments.
    ArgMutate,
    /// Weave in elements from a second, independently-sampled corpus entry.
    InterleaveFromAnotherEntry,
    /// Replay the base exactly, unchanged.
    UnmodifiedReplay,
}

const STRATEGIES: [MutationStrategy; 5] = [
    MutationStrategy::Splice,
    MutationStrategy::HeadReplayRandomTail,
    MutationStrategy::ArgMutate,
    MutationStrategy::InterleaveFromAnotherEntry,
    MutationStrategy::UnmodifiedReplay,
];

/// Produces call sequences for one worker: samples a base from the [`Corpus`], picks a mutation
/// strategy, and synthesizes fresh calls past the base's end (or when there is no base at all).
pub struct CallSequenceGenerator<R> {
    mutator: ValueMutator<R>,
    values: ValueSet,
    senders: Vec<Address>,
    deployed_contracts: Vec<DeployedContract>,
    transaction_gas_limit: u64,
    max_block_number_delay: u64,
    max_block_timestamp_delay: u64,

    base_sequence: Option<CallSequence>,
    secondary_sequence: Option<CallSequence>,
    strategy: MutationStrategy,
    splice_point: usize,
}

impl<R: RngCore> CallSequenceGenerator<R> {
    pub fn new(
        mutator: ValueMutator<R>,
        values: ValueSet,
        senders: Vec<Address>,
        deployed_contracts: Vec<DeployedContract>,
        transaction_gas_limit: u64,
        max_block_number_delay: u64,
        max_block_timestamp_delay: u64,
    ) -> Self {
        Self {
            mutator,
            values,
            senders,
            deployed_contracts,
            transaction_gas_limit,
            max_block_number_delay,
            max_block_timestamp_delay,
            base_sequence: None,
            secondary_sequence: None,
            strategy: MutationStrategy::UnmodifiedReplay,
            splice_point: 0,
        }
    }

    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut ValueSet {
        &mut self.values
    }

    /// Exposes the generator's `ValueMutator` for pass 2 of shrinking, which needs to produce
    /// simpler candidate ABI values the same way fresh-call generation does.
    pub fn mutator_mut(&mut self) -> &mut ValueMutator<R> {
        &mut self.mutator
    }

    fn rng(&mut self) -> &mut R {
        self.mutator.generator_mut().rng_mut()
    }

    /// Samples a base sequence from `corpus` and picks a mutation strategy for the next sequence.
    /// Returns `false` iff the chosen strategy is an unmodified replay of an existing entry (the
    /// worker may choose to skip testing something it has already recorded, per `spec.md` §4.4).
    pub fn initialize_next_sequence(&mut self, corpus: &Corpus) -> bool {
        let Some(entry) = corpus.sample_weighted(self.rng()) else {
            self.base_sequence = None;
            self.secondary_sequence = None;
            self.strategy = MutationStrategy::Splice;
            return true;
        };

        let strategy = STRATEGIES[self.rng().gen_range(0..STRATEGIES.len())];
        self.splice_point = match strategy {
            MutationStrategy::HeadReplayRandomTail if !entry.sequence.is_empty() => {
                self.rng().gen_range(0..=entry.sequence.len())
            }
            MutationStrategy::Splice if !entry.sequence.is_empty() => {
                self.rng().gen_range(0..=entry.sequence.len())
            }
            _ => 0,
        };
        self.secondary_sequence = if strategy == MutationStrategy::InterleaveFromAnotherEntry {
            corpus.sample_weighted(self.rng()).map(|e| e.sequence)
        } else {
            None
        };
        self.base_sequence = Some(entry.sequence);
        self.strategy = strategy;
        strategy != MutationStrategy::UnmodifiedReplay
    }

    /// Produces the element at `index`, either replaying/mutating the base sequence or
    /// synthesizing a fresh call, per the strategy chosen in [`Self::initialize_next_sequence`].
    pub fn pop_sequence_element(&mut self, index: usize) -> CallSequenceElement {
        match self.strategy {
            MutationStrategy::UnmodifiedReplay => self.replay_base_element(index).unwrap_or_else(|| self.fresh_element()),
            MutationStrategy::Splice => {
                if index < self.splice_point {
                    self.replay_base_element(index).unwrap_or_else(|| self.fresh_element())
                } else {
                    self.fresh_element()
                }
            }
            MutationStrategy::HeadReplayRandomTail => {
                if index < self.splice_point {
                    self.replay_base_element(index).unwrap_or_else(|| self.fresh_element())
                } else {
                    self.fresh_element()
                }
            }
            MutationStrategy::ArgMutate => {
                self.mutated_base_element(index).unwrap_or_else(|| self.fresh_element())
            }
            MutationStrategy::InterleaveFromAnotherEntry => {
                let from_secondary = index % 2 == 1;
                let element = if from_secondary {
                    self.secondary_sequence.as_ref().and_then(|s| s.elements.get(index).cloned())
                } else {
                    self.base_sequence.as_ref().and_then(|s| s.elements.get(index).cloned())
                };
                element
                    .map(Self::reset_chain_reference)
                    .unwrap_or_else(|| self.fresh_element())
            }
        }
    }

    fn replay_base_element(&self, index: usize) -> Option<CallSequenceElement> {
        self.base_sequence.as_ref().and_then(|s| s.elements.get(index)).cloned().map(Self::reset_chain_reference)
    }

    fn reset_chain_reference(mut element: CallSequenceElement) -> CallSequenceElement {
        element.chain_reference = None;
        element
    }

    fn mutated_base_element(&mut self, index: usize) -> Option<CallSequenceElement> {
        let base = self.base_sequence.as_ref()?.elements.get(index)?.clone();
        let selector: [u8; 4] = base.call.input.get(0..4)?.try_into().ok()?;
        let mutated_args: Vec<AbiValue> =
            base.call.arguments.iter().map(|arg| self.mutator.mutate_abi_value(&arg.abi_type(), arg, &self.values)).collect();
        let input = encode_calldata(selector, &mutated_args).into();
        Some(CallSequenceElement::new(
            base.contract_reference,
            CallMessage { input, arguments: mutated_args, ..base.call },
            base.block_number_delay,
            base.block_timestamp_delay,
        ))
    }

    fn fresh_element(&mut self) -> CallSequenceElement {
        let candidates: Vec<(Address, Function)> = self
            .deployed_contracts
            .iter()
            .flat_map(|dc| dc.definition.state_changing_methods().map(move |f| (dc.address, f.clone())))
            .collect();

        let block_number_delay = self.rng().gen_range(0..=self.max_block_number_delay);
        let block_timestamp_delay = self.rng().gen_range(0..=self.max_block_timestamp_delay);

        let Some((target, function)) = (if candidates.is_empty() {
            None
        } else {
            let idx = self.rng().gen_range(0..candidates.len());
            Some(candidates[idx].clone())
        }) else {
            // No state-changing method available to call; fall back to an empty no-op call.
            let sender = self.pick_sender();
            let call = CallMessage {
                sender,
                target: Address::ZERO,
                value: alloy_primitives::U256::ZERO,
                gas_limit: self.transaction_gas_limit,
                gas_price: alloy_primitives::U256::from(1u8),
                nonce: 0,
                input: alloy_primitives::Bytes::new(),
                arguments: Vec::new(),
            };
            return CallSequenceElement::new(Address::ZERO, call, block_number_delay, block_timestamp_delay);
        };

        let sender = self.pick_sender();
        let arguments: Vec<AbiValue> = function
            .inputs
            .iter()
            .map(|param| {
                let ty = covfuzz_values::abi_type_from_param(param);
                self.mutator.generator_mut().generate_abi_value(&ty, &self.values)
            })
            .collect();
        let selector: [u8; 4] = function.selector().0;
        let input = encode_calldata(selector, &arguments).into();
        let value = if matches!(function.state_mutability, StateMutability::Payable) {
            alloy_primitives::U256::from(self.rng().gen_range(0..=u64::MAX))
        } else {
            alloy_primitives::U256::ZERO
        };

        let call = CallMessage {
            sender,
            target,
            value,
            gas_limit: self.transaction_gas_limit,
            gas_price: alloy_primitives::U256::from(1u8),
            nonce: 0,
            input,
            arguments,
        };
        CallSequenceElement::new(target, call, block_number_delay, block_timestamp_delay)
    }

    fn pick_sender(&mut self) -> Address {
        if self.senders.is_empty() {
            return Address::ZERO;
        }
        let idx = self.rng().gen_range(0..self.senders.len());
        self.senders[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covfuzz_test_utils::sample_contract_definition;
    use covfuzz_values::{MutationBias, ValueGenerator, ValueGeneratorConfig};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    fn generator() -> CallSequenceGenerator<ChaCha8Rng> {
        let definition = Arc::new(sample_contract_definition("Target"));
        let contract = DeployedContract { definition, address: Address::repeat_byte(7) };
        let gen = ValueGenerator::new(ChaCha8Rng::seed_from_u64(3), ValueGeneratorConfig::default());
        let mutator = ValueMutator::new(gen, MutationBias::default(), 4);
        CallSequenceGenerator::new(
            mutator,
            ValueSet::new(),
            vec![Address::repeat_byte(1)],
            vec![contract],
            1_000_000,
            60,
            604_800,
        )
    }

    #[test]
    fn empty_corpus_always_synthesizes_fresh_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();
        let mut gen = generator();
        assert!(gen.initialize_next_sequence(&corpus));
        let element = gen.pop_sequence_element(0);
        assert!(!element.call.input.is_empty() || element.call.target == Address::ZERO);
    }

    #[test]
    fn fresh_elements_respect_delay_bounds() {
        let mut gen = generator();
        gen.strategy = MutationStrategy::Splice;
        for _ in 0..50 {
            let element = gen.fresh_element();
            assert!(element.block_number_delay <= 60);
            assert!(element.block_timestamp_delay <= 604_800);
        }
    }
}
