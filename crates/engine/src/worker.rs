//! `FuzzerWorker`: one worker's sequence-generation/test/shrink loop (`spec.md` §4.5).
//!
//! Each worker owns an independent chain clone and RNG; no cross-worker locking except the
//! `Corpus`'s own reader-writer lock. A worker runs until it hits `WorkerResetLimit` sequences
//! (normal exit, the `Fuzzer` respawns it on a fresh clone) or observes cancellation.

use crate::error::EngineError;
use crate::provider::{ShrinkCallSequenceRequest, TestCaseProvider};
use crate::sequence_generator::CallSequenceGenerator;
use crate::shrinker::{shrink_argument_values, shrink_call_removal};
use covfuzz_chain::{CallSequence, Event, EventBus, MessageResult, TestChain};
use covfuzz_config::Verbosity;
use covfuzz_corpus::Corpus;
use covfuzz_trace::ExecutionTrace;
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::Arc;

/// Why [`FuzzerWorker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Cancellation was observed; the `Fuzzer` should not respawn this worker.
    Cancelled,
    /// `WorkerResetLimit` sequences were tested; the `Fuzzer` clones a fresh chain and respawns.
    ResetLimitReached,
}

pub struct FuzzerWorker<C: TestChain, R: RngCore> {
    worker_index: usize,
    chain: C,
    generator: CallSequenceGenerator<R>,
    corpus: Arc<Corpus>,
    providers: Arc<Mutex<Vec<Box<dyn TestCaseProvider<C> + Send>>>>,
    call_sequence_length: usize,
    shrink_limit: u64,
    verbosity: Verbosity,
    sequences_tested: u64,
    testing_base_block_number: u64,
}

impl<C: TestChain + 'static, R: RngCore> FuzzerWorker<C, R> {
    /// `sequences_tested` carries over the worker slot's cumulative count across respawns, since
    /// the corpus weight formula (`spec.md` §4.5: `1 + worker.sequencesTested`) is meant to keep
    /// climbing as a worker slot matures, not reset every time its chain is recycled.
    pub fn new(
        worker_index: usize,
        mut chain: C,
        generator: CallSequenceGenerator<R>,
        corpus: Arc<Corpus>,
        providers: Vec<Box<dyn TestCaseProvider<C> + Send>>,
        call_sequence_length: usize,
        shrink_limit: u64,
        verbosity: Verbosity,
        sequences_tested: u64,
    ) -> Self {
        let providers = Arc::new(Mutex::new(providers));

        for contract in chain.deployed_contracts().to_vec() {
            for provider in providers.lock().iter_mut() {
                provider.on_contract_added(&contract);
            }
        }
        subscribe_providers(&mut chain, &providers);

        for provider in providers.lock().iter_mut() {
            provider.on_worker_created(worker_index);
        }

        let testing_base_block_number = chain.head();
        Self {
            worker_index,
            chain,
            generator,
            corpus,
            providers,
            call_sequence_length,
            shrink_limit,
            verbosity,
            sequences_tested,
            testing_base_block_number,
        }
    }

    /// Replaces this worker's chain with a fresh clone of `base`, once `WorkerResetLimit`
    /// sequences have been tested against the old one (`spec.md` §4.5, §5: workers are recycled
    /// to cap per-clone memory growth). The worker slot's provider set, corpus handle, and
    /// cumulative `sequences_tested` all survive the reset — only the chain and its block-number
    /// baseline are replaced. `base`'s deployments must already be reflected in this worker's
    /// providers (they were seeded from `base` itself when the worker was first constructed), so
    /// this does not re-run `on_contract_added`.
    pub fn reset_chain(&mut self, base: &C) {
        let mut chain = base.clone_chain();
        subscribe_providers(&mut chain, &self.providers);
        self.testing_base_block_number = chain.head();
        self.chain = chain;
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn sequences_tested(&self) -> u64 {
        self.sequences_tested
    }

    pub fn test_cases(&self) -> Vec<crate::provider::TestCase> {
        self.providers.lock().iter().flat_map(|p| p.test_cases()).collect()
    }

    /// Runs up to `worker_reset_limit` sequences, handling any shrink requests a provider raises
    /// along the way before testing the next fresh sequence; `cancelled` is polled once per
    /// sequence (`spec.md` §4.5).
    pub fn run(
        &mut self,
        worker_reset_limit: u64,
        mut cancelled: impl FnMut() -> bool,
        mut on_sequence_tested: impl FnMut(usize, u64),
    ) -> Result<WorkerExit, EngineError> {
        let mut pending_shrinks: Vec<ShrinkCallSequenceRequest<C>> = Vec::new();
        let mut sequences_run = 0u64;

        while sequences_run < worker_reset_limit {
            if !pending_shrinks.is_empty() {
                for request in pending_shrinks.drain(..) {
                    self.handle_shrink_request(request)?;
                }
                continue;
            }

            if cancelled() {
                return Ok(WorkerExit::Cancelled);
            }

            self.sequences_tested += 1;
            sequences_run += 1;
            pending_shrinks = self.test_next_call_sequence()?;
            on_sequence_tested(self.worker_index, self.sequences_tested);
        }

        Ok(WorkerExit::ResetLimitReached)
    }

    /// One full pass generating/submitting calls up to `call_sequence_length`, feeding every call
    /// to every provider's `post_call_test` and merging coverage into the corpus after each call;
    /// stops early the first time a provider raises a shrink request (`spec.md` §4.5 steps 1-4).
    fn test_next_call_sequence(&mut self) -> Result<Vec<ShrinkCallSequenceRequest<C>>, EngineError> {
        let is_new_sequence = self.generator.initialize_next_sequence(&self.corpus);
        let mut shrink_requests = Vec::new();
        let mut sequence_so_far = CallSequence::new();

        for index in 0..self.call_sequence_length {
            let mut element = self.generator.pop_sequence_element(index);
            // Per spec.md §9: clamp the number delay so it never exceeds the timestamp delay.
            element.block_number_delay = element.block_number_delay.min(element.block_timestamp_delay);

            self.chain.begin_block(element.block_number_delay, element.block_timestamp_delay).map_err(EngineError::Chain)?;
            let result = self.chain.submit(element.call.clone()).map_err(EngineError::Chain)?;
            let reference = self.chain.commit_block().map_err(EngineError::Chain)?;
            element.chain_reference = Some(reference);

            let target = element.contract_reference;
            sequence_so_far.push(element);

            {
                let mut providers = self.providers.lock();
                for provider in providers.iter_mut() {
                    let requests = provider.post_call_test(&mut self.chain, &sequence_so_far, target, &result)?;
                    shrink_requests.extend(requests);
                }
            }

            let local_coverage = self.chain.take_coverage();
            let weight = 1 + self.sequences_tested;
            self.corpus.check_sequence_coverage_and_update(&sequence_so_far, &local_coverage, weight, true)?;

            if !shrink_requests.is_empty() {
                break;
            }
        }

        self.chain.revert_to(self.testing_base_block_number).map_err(EngineError::Chain)?;

        if !is_new_sequence {
            // This exact sequence was already replayed verbatim from the corpus; don't let its
            // shrunk optimization double up the test-result section (`spec.md` §4.5 step 4).
            for request in &mut shrink_requests {
                request.record_in_corpus = false;
            }
        }

        Ok(shrink_requests)
    }

    /// Runs both shrinker passes against `request.sequence`, replaying each candidate from
    /// `testing_base_block_number` and handing the replay's final `MessageResult` to the
    /// provider's verifier, then records the optimized sequence and invokes the callback.
    fn handle_shrink_request(&mut self, mut request: ShrinkCallSequenceRequest<C>) -> Result<(), EngineError> {
        let base_block = self.testing_base_block_number;

        let mut replay_err: Option<EngineError> = None;
        let after_removal = {
            let chain = &mut self.chain;
            let verifier = &mut request.verifier;
            shrink_call_removal(&request.sequence, self.shrink_limit, |candidate| {
                match replay_sequence(chain, base_block, candidate) {
                    Ok(last_result) => (&mut **verifier)(chain, candidate, &last_result),
                    Err(err) => {
                        replay_err = Some(err);
                        false
                    }
                }
            })
        };
        if let Some(err) = replay_err.take() {
            self.chain.revert_to(base_block).map_err(EngineError::Chain)?;
            return Err(err);
        }

        let values = self.generator.values().clone();
        let after_arguments = {
            let chain = &mut self.chain;
            let verifier = &mut request.verifier;
            let mutator = self.generator.mutator_mut();
            shrink_argument_values(&after_removal, mutator, &values, self.shrink_limit, |candidate| {
                match replay_sequence(chain, base_block, candidate) {
                    Ok(last_result) => (&mut **verifier)(chain, candidate, &last_result),
                    Err(err) => {
                        replay_err = Some(err);
                        false
                    }
                }
            })
        };
        if let Some(err) = replay_err {
            self.chain.revert_to(base_block).map_err(EngineError::Chain)?;
            return Err(err);
        }

        self.chain.revert_to(base_block).map_err(EngineError::Chain)?;

        if request.record_in_corpus {
            let weight = 1 + self.sequences_tested;
            self.corpus.add_test_result(&after_arguments, weight)?;
        }

        let trace = self.replay_with_trace(&after_arguments, base_block)?;
        (request.finished_callback)(after_arguments, trace);
        Ok(())
    }

    /// Re-executes `sequence` from `base_block` with tracing enabled, per `spec.md` §4.6's
    /// finished-callback requirement ("re-executes the final sequence with an execution tracer
    /// attached"). Only the final call is traced unless `verbosity >= VeryVeryVerbose`
    /// (`spec.md` §6's `Testing.Verbosity`), in which case every call in the sequence is.
    fn replay_with_trace(&mut self, sequence: &CallSequence, base_block: u64) -> Result<Option<ExecutionTrace>, EngineError> {
        let trace_from_index =
            if self.verbosity >= Verbosity::VeryVeryVerbose { 0 } else { sequence.elements.len().saturating_sub(1) };

        self.chain.revert_to(base_block).map_err(EngineError::Chain)?;
        for (index, element) in sequence.elements.iter().enumerate() {
            self.chain.set_tracing_enabled(index >= trace_from_index);
            let number_delay = element.block_number_delay.min(element.block_timestamp_delay);
            self.chain.begin_block(number_delay, element.block_timestamp_delay).map_err(EngineError::Chain)?;
            self.chain.submit(element.call.clone()).map_err(EngineError::Chain)?;
            self.chain.commit_block().map_err(EngineError::Chain)?;
        }
        self.chain.set_tracing_enabled(false);
        let trace = self.chain.take_trace();
        self.chain.revert_to(base_block).map_err(EngineError::Chain)?;
        Ok(trace)
    }
}

/// Wires a fresh chain clone's deployment events through to `providers`, so contracts deployed or
/// removed mid-run (`spec.md` §4.9 lifecycle hooks) reach every provider without the worker
/// having to poll `deployed_contracts()` itself.
fn subscribe_providers<C: TestChain + 'static>(
    chain: &mut C,
    providers: &Arc<Mutex<Vec<Box<dyn TestCaseProvider<C> + Send>>>>,
) {
    let mut bus = EventBus::new();
    let providers = Arc::clone(providers);
    bus.subscribe(move |event| {
        match event {
            Event::ContractDeploymentAdded(contract) => {
                for provider in providers.lock().iter_mut() {
                    provider.on_contract_added(&**contract);
                }
            }
            Event::ContractDeploymentRemoved(contract) => {
                for provider in providers.lock().iter_mut() {
                    provider.on_contract_removed(&**contract);
                }
            }
            _ => {}
        }
        Ok(())
    });
    chain.subscribe(bus);
}

/// Replays `candidate` from `base_block`, returning the last call's `MessageResult`. An empty
/// candidate has no call to report on; callers treat the placeholder success result as "nothing
/// reproduced" and reject it via the verifier.
fn replay_sequence<C: TestChain>(chain: &mut C, base_block: u64, candidate: &CallSequence) -> Result<MessageResult, EngineError> {
    chain.revert_to(base_block).map_err(EngineError::Chain)?;
    let mut last_result = MessageResult {
        success: true,
        gas_used: 0,
        return_data: Default::default(),
        revert_reason: None,
        panic_code: None,
        invalid_opcode: false,
    };
    for element in &candidate.elements {
        let number_delay = element.block_number_delay.min(element.block_timestamp_delay);
        chain.begin_block(number_delay, element.block_timestamp_delay).map_err(EngineError::Chain)?;
        last_result = chain.submit(element.call.clone()).map_err(EngineError::Chain)?;
        chain.commit_block().map_err(EngineError::Chain)?;
    }
    Ok(last_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AssertionTestCaseProvider, TestCaseProvider};
    use alloy_json_abi::Function;
    use alloy_primitives::{Address, Bytes, U256};
    use covfuzz_chain::{CallMessage, CallSequenceElement, ContractDefinition, DeployedContract, MethodClassification, PanicCode};
    use covfuzz_config::AssertionTestConfig;
    use covfuzz_test_utils::FakeChain;
    use covfuzz_values::{MutationBias, ValueGenerator, ValueGeneratorConfig, ValueMutator, ValueSet};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn assertion_function() -> Function {
        serde_json::from_str(
            r#"{"type":"function","name":"doThing","inputs":[],"outputs":[],"stateMutability":"nonpayable"}"#,
        )
        .unwrap()
    }

    fn deployed(address: Address, function: Function) -> DeployedContract {
        let mut definition =
            ContractDefinition::new("Target".to_string(), alloy_json_abi::JsonAbi::default(), Bytes::new(), Bytes::new());
        definition.classify_method(
            function,
            MethodClassification {
                is_property_test: false,
                is_assertion_test: true,
                is_optimization_test: false,
                is_state_changing: true,
                is_pure: false,
            },
        );
        DeployedContract { definition: Arc::new(definition), address }
    }

    fn generator(deployed_contracts: Vec<DeployedContract>) -> CallSequenceGenerator<ChaCha8Rng> {
        let gen = ValueGenerator::new(ChaCha8Rng::seed_from_u64(5), ValueGeneratorConfig::default());
        let mutator = ValueMutator::new(gen, MutationBias::default(), 4);
        CallSequenceGenerator::new(mutator, ValueSet::new(), vec![Address::repeat_byte(1)], deployed_contracts, 1_000_000, 0, 0)
    }

    #[test]
    fn worker_stops_at_reset_limit_without_failures() {
        let target = Address::repeat_byte(2);
        let function = assertion_function();
        let contract = deployed(target, function.clone());

        let mut chain = FakeChain::new();
        chain.register_deployment(contract.clone());
        chain.script_call(
            target,
            function.selector().0,
            MessageResult { success: true, gas_used: 100, return_data: Bytes::new(), revert_reason: None, panic_code: None, invalid_opcode: false },
            Vec::new(),
            alloy_primitives::B256::ZERO,
            0,
        );

        let gen = generator(vec![contract]);

        let providers: Vec<Box<dyn TestCaseProvider<FakeChain> + Send>> =
            vec![Box::new(AssertionTestCaseProvider::new(AssertionTestConfig::default()))];

        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(Corpus::open(dir.path()).unwrap());

        let mut worker = FuzzerWorker::new(0, chain, gen, corpus, providers, 2, 100, Verbosity::Verbose, 0);
        let exit = worker.run(3, || false, |_, _| {}).unwrap();
        assert_eq!(exit, WorkerExit::ResetLimitReached);
        assert_eq!(worker.sequences_tested(), 3);
    }

    #[test]
    fn worker_honors_cancellation() {
        let gen = generator(Vec::new());
        let providers: Vec<Box<dyn TestCaseProvider<FakeChain> + Send>> = Vec::new();
        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(Corpus::open(dir.path()).unwrap());
        let mut worker = FuzzerWorker::new(0, FakeChain::new(), gen, corpus, providers, 1, 10, Verbosity::Verbose, 0);
        let exit = worker.run(10, || true, |_, _| {}).unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
        assert_eq!(worker.sequences_tested(), 0);
    }

    #[test]
    fn worker_shrinks_an_assertion_failure_down_to_one_call() {
        let target = Address::repeat_byte(2);
        let function = assertion_function();
        let contract = deployed(target, function.clone());

        let mut chain = FakeChain::new();
        chain.register_deployment(contract.clone());
        chain.script_call(
            target,
            function.selector().0,
            MessageResult {
                success: false,
                gas_used: 100,
                return_data: Bytes::new(),
                revert_reason: None,
                panic_code: Some(PanicCode::Assertion),
                invalid_opcode: false,
            },
            Vec::new(),
            alloy_primitives::B256::ZERO,
            0,
        );

        let gen = generator(vec![contract]);

        let providers: Vec<Box<dyn TestCaseProvider<FakeChain> + Send>> =
            vec![Box::new(AssertionTestCaseProvider::new(AssertionTestConfig::default()))];

        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(Corpus::open(dir.path()).unwrap());

        let mut worker = FuzzerWorker::new(0, chain, gen, corpus, providers, 3, 100, Verbosity::Verbose, 0);
        worker.run(1, || false, |_, _| {}).unwrap();

        let cases = worker.test_cases();
        assert!(cases.iter().any(|c| c.is_failed()));
        let failed = cases.iter().find(|c| c.is_failed()).unwrap();
        assert_eq!(failed.failing_sequence.as_ref().unwrap().len(), 1);
    }

    fn call(target: Address, input: Bytes) -> CallMessage {
        CallMessage {
            sender: Address::repeat_byte(1),
            target,
            value: U256::ZERO,
            gas_limit: 100_000,
            gas_price: U256::from(1u8),
            nonce: 0,
            input,
            arguments: Vec::new(),
        }
    }

    #[test]
    fn replay_sequence_reports_the_last_calls_result() {
        let target = Address::repeat_byte(2);
        let mut chain = FakeChain::new();
        chain.script_call(
            target,
            [0, 0, 0, 0],
            MessageResult { success: false, gas_used: 1, return_data: Bytes::new(), revert_reason: None, panic_code: None, invalid_opcode: false },
            Vec::new(),
            alloy_primitives::B256::ZERO,
            0,
        );
        let mut sequence = CallSequence::new();
        sequence.push(CallSequenceElement::new(target, call(target, Bytes::from(vec![0, 0, 0, 0])), 1, 1));
        let result = replay_sequence(&mut chain, 0, &sequence).unwrap();
        assert!(!result.success);
    }
}
