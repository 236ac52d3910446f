//! `Fuzzer`: startup, corpus coverage seeding, and worker-pool supervision (`spec.md` §4.7, §5).
//!
//! Contract compilation and deployment (`spec.md` §4.7 steps 1-6) are an external collaborator's
//! job: a `Fuzzer` is built from an already-deployed `base_chain`, whose `deployed_contracts()`
//! is the deployment table every worker starts from.

use crate::error::EngineError;
use crate::provider::{AssertionTestCaseProvider, PropertyTestCaseProvider, TestCase, TestCaseProvider};
use crate::sequence_generator::CallSequenceGenerator;
use crate::worker::{FuzzerWorker, WorkerExit};
use alloy_primitives::Address;
use covfuzz_chain::{DeployedContract, Event, EventBus, TestChain};
use covfuzz_config::FuzzerConfig;
use covfuzz_corpus::{Corpus, CorpusError};
use covfuzz_values::{MutationBias, ValueGenerator, ValueGeneratorConfig, ValueMutator, ValueSet};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Every `ValueMutator` in this crate is built with the same argument-complexity budget; there is
/// no configuration knob for it (`spec.md` §6 enumerates only the worker/corpus/testing knobs).
const ABI_VALUE_COMPLEXITY: u32 = 4;

/// What a completed run produced (`spec.md` §4.7 step 9): every registered test case's final
/// status, and the total number of sequences tested across every worker slot.
#[derive(Debug, Clone)]
pub struct FuzzerOutcome {
    pub test_cases: Vec<TestCase>,
    pub sequences_tested: u64,
}

/// Orchestrates one fuzzing run: seeds coverage from the on-disk corpus, then supervises N
/// worker threads until cancellation, a wall-clock timeout, `test_limit`, or a fatal error
/// (`spec.md` §4.7 Supervision, §5 Scheduling model).
pub struct Fuzzer<C: TestChain> {
    config: FuzzerConfig,
    base_chain: C,
    corpus: Arc<Corpus>,
    deployed_contracts: Vec<DeployedContract>,
    seed: u64,
    property_provider: PropertyTestCaseProvider,
    assertion_provider: AssertionTestCaseProvider,
    /// Fuzzer-level lifecycle events (`FuzzerStarting`/`FuzzerStopping`/`CallSequenceTested`),
    /// separate from the per-chain bus `subscribe_providers` wires for deployment events
    /// (`spec.md` §4.5, §4.7 Supervision).
    event_bus: Mutex<EventBus>,
}

impl<C: TestChain> Fuzzer<C> {
    /// `base_chain` must already reflect every deployment this run should test; `seed` is the
    /// master seed each worker's RNG is deterministically derived from (`spec.md` §4.7 step 8).
    pub fn new(config: FuzzerConfig, base_chain: C, seed: u64) -> Result<Self, EngineError> {
        let corpus = Corpus::open(config.corpus.corpus_directory.clone()).map_err(EngineError::Corpus)?;
        let deployed_contracts = base_chain.deployed_contracts().to_vec();
        let property_provider = PropertyTestCaseProvider::new(config.property_testing.clone(), config.sender_addresses.clone());
        let assertion_provider = AssertionTestCaseProvider::new(config.assertion_testing.clone());
        Ok(Self {
            config,
            base_chain,
            corpus: Arc::new(corpus),
            deployed_contracts,
            seed,
            property_provider,
            assertion_provider,
            event_bus: Mutex::new(EventBus::new()),
        })
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    /// Registers `handler` for every fuzzer-level lifecycle event emitted by [`Fuzzer::run`].
    pub fn subscribe_events<F>(&self, handler: F)
    where
        F: FnMut(&Event) -> Result<(), covfuzz_chain::SubscriberError> + Send + 'static,
    {
        self.event_bus.lock().subscribe(handler);
    }

    /// Replays every sequence already on disk against a scratch clone of `base_chain`, merging
    /// whatever coverage it produces into the corpus before any worker starts (`spec.md` §4.7
    /// step 7), so a rerun never forgets territory a prior run already explored. Each replay is
    /// followed by a revert to the base block, matching the per-sequence isolation the step
    /// requires.
    fn seed_coverage_from_corpus(&self) -> Result<(), EngineError> {
        if !self.config.corpus.coverage_enabled {
            return Ok(());
        }
        self.corpus.load_from_disk(self.config.corpus.stop_on_corrupted_corpus).map_err(EngineError::Corpus)?;

        let base_block = self.base_chain.head();
        let mut scratch = self.base_chain.clone_chain();
        for entry in self.corpus.all_entries() {
            scratch.revert_to(base_block).map_err(EngineError::Chain)?;
            for element in &entry.sequence.elements {
                let number_delay = element.block_number_delay.min(element.block_timestamp_delay);
                scratch.begin_block(number_delay, element.block_timestamp_delay).map_err(EngineError::Chain)?;
                scratch.submit(element.call.clone()).map_err(EngineError::Chain)?;
                scratch.commit_block().map_err(EngineError::Chain)?;
            }
            let coverage = scratch.take_coverage();
            // `add_if_new_coverage = false`: these sequences are already on disk, so re-adding
            // them as a "new" coverage entry would just duplicate work the dedup-by-hash check
            // already prevents, but at the cost of a second persist.
            self.corpus
                .check_sequence_coverage_and_update(&entry.sequence, &coverage, entry.weight, false)
                .map_err(EngineError::Corpus)?;
        }
        scratch.revert_to(base_block).map_err(EngineError::Chain)?;
        Ok(())
    }

    /// Runs one `Corpus::prune_sequences` pass against a scratch chain clone, dropping dominated
    /// coverage entries (`spec.md` §4.8, §6 `PruneFrequency`). Scheduled periodically from `run`
    /// when `corpus.prune_frequency_minutes` is nonzero.
    fn prune_corpus(&self) -> Result<usize, EngineError> {
        let base_block = self.base_chain.head();
        let mut scratch = self.base_chain.clone_chain();
        let pruned = self.corpus.prune_sequences(|sequence| {
            scratch.revert_to(base_block).map_err(|err| CorpusError::Replay(err.to_string()))?;
            for element in &sequence.elements {
                let number_delay = element.block_number_delay.min(element.block_timestamp_delay);
                scratch
                    .begin_block(number_delay, element.block_timestamp_delay)
                    .map_err(|err| CorpusError::Replay(err.to_string()))?;
                scratch.submit(element.call.clone()).map_err(|err| CorpusError::Replay(err.to_string()))?;
                scratch.commit_block().map_err(|err| CorpusError::Replay(err.to_string()))?;
            }
            Ok(scratch.take_coverage())
        })?;
        scratch.revert_to(base_block).map_err(EngineError::Chain)?;
        Ok(pruned)
    }

    /// `true` iff at least one property or assertion test case was registered against the
    /// deployed contracts, without paying for a full worker/chain clone to find out.
    fn has_any_test_case(&self) -> bool
    where
        C: 'static,
    {
        let mut property = self.property_provider.clone();
        let mut assertion = self.assertion_provider.clone();
        for contract in &self.deployed_contracts {
            TestCaseProvider::<C>::on_contract_added(&mut property, contract);
            TestCaseProvider::<C>::on_contract_added(&mut assertion, contract);
        }
        !TestCaseProvider::<C>::test_cases(&property).is_empty() || !TestCaseProvider::<C>::test_cases(&assertion).is_empty()
    }

    fn build_providers(&self) -> Vec<Box<dyn TestCaseProvider<C> + Send>>
    where
        C: 'static,
    {
        vec![Box::new(self.property_provider.clone()), Box::new(self.assertion_provider.clone())]
    }

    fn build_worker(&self, worker_index: usize) -> FuzzerWorker<C, ChaCha8Rng>
    where
        C: 'static,
    {
        // `spec.md` §4.7 step 8: "own RNG seeded deterministically from a configured master seed
        // + worker index". Mixed through a large odd constant so adjacent worker indices don't
        // produce adjacent seeds.
        let rng_seed = self.seed ^ (worker_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let value_generator = ValueGenerator::new(ChaCha8Rng::seed_from_u64(rng_seed), ValueGeneratorConfig::default());
        let mutator = ValueMutator::new(value_generator, MutationBias::default(), ABI_VALUE_COMPLEXITY);
        let generator = CallSequenceGenerator::new(
            mutator,
            ValueSet::new(),
            self.config.sender_addresses.clone(),
            self.deployed_contracts.clone(),
            self.config.worker.transaction_gas_limit,
            self.config.worker.max_block_number_delay,
            self.config.worker.max_block_timestamp_delay,
        );

        let chain = self.base_chain.clone_chain();
        FuzzerWorker::new(
            worker_index,
            chain,
            generator,
            Arc::clone(&self.corpus),
            self.build_providers(),
            self.config.worker.call_sequence_length,
            self.config.worker.shrink_limit,
            self.config.verbosity,
            0,
        )
    }

    /// Runs until every worker is cancelled, then returns the aggregate outcome. `C: Sync` is
    /// required here (not on the rest of the type): multiple worker threads hold `&self` at once
    /// to clone `base_chain` on every reset (`spec.md` §5 "Base TestChain: immutable after
    /// setup").
    pub fn run(&self) -> Result<FuzzerOutcome, EngineError>
    where
        C: Sync + 'static,
    {
        self.seed_coverage_from_corpus()?;

        if self.config.stop_on_no_tests && !self.has_any_test_case() {
            return Err(EngineError::Provider(
                "no property or assertion tests were registered against any deployed contract".to_string(),
            ));
        }

        // `spec.md` §4.9 capability set: run providers' start handlers before any worker spawns.
        let mut starting_property = self.property_provider.clone();
        let mut starting_assertion = self.assertion_provider.clone();
        TestCaseProvider::<C>::on_fuzzer_starting(&mut starting_property);
        TestCaseProvider::<C>::on_fuzzer_starting(&mut starting_assertion);
        self.event_bus.lock().emit(Event::FuzzerStarting).map_err(|err| EngineError::Provider(err.to_string()))?;

        let worker_count = self.config.worker.workers;
        let cancelled = AtomicBool::new(false);
        let sequences_tested = AtomicU64::new(0);
        let start = Instant::now();
        let test_limit = self.config.worker.test_limit;
        let timeout_secs = self.config.worker.timeout_secs;
        let reset_limit = self.config.worker.worker_reset_limit;
        let stop_on_failed_test = self.config.stop_on_failed_test;
        let prune_interval = match self.config.corpus.prune_frequency_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        };

        // One extra thread is reserved for the periodic prune pass so it never competes with a
        // worker loop for a pool slot (`spec.md` §6 `PruneFrequency`; those loops never yield).
        let pool_threads = if prune_interval.is_some() { worker_count + 1 } else { worker_count };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_threads)
            .build()
            .map_err(|err| EngineError::Provider(format!("failed to build worker thread pool: {err}")))?;

        let worker_totals: Mutex<Vec<u64>> = Mutex::new(Vec::with_capacity(worker_count));
        let fatal_error: Mutex<Option<EngineError>> = Mutex::new(None);
        let event_bus = &self.event_bus;

        pool.scope(|scope| {
            for worker_index in 0..worker_count {
                let cancelled = &cancelled;
                let sequences_tested = &sequences_tested;
                let worker_totals = &worker_totals;
                let fatal_error = &fatal_error;

                scope.spawn(move |_| {
                    let mut worker = self.build_worker(worker_index);

                    loop {
                        let exit = worker.run(
                            reset_limit,
                            || {
                                cancelled.load(Ordering::SeqCst)
                                    || (timeout_secs > 0 && start.elapsed().as_secs() >= timeout_secs)
                                    || (test_limit > 0 && sequences_tested.load(Ordering::SeqCst) >= test_limit)
                            },
                            |worker_index, worker_sequences_tested| {
                                sequences_tested.fetch_add(1, Ordering::SeqCst);
                                let event =
                                    Event::CallSequenceTested { worker_index, sequences_tested: worker_sequences_tested };
                                if let Err(err) = event_bus.lock().emit(event) {
                                    tracing::error!(worker_index, %err, "CallSequenceTested subscriber failed");
                                    fatal_error.lock().get_or_insert(EngineError::Provider(err.to_string()));
                                    cancelled.store(true, Ordering::SeqCst);
                                }
                            },
                        );

                        let exit = match exit {
                            Ok(exit) => exit,
                            Err(err) => {
                                tracing::error!(worker_index, %err, "worker stopped on a fatal error");
                                fatal_error.lock().get_or_insert(err);
                                cancelled.store(true, Ordering::SeqCst);
                                break;
                            }
                        };

                        if stop_on_failed_test && worker.test_cases().iter().any(TestCase::is_failed) {
                            cancelled.store(true, Ordering::SeqCst);
                        }

                        match exit {
                            WorkerExit::Cancelled => break,
                            WorkerExit::ResetLimitReached => {
                                if cancelled.load(Ordering::SeqCst) {
                                    break;
                                }
                                worker.reset_chain(&self.base_chain);
                            }
                        }
                    }

                    worker_totals.lock().push(worker.sequences_tested());
                });
            }

            if let Some(interval) = prune_interval {
                let cancelled = &cancelled;
                let fatal_error = &fatal_error;
                scope.spawn(move |_| {
                    let mut last_prune = Instant::now();
                    while !cancelled.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(200).min(interval));
                        if last_prune.elapsed() < interval {
                            continue;
                        }
                        last_prune = Instant::now();
                        match self.prune_corpus() {
                            Ok(pruned) => {
                                if pruned > 0 {
                                    tracing::debug!(pruned, "corpus prune pass dropped dominated entries");
                                }
                            }
                            Err(err) => {
                                tracing::error!(%err, "corpus prune pass failed");
                                fatal_error.lock().get_or_insert(err);
                                cancelled.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = fatal_error.into_inner() {
            return Err(err);
        }

        // `spec.md` §4.7 Supervision: "wait for all workers to quiesce... run providers' stop
        // handlers; emit FuzzerStopping."
        let mut stopping_property = self.property_provider.clone();
        let mut stopping_assertion = self.assertion_provider.clone();
        TestCaseProvider::<C>::on_fuzzer_stopping(&mut stopping_property);
        TestCaseProvider::<C>::on_fuzzer_stopping(&mut stopping_assertion);
        self.event_bus.lock().emit(Event::FuzzerStopping).map_err(|err| EngineError::Provider(err.to_string()))?;

        let sequences_tested_total = worker_totals.into_inner().into_iter().sum();
        let test_cases = TestCaseProvider::<C>::test_cases(&self.property_provider)
            .into_iter()
            .chain(TestCaseProvider::<C>::test_cases(&self.assertion_provider))
            .collect();

        Ok(FuzzerOutcome { test_cases, sequences_tested: sequences_tested_total })
    }
}
