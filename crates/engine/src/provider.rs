//! Test-case providers: `spec.md` §4.9.
//!
//! Providers are polymorphic over a fixed capability set (lifecycle hooks plus the hot
//! post-call path); per the redesign note in `spec.md` §9 this is hand-dispatched through the
//! `TestCaseProvider` trait rather than a generic event-subscriber registration, since the
//! provider count is small and fixed (typically two) and the post-call path is hot.

use crate::error::EngineError;
use alloy_json_abi::{Function, StateMutability};
use alloy_primitives::{Address, U256};
use covfuzz_chain::{CallMessage, CallSequence, DeployedContract, MessageResult, TestChain};
use covfuzz_config::{AssertionTestConfig, PropertyTestConfig};
use covfuzz_trace::ExecutionTrace;
use covfuzz_values::encode_calldata;
use parking_lot::Mutex;
use std::sync::Arc;

/// `spec.md` §3: `NotStarted` → (`Running`)? → `Passed` | `Failed`, `Failed` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCaseStatus {
    NotStarted,
    Running,
    Passed,
    Failed,
}

/// The method a `TestCase` checks, and the deployment it is checked against.
#[derive(Debug, Clone)]
pub struct TestCaseTarget {
    pub contract: Address,
    pub method: Function,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub status: TestCaseStatus,
    pub target: TestCaseTarget,
    pub failing_sequence: Option<CallSequence>,
    pub trace: Option<ExecutionTrace>,
}

impl TestCase {
    fn new(target: TestCaseTarget) -> Self {
        Self { status: TestCaseStatus::NotStarted, target, failing_sequence: None, trace: None }
    }

    fn record_pass(&mut self) {
        if self.status != TestCaseStatus::Failed {
            self.status = TestCaseStatus::Passed;
        }
    }

    fn record_pending_failure(&mut self) {
        if self.status != TestCaseStatus::Failed {
            self.status = TestCaseStatus::Running;
        }
    }

    fn record_failure(&mut self, sequence: CallSequence, trace: Option<ExecutionTrace>) {
        self.status = TestCaseStatus::Failed;
        self.failing_sequence = Some(sequence);
        self.trace = trace;
    }

    pub fn is_failed(&self) -> bool {
        self.status == TestCaseStatus::Failed
    }
}

/// A request to shrink `sequence`, produced by a provider after detecting a failure, consumed
/// by the worker's shrinker on its next loop iteration (`spec.md` §4.6, §4.9).
pub struct ShrinkCallSequenceRequest<C: TestChain> {
    pub sequence: CallSequence,
    /// Whether the optimized sequence should land in the corpus's test-result section; the
    /// worker clears this when the source sequence was itself replayed from the corpus
    /// (`spec.md` §4.5 step 4).
    pub record_in_corpus: bool,
    /// Re-checks the failure condition. `chain` has already been replayed up to `candidate` by
    /// the caller; `last_result` is the `MessageResult` of `candidate`'s final call. Returns
    /// `true` iff the failure still reproduces.
    pub verifier: Box<dyn FnMut(&mut C, &CallSequence, &MessageResult) -> bool + Send>,
    /// Invoked once shrinking is done, with the optimized sequence and — if tracing was
    /// requested for this run — the trace of its final replay.
    pub finished_callback: Box<dyn FnMut(CallSequence, Option<ExecutionTrace>) + Send>,
}

/// Capability set every provider implements (`spec.md` §4.9).
pub trait TestCaseProvider<C: TestChain> {
    fn on_fuzzer_starting(&mut self) {}
    fn on_fuzzer_stopping(&mut self) {}
    fn on_worker_created(&mut self, _worker_index: usize) {}
    fn on_contract_added(&mut self, contract: &DeployedContract);
    fn on_contract_removed(&mut self, contract: &DeployedContract);

    /// Called after a call is appended to the sequence under test. `last_target`/`last_result`
    /// describe that call.
    fn post_call_test(
        &mut self,
        chain: &mut C,
        sequence_so_far: &CallSequence,
        last_target: Address,
        last_result: &MessageResult,
    ) -> Result<Vec<ShrinkCallSequenceRequest<C>>, EngineError>;

    /// A snapshot of every registered test case, for reporting once a run ends.
    fn test_cases(&self) -> Vec<TestCase>;
}

fn decode_bool_return(data: &[u8]) -> Option<bool> {
    data.last().map(|&b| b != 0)
}

fn property_holds(result: &MessageResult) -> bool {
    result.success && decode_bool_return(&result.return_data).unwrap_or(false)
}

fn is_eligible_property(function: &Function, prefixes: &[String]) -> bool {
    function.inputs.is_empty()
        && function.outputs.len() == 1
        && function.outputs[0].ty == "bool"
        && matches!(function.state_mutability, StateMutability::Pure | StateMutability::View)
        && prefixes.iter().any(|prefix| function.name.starts_with(prefix.as_str()))
}

fn property_check_message(sender: Address, target: &TestCaseTarget) -> CallMessage {
    CallMessage {
        sender,
        target: target.contract,
        value: U256::ZERO,
        gas_limit: u64::MAX,
        gas_price: U256::ZERO,
        nonce: 0,
        input: encode_calldata(target.method.selector().0, &[]).into(),
        arguments: Vec::new(),
    }
}

/// Registers a `TestCase` for every zero-argument, single-`bool`-returning, constant method
/// whose name matches a configured prefix; re-checks every live case after every call by
/// issuing it as a read-only message from `senders[0]` (`spec.md` §4.9).
///
/// `Clone` is cheap (an `Arc` bump): the `Fuzzer` builds one provider and clones it into every
/// worker, so `cases` is the single mutex-guarded table `spec.md` §5 describes, not a per-worker
/// copy that would need merging after the run.
#[derive(Clone)]
pub struct PropertyTestCaseProvider {
    config: PropertyTestConfig,
    senders: Vec<Address>,
    cases: Arc<Mutex<Vec<TestCase>>>,
}

impl PropertyTestCaseProvider {
    pub fn new(config: PropertyTestConfig, senders: Vec<Address>) -> Self {
        Self { config, senders, cases: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<C: TestChain + 'static> TestCaseProvider<C> for PropertyTestCaseProvider {
    fn on_contract_added(&mut self, contract: &DeployedContract) {
        if !self.config.enabled {
            return;
        }
        let mut cases = self.cases.lock();
        for (function, _) in contract.definition.methods() {
            if !is_eligible_property(function, &self.config.test_prefixes) {
                continue;
            }
            // Idempotent: every worker sharing this provider re-registers the same deployment
            // (`FuzzerWorker::new` seeds its deployed contracts unconditionally).
            let already_registered = cases
                .iter()
                .any(|c| c.target.contract == contract.address && c.target.method.selector() == function.selector());
            if !already_registered {
                cases.push(TestCase::new(TestCaseTarget { contract: contract.address, method: function.clone() }));
            }
        }
    }

    fn on_contract_removed(&mut self, contract: &DeployedContract) {
        self.cases.lock().retain(|case| case.target.contract != contract.address);
    }

    fn post_call_test(
        &mut self,
        chain: &mut C,
        sequence_so_far: &CallSequence,
        _last_target: Address,
        _last_result: &MessageResult,
    ) -> Result<Vec<ShrinkCallSequenceRequest<C>>, EngineError> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let sender = self.senders.first().copied().unwrap_or(Address::ZERO);
        let len = self.cases.lock().len();
        let mut requests = Vec::new();

        for index in 0..len {
            if self.cases.lock()[index].status == TestCaseStatus::Failed {
                continue;
            }
            let target = self.cases.lock()[index].target.clone();
            let result = chain.call_read_only(&property_check_message(sender, &target)).map_err(EngineError::Chain)?;

            if property_holds(&result) {
                self.cases.lock()[index].record_pass();
                continue;
            }

            self.cases.lock()[index].record_pending_failure();
            tracing::debug!(property = %target.method.name, "property test failed");

            let cases = Arc::clone(&self.cases);
            let verify_target = target.clone();
            let callback_target = target;
            requests.push(ShrinkCallSequenceRequest {
                sequence: sequence_so_far.clone(),
                record_in_corpus: true,
                verifier: Box::new(move |chain: &mut C, _candidate: &CallSequence, _last_result: &MessageResult| {
                    let message = property_check_message(sender, &verify_target);
                    match chain.call_read_only(&message) {
                        Ok(result) => !property_holds(&result),
                        Err(_) => true,
                    }
                }),
                finished_callback: Box::new(move |sequence, trace| {
                    let mut cases = cases.lock();
                    if let Some(case) = cases.iter_mut().find(|c| {
                        c.target.contract == callback_target.contract
                            && c.target.method.selector() == callback_target.method.selector()
                    }) {
                        case.record_failure(sequence, trace);
                    }
                }),
            });
        }

        Ok(requests)
    }

    fn test_cases(&self) -> Vec<TestCase> {
        self.cases.lock().clone()
    }
}

fn is_eligible_assertion(function: &Function, test_view_methods: bool) -> bool {
    match function.state_mutability {
        StateMutability::NonPayable | StateMutability::Payable => true,
        StateMutability::View => test_view_methods,
        StateMutability::Pure => false,
    }
}

/// Registers a `TestCase` for every non-constant ABI method (and view methods, if configured)
/// in targeted contracts; after every call, classifies the invoked method's VM failure (if any)
/// as a recognized panic code and fails the matching case when configured to (`spec.md` §4.9).
///
/// `Clone` is cheap (an `Arc` bump): see [`PropertyTestCaseProvider`]'s doc comment for why this
/// is shared across workers rather than per-worker.
#[derive(Clone)]
pub struct AssertionTestCaseProvider {
    config: AssertionTestConfig,
    cases: Arc<Mutex<Vec<TestCase>>>,
}

impl AssertionTestCaseProvider {
    pub fn new(config: AssertionTestConfig) -> Self {
        Self { config, cases: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<C: TestChain + 'static> TestCaseProvider<C> for AssertionTestCaseProvider {
    fn on_contract_added(&mut self, contract: &DeployedContract) {
        if !self.config.enabled {
            return;
        }
        let mut cases = self.cases.lock();
        for (function, _) in contract.definition.methods() {
            if !is_eligible_assertion(function, self.config.test_view_methods) {
                continue;
            }
            let already_registered = cases
                .iter()
                .any(|c| c.target.contract == contract.address && c.target.method.selector() == function.selector());
            if !already_registered {
                cases.push(TestCase::new(TestCaseTarget { contract: contract.address, method: function.clone() }));
            }
        }
    }

    fn on_contract_removed(&mut self, contract: &DeployedContract) {
        self.cases.lock().retain(|case| case.target.contract != contract.address);
    }

    fn post_call_test(
        &mut self,
        _chain: &mut C,
        sequence_so_far: &CallSequence,
        last_target: Address,
        last_result: &MessageResult,
    ) -> Result<Vec<ShrinkCallSequenceRequest<C>>, EngineError> {
        if !self.config.enabled || last_result.success {
            return Ok(Vec::new());
        }
        let Some(panic_code) = last_result.effective_panic_code() else {
            return Ok(Vec::new());
        };
        if !self.config.panic_codes.should_fail_on(panic_code) {
            return Ok(Vec::new());
        }
        let Some(selector_slice) = sequence_so_far.elements.last().and_then(|el| el.call.input.get(0..4)) else {
            return Ok(Vec::new());
        };
        let Ok(selector): Result<[u8; 4], _> = selector_slice.try_into() else {
            return Ok(Vec::new());
        };

        let mut cases = self.cases.lock();
        let Some(index) =
            cases.iter().position(|case| case.target.contract == last_target && case.target.method.selector().0 == selector)
        else {
            return Ok(Vec::new());
        };
        if cases[index].status == TestCaseStatus::Failed {
            return Ok(Vec::new());
        }
        cases[index].record_pending_failure();
        let target = cases[index].target.clone();
        drop(cases);

        tracing::debug!(method = %target.method.name, code = ?panic_code, "assertion test failed");

        let cases = Arc::clone(&self.cases);
        let verify_target = last_target;
        Ok(vec![ShrinkCallSequenceRequest {
            sequence: sequence_so_far.clone(),
            record_in_corpus: true,
            verifier: Box::new(move |_chain: &mut C, candidate: &CallSequence, last_result: &MessageResult| {
                let last_matches = candidate.elements.last().is_some_and(|el| {
                    el.contract_reference == verify_target && el.call.input.get(0..4) == Some(&selector[..])
                });
                last_matches && last_result.effective_panic_code() == Some(panic_code)
            }),
            finished_callback: Box::new(move |sequence, trace| {
                let mut cases = cases.lock();
                if let Some(case) = cases.iter_mut().find(|c| {
                    c.target.contract == target.contract && c.target.method.selector() == target.method.selector()
                }) {
                    case.record_failure(sequence, trace);
                }
            }),
        }])
    }

    fn test_cases(&self) -> Vec<TestCase> {
        self.cases.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covfuzz_chain::{ContractDefinition, MethodClassification};
    use covfuzz_test_utils::FakeChain;
    use std::sync::Arc as StdArc;

    fn bool_property(name: &str) -> Function {
        let json = format!(
            r#"{{"type":"function","name":"{name}","inputs":[],"outputs":[{{"type":"bool","name":""}}],"stateMutability":"view"}}"#
        );
        serde_json::from_str(&json).expect("valid JSON ABI function fixture")
    }

    fn non_constant_method(name: &str) -> Function {
        let json = format!(
            r#"{{"type":"function","name":"{name}","inputs":[],"outputs":[],"stateMutability":"nonpayable"}}"#
        );
        serde_json::from_str(&json).expect("valid JSON ABI function fixture")
    }

    fn deploy(name: &str, address: Address, function: Function, classification: MethodClassification) -> DeployedContract {
        let mut definition =
            ContractDefinition::new(name.to_string(), alloy_json_abi::JsonAbi::default(), Default::default(), Default::default());
        definition.classify_method(function, classification);
        DeployedContract { definition: StdArc::new(definition), address }
    }

    fn no_op_classification() -> MethodClassification {
        MethodClassification {
            is_property_test: false,
            is_assertion_test: false,
            is_optimization_test: false,
            is_state_changing: false,
            is_pure: false,
        }
    }

    #[test]
    fn property_provider_registers_only_eligible_methods() {
        let mut provider = PropertyTestCaseProvider::new(
            PropertyTestConfig { enabled: true, test_prefixes: vec!["property_".into()] },
            vec![Address::repeat_byte(1)],
        );
        let contract =
            deploy("Target", Address::repeat_byte(2), bool_property("property_balance_never_negative"), no_op_classification());
        <PropertyTestCaseProvider as TestCaseProvider<FakeChain>>::on_contract_added(&mut provider, &contract);
        assert_eq!(provider.test_cases().len(), 1);
    }

    #[test]
    fn property_provider_ignores_non_matching_prefix() {
        let mut provider = PropertyTestCaseProvider::new(
            PropertyTestConfig { enabled: true, test_prefixes: vec!["property_".into()] },
            vec![Address::repeat_byte(1)],
        );
        let contract = deploy("Target", Address::repeat_byte(2), bool_property("getBalance"), no_op_classification());
        <PropertyTestCaseProvider as TestCaseProvider<FakeChain>>::on_contract_added(&mut provider, &contract);
        assert!(provider.test_cases().is_empty());
    }

    #[test]
    fn property_provider_detects_a_failing_property_and_requests_a_shrink() {
        let mut provider = PropertyTestCaseProvider::new(
            PropertyTestConfig { enabled: true, test_prefixes: vec!["property_".into()] },
            vec![Address::repeat_byte(1)],
        );
        let target_address = Address::repeat_byte(2);
        let contract = deploy("Target", target_address, bool_property("property_always_true"), no_op_classification());
        <PropertyTestCaseProvider as TestCaseProvider<FakeChain>>::on_contract_added(&mut provider, &contract);

        let mut chain = FakeChain::new();
        let function = bool_property("property_always_true");
        chain.script_call(
            target_address,
            function.selector().0,
            MessageResult {
                success: true,
                gas_used: 100,
                return_data: alloy_primitives::Bytes::from(vec![0u8; 32]),
                revert_reason: None,
                panic_code: None,
                invalid_opcode: false,
            },
            Vec::new(),
            alloy_primitives::B256::ZERO,
            0,
        );

        let requests = TestCaseProvider::<FakeChain>::post_call_test(
            &mut provider,
            &mut chain,
            &CallSequence::new(),
            target_address,
            &MessageResult {
                success: true,
                gas_used: 0,
                return_data: Default::default(),
                revert_reason: None,
                panic_code: None,
                invalid_opcode: false,
            },
        )
        .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(provider.test_cases()[0].status, TestCaseStatus::Running);
    }

    #[test]
    fn assertion_provider_skips_successful_calls() {
        let mut provider = AssertionTestCaseProvider::new(AssertionTestConfig::default());
        let mut chain = FakeChain::new();
        let result = MessageResult {
            success: true,
            gas_used: 0,
            return_data: Default::default(),
            revert_reason: None,
            panic_code: None,
            invalid_opcode: false,
        };
        let requests = TestCaseProvider::<FakeChain>::post_call_test(
            &mut provider,
            &mut chain,
            &CallSequence::new(),
            Address::repeat_byte(1),
            &result,
        )
        .unwrap();
        assert!(requests.is_empty());
    }

    #[test]
    fn assertion_provider_respects_disabled_panic_codes() {
        let mut config = AssertionTestConfig::default();
        config.panic_codes.fail_on_assertion = false;
        let mut provider = AssertionTestCaseProvider::new(config);
        let target_address = Address::repeat_byte(3);
        let function = non_constant_method("doThing");
        let contract = deploy("Target", target_address, function.clone(), no_op_classification());
        <AssertionTestCaseProvider as TestCaseProvider<FakeChain>>::on_contract_added(&mut provider, &contract);

        let mut sequence = CallSequence::new();
        let call = CallMessage {
            sender: Address::repeat_byte(1),
            target: target_address,
            value: U256::ZERO,
            gas_limit: 100_000,
            gas_price: U256::from(1u8),
            nonce: 0,
            input: encode_calldata(function.selector().0, &[]).into(),
            arguments: Vec::new(),
        };
        sequence.push(covfuzz_chain::CallSequenceElement::new(target_address, call, 0, 0));

        let mut chain = FakeChain::new();
        let result = MessageResult {
            success: false,
            gas_used: 0,
            return_data: Default::default(),
            revert_reason: None,
            panic_code: Some(covfuzz_chain::PanicCode::Assertion),
            invalid_opcode: false,
        };
        let requests =
            TestCaseProvider::<FakeChain>::post_call_test(&mut provider, &mut chain, &sequence, target_address, &result)
                .unwrap();
        assert!(requests.is_empty());
    }

    #[test]
    fn test_case_status_stays_failed_once_set() {
        let target = TestCaseTarget { contract: Address::ZERO, method: bool_property("property_x") };
        let mut case = TestCase::new(target);
        case.record_failure(CallSequence::new(), None);
        case.record_pass();
        assert_eq!(case.status, TestCaseStatus::Failed);
    }
}
