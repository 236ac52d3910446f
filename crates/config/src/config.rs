//! `FuzzerConfig` and its nested sections: every knob enumerated in `spec.md` §6.

use crate::error::ConfigError;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Worker-pool and per-sequence execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub workers: usize,
    pub worker_reset_limit: u64,
    pub call_sequence_length: usize,
    /// Stop after this many calls tested across all workers. `0` means unlimited.
    pub test_limit: u64,
    /// Wall-clock cancel, in seconds. `0` means no timeout.
    pub timeout_secs: u64,
    pub shrink_limit: u64,
    pub transaction_gas_limit: u64,
    pub max_block_number_delay: u64,
    pub max_block_timestamp_delay: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            worker_reset_limit: 50,
            call_sequence_length: 100,
            test_limit: 0,
            timeout_secs: 0,
            shrink_limit: 5_000,
            transaction_gas_limit: 12_500_000,
            max_block_number_delay: 60,
            max_block_timestamp_delay: 604_800,
        }
    }
}

/// Coverage/corpus toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub coverage_enabled: bool,
    pub corpus_directory: String,
    /// Minutes between pruning passes. `0` disables pruning.
    pub prune_frequency_minutes: u64,
    /// `spec.md` §4.10/§7: a corrupted corpus entry is logged and skipped during startup replay
    /// by default. Setting this makes the first bad entry a fatal startup error instead.
    pub stop_on_corrupted_corpus: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            coverage_enabled: true,
            corpus_directory: "corpus".to_string(),
            prune_frequency_minutes: 0,
            stop_on_corrupted_corpus: false,
        }
    }
}

/// Property-test provider toggle and method-name prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyTestConfig {
    pub enabled: bool,
    pub test_prefixes: Vec<String>,
}

impl Default for PropertyTestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            test_prefixes: vec!["property_".to_string(), "medusa_".to_string(), "echidna_".to_string()],
        }
    }
}

/// Per-panic-code failure semantics (`spec.md` §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PanicCodeConfig {
    pub fail_on_assertion: bool,
    pub fail_on_arithmetic_underflow: bool,
    pub fail_on_divide_by_zero: bool,
    pub fail_on_enum_type_conversion_out_of_bounds: bool,
    pub fail_on_incorrect_storage_access: bool,
    pub fail_on_pop_empty_array: bool,
    pub fail_on_out_of_bounds_array_access: bool,
    pub fail_on_allocate_too_much_memory: bool,
    pub fail_on_call_uninitialized_variable: bool,
    pub fail_on_compiler_inserted_panic: bool,
}

impl Default for PanicCodeConfig {
    fn default() -> Self {
        Self {
            fail_on_assertion: true,
            fail_on_arithmetic_underflow: true,
            fail_on_divide_by_zero: true,
            fail_on_enum_type_conversion_out_of_bounds: true,
            fail_on_incorrect_storage_access: true,
            fail_on_pop_empty_array: true,
            fail_on_out_of_bounds_array_access: true,
            fail_on_allocate_too_much_memory: true,
            fail_on_call_uninitialized_variable: true,
            fail_on_compiler_inserted_panic: false,
        }
    }
}

impl PanicCodeConfig {
    /// Whether a given panic code should be treated as a failing assertion, per this config.
    pub fn should_fail_on(&self, code: covfuzz_chain::PanicCode) -> bool {
        use covfuzz_chain::PanicCode::*;
        match code {
            Assertion => self.fail_on_assertion,
            ArithmeticOverflow => self.fail_on_arithmetic_underflow,
            DivisionByZero => self.fail_on_divide_by_zero,
            EnumConversionOutOfBounds => self.fail_on_enum_type_conversion_out_of_bounds,
            IncorrectStorageAccess => self.fail_on_incorrect_storage_access,
            PopEmptyArray => self.fail_on_pop_empty_array,
            OutOfBoundsArrayAccess => self.fail_on_out_of_bounds_array_access,
            AllocateTooMuchMemory => self.fail_on_allocate_too_much_memory,
            CallUninitializedVariable => self.fail_on_call_uninitialized_variable,
            CompilerInsertedPanic => self.fail_on_compiler_inserted_panic,
            Other(_) => false,
        }
    }
}

/// Assertion-test provider toggle, view-method inclusion, and panic-code semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionTestConfig {
    pub enabled: bool,
    pub test_view_methods: bool,
    pub panic_codes: PanicCodeConfig,
}

impl Default for AssertionTestConfig {
    fn default() -> Self {
        Self { enabled: true, test_view_methods: false, panic_codes: PanicCodeConfig::default() }
    }
}

/// How many calls in a failing sequence receive execution traces (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verbosity {
    Verbose,
    VeryVerbose,
    VeryVeryVerbose,
}

/// A constructor-argument value, as read from configuration (`spec.md` §6). The special
/// `DeployedContract` form is resolved to a concrete address only after deployment ordering is
/// known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstructorArgValue {
    String(String),
    Bytes(alloy_primitives::Bytes),
    Nested(BTreeMap<String, ConstructorArgValue>),
    DeployedContract(String),
}

/// The complete, validated configuration a `Fuzzer` is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzerConfig {
    pub worker: WorkerConfig,
    pub corpus: CorpusConfig,
    pub property_testing: PropertyTestConfig,
    pub assertion_testing: AssertionTestConfig,

    pub sender_addresses: Vec<Address>,
    pub deployer_address: Address,
    pub deployment_order: Vec<String>,
    pub constructor_args: BTreeMap<String, BTreeMap<String, ConstructorArgValue>>,
    pub target_contracts_balances: BTreeMap<String, U256>,

    pub stop_on_failed_test: bool,
    pub stop_on_no_tests: bool,
    pub test_all_contracts: bool,
    pub verbosity: Verbosity,
    pub target_function_signatures: Vec<String>,
    pub exclude_function_signatures: Vec<String>,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            corpus: CorpusConfig::default(),
            property_testing: PropertyTestConfig::default(),
            assertion_testing: AssertionTestConfig::default(),
            sender_addresses: Vec::new(),
            deployer_address: Address::ZERO,
            deployment_order: Vec::new(),
            constructor_args: BTreeMap::new(),
            target_contracts_balances: BTreeMap::new(),
            stop_on_failed_test: false,
            stop_on_no_tests: true,
            test_all_contracts: false,
            verbosity: Verbosity::Verbose,
            target_function_signatures: Vec::new(),
            exclude_function_signatures: Vec::new(),
        }
    }
}

impl FuzzerConfig {
    /// Validates configuration before a `Fuzzer` is built; out-of-range values are configuration
    /// errors, never discovered mid-run (`spec.md` §7: "the Fuzzer never starts").
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.workers == 0 {
            return Err(ConfigError::MustBePositive { field: "worker.workers", value: 0 });
        }
        if self.worker.call_sequence_length == 0 {
            return Err(ConfigError::MustBePositive { field: "worker.call_sequence_length", value: 0 });
        }
        if self.worker.worker_reset_limit == 0 {
            return Err(ConfigError::MustBePositive { field: "worker.worker_reset_limit", value: 0 });
        }
        if self.sender_addresses.is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "sender_addresses",
                reason: "at least one sender is required".to_string(),
            });
        }
        if self.deployment_order.is_empty() && !self.test_all_contracts {
            return Err(ConfigError::OutOfRange {
                field: "deployment_order",
                reason: "empty with test_all_contracts disabled; nothing would ever be deployed".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> FuzzerConfig {
        let mut cfg = FuzzerConfig::default();
        cfg.sender_addresses.push(Address::repeat_byte(1));
        cfg.deployment_order.push("Target".to_string());
        cfg
    }

    #[test]
    fn default_config_is_invalid_without_senders_and_deployments() {
        assert!(FuzzerConfig::default().validate().is_err());
    }

    #[test]
    fn minimally_populated_config_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut cfg = valid_config();
        cfg.worker.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_call_sequence_length_is_rejected() {
        let mut cfg = valid_config();
        cfg.worker.call_sequence_length = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_all_contracts_allows_empty_deployment_order() {
        let mut cfg = valid_config();
        cfg.deployment_order.clear();
        cfg.test_all_contracts = true;
        assert!(cfg.validate().is_ok());
    }
}
