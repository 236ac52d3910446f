//! Core data model: the entities in `spec.md` §3 that the engine is built against.

use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use covfuzz_values::AbiValue;
use std::sync::Arc;

/// How an ABI method is classified for the purposes of testing and generation.
///
/// A method can be more than one of these at once (e.g. a pure getter is both a candidate for
/// property-test selection, if its name matches a configured prefix, and excluded from
/// state-changing call generation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodClassification {
    pub is_property_test: bool,
    pub is_assertion_test: bool,
    pub is_optimization_test: bool,
    pub is_state_changing: bool,
    pub is_pure: bool,
}

/// A compiled contract: its ABI plus init/deployed bytecode, immutable for the life of a run.
///
/// Owned by the `Fuzzer` and shared (via `Arc`) with every worker; workers only ever read it.
#[derive(Debug, Clone)]
pub struct ContractDefinition {
    pub name: String,
    pub abi: JsonAbi,
    pub init_code: Bytes,
    pub deployed_code: Bytes,
    classifications: Vec<(Function, MethodClassification)>,
}

impl ContractDefinition {
    pub fn new(name: String, abi: JsonAbi, init_code: Bytes, deployed_code: Bytes) -> Self {
        Self { name, abi, init_code, deployed_code, classifications: Vec::new() }
    }

    /// Records how a given ABI method was classified (property/assertion/optimization test,
    /// state-changing, pure). Called once per method during startup classification (`spec.md`
    /// §4.7 step 2).
    pub fn classify_method(&mut self, method: Function, classification: MethodClassification) {
        self.classifications.push((method, classification));
    }

    pub fn methods(&self) -> impl Iterator<Item = &(Function, MethodClassification)> {
        self.classifications.iter()
    }

    pub fn property_test_methods(&self) -> impl Iterator<Item = &Function> {
        self.classifications.iter().filter(|(_, c)| c.is_property_test).map(|(f, _)| f)
    }

    pub fn assertion_test_methods(&self) -> impl Iterator<Item = &Function> {
        self.classifications.iter().filter(|(_, c)| c.is_assertion_test).map(|(f, _)| f)
    }

    pub fn state_changing_methods(&self) -> impl Iterator<Item = &Function> {
        self.classifications.iter().filter(|(_, c)| c.is_state_changing).map(|(f, _)| f)
    }
}

/// A `ContractDefinition` matched to an on-chain address: one worker's view of a deployment.
#[derive(Debug, Clone)]
pub struct DeployedContract {
    pub definition: Arc<ContractDefinition>,
    pub address: Address,
}

/// A single contract-method invocation, the building block of a `CallSequence`.
#[derive(Debug, Clone)]
pub struct CallMessage {
    pub sender: Address,
    pub target: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub nonce: u64,
    pub input: Bytes,
    /// ABI-decoded argument values, kept alongside the raw `input` for mutation and for
    /// human-readable corpus serialization (`spec.md` §6 corpus file schema).
    pub arguments: Vec<AbiValue>,
}

impl CallMessage {
    /// A deterministic hash of the message's content, used by `CallSequence::hash` (`spec.md` §8
    /// property 3: sequence hash determinism is defined over `(delays, message_tx_hash)`).
    pub fn message_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(64 + self.input.len());
        buf.extend_from_slice(self.sender.as_slice());
        buf.extend_from_slice(self.target.as_slice());
        buf.extend_from_slice(&self.value.to_be_bytes::<32>());
        buf.extend_from_slice(&self.gas_limit.to_be_bytes());
        buf.extend_from_slice(&self.gas_price.to_be_bytes::<32>());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.input);
        keccak256(&buf)
    }
}

/// Where in the chain's history a `CallSequenceElement` actually landed, filled in during
/// execution (not known at generation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReference {
    pub block_number: u64,
    pub transaction_index: u64,
}

/// One element of a `CallSequence`: a message plus the block pacing that precedes it.
#[derive(Debug, Clone)]
pub struct CallSequenceElement {
    /// Index of the `DeployedContract` this call targets, within the worker's deployment table.
    pub contract_reference: Address,
    pub call: CallMessage,
    pub block_number_delay: u64,
    pub block_timestamp_delay: u64,
    pub chain_reference: Option<ChainReference>,
}

impl CallSequenceElement {
    pub fn new(contract_reference: Address, call: CallMessage, block_number_delay: u64, block_timestamp_delay: u64) -> Self {
        Self { contract_reference, call, block_number_delay, block_timestamp_delay, chain_reference: None }
    }
}

/// An ordered, hashable sequence of calls: the fuzzer's unit of input.
#[derive(Debug, Clone, Default)]
pub struct CallSequence {
    pub elements: Vec<CallSequenceElement>,
}

impl CallSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push(&mut self, element: CallSequenceElement) {
        self.elements.push(element);
    }

    /// A sequence up to (and including) `index`, used when checking coverage "so far" during
    /// execution (`spec.md` §4.5).
    pub fn prefix(&self, index: usize) -> Self {
        Self { elements: self.elements[..=index].to_vec() }
    }

    /// Content hash over `(block_number_delay, block_timestamp_delay, message_hash)` per element,
    /// order-sensitive. Two sequences with element-wise equal triples hash identically (`spec.md`
    /// §8 property 3), regardless of any other element field (e.g. `chain_reference`, which is
    /// filled in only after execution).
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.elements.len() * 72);
        for el in &self.elements {
            buf.extend_from_slice(&el.block_number_delay.to_be_bytes());
            buf.extend_from_slice(&el.block_timestamp_delay.to_be_bytes());
            buf.extend_from_slice(el.call.message_hash().as_slice());
        }
        keccak256(&buf)
    }
}

/// Solidity-style panic codes (a uint256 payload identifying the category of a reverting
/// failure), per `spec.md` GLOSSARY and §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicCode {
    Assertion,
    ArithmeticOverflow,
    DivisionByZero,
    EnumConversionOutOfBounds,
    IncorrectStorageAccess,
    PopEmptyArray,
    OutOfBoundsArrayAccess,
    AllocateTooMuchMemory,
    CallUninitializedVariable,
    CompilerInsertedPanic,
    /// Any panic code not in the recognized set above.
    Other(u8),
}

impl PanicCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Assertion,
            0x11 => Self::ArithmeticOverflow,
            0x12 => Self::DivisionByZero,
            0x21 => Self::EnumConversionOutOfBounds,
            0x22 => Self::IncorrectStorageAccess,
            0x31 => Self::PopEmptyArray,
            0x32 => Self::OutOfBoundsArrayAccess,
            0x41 => Self::AllocateTooMuchMemory,
            0x51 => Self::CallUninitializedVariable,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Assertion => 0x01,
            Self::ArithmeticOverflow => 0x11,
            Self::DivisionByZero => 0x12,
            Self::EnumConversionOutOfBounds => 0x21,
            Self::IncorrectStorageAccess => 0x22,
            Self::PopEmptyArray => 0x31,
            Self::OutOfBoundsArrayAccess => 0x32,
            Self::AllocateTooMuchMemory => 0x41,
            Self::CallUninitializedVariable => 0x51,
            Self::CompilerInsertedPanic => 0x50,
            Self::Other(code) => *code,
        }
    }

    /// Legacy invalid-opcode errors carry no panic code at all; treat them as assertion failures
    /// for backward compatibility, per `spec.md` §9's resolution of this ambiguity.
    pub fn from_legacy_invalid_opcode() -> Self {
        Self::Assertion
    }
}

/// The outcome of executing one `CallMessage`. VM execution failures are data here, not `Err`
/// (`spec.md` §7): only a failure to submit the transaction at all is a `ChainError`.
#[derive(Debug, Clone)]
pub struct MessageResult {
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Bytes,
    pub revert_reason: Option<String>,
    pub panic_code: Option<PanicCode>,
    /// Set when the VM reported a legacy invalid-opcode failure with no panic code attached.
    pub invalid_opcode: bool,
}

impl MessageResult {
    /// The panic code to use for assertion classification, folding the legacy invalid-opcode
    /// signal into `PanicCode::Assertion` per `spec.md` §9.
    pub fn effective_panic_code(&self) -> Option<PanicCode> {
        self.panic_code.or_else(|| self.invalid_opcode.then(PanicCode::from_legacy_invalid_opcode))
    }
}
