//! Fixture builders shared across engine test suites.

use alloy_json_abi::JsonAbi;
use alloy_primitives::Bytes;
use covfuzz_chain::ContractDefinition;

/// A minimal named contract with an empty ABI and a short, distinguishable bytecode — enough to
/// drive `DeployedContract`/`CallSequence` plumbing in tests that don't need real opcode
/// semantics.
pub fn sample_contract_definition(name: &str) -> ContractDefinition {
    let init_code = Bytes::from(vec![0x60, 0x00, 0x60, 0x00]);
    let deployed_code = Bytes::from(vec![0x00; 16]);
    ContractDefinition::new(name.to_string(), JsonAbi::default(), init_code, deployed_code)
}
