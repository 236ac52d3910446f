//! On-disk corpus file schema: `spec.md` §6 "Corpus on-disk layout".

use alloy_primitives::{Address, Bytes, U256};
use covfuzz_chain::{CallMessage, CallSequence, CallSequenceElement};
use serde::{Deserialize, Serialize};

/// An in-memory corpus member: a sequence, its sampling weight, and the file it lives in.
/// Immutable once added; only pruning removes entries (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub sequence: CallSequence,
    pub weight: u64,
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallMessageDto {
    sender: Address,
    to: Address,
    value: U256,
    gas: u64,
    gas_price: U256,
    nonce: u64,
    calldata: Bytes,
    /// `Debug`-formatted ABI values, carried purely for human editing (`spec.md` §6); replay
    /// reconstructs the message from `calldata`, not from this field.
    arguments: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallSequenceElementDto {
    contract: Address,
    call: CallMessageDto,
    block_number_delay: u64,
    block_timestamp_delay: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallSequenceFile {
    elements: Vec<CallSequenceElementDto>,
}

/// Serializes `sequence` to the JSON schema described in `spec.md` §6.
pub fn sequence_to_json(sequence: &CallSequence) -> serde_json::Result<Vec<u8>> {
    let file = CallSequenceFile {
        elements: sequence
            .elements
            .iter()
            .map(|el| CallSequenceElementDto {
                contract: el.contract_reference,
                call: CallMessageDto {
                    sender: el.call.sender,
                    to: el.call.target,
                    value: el.call.value,
                    gas: el.call.gas_limit,
                    gas_price: el.call.gas_price,
                    nonce: el.call.nonce,
                    calldata: el.call.input.clone(),
                    arguments: el.call.arguments.iter().map(|v| format!("{v:?}")).collect(),
                },
                block_number_delay: el.block_number_delay,
                block_timestamp_delay: el.block_timestamp_delay,
            })
            .collect(),
    };
    serde_json::to_vec_pretty(&file)
}

/// Parses a corpus file back into a replayable `CallSequence`. `arguments` is dropped; calldata
/// alone is authoritative for replay.
pub fn sequence_from_json(bytes: &[u8]) -> serde_json::Result<CallSequence> {
    let file: CallSequenceFile = serde_json::from_slice(bytes)?;
    let mut sequence = CallSequence::new();
    for el in file.elements {
        let call = CallMessage {
            sender: el.call.sender,
            target: el.call.to,
            value: el.call.value,
            gas_limit: el.call.gas,
            gas_price: el.call.gas_price,
            nonce: el.call.nonce,
            input: el.call.calldata,
            arguments: Vec::new(),
        };
        sequence.push(CallSequenceElement::new(el.contract, call, el.block_number_delay, el.block_timestamp_delay));
    }
    Ok(sequence)
}
