//! Failure reporting, supplemented from the teacher's `FuzzTestResult`/`BaseCounterExample`
//! shape (`SPEC_FULL.md` §2.5): a decoded revert reason, panic code, and optional trace attached
//! to a failed `TestCase`, plus a human-`Display`-able rendering of one counterexample call.

use alloy_primitives::hex;
use covfuzz_chain::{CallSequence, CallSequenceElement};
use covfuzz_trace::ExecutionTrace;
use covfuzz_values::AbiValue;
use std::fmt;

/// Attached to a failed `TestCase` once its sequence has finished shrinking.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub sequence: CallSequence,
    pub revert_reason: Option<String>,
    pub panic_code: Option<u8>,
    pub trace: Option<ExecutionTrace>,
}

impl FailureReport {
    pub fn new(sequence: CallSequence, revert_reason: Option<String>, panic_code: Option<u8>, trace: Option<ExecutionTrace>) -> Self {
        Self { sequence, revert_reason, panic_code, trace }
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.sequence.elements.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", CounterExampleCall(element))?;
        }
        if let Some(reason) = &self.revert_reason {
            write!(f, "\n  revert: {reason}")?;
        }
        if let Some(code) = self.panic_code {
            write!(f, "\n  panic: 0x{code:02x}")?;
        }
        Ok(())
    }
}

/// One call of a counterexample sequence, rendered `sender=... addr=... calldata=method(args)`
/// in the style of the teacher's `BaseCounterExample` display.
struct CounterExampleCall<'a>(&'a CallSequenceElement);

impl fmt::Display for CounterExampleCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let element = self.0;
        write!(f, "sender={} addr={} calldata=", element.call.sender, element.contract_reference)?;
        write_call(f, &element.call.arguments)
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, arguments: &[AbiValue]) -> fmt::Result {
    write!(f, "(")?;
    for (i, arg) in arguments.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_value(f, arg)?;
    }
    write!(f, ")")
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &AbiValue) -> fmt::Result {
    match value {
        AbiValue::Address(a) => write!(f, "{a}"),
        AbiValue::Bool(b) => write!(f, "{b}"),
        AbiValue::Uint(v, _) => write!(f, "{v}"),
        AbiValue::Int(v, _) => write!(f, "{v}"),
        AbiValue::String(s) => write!(f, "{s:?}"),
        AbiValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        AbiValue::FixedBytes(b, _) => write!(f, "0x{}", hex::encode(b)),
        AbiValue::Array(items) | AbiValue::FixedArray(items) | AbiValue::Tuple(items) => write_call(f, items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use covfuzz_chain::CallMessage;

    fn element_with_args(arguments: Vec<AbiValue>) -> CallSequenceElement {
        let call = CallMessage {
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            value: U256::ZERO,
            gas_limit: 100_000,
            gas_price: U256::from(1u8),
            nonce: 0,
            input: Bytes::new(),
            arguments,
        };
        CallSequenceElement::new(Address::repeat_byte(2), call, 0, 0)
    }

    #[test]
    fn displays_sender_and_address() {
        let element = element_with_args(vec![AbiValue::Uint(U256::from(42u8), 256)]);
        let rendered = CounterExampleCall(&element).to_string();
        assert!(rendered.contains("sender="));
        assert!(rendered.contains("addr="));
        assert!(rendered.contains("(42)"));
    }

    #[test]
    fn report_appends_revert_reason_and_panic_code() {
        let mut sequence = CallSequence::new();
        sequence.push(element_with_args(vec![]));
        let report = FailureReport::new(sequence, Some("assertion failed".to_string()), Some(0x01), None);
        let rendered = report.to_string();
        assert!(rendered.contains("revert: assertion failed"));
        assert!(rendered.contains("panic: 0x01"));
    }
}
