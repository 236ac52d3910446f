//! Structural execution traces.
//!
//! Traces are expensive, so the engine attaches this hook **only** to the final, shrunken
//! failing sequence (and to earlier calls when verbosity demands it) — never to every call of
//! every generated sequence, which is what the coverage hook is for (`spec.md` §9, "Execution
//! tracer attachment"). Decoding/symbolicating a trace against compiled artifacts for display is
//! a reporting concern and stays out of this crate; it only holds the structural record a
//! `FailureReport` carries.

use alloy_primitives::Address;

/// One executed opcode within a call, as observed by a [`StepTracer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStep {
    pub pc: usize,
}

/// One call within an execution trace: which contract, what selector, whether it succeeded, and
/// the steps executed inside it.
#[derive(Debug, Clone)]
pub struct CallTrace {
    pub contract: Address,
    pub selector: Option<[u8; 4]>,
    pub depth: usize,
    pub success: bool,
    pub gas_used: u64,
    pub steps: Vec<TraceStep>,
}

/// The full trace of one `CallSequence`'s execution: one `CallTrace` per element.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    pub calls: Vec<CallTrace>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_steps(&self) -> usize {
        self.calls.iter().map(|c| c.steps.len()).sum()
    }
}

/// The VM's trace-hook contract, separate from the coverage `StepHook` (`spec.md` §9): a
/// concrete VM drives this only for calls the engine has chosen to trace.
pub trait StepTracer {
    fn on_call_start(&mut self, contract: Address, selector: Option<[u8; 4]>, depth: usize);
    fn on_step(&mut self, pc: usize);
    fn on_call_end(&mut self, success: bool, gas_used: u64);
}

/// Accumulates a full [`ExecutionTrace`] by implementing [`StepTracer`].
#[derive(Debug, Default)]
pub struct ExecutionTraceBuilder {
    trace: ExecutionTrace,
    open: Vec<CallTrace>,
}

impl ExecutionTraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> ExecutionTrace {
        self.trace
    }
}

impl StepTracer for ExecutionTraceBuilder {
    fn on_call_start(&mut self, contract: Address, selector: Option<[u8; 4]>, depth: usize) {
        self.open.push(CallTrace { contract, selector, depth, success: false, gas_used: 0, steps: Vec::new() });
    }

    fn on_step(&mut self, pc: usize) {
        if let Some(current) = self.open.last_mut() {
            current.steps.push(TraceStep { pc });
        }
    }

    fn on_call_end(&mut self, success: bool, gas_used: u64) {
        if let Some(mut current) = self.open.pop() {
            current.success = success;
            current.gas_used = gas_used;
            self.trace.calls.push(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_trace_across_nested_calls() {
        let mut builder = ExecutionTraceBuilder::new();
        builder.on_call_start(Address::repeat_byte(1), Some([0xde, 0xad, 0xbe, 0xef]), 0);
        builder.on_step(0);
        builder.on_step(1);
        builder.on_call_start(Address::repeat_byte(2), None, 1);
        builder.on_step(0);
        builder.on_call_end(true, 100);
        builder.on_call_end(false, 500);

        let trace = builder.finish();
        assert_eq!(trace.calls.len(), 2);
        // Inner call finished (and was pushed) first.
        assert_eq!(trace.calls[0].contract, Address::repeat_byte(2));
        assert!(trace.calls[0].success);
        assert_eq!(trace.calls[1].contract, Address::repeat_byte(1));
        assert!(!trace.calls[1].success);
        assert_eq!(trace.total_steps(), 3);
    }
}
