//! `FakeChain`: a scripted, in-memory `TestChain` so engine tests never need a real VM.

use alloy_primitives::{Address, B256};
use covfuzz_chain::{
    CallMessage, ChainError, ChainReference, DeployedContract, Event, EventBus, MessageResult, TestChain,
};
use covfuzz_coverage::{CoverageMaps, CoverageTracer, StepHook};
use covfuzz_trace::{ExecutionTrace, ExecutionTraceBuilder, StepTracer};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct ScriptedCall {
    result: MessageResult,
    covered_pcs: Vec<usize>,
    code_hash: B256,
    code_len: usize,
}

/// A scripted table of `(target, selector) -> MessageResult`, plus a deployment table and a
/// `CoverageTracer` driven by whatever program counters the script names for that call.
pub struct FakeChain {
    head: u64,
    timestamp: u64,
    pending_open: bool,
    next_tx_index: u64,
    deployments: Vec<DeployedContract>,
    script: HashMap<(Address, [u8; 4]), ScriptedCall>,
    bus: Option<EventBus>,
    tracer: Mutex<CoverageTracer>,
    tracing_enabled: bool,
    trace_builder: ExecutionTraceBuilder,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            head: 0,
            timestamp: 0,
            pending_open: false,
            next_tx_index: 0,
            deployments: Vec::new(),
            script: HashMap::new(),
            bus: None,
            tracer: Mutex::new(CoverageTracer::new()),
            tracing_enabled: false,
            trace_builder: ExecutionTraceBuilder::new(),
        }
    }

    /// Registers a deployment, emitting `ContractDeploymentAdded` on the subscribed bus, if any.
    pub fn register_deployment(&mut self, contract: DeployedContract) {
        self.deployments.push(contract.clone());
        if let Some(bus) = &mut self.bus {
            let _ = bus.emit(Event::ContractDeploymentAdded(std::sync::Arc::new(contract)));
        }
    }

    pub fn deregister_deployment(&mut self, address: Address) {
        if let Some(pos) = self.deployments.iter().position(|d| d.address == address) {
            let removed = self.deployments.remove(pos);
            if let Some(bus) = &mut self.bus {
                let _ = bus.emit(Event::ContractDeploymentRemoved(std::sync::Arc::new(removed)));
            }
        }
    }

    /// Scripts the result of calling `target` with `selector`; `covered_pcs` are fed to the
    /// internal `CoverageTracer` on every such call, as if a real VM's step hook had fired.
    pub fn script_call(
        &mut self,
        target: Address,
        selector: [u8; 4],
        result: MessageResult,
        covered_pcs: Vec<usize>,
        code_hash: B256,
        code_len: usize,
    ) {
        self.script.insert((target, selector), ScriptedCall { result, covered_pcs, code_hash, code_len });
    }

    pub fn take_coverage(&self) -> CoverageMaps {
        self.tracer.lock().coverage().clone()
    }

    pub fn reset_coverage(&self) {
        self.tracer.lock().reset();
    }

    fn selector_of(input: &[u8]) -> [u8; 4] {
        let mut sel = [0u8; 4];
        let n = input.len().min(4);
        sel[..n].copy_from_slice(&input[..n]);
        sel
    }

    fn lookup(&self, target: Address, input: &[u8]) -> MessageResult {
        let selector = Self::selector_of(input);
        match self.script.get(&(target, selector)) {
            Some(scripted) => scripted.result.clone(),
            None => MessageResult {
                success: true,
                gas_used: 21_000,
                return_data: Default::default(),
                revert_reason: None,
                panic_code: None,
                invalid_opcode: false,
            },
        }
    }
}

impl TestChain for FakeChain {
    fn clone_chain(&self) -> Self {
        Self {
            head: self.head,
            timestamp: self.timestamp,
            pending_open: false,
            next_tx_index: 0,
            deployments: self.deployments.clone(),
            script: self.script.clone(),
            bus: None,
            tracer: Mutex::new(CoverageTracer::new()),
            tracing_enabled: false,
            trace_builder: ExecutionTraceBuilder::new(),
        }
    }

    fn head(&self) -> u64 {
        self.head
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn subscribe(&mut self, bus: EventBus) {
        self.bus = Some(bus);
    }

    fn begin_block(&mut self, number_delay: u64, timestamp_delay: u64) -> Result<(), ChainError> {
        if number_delay == 0 {
            self.pending_open = true;
            return Ok(());
        }
        if self.pending_open {
            self.commit_block()?;
        }
        self.head += number_delay;
        self.timestamp += timestamp_delay.max(1);
        self.pending_open = true;
        Ok(())
    }

    fn submit(&mut self, message: CallMessage) -> Result<MessageResult, ChainError> {
        if !self.pending_open {
            return Err(ChainError::BlockCreationFailed("submit called with no open pending block".to_string()));
        }
        let scripted = self.script.get(&(message.target, Self::selector_of(&message.input))).cloned();
        let selector = Self::selector_of(&message.input);
        let result = self.lookup(message.target, &message.input);
        if self.tracing_enabled {
            self.trace_builder.on_call_start(message.target, Some(selector), 0);
        }
        if let Some(scripted) = &scripted {
            let mut tracer = self.tracer.lock();
            for &pc in &scripted.covered_pcs {
                tracer.on_step(pc, &vec![0u8; scripted.code_len], scripted.code_hash).map_err(|e| {
                    ChainError::StateCorrupted(format!("coverage tracer failure: {e}"))
                })?;
                if self.tracing_enabled {
                    self.trace_builder.on_step(pc);
                }
            }
        }
        if self.tracing_enabled {
            self.trace_builder.on_call_end(result.success, result.gas_used);
        }
        self.next_tx_index += 1;
        Ok(result)
    }

    fn call_read_only(&self, message: &CallMessage) -> Result<MessageResult, ChainError> {
        Ok(self.lookup(message.target, &message.input))
    }

    fn commit_block(&mut self) -> Result<ChainReference, ChainError> {
        let reference = ChainReference { block_number: self.head, transaction_index: self.next_tx_index };
        self.pending_open = false;
        self.next_tx_index = 0;
        Ok(reference)
    }

    fn revert_to(&mut self, block_number: u64) -> Result<(), ChainError> {
        if block_number > self.head {
            return Err(ChainError::RevertFailed {
                target: block_number,
                reason: "cannot revert forward".to_string(),
            });
        }
        self.head = block_number;
        self.pending_open = false;
        self.next_tx_index = 0;
        Ok(())
    }

    fn deployed_contracts(&self) -> &[DeployedContract] {
        &self.deployments
    }

    fn take_coverage(&mut self) -> CoverageMaps {
        let coverage = self.tracer.lock().coverage().clone();
        self.tracer.lock().reset();
        coverage
    }

    fn set_tracing_enabled(&mut self, enabled: bool) {
        self.tracing_enabled = enabled;
    }

    fn take_trace(&mut self) -> Option<ExecutionTrace> {
        Some(std::mem::take(&mut self.trace_builder).finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_contract_definition;
    use alloy_primitives::{Bytes, U256};
    use std::sync::Arc;

    fn message(target: Address, selector: [u8; 4]) -> CallMessage {
        CallMessage {
            sender: Address::repeat_byte(1),
            target,
            value: U256::ZERO,
            gas_limit: 100_000,
            gas_price: U256::from(1u8),
            nonce: 0,
            input: Bytes::from(selector.to_vec()),
            arguments: Vec::new(),
        }
    }

    #[test]
    fn unscripted_calls_default_to_success() {
        let mut chain = FakeChain::new();
        chain.begin_block(1, 1).unwrap();
        let result = chain.submit(message(Address::repeat_byte(2), [0, 0, 0, 0])).unwrap();
        assert!(result.success);
    }

    #[test]
    fn scripted_call_drives_coverage() {
        let mut chain = FakeChain::new();
        let code_hash = B256::repeat_byte(5);
        chain.script_call(
            Address::repeat_byte(2),
            [1, 2, 3, 4],
            MessageResult { success: true, gas_used: 5000, return_data: Bytes::new(), revert_reason: None, panic_code: None, invalid_opcode: false },
            vec![0, 1, 2],
            code_hash,
            10,
        );
        chain.begin_block(1, 1).unwrap();
        chain.submit(message(Address::repeat_byte(2), [1, 2, 3, 4])).unwrap();
        assert_eq!(chain.take_coverage().total_covered(), 3);
    }

    #[test]
    fn revert_forward_is_rejected() {
        let mut chain = FakeChain::new();
        chain.begin_block(5, 5).unwrap();
        chain.commit_block().unwrap();
        assert!(chain.revert_to(100).is_err());
        assert!(chain.revert_to(0).is_ok());
    }

    #[test]
    fn register_deployment_emits_event() {
        let mut chain = FakeChain::new();
        let mut bus = EventBus::new();
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen_clone = seen.clone();
        bus.subscribe(move |event| {
            if matches!(event, Event::ContractDeploymentAdded(_)) {
                seen_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(())
        });
        chain.subscribe(bus);
        let definition = Arc::new(sample_contract_definition("Target"));
        chain.register_deployment(DeployedContract { definition, address: Address::repeat_byte(9) });
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
