//! The `TestChain` contract the engine is built against.
//!
//! The VM/chain implementation itself is an external collaborator (`spec.md` §1): this crate
//! only states the interface a worker needs — clone, submit, revert, head — and leaves opcode
//! semantics, gas accounting, and state trie details to whatever concrete chain is plugged in.

use crate::{
    error::ChainError,
    event::EventBus,
    model::{CallMessage, ChainReference, DeployedContract, MessageResult},
};
use alloy_primitives::Address;
use covfuzz_coverage::CoverageMaps;
use covfuzz_trace::ExecutionTrace;

/// An in-memory instance of the VM with its block history, state trie, and pending block.
///
/// A `TestChain` is cloned once per worker from an immutable base (`spec.md` §5: "immutable
/// after setup; workers call a `clone` that returns an independent chain"). No method here
/// takes `&self` across a clone boundary — every worker owns its clone outright, with no
/// locking.
pub trait TestChain: Sized + Send {
    /// Returns an independent copy of this chain, inheriting its current deployments and state.
    /// Callers subscribe the clone to whatever events they need via `subscribe` afterward.
    fn clone_chain(&self) -> Self;

    /// The current block number (chain head).
    fn head(&self) -> u64;

    /// The current block's timestamp.
    fn timestamp(&self) -> u64;

    /// Registers `bus` to receive this chain's lifecycle events (deployment added/removed).
    fn subscribe(&mut self, bus: EventBus);

    /// Opens a new pending block, `number_delay` blocks and `timestamp_delay` seconds after the
    /// current head. A `number_delay` of zero appends to the still-open pending block instead
    /// (`spec.md` §4.5); callers are responsible for applying the "clamp number delay up to
    /// timestamp delay" policy (`spec.md` §9) before calling this.
    fn begin_block(&mut self, number_delay: u64, timestamp_delay: u64) -> Result<(), ChainError>;

    /// Appends `message` as a transaction in the currently open pending block.
    fn submit(&mut self, message: CallMessage) -> Result<MessageResult, ChainError>;

    /// Evaluates `message` without mutating state or appending it to a block (used for property
    /// checks, which must not themselves advance the chain).
    fn call_read_only(&self, message: &CallMessage) -> Result<MessageResult, ChainError>;

    /// Seals the currently open pending block, returning where it landed.
    fn commit_block(&mut self) -> Result<ChainReference, ChainError>;

    /// Reverts chain state back to `block_number`, which must not be after the current head.
    fn revert_to(&mut self, block_number: u64) -> Result<(), ChainError>;

    /// The contracts currently known to be deployed on this chain.
    fn deployed_contracts(&self) -> &[DeployedContract];

    /// Looks up a deployment by address, if any.
    fn deployed_contract(&self, address: Address) -> Option<&DeployedContract> {
        self.deployed_contracts().iter().find(|c| c.address == address)
    }

    /// Coverage accumulated by this chain's internal tracer since the last call to this method
    /// (or since the chain was created), per `spec.md` §4.2/§9 "Execution tracer attachment":
    /// a concrete chain drives its own `StepHook` internally and exposes the result here so the
    /// worker can merge it into the `Corpus`'s global map without knowing the VM's step-hook
    /// wiring. Chains built with coverage disabled return an empty map.
    fn take_coverage(&mut self) -> CoverageMaps {
        CoverageMaps::new()
    }

    /// Turns step-level trace capture on or off for whatever calls follow, per `spec.md` §9
    /// "Execution tracer attachment": a concrete chain drives its own `StepTracer` internally and
    /// only pays the cost while enabled. Chains that don't implement tracing are a no-op here and
    /// always return `None` from `take_trace`.
    fn set_tracing_enabled(&mut self, _enabled: bool) {}

    /// The trace accumulated while tracing was enabled since the last call to this method, if
    /// the concrete chain supports it.
    fn take_trace(&mut self) -> Option<ExecutionTrace> {
        None
    }
}
