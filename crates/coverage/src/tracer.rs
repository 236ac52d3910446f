//! `CoverageTracer`: `spec.md` §4.2.

use crate::{error::CoverageError, hash::resolve_code_hash, map::CoverageMaps};
use alloy_primitives::B256;

/// The VM's step-hook contract: called once per executed opcode. A concrete VM implementation
/// (external to this crate, per `spec.md` §1) drives this; `CoverageTracer` is one implementor.
pub trait StepHook {
    /// `raw_code_hash` is whatever hash the VM already computed for `code` (e.g. keccak of the
    /// full deployed bytecode including metadata); the tracer only recomputes the *resolved*
    /// code hash when this changes, per `spec.md` §4.2's caching requirement.
    fn on_step(&mut self, pc: usize, code: &[u8], raw_code_hash: B256) -> Result<(), CoverageError>;
}

/// Attaches to a single execution, accumulating coverage into a local [`CoverageMaps`] that the
/// caller later merges into the global one via [`CoverageMaps::update`].
pub struct CoverageTracer {
    local: CoverageMaps,
    cached_raw_hash: Option<B256>,
    cached_resolved_hash: B256,
}

impl Default for CoverageTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageTracer {
    pub fn new() -> Self {
        Self { local: CoverageMaps::new(), cached_raw_hash: None, cached_resolved_hash: B256::ZERO }
    }

    pub fn coverage(&self) -> &CoverageMaps {
        &self.local
    }

    pub fn into_coverage(self) -> CoverageMaps {
        self.local
    }

    pub fn reset(&mut self) {
        self.local.reset();
    }
}

impl StepHook for CoverageTracer {
    fn on_step(&mut self, pc: usize, code: &[u8], raw_code_hash: B256) -> Result<(), CoverageError> {
        if self.cached_raw_hash != Some(raw_code_hash) {
            self.cached_resolved_hash = resolve_code_hash(code);
            self.cached_raw_hash = Some(raw_code_hash);
        }
        self.local.set_covered_at(self.cached_resolved_hash, code.len(), pc)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_resolved_hash_across_steps_with_same_raw_hash() {
        let mut tracer = CoverageTracer::new();
        let code = vec![0u8; 16];
        let raw_hash = B256::repeat_byte(7);
        tracer.on_step(0, &code, raw_hash).unwrap();
        let first_resolved = tracer.cached_resolved_hash;
        tracer.on_step(1, &code, raw_hash).unwrap();
        assert_eq!(tracer.cached_resolved_hash, first_resolved);
        assert_eq!(tracer.coverage().total_covered(), 2);
    }

    #[test]
    fn recomputes_when_raw_hash_changes() {
        let mut tracer = CoverageTracer::new();
        let code_a = vec![0u8; 8];
        let code_b = vec![1u8; 12];
        tracer.on_step(0, &code_a, B256::repeat_byte(1)).unwrap();
        let resolved_a = tracer.cached_resolved_hash;
        tracer.on_step(0, &code_b, B256::repeat_byte(2)).unwrap();
        assert_ne!(tracer.cached_resolved_hash, resolved_a);
    }
}
