//! `CoverageMap` / `CoverageMaps`: `spec.md` §4.1.

use crate::error::CoverageError;
use ahash::AHashMap;
use alloy_primitives::B256;

/// A fixed-length byte vector, one byte per program counter of a given bytecode. A byte is `1`
/// once that offset has been executed at least once; bytes only ever transition 0→1 (`spec.md`
/// §3 key invariants, §8 property 1).
#[derive(Debug, Clone)]
pub struct CoverageMap {
    covered: Vec<u8>,
}

impl CoverageMap {
    pub fn new(code_len: usize) -> Self {
        Self { covered: vec![0u8; code_len] }
    }

    pub fn len(&self) -> usize {
        self.covered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    /// Count of covered program counters, used by pruning to compare incremental contributions.
    pub fn covered_count(&self) -> usize {
        self.covered.iter().filter(|&&b| b != 0).count()
    }

    fn set_at(&mut self, pc: usize) -> Result<bool, CoverageError> {
        let byte = self.covered.get_mut(pc).ok_or(CoverageError::PcOutOfBounds { pc, len: self.covered.len() })?;
        let changed = *byte == 0;
        *byte = 1;
        Ok(changed)
    }

    /// OR-merges `other` into `self` byte-wise; returns whether anything changed. Panics if
    /// lengths differ — callers keyed by the same resolved code hash are guaranteed equal-length
    /// maps (same runtime code).
    fn merge(&mut self, other: &CoverageMap) -> bool {
        assert_eq!(self.covered.len(), other.covered.len(), "coverage maps for the same code hash must share length");
        let mut changed = false;
        for (a, b) in self.covered.iter_mut().zip(other.covered.iter()) {
            if *b != 0 && *a == 0 {
                *a = 1;
                changed = true;
            }
        }
        changed
    }

    pub fn reset(&mut self) {
        self.covered.iter_mut().for_each(|b| *b = 0);
    }
}

/// `code_hash -> CoverageMap`. Owned globally by the `Corpus` and, independently, per execution
/// by a `CoverageTracer` (`spec.md` §3).
#[derive(Debug, Clone, Default)]
pub struct CoverageMaps {
    maps: AHashMap<B256, CoverageMap>,
}

impl CoverageMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code_hash: &B256) -> Option<&CoverageMap> {
        self.maps.get(code_hash)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Total number of set bytes across all maps, used to check monotonicity (`spec.md` §8
    /// property 1).
    pub fn total_covered(&self) -> usize {
        self.maps.values().map(CoverageMap::covered_count).sum()
    }

    /// Lazily creates the map for `code_hash` (sized `code_len`) and marks `pc` covered. Returns
    /// whether the map was newly created or the byte transitioned 0→1. The zero code hash
    /// (contract-deployment frames) is excluded per `spec.md` §4.1.
    pub fn set_covered_at(&mut self, code_hash: B256, code_len: usize, pc: usize) -> Result<bool, CoverageError> {
        if code_hash.is_zero() {
            return Ok(false);
        }
        let is_new_map = !self.maps.contains_key(&code_hash);
        let map = self.maps.entry(code_hash).or_insert_with(|| CoverageMap::new(code_len));
        let byte_changed = map.set_at(pc)?;
        Ok(is_new_map || byte_changed)
    }

    /// OR-merges `other` into `self`: shared code hashes merge byte-wise, unseen ones are
    /// imported wholesale. Returns whether anything changed.
    pub fn update(&mut self, other: &CoverageMaps) -> bool {
        let mut changed = false;
        for (hash, map) in &other.maps {
            match self.maps.get_mut(hash) {
                Some(existing) => {
                    if existing.merge(map) {
                        changed = true;
                    }
                }
                None => {
                    self.maps.insert(*hash, map.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn reset(&mut self) {
        for map in self.maps.values_mut() {
            map.reset();
        }
    }
}
