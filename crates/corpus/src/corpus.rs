//! `Corpus`: `spec.md` §4.8, concurrency discipline per §5.

use crate::{
    entry::{sequence_from_json, sequence_to_json, CorpusEntry},
    error::CorpusError,
};
use alloy_primitives::B256;
use covfuzz_chain::CallSequence;
use covfuzz_common::write_atomic;
use covfuzz_coverage::CoverageMaps;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const COVERAGE_SUBDIR: &str = "coverage";
const TEST_RESULTS_SUBDIR: &str = "test_results";

fn hash_file_name(hash: B256) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(68);
    for byte in hash.as_slice() {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out.push_str(".json");
    out
}

struct CorpusInner {
    coverage_entries: HashMap<B256, CorpusEntry>,
    test_result_entries: HashMap<B256, CorpusEntry>,
    coverage: CoverageMaps,
}

/// Persistent, weighted set of interesting call sequences plus the global coverage map.
///
/// All mutation goes through one `RwLock`-guarded inner struct; `check_sequence_coverage_and_update`
/// takes the write lock for the entire merge-then-insert operation, preserving the invariant that
/// an entry is added iff it contributed new coverage (`spec.md` §5).
pub struct Corpus {
    directory: PathBuf,
    inner: RwLock<CorpusInner>,
}

impl Corpus {
    /// Opens (creating if absent) a corpus directory with `coverage/` and `test_results/`
    /// subdirectories (`spec.md` §6).
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let directory = directory.into();
        for sub in [COVERAGE_SUBDIR, TEST_RESULTS_SUBDIR] {
            std::fs::create_dir_all(directory.join(sub))
                .map_err(|source| CorpusError::Write { path: directory.join(sub).display().to_string(), source })?;
        }
        Ok(Self {
            directory,
            inner: RwLock::new(CorpusInner {
                coverage_entries: HashMap::new(),
                test_result_entries: HashMap::new(),
                coverage: CoverageMaps::new(),
            }),
        })
    }

    /// Loads every `*.json` file under both subdirectories into memory, for the Fuzzer's
    /// startup replay pass (`spec.md` §4.7 step 7). Does not touch the in-memory coverage map;
    /// the caller replays each loaded sequence and feeds coverage back via
    /// `check_sequence_coverage_and_update`.
    ///
    /// A corrupted entry (unreadable or unparsable) is `warn!`-logged and skipped unless
    /// `stop_on_corrupted` is set, in which case it is returned as the first error encountered
    /// (`spec.md` §4.10/§7).
    pub fn load_from_disk(&self, stop_on_corrupted: bool) -> Result<usize, CorpusError> {
        let mut loaded = 0;
        let mut inner = self.inner.write();
        for (sub, is_test_result) in [(COVERAGE_SUBDIR, false), (TEST_RESULTS_SUBDIR, true)] {
            let dir = self.directory.join(sub);
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            for file in read_dir {
                let file = file.map_err(|source| CorpusError::Read { path: dir.display().to_string(), source })?;
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(source) => {
                        let err = CorpusError::Read { path: path.display().to_string(), source };
                        if stop_on_corrupted {
                            return Err(err);
                        }
                        tracing::warn!(path = %path.display(), %err, "skipping unreadable corpus entry");
                        continue;
                    }
                };
                let sequence = match sequence_from_json(&bytes) {
                    Ok(sequence) => sequence,
                    Err(source) => {
                        let err = CorpusError::Parse { path: path.display().to_string(), source };
                        if stop_on_corrupted {
                            return Err(err);
                        }
                        tracing::warn!(path = %path.display(), %err, "skipping corrupted corpus entry");
                        continue;
                    }
                };
                let hash = sequence.hash();
                let file_name = path.file_name().unwrap().to_string_lossy().to_string();
                let entry = CorpusEntry { sequence, weight: 1, file_name };
                if is_test_result {
                    inner.test_result_entries.insert(hash, entry);
                } else {
                    inner.coverage_entries.insert(hash, entry);
                }
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// All entries from both sections, for replay (startup coverage seeding) or generator
    /// sampling base-set construction.
    pub fn all_entries(&self) -> Vec<CorpusEntry> {
        let inner = self.inner.read();
        inner.coverage_entries.values().chain(inner.test_result_entries.values()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.coverage_entries.len() + inner.test_result_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A read-only snapshot of the global coverage map, e.g. for test assertions or dashboards.
    pub fn coverage_snapshot(&self) -> CoverageMaps {
        self.inner.read().coverage.clone()
    }

    /// Weighted-random sample across both sections combined. Zero-weight entries are eligible
    /// only if no positive-weight entry exists (`spec.md` §4.8).
    pub fn sample_weighted<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<CorpusEntry> {
        let entries = self.all_entries();
        if entries.is_empty() {
            return None;
        }
        let total_positive: u64 = entries.iter().map(|e| e.weight).sum();
        if total_positive == 0 {
            let idx = rng.gen_range(0..entries.len());
            return Some(entries[idx].clone());
        }
        let mut target = rng.gen_range(0..total_positive);
        for entry in &entries {
            if target < entry.weight {
                return Some(entry.clone());
            }
            target -= entry.weight;
        }
        entries.last().cloned()
    }

    /// The single critical section combining coverage merge and entry insertion (`spec.md` §5,
    /// §4.8): merges `local_coverage` into the global map; if anything changed and
    /// `add_if_new_coverage`, deep-clones `sequence` into the coverage-increasing section with
    /// `weight`, deduplicated by sequence hash, and persists it atomically. Returns whether
    /// coverage changed.
    pub fn check_sequence_coverage_and_update(
        &self,
        sequence: &CallSequence,
        local_coverage: &CoverageMaps,
        weight: u64,
        add_if_new_coverage: bool,
    ) -> Result<bool, CorpusError> {
        let mut inner = self.inner.write();
        let changed = inner.coverage.update(local_coverage);
        if changed && add_if_new_coverage {
            let hash = sequence.hash();
            if !inner.coverage_entries.contains_key(&hash) {
                let file_name = hash_file_name(hash);
                self.persist(COVERAGE_SUBDIR, &file_name, sequence)?;
                inner.coverage_entries.insert(hash, CorpusEntry { sequence: sequence.clone(), weight, file_name });
            }
        }
        Ok(changed)
    }

    /// Records `sequence` into the test-result section with `weight`, deduplicated by hash
    /// (`spec.md` §4.8, invoked by the shrinker's finished callback when `RecordResultInCorpus`).
    pub fn add_test_result(&self, sequence: &CallSequence, weight: u64) -> Result<(), CorpusError> {
        let mut inner = self.inner.write();
        let hash = sequence.hash();
        if inner.test_result_entries.contains_key(&hash) {
            return Ok(());
        }
        let file_name = hash_file_name(hash);
        self.persist(TEST_RESULTS_SUBDIR, &file_name, sequence)?;
        inner.test_result_entries.insert(hash, CorpusEntry { sequence: sequence.clone(), weight, file_name });
        Ok(())
    }

    fn persist(&self, subdir: &str, file_name: &str, sequence: &CallSequence) -> Result<(), CorpusError> {
        let path = self.directory.join(subdir).join(file_name);
        let bytes = sequence_to_json(sequence).map_err(|source| CorpusError::Parse { path: path.display().to_string(), source })?;
        write_atomic(&path, &bytes).map_err(|source| CorpusError::Write { path: path.display().to_string(), source })
    }

    /// Replays each coverage-section entry in isolation via `replay`, which must return the
    /// incremental `CoverageMaps` that entry alone produces. An entry whose contribution adds
    /// nothing beyond the union of every other entry's contribution is dominated and dropped
    /// (`spec.md` §4.8). Idempotent modulo replay order (`spec.md` §8 scenario S6).
    pub fn prune_sequences<F>(&self, mut replay: F) -> Result<usize, CorpusError>
    where
        F: FnMut(&CallSequence) -> Result<CoverageMaps, CorpusError>,
    {
        let snapshot = self.all_entries();
        let mut contributions = Vec::with_capacity(snapshot.len());
        for entry in &snapshot {
            contributions.push((entry.clone(), replay(&entry.sequence)?));
        }

        let mut to_remove = Vec::new();
        for i in 0..contributions.len() {
            let mut union_of_others = CoverageMaps::new();
            for (j, (_, coverage)) in contributions.iter().enumerate() {
                if i != j {
                    union_of_others.update(coverage);
                }
            }
            if !union_of_others.update(&contributions[i].1) {
                to_remove.push(contributions[i].0.sequence.hash());
            }
        }

        let mut inner = self.inner.write();
        let mut removed = 0;
        for hash in to_remove {
            if inner.coverage_entries.remove(&hash).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Attempts to replay every corpus file via `try_replay`; files that fail are reported
    /// invalid and, if `delete_invalid`, removed from disk (`spec.md` §4.8).
    pub fn clean_invalid_sequences<F>(&self, mut try_replay: F, delete_invalid: bool) -> Result<CleanReport, CorpusError>
    where
        F: FnMut(&CallSequence) -> bool,
    {
        let mut inner = self.inner.write();
        let mut invalid = Vec::new();
        let mut valid = 0usize;
        let mut total = 0usize;

        for (section, is_test_result) in [(COVERAGE_SUBDIR, false), (TEST_RESULTS_SUBDIR, true)] {
            let entries = if is_test_result { &mut inner.test_result_entries } else { &mut inner.coverage_entries };
            let bad_hashes: Vec<B256> = entries
                .iter()
                .filter_map(|(hash, entry)| {
                    total += 1;
                    if try_replay(&entry.sequence) {
                        valid += 1;
                        None
                    } else {
                        Some(*hash)
                    }
                })
                .collect();
            for hash in bad_hashes {
                if let Some(entry) = entries.remove(&hash) {
                    if delete_invalid {
                        let path = self.directory.join(section).join(&entry.file_name);
                        let _ = std::fs::remove_file(path);
                    }
                    invalid.push(entry.file_name);
                }
            }
        }
        Ok(CleanReport { total, valid, invalid })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Result of [`Corpus::clean_invalid_sequences`].
#[derive(Debug, Clone)]
pub struct CleanReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use covfuzz_chain::{CallMessage, CallSequenceElement};
    use alloy_primitives::{Address, Bytes, U256};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_sequence(nonce: u64) -> CallSequence {
        let mut seq = CallSequence::new();
        let call = CallMessage {
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            value: U256::ZERO,
            gas_limit: 21_000,
            gas_price: U256::from(1u8),
            nonce,
            input: Bytes::from(vec![nonce as u8]),
            arguments: Vec::new(),
        };
        seq.push(CallSequenceElement::new(Address::repeat_byte(2), call, 0, 0));
        seq
    }

    #[test]
    fn check_sequence_coverage_and_update_adds_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();
        let seq = sample_sequence(1);

        let mut local = CoverageMaps::new();
        local.set_covered_at(B256::repeat_byte(9), 4, 0).unwrap();

        assert!(corpus.check_sequence_coverage_and_update(&seq, &local, 1, true).unwrap());
        assert_eq!(corpus.len(), 1);

        // Re-merging identical coverage for a different sequence changes nothing and adds nothing.
        let seq2 = sample_sequence(2);
        assert!(!corpus.check_sequence_coverage_and_update(&seq2, &local, 1, true).unwrap());
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn dedup_by_sequence_hash() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();
        let seq = sample_sequence(1);
        let mut local = CoverageMaps::new();
        local.set_covered_at(B256::repeat_byte(1), 2, 0).unwrap();
        corpus.check_sequence_coverage_and_update(&seq, &local, 1, true).unwrap();

        let mut local2 = CoverageMaps::new();
        local2.set_covered_at(B256::repeat_byte(2), 2, 0).unwrap();
        corpus.check_sequence_coverage_and_update(&seq, &local2, 1, true).unwrap();
        assert_eq!(corpus.len(), 1, "same sequence hash must not duplicate the corpus entry");
    }

    #[test]
    fn persisted_entries_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let corpus = Corpus::open(dir.path()).unwrap();
            let seq = sample_sequence(1);
            let mut local = CoverageMaps::new();
            local.set_covered_at(B256::repeat_byte(1), 2, 0).unwrap();
            corpus.check_sequence_coverage_and_update(&seq, &local, 5, true).unwrap();
        }
        let reopened = Corpus::open(dir.path()).unwrap();
        assert_eq!(reopened.load_from_disk(false).unwrap(), 1);
        assert_eq!(reopened.all_entries().len(), 1);
    }

    #[test]
    fn load_from_disk_skips_a_corrupted_entry_by_default() {
        let dir = tempfile::tempdir().unwrap();
        {
            let corpus = Corpus::open(dir.path()).unwrap();
            let seq = sample_sequence(1);
            let mut local = CoverageMaps::new();
            local.set_covered_at(B256::repeat_byte(1), 2, 0).unwrap();
            corpus.check_sequence_coverage_and_update(&seq, &local, 5, true).unwrap();
        }
        std::fs::write(dir.path().join(COVERAGE_SUBDIR).join("corrupt.json"), b"not json").unwrap();

        let reopened = Corpus::open(dir.path()).unwrap();
        assert_eq!(reopened.load_from_disk(false).unwrap(), 1);
        assert_eq!(reopened.all_entries().len(), 1);
    }

    #[test]
    fn load_from_disk_errors_on_a_corrupted_entry_when_stop_is_set() {
        let dir = tempfile::tempdir().unwrap();
        {
            let corpus = Corpus::open(dir.path()).unwrap();
            let seq = sample_sequence(1);
            let mut local = CoverageMaps::new();
            local.set_covered_at(B256::repeat_byte(1), 2, 0).unwrap();
            corpus.check_sequence_coverage_and_update(&seq, &local, 5, true).unwrap();
        }
        std::fs::write(dir.path().join(COVERAGE_SUBDIR).join("corrupt.json"), b"not json").unwrap();

        let reopened = Corpus::open(dir.path()).unwrap();
        assert!(reopened.load_from_disk(true).is_err());
    }

    #[test]
    fn sample_weighted_prefers_positive_weight_entries() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();
        let seq = sample_sequence(1);
        let mut local = CoverageMaps::new();
        local.set_covered_at(B256::repeat_byte(1), 2, 0).unwrap();
        corpus.check_sequence_coverage_and_update(&seq, &local, 10, true).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(corpus.sample_weighted(&mut rng).is_some());
    }

    #[test]
    fn prune_drops_dominated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();

        let seq_a = sample_sequence(1);
        let mut cov_a = CoverageMaps::new();
        cov_a.set_covered_at(B256::repeat_byte(1), 4, 0).unwrap();
        cov_a.set_covered_at(B256::repeat_byte(1), 4, 1).unwrap();
        corpus.check_sequence_coverage_and_update(&seq_a, &cov_a, 1, true).unwrap();

        let seq_b = sample_sequence(2);
        let mut cov_b = CoverageMaps::new();
        cov_b.set_covered_at(B256::repeat_byte(1), 4, 0).unwrap(); // subset of cov_a
        corpus.check_sequence_coverage_and_update(&seq_b, &cov_b, 1, true).unwrap();

        assert_eq!(corpus.len(), 2);
        let removed = corpus
            .prune_sequences(|seq| {
                if seq.hash() == seq_a.hash() {
                    Ok(cov_a.clone())
                } else {
                    Ok(cov_b.clone())
                }
            })
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn prune_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();
        let seq = sample_sequence(1);
        let mut cov = CoverageMaps::new();
        cov.set_covered_at(B256::repeat_byte(1), 4, 0).unwrap();
        corpus.check_sequence_coverage_and_update(&seq, &cov, 1, true).unwrap();

        let first = corpus.prune_sequences(|_| Ok(cov.clone())).unwrap();
        let second = corpus.prune_sequences(|_| Ok(cov.clone())).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 0);
    }

    #[test]
    fn clean_invalid_sequences_removes_unreplayable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::open(dir.path()).unwrap();
        let seq = sample_sequence(1);
        let mut cov = CoverageMaps::new();
        cov.set_covered_at(B256::repeat_byte(1), 4, 0).unwrap();
        corpus.check_sequence_coverage_and_update(&seq, &cov, 1, true).unwrap();

        let report = corpus.clean_invalid_sequences(|_| false, true).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.valid, 0);
        assert_eq!(report.invalid.len(), 1);
        assert!(corpus.is_empty());
    }
}
