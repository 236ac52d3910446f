//! Code-identity resolution: `spec.md` §4.1's "resolved code hash".
//!
//! Real compiler metadata trailers are CBOR-encoded and end in a 2-byte big-endian length; full
//! CBOR decoding is a compiler-front-end concern (out of scope per `spec.md` §1), so this crate
//! only recognizes a minimal marker-plus-hash trailer shape and falls back to keccak256 of the
//! whole runtime code otherwise. Either way, distinct deployments of the same logical contract
//! resolve to the same key, letting their coverage merge (`spec.md` §4.1).
use alloy_primitives::{keccak256, B256};

const METADATA_MARKER: &[u8] = b"covfuzzmeta";

/// Resolves the coverage-map key for a piece of runtime code.
pub fn resolve_code_hash(runtime_code: &[u8]) -> B256 {
    try_extract_metadata_hash(runtime_code).unwrap_or_else(|| keccak256(runtime_code))
}

fn try_extract_metadata_hash(code: &[u8]) -> Option<B256> {
    if code.len() < 2 {
        return None;
    }
    let (body, trailer) = code.split_at(code.len() - 2);
    let metadata_len = u16::from_be_bytes([trailer[0], trailer[1]]) as usize;
    if metadata_len == 0 || metadata_len > body.len() {
        return None;
    }
    let metadata = &body[body.len() - metadata_len..];
    let marker_pos = metadata.windows(METADATA_MARKER.len()).position(|w| w == METADATA_MARKER)?;
    let hash_start = marker_pos + METADATA_MARKER.len();
    let hash_bytes = metadata.get(hash_start..hash_start + 32)?;
    Some(B256::from_slice(hash_bytes))
}
