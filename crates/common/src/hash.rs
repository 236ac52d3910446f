use alloy_primitives::keccak256;
use std::fmt::Write as _;

/// Lower-case hex-encoded keccak256, used wherever a human-readable content-addressed name is
/// needed (e.g. corpus filenames).
pub fn keccak256_hex(data: &[u8]) -> String {
    let digest = keccak256(data);
    let mut out = String::with_capacity(64);
    for byte in digest.as_slice() {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding_is_lowercase_and_fixed_length() {
        let digest = keccak256_hex(b"covfuzz");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, digest.to_lowercase());
    }
}
