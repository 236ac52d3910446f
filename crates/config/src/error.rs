use thiserror::Error;

/// Configuration errors are raised at startup; the Fuzzer never starts if one is returned
/// (`spec.md` §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1, got {value}")]
    MustBePositive { field: &'static str, value: u64 },

    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}
