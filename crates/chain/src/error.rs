use alloy_primitives::Address;
use thiserror::Error;

/// Chain-level errors: failure to even submit a transaction, as opposed to a reverted execution
/// result (which is data on [`crate::model::MessageResult`], not an error — see `spec.md` §7).
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("failed to create block: {0}")]
    BlockCreationFailed(String),

    #[error("out of budget: {0}")]
    OutOfBudget(String),

    #[error("chain state is corrupted: {0}")]
    StateCorrupted(String),

    #[error("no contract deployed at {0}")]
    UnknownDeployment(Address),

    #[error("failed to revert to block {target}: {reason}")]
    RevertFailed { target: u64, reason: String },
}
